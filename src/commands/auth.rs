//! # Auth Command Handler
//!
//! Activates accounts, signs in, exchanges tokens and signs out. Tokens are printed on stdout so
//! they can be captured into `GALLEY_TOKEN`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};

use crate::{
    cli_utils,
    commands::shared::{HttpOperations, dispatch_command, validate_args_count_or_exit},
    http_utils,
};

const AUTH_USAGE: &str =
    "Usage: galleyctl auth <activate|sign-in|refresh|access|sign-out> [args...]";

pub async fn handle_auth_command(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    dispatch_command!("auth", AUTH_USAGE, args, client, output_format, {
        "activate" => handle_activate,
        "sign-in" => handle_sign_in,
        "refresh" => handle_refresh,
        "access" => handle_access,
        "sign-out" => handle_sign_out,
    });
}

fn token_from(document: &Value, field: &str) -> String {
    document["data"][field]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| {
            cli_utils::exit_with_error(&format!("Response did not contain {}", field))
        })
}

/// Turns an activation link, or just its last segment, into the activation
/// request body.
pub fn activation_body(link: &str) -> Option<Value> {
    let segment = link.rsplit('/').next()?;
    let decoded = String::from_utf8(STANDARD.decode(segment).ok()?).ok()?;
    let mut fields = decoded.splitn(4, '.');
    let (crew_id, vessel_id, user_id, salt) =
        (fields.next()?, fields.next()?, fields.next()?, fields.next()?);
    Some(json!({
        "crewId": crew_id,
        "vesselId": vessel_id,
        "userId": user_id,
        "activationSalt": salt,
    }))
}

async fn handle_activate(
    args: &[String],
    client: &http_utils::GalleyClient,
    _output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(args, 2, 2, "activate", "Usage: galleyctl auth activate <link>");
    let body = activation_body(&args[1])
        .unwrap_or_else(|| cli_utils::exit_with_error("Activation link is malformed"));
    HttpOperations::post(client, "/auth/activate", &body, "activate account").await;
    println!("Account activated");
}

/// Handles sign-in; prints a refresh token.
async fn handle_sign_in(
    args: &[String],
    client: &http_utils::GalleyClient,
    _output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(args, 2, 2, "sign-in", "Usage: galleyctl auth sign-in <email>");
    let body = json!({ "email": args[1] });
    let document = HttpOperations::post(client, "/auth/sign-in", &body, "sign in").await;
    println!("{}", token_from(&document, "refreshToken"));
}

/// Handles refresh token rotation; prints the new refresh token.
async fn handle_refresh(
    args: &[String],
    client: &http_utils::GalleyClient,
    _output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        2,
        2,
        "refresh",
        "Usage: galleyctl auth refresh <refresh-token>",
    );
    let body = json!({ "refreshToken": args[1] });
    let document =
        HttpOperations::post(client, "/auth/token/refresh", &body, "refresh token").await;
    println!("{}", token_from(&document, "refreshToken"));
}

/// Handles access token issuance; prints the access token.
async fn handle_access(
    args: &[String],
    client: &http_utils::GalleyClient,
    _output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        2,
        2,
        "access",
        "Usage: galleyctl auth access <refresh-token>",
    );
    let body = json!({ "refreshToken": args[1] });
    let document =
        HttpOperations::post(client, "/auth/token/access", &body, "issue access token").await;
    println!("{}", token_from(&document, "accessToken"));
}

async fn handle_sign_out(
    args: &[String],
    client: &http_utils::GalleyClient,
    _output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(args, 1, 1, "sign-out", "Usage: galleyctl auth sign-out");
    HttpOperations::post(client, "/auth/sign-out", &json!({}), "sign out").await;
    println!("Signed out");
}
