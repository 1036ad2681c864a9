//! # Connection Command Handler
//!
//! OAuth connections are created pending, then approved with the code and
//! state the provider hands back to the redirect URL.

use crate::{
    cli_utils,
    commands::shared::{
        ApiUrlBuilder, CharterCollection, HttpOperations, dispatch_command, parse_body_or_exit,
        parse_id_or_exit, print_document, validate_args_count_or_exit,
    },
    http_utils,
};

const CONNECTION_USAGE: &str =
    "Usage: galleyctl connection <create|approve|list|get|revoke> [args...]";

const CONNECTIONS: CharterCollection = CharterCollection {
    segment: "connections",
    noun: "connection",
    command: "connection",
};

pub async fn handle_connection_command(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    dispatch_command!("connection", CONNECTION_USAGE, args, client, output_format, {
        "create" => handle_connection_create,
        "approve" => handle_connection_approve,
        "list" => handle_connection_list,
        "get" => handle_connection_get,
        "revoke" => handle_connection_revoke,
    });
}

/// Starts an OAuth connection and prints its authorization URL.
async fn handle_connection_create(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        4,
        4,
        "create",
        "Usage: galleyctl connection create <vessel-id> <charter-id> <body>",
    );
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let charter_id = parse_id_or_exit(&args[2], "charter ID");
    let body = parse_body_or_exit(&args[3]);
    let path = ApiUrlBuilder::charter_scoped(vessel_id, charter_id, CONNECTIONS.segment, None);
    let document = HttpOperations::post(client, &path, &body, "create connection").await;
    match document["data"]["attributes"]["authorization_url"].as_str() {
        Some(url) if output_format == cli_utils::OutputFormat::Json => {
            println!("Open this URL to authorize the connection:\n{}", url)
        }
        _ => print_document(&document, output_format, "connection"),
    }
}

async fn handle_connection_approve(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        4,
        4,
        "approve",
        "Usage: galleyctl connection approve <vessel-id> <charter-id> <body>",
    );
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let charter_id = parse_id_or_exit(&args[2], "charter ID");
    let body = parse_body_or_exit(&args[3]);
    let path = ApiUrlBuilder::charter_scoped(
        vessel_id,
        charter_id,
        CONNECTIONS.segment,
        Some("approve"),
    );
    let document = HttpOperations::post(client, &path, &body, "approve connection").await;
    print_document(&document, output_format, "connection");
}

async fn handle_connection_list(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    CONNECTIONS.list(args, client, output_format).await
}

async fn handle_connection_get(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    CONNECTIONS.get(args, client, output_format).await
}

async fn handle_connection_revoke(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    CONNECTIONS.delete(args, client, output_format).await
}
