//! # Engine Command Handler
//!
//! Lists a vessel's engines and talks to one through its connected agent.

use serde_json::json;

use crate::{
    cli_utils,
    commands::shared::{
        ApiUrlBuilder, HttpOperations, dispatch_command, parse_body_or_exit, parse_id_or_exit,
        print_document, validate_args_count_or_exit,
    },
    http_utils,
};

const ENGINE_USAGE: &str = "Usage: galleyctl engine <list|nodes|apply> [args...]";

pub async fn handle_engine_command(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    dispatch_command!("engine", ENGINE_USAGE, args, client, output_format, {
        "list" => handle_engine_list,
        "nodes" => handle_engine_nodes,
        "apply" => handle_engine_apply,
    });
}

async fn handle_engine_list(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(args, 2, 2, "list", "Usage: galleyctl engine list <vessel-id>");
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let path = format!("{}/engines", ApiUrlBuilder::vessel(Some(vessel_id)));
    let document = HttpOperations::get(client, &path, "list engines").await;
    print_document(&document, output_format, "engine");
}

async fn handle_engine_nodes(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        3,
        3,
        "nodes",
        "Usage: galleyctl engine nodes <vessel-id> <engine-id>",
    );
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let engine_id = parse_id_or_exit(&args[2], "engine ID");
    let path = ApiUrlBuilder::engine(vessel_id, engine_id, "nodes");
    let document = HttpOperations::get(client, &path, "get engine nodes").await;
    print_document(&document, output_format, "node");
}

/// Applies manifests read from a JSON or YAML file. A bare array is wrapped
/// as `{"manifests": [...]}`.
async fn handle_engine_apply(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        4,
        4,
        "apply",
        "Usage: galleyctl engine apply <vessel-id> <engine-id> <body>",
    );
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let engine_id = parse_id_or_exit(&args[2], "engine ID");
    let body = match parse_body_or_exit(&args[3]) {
        manifests @ serde_json::Value::Array(_) => json!({ "manifests": manifests }),
        body => body,
    };
    let path = ApiUrlBuilder::engine(vessel_id, engine_id, "apply");
    let document = HttpOperations::post(client, &path, &body, "apply manifests").await;
    print_document(&document, output_format, "result");
}
