//! # Charter Command Handler

use crate::{
    cli_utils,
    commands::shared::{
        ApiUrlBuilder, HttpOperations, dispatch_command, parse_body_or_exit, parse_id_or_exit,
        print_document, validate_args_count_or_exit,
    },
    http_utils,
};

const CHARTER_USAGE: &str = "Usage: galleyctl charter <create|list|get|update|delete> [args...]";

pub async fn handle_charter_command(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    dispatch_command!("charter", CHARTER_USAGE, args, client, output_format, {
        "create" => handle_charter_create,
        "list" => handle_charter_list,
        "get" => handle_charter_get,
        "update" => handle_charter_update,
        "delete" => handle_charter_delete,
    });
}

async fn handle_charter_create(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        3,
        3,
        "create",
        "Usage: galleyctl charter create <vessel-id> <body>",
    );
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let body = parse_body_or_exit(&args[2]);
    let path = ApiUrlBuilder::charter(vessel_id, None);
    let document = HttpOperations::post(client, &path, &body, "create charter").await;
    print_document(&document, output_format, "charter");
}

async fn handle_charter_list(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(args, 2, 2, "list", "Usage: galleyctl charter list <vessel-id>");
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let path = ApiUrlBuilder::charter(vessel_id, None);
    let document = HttpOperations::get(client, &path, "list charters").await;
    print_document(&document, output_format, "charter");
}

async fn handle_charter_get(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        3,
        3,
        "get",
        "Usage: galleyctl charter get <vessel-id> <charter-id>",
    );
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let charter_id = parse_id_or_exit(&args[2], "charter ID");
    let path = ApiUrlBuilder::charter(vessel_id, Some(charter_id));
    let document = HttpOperations::get(client, &path, "get charter").await;
    print_document(&document, output_format, "charter");
}

async fn handle_charter_update(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        4,
        4,
        "update",
        "Usage: galleyctl charter update <vessel-id> <charter-id> <body>",
    );
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let charter_id = parse_id_or_exit(&args[2], "charter ID");
    let body = parse_body_or_exit(&args[3]);
    let path = ApiUrlBuilder::charter(vessel_id, Some(charter_id));
    let document = HttpOperations::patch(client, &path, &body, "update charter").await;
    print_document(&document, output_format, "charter");
}

async fn handle_charter_delete(
    args: &[String],
    client: &http_utils::GalleyClient,
    _output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        3,
        3,
        "delete",
        "Usage: galleyctl charter delete <vessel-id> <charter-id>",
    );
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let charter_id = parse_id_or_exit(&args[2], "charter ID");
    let path = ApiUrlBuilder::charter(vessel_id, Some(charter_id));
    HttpOperations::delete(client, &path, "delete charter").await;
    println!("Deleted charter: {}", charter_id);
}
