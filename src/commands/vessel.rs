//! # Vessel Command Handler

use serde_json::json;

use crate::{
    cli_utils,
    commands::shared::{
        ApiUrlBuilder, HttpOperations, dispatch_command, parse_id_or_exit, print_document,
        validate_args_count_or_exit,
    },
    http_utils,
};

const VESSEL_USAGE: &str = "Usage: galleyctl vessel <list|get|rename> [args...]";

pub async fn handle_vessel_command(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    dispatch_command!("vessel", VESSEL_USAGE, args, client, output_format, {
        "list" => handle_vessel_list,
        "get" => handle_vessel_get,
        "rename" => handle_vessel_rename,
    });
}

async fn handle_vessel_list(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(args, 1, 1, "list", "Usage: galleyctl vessel list");
    let document = HttpOperations::get(client, &ApiUrlBuilder::vessel(None), "list vessels").await;
    print_document(&document, output_format, "vessel");
}

async fn handle_vessel_get(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(args, 2, 2, "get", "Usage: galleyctl vessel get <vessel-id>");
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let document =
        HttpOperations::get(client, &ApiUrlBuilder::vessel(Some(vessel_id)), "get vessel").await;
    print_document(&document, output_format, "vessel");
}

/// Renames a vessel; only the captain may.
async fn handle_vessel_rename(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    validate_args_count_or_exit(
        args,
        3,
        3,
        "rename",
        "Usage: galleyctl vessel rename <vessel-id> <name>",
    );
    let vessel_id = parse_id_or_exit(&args[1], "vessel ID");
    let body = json!({ "name": args[2] });
    let document = HttpOperations::patch(
        client,
        &ApiUrlBuilder::vessel(Some(vessel_id)),
        &body,
        "rename vessel",
    )
    .await;
    print_document(&document, output_format, "vessel");
}
