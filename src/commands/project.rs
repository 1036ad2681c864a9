//! # Project Command Handler

use crate::{
    cli_utils,
    commands::shared::{CharterCollection, dispatch_command},
    http_utils,
};

const PROJECT_USAGE: &str = "Usage: galleyctl project <create|list|get|update|delete> [args...]";

const PROJECTS: CharterCollection = CharterCollection {
    segment: "projects",
    noun: "project",
    command: "project",
};

pub async fn handle_project_command(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    dispatch_command!("project", PROJECT_USAGE, args, client, output_format, {
        "create" => handle_project_create,
        "list" => handle_project_list,
        "get" => handle_project_get,
        "update" => handle_project_update,
        "delete" => handle_project_delete,
    });
}

async fn handle_project_create(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    PROJECTS.create(args, client, output_format).await
}

async fn handle_project_list(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    PROJECTS.list(args, client, output_format).await
}

async fn handle_project_get(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    PROJECTS.get(args, client, output_format).await
}

async fn handle_project_update(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    PROJECTS.update(args, client, output_format).await
}

async fn handle_project_delete(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    PROJECTS.delete(args, client, output_format).await
}
