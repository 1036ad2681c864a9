//! # Compute Plan Command Handler
//!
//! Bodies carry `name`, `application`, `requests`, `limits` and `billing`.

use crate::{
    cli_utils,
    commands::shared::{CharterCollection, dispatch_command},
    http_utils,
};

const COMPUTE_PLAN_USAGE: &str =
    "Usage: galleyctl compute-plan <create|list|get|update|delete> [args...]";

const COMPUTE_PLANS: CharterCollection = CharterCollection {
    segment: "compute-plans",
    noun: "compute plan",
    command: "compute-plan",
};

pub async fn handle_compute_plan_command(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    dispatch_command!("compute-plan", COMPUTE_PLAN_USAGE, args, client, output_format, {
        "create" => handle_compute_plan_create,
        "list" => handle_compute_plan_list,
        "get" => handle_compute_plan_get,
        "update" => handle_compute_plan_update,
        "delete" => handle_compute_plan_delete,
    });
}

async fn handle_compute_plan_create(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    COMPUTE_PLANS.create(args, client, output_format).await
}

async fn handle_compute_plan_list(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    COMPUTE_PLANS.list(args, client, output_format).await
}

async fn handle_compute_plan_get(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    COMPUTE_PLANS.get(args, client, output_format).await
}

async fn handle_compute_plan_update(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    COMPUTE_PLANS.update(args, client, output_format).await
}

async fn handle_compute_plan_delete(
    args: &[String],
    client: &http_utils::GalleyClient,
    output_format: cli_utils::OutputFormat,
) {
    COMPUTE_PLANS.delete(args, client, output_format).await
}
