//! # Shared Command Utilities
//!
//! This module provides shared validation, parsing, and utility functions
//! used across multiple command handlers to reduce code duplication.

use std::path::Path;

use handled::Handle;
use serde_json::Value;
use uuid::Uuid;

use crate::commands::errors::{HttpOperationError, IdParseError, UserError, ValidationError, format_cli_error};
use crate::{cli_utils, http_utils};

fn exit_with_user_error<E>(error: &E) -> !
where
    E: Handle<UserError> + std::fmt::Display,
{
    eprintln!("{}", format_cli_error(error));
    std::process::exit(1);
}

/// Parses a UUID argument, naming `kind` in the error.
pub fn parse_id_or_exit(input: &str, kind: &str) -> Uuid {
    input.parse().unwrap_or_else(|_| {
        exit_with_user_error(&IdParseError {
            kind: kind.to_string(),
            input: input.to_string(),
        })
    })
}

/// Parses a request body from inline JSON, or from a file when the argument
/// is `@path`. Files ending in `.yaml` or `.yml` are read as YAML.
pub fn parse_body(argument: &str) -> Result<Value, ValidationError> {
    let invalid = |reason: String| ValidationError {
        field: "body".to_string(),
        value: argument.to_string(),
        reason,
    };
    let Some(file_path) = argument.strip_prefix('@') else {
        return serde_json::from_str(argument).map_err(|e| invalid(e.to_string()));
    };
    let content = std::fs::read_to_string(file_path)
        .map_err(|e| invalid(format!("failed to read file: {}", e)))?;
    let is_yaml = Path::new(file_path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);
    if is_yaml {
        serde_yml::from_str(&content).map_err(|e| invalid(e.to_string()))
    } else {
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
    }
}

/// [`parse_body`], exiting with a hint on failure.
pub fn parse_body_or_exit(argument: &str) -> Value {
    parse_body(argument).unwrap_or_else(|e| exit_with_user_error(&e))
}

/// Validates both minimum and maximum argument counts.
///
/// # Arguments
/// * `args` - The command arguments array
/// * `min_count` - The minimum number of arguments required (including subcommand)
/// * `max_count` - The maximum number of arguments allowed (including subcommand)
/// * `command` - The command name for error message
/// * `usage` - The usage string to display
pub fn validate_args_count_or_exit(
    args: &[String],
    min_count: usize,
    max_count: usize,
    command: &str,
    usage: &str,
) {
    if args.len() < min_count {
        cli_utils::exit_with_usage_error(
            &format!("{} command requires more arguments", command),
            usage,
        );
    }
    if args.len() > max_count {
        cli_utils::exit_with_usage_error(
            &format!("{} command has too many arguments", command),
            usage,
        );
    }
}

/// Macro to generate command dispatcher boilerplate.
macro_rules! dispatch_command {
    ($command_name:expr, $usage:expr, $args:expr, $client:expr, $output_format:expr, {
        $($subcommand:expr => $handler:expr),* $(,)?
    }) => {
        if $args.is_empty() {
            crate::cli_utils::exit_with_usage_error(
                &format!("{} command requires a subcommand", $command_name),
                $usage,
            );
        }

        match $args[0].as_str() {
            $(
                $subcommand => $handler($args, $client, $output_format).await,
            )*
            _ => {
                let available_subcommands = vec![$($subcommand),*];
                crate::cli_utils::exit_with_error(&format!(
                    "Unknown {} subcommand '{}'. Available subcommands: {}",
                    $command_name,
                    $args[0],
                    available_subcommands.join(", ")
                ));
            }
        }
    };
}

pub(crate) use dispatch_command;

/// HTTP operation helper utilities to reduce duplicate request patterns.
pub struct HttpOperations;

impl HttpOperations {
    async fn run<F>(operation: F, context: &str) -> Value
    where
        F: std::future::Future<Output = Result<Value, Box<dyn std::error::Error>>>,
    {
        match operation.await {
            Ok(document) => document,
            Err(e) => exit_with_user_error(&HttpOperationError::from_error(context, e.as_ref())),
        }
    }

    /// Generic GET operation with error handling.
    pub async fn get(client: &http_utils::GalleyClient, path: &str, context: &str) -> Value {
        Self::run(client.get(path), context).await
    }

    /// Generic POST operation with error handling.
    pub async fn post(
        client: &http_utils::GalleyClient,
        path: &str,
        body: &Value,
        context: &str,
    ) -> Value {
        Self::run(client.post(path, body), context).await
    }

    /// Generic PATCH operation with error handling.
    pub async fn patch(
        client: &http_utils::GalleyClient,
        path: &str,
        body: &Value,
        context: &str,
    ) -> Value {
        Self::run(client.patch(path, body), context).await
    }

    /// Generic DELETE operation with error handling.
    pub async fn delete(client: &http_utils::GalleyClient, path: &str, context: &str) {
        Self::run(client.delete(path), context).await;
    }
}

/// URL builder utilities for API endpoints to eliminate duplicate path construction.
pub struct ApiUrlBuilder;

impl ApiUrlBuilder {
    /// Build vessel API URL.
    pub fn vessel(id: Option<Uuid>) -> String {
        match id {
            Some(id) => format!("/vessels/{}", id),
            None => "/vessels".to_string(),
        }
    }

    /// Build charter API URL.
    pub fn charter(vessel_id: Uuid, id: Option<Uuid>) -> String {
        match id {
            Some(id) => format!("/vessels/{}/charters/{}", vessel_id, id),
            None => format!("/vessels/{}/charters", vessel_id),
        }
    }

    /// Build the URL of a collection nested under a charter, such as
    /// `projects` or `compute-plans`.
    pub fn charter_scoped(
        vessel_id: Uuid,
        charter_id: Uuid,
        collection: &str,
        id: Option<&str>,
    ) -> String {
        let base = format!(
            "/vessels/{}/charters/{}/{}",
            vessel_id, charter_id, collection
        );
        match id {
            Some(id) => format!("{}/{}", base, id),
            None => base,
        }
    }

    /// Build vessel engine API URL.
    pub fn engine(vessel_id: Uuid, vessel_engine_id: Uuid, action: &str) -> String {
        format!("/vessels/{}/engines/{}/{}", vessel_id, vessel_engine_id, action)
    }
}

/// A resource collection nested under a charter, served with the same
/// list/get/create/update/delete verbs.
pub struct CharterCollection {
    /// Path segment, e.g. `compute-plans`
    pub segment: &'static str,
    /// Singular noun for messages
    pub noun: &'static str,
    /// Command name for usage text
    pub command: &'static str,
}

impl CharterCollection {
    fn usage(&self, verb: &str, extra: &str) -> String {
        format!(
            "Usage: galleyctl {} {} <vessel-id> <charter-id>{}",
            self.command, verb, extra
        )
    }

    fn ids(&self, args: &[String]) -> (Uuid, Uuid) {
        (
            parse_id_or_exit(&args[1], "vessel ID"),
            parse_id_or_exit(&args[2], "charter ID"),
        )
    }

    pub async fn list(
        &self,
        args: &[String],
        client: &http_utils::GalleyClient,
        output_format: cli_utils::OutputFormat,
    ) {
        validate_args_count_or_exit(args, 3, 3, "list", &self.usage("list", ""));
        let (vessel_id, charter_id) = self.ids(args);
        let path = ApiUrlBuilder::charter_scoped(vessel_id, charter_id, self.segment, None);
        let document =
            HttpOperations::get(client, &path, &format!("list {}s", self.noun)).await;
        print_document(&document, output_format, self.noun);
    }

    pub async fn get(
        &self,
        args: &[String],
        client: &http_utils::GalleyClient,
        output_format: cli_utils::OutputFormat,
    ) {
        let usage = self.usage("get", &format!(" <{}-id>", self.noun));
        validate_args_count_or_exit(args, 4, 4, "get", &usage);
        let (vessel_id, charter_id) = self.ids(args);
        let id = parse_id_or_exit(&args[3], &format!("{} ID", self.noun));
        let path = ApiUrlBuilder::charter_scoped(
            vessel_id,
            charter_id,
            self.segment,
            Some(&id.to_string()),
        );
        let document = HttpOperations::get(client, &path, &format!("get {}", self.noun)).await;
        print_document(&document, output_format, self.noun);
    }

    pub async fn create(
        &self,
        args: &[String],
        client: &http_utils::GalleyClient,
        output_format: cli_utils::OutputFormat,
    ) {
        validate_args_count_or_exit(args, 4, 4, "create", &self.usage("create", " <body>"));
        let (vessel_id, charter_id) = self.ids(args);
        let body = parse_body_or_exit(&args[3]);
        let path = ApiUrlBuilder::charter_scoped(vessel_id, charter_id, self.segment, None);
        let document =
            HttpOperations::post(client, &path, &body, &format!("create {}", self.noun)).await;
        print_document(&document, output_format, self.noun);
    }

    pub async fn update(
        &self,
        args: &[String],
        client: &http_utils::GalleyClient,
        output_format: cli_utils::OutputFormat,
    ) {
        let usage = self.usage("update", &format!(" <{}-id> <body>", self.noun));
        validate_args_count_or_exit(args, 5, 5, "update", &usage);
        let (vessel_id, charter_id) = self.ids(args);
        let id = parse_id_or_exit(&args[3], &format!("{} ID", self.noun));
        let body = parse_body_or_exit(&args[4]);
        let path = ApiUrlBuilder::charter_scoped(
            vessel_id,
            charter_id,
            self.segment,
            Some(&id.to_string()),
        );
        let document =
            HttpOperations::patch(client, &path, &body, &format!("update {}", self.noun)).await;
        print_document(&document, output_format, self.noun);
    }

    pub async fn delete(
        &self,
        args: &[String],
        client: &http_utils::GalleyClient,
        _output_format: cli_utils::OutputFormat,
    ) {
        let usage = self.usage("delete", &format!(" <{}-id>", self.noun));
        validate_args_count_or_exit(args, 4, 4, "delete", &usage);
        let (vessel_id, charter_id) = self.ids(args);
        let id = parse_id_or_exit(&args[3], &format!("{} ID", self.noun));
        let path = ApiUrlBuilder::charter_scoped(
            vessel_id,
            charter_id,
            self.segment,
            Some(&id.to_string()),
        );
        HttpOperations::delete(client, &path, &format!("delete {}", self.noun)).await;
        println!("Deleted {}: {}", self.noun, id);
    }
}

/// Prints the `data` member of a response document, or a notice when a list
/// came back empty.
pub fn print_document(document: &Value, output_format: cli_utils::OutputFormat, noun: &str) {
    let data = document.get("data").unwrap_or(document);
    if data.as_array().is_some_and(|items| items.is_empty()) {
        println!("No {}s found", noun);
        return;
    }
    cli_utils::print_formatted_or_exit(data, output_format, noun);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        let vessel = Uuid::nil();
        assert_eq!(ApiUrlBuilder::vessel(None), "/vessels");
        assert_eq!(
            ApiUrlBuilder::charter_scoped(vessel, vessel, "compute-plans", Some("x")),
            format!("/vessels/{0}/charters/{0}/compute-plans/x", vessel)
        );
        assert_eq!(
            ApiUrlBuilder::engine(vessel, vessel, "nodes"),
            format!("/vessels/{0}/engines/{0}/nodes", vessel)
        );
    }

    #[test]
    fn inline_bodies() {
        let body = parse_body(r#"{"name": "web"}"#).unwrap();
        assert_eq!(body["name"], "web");
        let err = parse_body("{name").unwrap_err();
        assert_eq!(err.field, "body");
        let err = parse_body("@/nonexistent/body.json").unwrap_err();
        assert!(err.reason.starts_with("failed to read file"));
    }

    #[test]
    fn yaml_file_bodies() {
        let path = std::env::temp_dir().join(format!("galleyctl-{}.yaml", Uuid::new_v4()));
        std::fs::write(&path, "name: web\nenvironment: production\n").unwrap();
        let body = parse_body(&format!("@{}", path.display())).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(body["environment"], "production");
    }
}
