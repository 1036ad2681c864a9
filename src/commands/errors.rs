//! # Command Error Handling
//!
//! This module provides error handling utilities for galleyctl commands
//! using the handled crate for consistent error property extraction.

use std::error::Error;

use handled::Handle;

use crate::http_utils::HttpError;

/// User-friendly error information that can be extracted from various error types
#[derive(Debug, Clone)]
pub struct UserError {
    /// The main error message to display to the user
    pub message: String,
    /// Optional usage hint to help the user correct the error
    pub usage_hint: Option<String>,
}

impl std::fmt::Display for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Handle<UserError> for UserError {
    fn handle(&self) -> Option<UserError> {
        Some(self.clone())
    }
}

/// An identifier argument that is not a UUID.
#[derive(Debug)]
pub struct IdParseError {
    pub kind: String,
    pub input: String,
}

impl std::fmt::Display for IdParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid {} '{}'", self.kind, self.input)
    }
}

impl std::error::Error for IdParseError {}

impl Handle<UserError> for IdParseError {
    fn handle(&self) -> Option<UserError> {
        Some(UserError {
            message: self.to_string(),
            usage_hint: Some(
                "Identifiers are UUIDs such as 0b3f8a6e-5d2c-4c1e-9a7b-2f4d6e8c0a1b".to_string(),
            ),
        })
    }
}

/// HTTP operation errors that provide user-friendly messages
#[derive(Debug)]
pub struct HttpOperationError {
    /// The name of the operation that failed
    pub operation: String,
    /// The HTTP status code if available
    pub status: Option<u16>,
    /// Detailed error information
    pub details: String,
}

impl std::fmt::Display for HttpOperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.details)
    }
}

impl std::error::Error for HttpOperationError {}

impl Handle<UserError> for HttpOperationError {
    fn handle(&self) -> Option<UserError> {
        let usage_hint = match self.status {
            Some(401) => Some(
                "Authentication required. Pass --token or set GALLEY_TOKEN to an access token."
                    .to_string(),
            ),
            Some(403) => Some(
                "Access forbidden. Your crew role does not allow this operation.".to_string(),
            ),
            Some(404) => Some(
                "The requested resource was not found. Check the IDs and try again.".to_string(),
            ),
            Some(406) | Some(415) => Some(
                "The server speaks a different API version than this galleyctl.".to_string(),
            ),
            Some(429) => Some("Too many requests. Wait a moment and try again.".to_string()),
            Some(500..=599) => {
                Some("Server error. The service may be temporarily unavailable.".to_string())
            }
            _ => None,
        };
        Some(UserError {
            message: self.to_string(),
            usage_hint,
        })
    }
}

impl HttpOperationError {
    /// Wraps the error returned by a [`crate::http_utils::GalleyClient`] call.
    pub fn from_error(operation: &str, error: &(dyn Error + 'static)) -> Self {
        let (status, details) = match error.downcast_ref::<HttpError>() {
            Some(http) => (http.status, http.to_string()),
            None => (None, error.to_string()),
        };
        Self {
            operation: operation.to_string(),
            status,
            details,
        }
    }
}

/// Validation error for command arguments
#[derive(Debug)]
pub struct ValidationError {
    /// The argument that failed validation
    pub field: String,
    /// The value that was invalid
    pub value: String,
    /// The reason why validation failed
    pub reason: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid {}: '{}' - {}", self.field, self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

impl Handle<UserError> for ValidationError {
    fn handle(&self) -> Option<UserError> {
        Some(UserError {
            message: self.to_string(),
            usage_hint: Some(
                "Bodies are inline JSON or @path to a .json, .yaml or .yml file".to_string(),
            ),
        })
    }
}

/// Enhanced error formatting for CLI output
pub fn format_cli_error<E>(error: &E) -> String
where
    E: Handle<UserError> + std::fmt::Display,
{
    if let Some(user_error) = error.handle() {
        let mut output = format!("Error: {}", user_error.message);
        if let Some(hint) = user_error.usage_hint {
            output.push_str(&format!("\nHint: {}", hint));
        }
        output
    } else {
        format!("Error: {}", error)
    }
}
