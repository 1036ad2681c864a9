//! The galley error catalog.
//!
//! Every failure the API reports is one [`ApiStatus`] entry: a numeric code, a
//! human readable title, and the HTTP status it is served with. Handlers return
//! [`ApiError`], which wraps an entry with an optional JSON pointer into the
//! request body and renders as a JSON:API `errors` document.

use std::borrow::Cow;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use crate::DataStoreError;
use crate::json_api::ApiResponse;

/// One entry of the error catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiStatus {
    /// Stable numeric code surfaced as the error `status`.
    pub code: u32,
    /// Title surfaced to the client.
    pub message: &'static str,
    /// HTTP status the error is served with.
    pub http_status: StatusCode,
}

impl ApiStatus {
    /// Creates a catalog entry with an explicit HTTP status.
    pub const fn new(code: u32, message: &'static str, http_status: StatusCode) -> Self {
        Self {
            code,
            message,
            http_status,
        }
    }

    /// Creates a catalog entry served as 500.
    pub const fn internal(code: u32, message: &'static str) -> Self {
        Self::new(code, message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Creates a catalog entry that borrows title and status from another entry.
    pub const fn extend(code: u32, from: ApiStatus) -> Self {
        Self::new(code, from.message, from.http_status)
    }

    /////////////////////////////////////////// Generic ////////////////////////////////////////////

    pub const FAILED: ApiStatus = ApiStatus::internal(1000, "An unknown error occurred");
    pub const HTTP_CLASS_CAST: ApiStatus = ApiStatus::new(
        1001,
        "An error occurred while processing the request. The JSON Object contains an incorrect data type.",
        StatusCode::BAD_REQUEST,
    );
    pub const THROWABLE: ApiStatus = ApiStatus::extend(1002, Self::FAILED);
    pub const UUID_PARSE: ApiStatus =
        ApiStatus::new(1003, "A UUID couldn't be processed", StatusCode::BAD_REQUEST);
    pub const DATE_PARSE: ApiStatus = ApiStatus::new(
        1004,
        "A local date string couldn't be processed",
        StatusCode::BAD_REQUEST,
    );
    pub const FAILED_FIND: ApiStatus = ApiStatus::new(
        1100,
        "The requested resource could not be found",
        StatusCode::NOT_FOUND,
    );
    pub const FAILED_VALIDATION: ApiStatus = ApiStatus::new(
        1101,
        "The resource failed on validation",
        StatusCode::BAD_REQUEST,
    );
    pub const FAILED_INSERT: ApiStatus = ApiStatus::internal(1102, "Inserting the resource failed");
    pub const FAILED_UPDATE: ApiStatus = ApiStatus::internal(1103, "Updating the resource failed");
    pub const FAILED_DELETE: ApiStatus = ApiStatus::internal(1104, "Deleting the resource failed");
    pub const FAILED_AUTHORIZATION: ApiStatus = ApiStatus::new(
        1105,
        "The request could not be authorized",
        StatusCode::UNAUTHORIZED,
    );
    pub const CONTENT_TYPE_NOT_DEFINED: ApiStatus = ApiStatus::new(
        1106,
        "The Content-Type of the request is not supported",
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
    );
    pub const ACCEPT_NOT_SUPPORTED: ApiStatus = ApiStatus::new(
        1107,
        "None of the accepted media types can be produced",
        StatusCode::NOT_ACCEPTABLE,
    );
    pub const REQUEST_BODY_MISSING: ApiStatus = ApiStatus::new(
        1108,
        "The request body is missing",
        StatusCode::BAD_REQUEST,
    );
    pub const CONSTRAINT_VIOLATION: ApiStatus = ApiStatus::new(
        1109,
        "The resource conflicts with an existing resource",
        StatusCode::CONFLICT,
    );
    pub const TOKEN_MALFORMED: ApiStatus = ApiStatus::new(
        1110,
        "The bearer token is malformed",
        StatusCode::BAD_REQUEST,
    );

    //////////////////////////////////////////// Crew /////////////////////////////////////////////

    pub const USER_ROLE_FORBIDDEN: ApiStatus = ApiStatus::new(
        1100,
        "You don't have the required role to perform this action",
        StatusCode::FORBIDDEN,
    );
    pub const VESSEL_NOT_FOUND: ApiStatus =
        ApiStatus::new(1200, "The vessel could not be found", StatusCode::NOT_FOUND);
    pub const VESSEL_INSERT_FAILED: ApiStatus =
        ApiStatus::internal(1201, "The vessel could not be inserted");
    pub const VESSEL_ID_INCORRECT: ApiStatus =
        ApiStatus::new(1202, "The vessel id is incorrect", StatusCode::BAD_REQUEST);
    pub const REFRESH_TOKEN_INVALID: ApiStatus = ApiStatus::new(
        1301,
        "The refresh token is invalid or expired",
        StatusCode::UNAUTHORIZED,
    );
    pub const REFRESH_TOKEN_MISSING: ApiStatus = ApiStatus::extend(1302, Self::REFRESH_TOKEN_INVALID);
    pub const CHARTER_NO_ACCESS: ApiStatus = ApiStatus::new(
        1400,
        "You don't have access to this charter",
        StatusCode::FORBIDDEN,
    );
    pub const CHARTER_NOT_FOUND: ApiStatus =
        ApiStatus::new(1401, "The charter could not be found", StatusCode::NOT_FOUND);
    pub const CHARTER_CREATE_FAILURE: ApiStatus =
        ApiStatus::internal(1402, "The charter could not be created");
    pub const CHARTER_DELETE_FAILURE_ACTIVE_PROJECTS: ApiStatus = ApiStatus::new(
        1403,
        "The charter still has active projects and cannot be deleted",
        StatusCode::CONFLICT,
    );
    pub const CHARTER_NAME_TAKEN: ApiStatus = ApiStatus::new(
        1404,
        "A charter with this name already exists in the vessel",
        StatusCode::CONFLICT,
    );
    pub const USER_NOT_FOUND: ApiStatus =
        ApiStatus::new(1500, "The user could not be found", StatusCode::NOT_FOUND);
    pub const USER_EMAIL_TAKEN: ApiStatus = ApiStatus::new(
        1501,
        "A user with this email address already exists",
        StatusCode::CONFLICT,
    );
    pub const CREW_NO_VESSEL_MEMBER: ApiStatus = ApiStatus::new(
        1600,
        "The user is not a member of this Vessel crew",
        StatusCode::FORBIDDEN,
    );
    pub const CREW_NO_CHARTER_MEMBER: ApiStatus = ApiStatus::new(
        1601,
        "The user is not a member of this Charter crew",
        StatusCode::FORBIDDEN,
    );
    pub const CREW_EMBARKING_TOO_OLD: ApiStatus = ApiStatus::new(
        1602,
        "The invitation to embark has expired",
        StatusCode::FORBIDDEN,
    );
    pub const CREW_NO_ACTIVATION_SALT: ApiStatus = ApiStatus::new(
        1603,
        "The activation link is missing its activation salt",
        StatusCode::BAD_REQUEST,
    );
    pub const CREW_ACTIVATION_FAILED: ApiStatus = ApiStatus::new(
        1604,
        "The crew membership could not be activated",
        StatusCode::NOT_FOUND,
    );

    ////////////////////////////////////////// Workloads ///////////////////////////////////////////

    pub const PROJECT_NOT_FOUND: ApiStatus =
        ApiStatus::new(1700, "The project could not be found", StatusCode::NOT_FOUND);
    pub const PROJECT_NAME_TAKEN: ApiStatus = ApiStatus::new(
        1701,
        "A project with this name already exists in the charter environment",
        StatusCode::CONFLICT,
    );
    pub const COMPUTE_PLAN_NOT_FOUND: ApiStatus = ApiStatus::new(
        1800,
        "The compute plan could not be found",
        StatusCode::NOT_FOUND,
    );
    pub const COMPUTE_PLAN_CREATE_FAILURE: ApiStatus =
        ApiStatus::internal(1801, "The compute plan could not be created");
    pub const COMPUTE_PLAN_NAME_TAKEN: ApiStatus = ApiStatus::new(
        1802,
        "A compute plan with this name already exists in the charter",
        StatusCode::CONFLICT,
    );

    //////////////////////////////////////////// OAuth /////////////////////////////////////////////

    pub const OAUTH_CONNECTION_NOT_FOUND: ApiStatus = ApiStatus::new(
        1900,
        "The OAuth connection could not be found",
        StatusCode::NOT_FOUND,
    );
    pub const OAUTH_PROVIDER_MISSING: ApiStatus = ApiStatus::new(
        1901,
        "The OAuth provider is missing or unknown",
        StatusCode::BAD_REQUEST,
    );
    pub const OAUTH_TYPE_MISSING: ApiStatus = ApiStatus::new(
        1902,
        "The OAuth connection type is missing or unknown",
        StatusCode::BAD_REQUEST,
    );
    pub const OAUTH_TYPE_MISMATCH: ApiStatus = ApiStatus::new(
        1903,
        "The OAuth provider does not support this connection type",
        StatusCode::BAD_REQUEST,
    );
    pub const OAUTH_CONNECTION_CREATE_FAILURE: ApiStatus =
        ApiStatus::internal(1904, "The OAuth connection could not be created");
    pub const OAUTH_PROVIDER_CONFIG_MISSING: ApiStatus =
        ApiStatus::internal(1905, "The OAuth provider is not configured");
    pub const OAUTH_CODE_MISSING: ApiStatus = ApiStatus::new(
        1906,
        "The OAuth authorization code is missing",
        StatusCode::BAD_REQUEST,
    );
    pub const OAUTH_STATE_MISSING: ApiStatus = ApiStatus::new(
        1907,
        "The OAuth state is missing or invalid",
        StatusCode::BAD_REQUEST,
    );
    pub const OAUTH_CONNECTION_APPROVAL_FAILURE: ApiStatus = ApiStatus::new(
        1908,
        "The OAuth provider did not approve the connection",
        StatusCode::BAD_GATEWAY,
    );
    pub const OAUTH_CONNECTION_INACTIVE: ApiStatus = ApiStatus::new(
        1909,
        "The OAuth connection is not pending approval",
        StatusCode::CONFLICT,
    );

    //////////////////////////////////////////// Agent /////////////////////////////////////////////

    pub const AGENT_SEND_ACTION_REQUIRED: ApiStatus =
        ApiStatus::internal(2000, "An agent command requires an action");
    pub const AGENT_NOT_CONNECTED: ApiStatus = ApiStatus::new(
        2001,
        "No agent is connected for this vessel engine",
        StatusCode::SERVICE_UNAVAILABLE,
    );
    pub const AGENT_TIMEOUT: ApiStatus = ApiStatus::new(
        2002,
        "The agent did not answer in time",
        StatusCode::GATEWAY_TIMEOUT,
    );
    pub const AGENT_DISCONNECTED: ApiStatus = ApiStatus::new(
        2003,
        "The agent disconnected before answering",
        StatusCode::BAD_GATEWAY,
    );
    pub const AGENT_REPLY_INVALID: ApiStatus = ApiStatus::new(
        2004,
        "The agent answered with an unreadable result",
        StatusCode::BAD_GATEWAY,
    );

    /////////////////////////////////////////// Engines ////////////////////////////////////////////

    pub const VESSEL_ENGINE_NOT_FOUND: ApiStatus = ApiStatus::new(
        2100,
        "The vessel engine could not be found",
        StatusCode::NOT_FOUND,
    );
    pub const VESSEL_REGION_NOT_FOUND: ApiStatus = ApiStatus::new(
        2200,
        "The engine region could not be found",
        StatusCode::NOT_FOUND,
    );
    pub const VESSEL_REGION_DELETE_FAILURE_ACTIVE_NODES: ApiStatus = ApiStatus::new(
        2201,
        "The engine region still has nodes and cannot be deleted",
        StatusCode::CONFLICT,
    );
    pub const VESSEL_REGION_NAME_TAKEN: ApiStatus = ApiStatus::new(
        2202,
        "A region with this name already exists in the vessel",
        StatusCode::CONFLICT,
    );
    pub const VESSEL_ENGINE_NODE_NOT_FOUND: ApiStatus = ApiStatus::new(
        2300,
        "The engine node could not be found",
        StatusCode::NOT_FOUND,
    );
    pub const VESSEL_ENGINE_NODE_ID_INCORRECT: ApiStatus = ApiStatus::new(
        2301,
        "The engine node id is incorrect",
        StatusCode::BAD_REQUEST,
    );
    pub const VESSEL_BILLING_PROFILE_CREATE_FAILURE: ApiStatus =
        ApiStatus::internal(2400, "The billing profile could not be created");
    pub const VESSEL_BILLING_PROFILE_EXISTS: ApiStatus = ApiStatus::new(
        2401,
        "The vessel already has a billing profile",
        StatusCode::CONFLICT,
    );
}

/// Constraint name prefixes mapped to the entry reported when they are violated.
const CONSTRAINT_STATUSES: &[(&str, ApiStatus)] = &[
    ("charters_unique_name", ApiStatus::CHARTER_NAME_TAKEN),
    ("charter_projects_unique_name", ApiStatus::PROJECT_NAME_TAKEN),
    (
        "charter_compute_plans_unique_name",
        ApiStatus::COMPUTE_PLAN_NAME_TAKEN,
    ),
    ("users_unique_email", ApiStatus::USER_EMAIL_TAKEN),
    (
        "vessel_engine_regions_unique_name",
        ApiStatus::VESSEL_REGION_NAME_TAKEN,
    ),
    (
        "vessel_billing_profile_unique_vessel",
        ApiStatus::VESSEL_BILLING_PROFILE_EXISTS,
    ),
];

/// Looks up the catalog entry for a violated constraint.
///
/// Falls back to [`ApiStatus::CONSTRAINT_VIOLATION`] so every constraint
/// violation is served as 409.
pub fn status_for_constraint(constraint: &str) -> ApiStatus {
    CONSTRAINT_STATUSES
        .iter()
        .find(|(prefix, _)| constraint.starts_with(prefix))
        .map(|(_, status)| *status)
        .unwrap_or(ApiStatus::CONSTRAINT_VIOLATION)
}

////////////////////////////////////////////// ApiError /////////////////////////////////////////////

/// A catalog entry raised by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// The catalog entry.
    pub status: ApiStatus,
    title: Option<String>,
    pointer: Option<String>,
}

impl ApiError {
    pub fn new(status: ApiStatus) -> Self {
        Self {
            status,
            title: None,
            pointer: None,
        }
    }

    /// Replaces the catalog title, e.g. to name the offending field.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Points at the offending member of the request document.
    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }

    /// Converts a data store error, reporting `NotFound` as `status`.
    pub fn not_found(status: ApiStatus) -> impl FnOnce(DataStoreError) -> ApiError {
        move |err| match err {
            DataStoreError::NotFound => ApiError::new(status),
            err => ApiError::from(err),
        }
    }

    pub fn title(&self) -> Cow<'_, str> {
        match &self.title {
            Some(title) => Cow::Borrowed(title.as_str()),
            None => Cow::Borrowed(self.status.message),
        }
    }

    pub fn pointer(&self) -> Option<&str> {
        self.pointer.as_deref()
    }

    pub fn http_status(&self) -> StatusCode {
        self.status.http_status
    }

    /// Renders the JSON:API error object.
    pub fn to_error_object(&self) -> Value {
        let mut object = json!({
            "status": self.status.code,
            "title": self.title(),
        });
        if let Some(pointer) = &self.pointer {
            object["source"] = json!({ "pointer": pointer });
        }
        object
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.title(), self.status.code)
    }
}

impl std::error::Error for ApiError {}

impl From<ApiStatus> for ApiError {
    fn from(status: ApiStatus) -> Self {
        ApiError::new(status)
    }
}

impl From<DataStoreError> for ApiError {
    fn from(err: DataStoreError) -> Self {
        match err {
            DataStoreError::NotFound => ApiError::new(ApiStatus::FAILED_FIND),
            DataStoreError::Constraint(name) => {
                tracing::debug!(constraint = %name, "constraint violation");
                ApiError::new(status_for_constraint(&name))
            }
            DataStoreError::SerializationError(msg) => {
                tracing::error!(error = %msg, "serialization failure in data store");
                ApiError::new(ApiStatus::HTTP_CLASS_CAST)
            }
            DataStoreError::Internal(msg) => {
                tracing::error!(error = %msg, "data store failure");
                ApiError::new(ApiStatus::FAILED)
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::from(DataStoreError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        ApiResponse::error(self).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_constraints_are_conflicts() {
        let status = status_for_constraint("crew_unique_member");
        assert_eq!(status, ApiStatus::CONSTRAINT_VIOLATION);
        assert_eq!(status.http_status, StatusCode::CONFLICT);
    }

    #[test]
    fn constraint_prefix_selects_entry() {
        assert_eq!(
            status_for_constraint("charters_unique_name"),
            ApiStatus::CHARTER_NAME_TAKEN
        );
        assert_eq!(
            status_for_constraint("charter_compute_plans_unique_name_idx"),
            ApiStatus::COMPUTE_PLAN_NAME_TAKEN
        );
        assert_eq!(
            status_for_constraint("vessel_billing_profile_unique_vessel").code,
            2401
        );
    }

    #[test]
    fn extended_entries_share_title_and_status() {
        assert_eq!(ApiStatus::REFRESH_TOKEN_MISSING.code, 1302);
        assert_eq!(
            ApiStatus::REFRESH_TOKEN_MISSING.message,
            ApiStatus::REFRESH_TOKEN_INVALID.message
        );
        assert_eq!(
            ApiStatus::REFRESH_TOKEN_MISSING.http_status,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiStatus::THROWABLE.message, ApiStatus::FAILED.message);
    }

    #[test]
    fn error_object_carries_pointer_only_when_set() {
        let plain = ApiError::new(ApiStatus::VESSEL_NOT_FOUND).to_error_object();
        assert_eq!(plain["status"], 1200);
        assert_eq!(plain["title"], "The vessel could not be found");
        assert!(plain.get("source").is_none());

        let pointed = ApiError::new(ApiStatus::FAILED_VALIDATION)
            .with_title("missing property \"name\"")
            .with_pointer("/name")
            .to_error_object();
        assert_eq!(pointed["source"]["pointer"], "/name");
        assert_eq!(pointed["title"], "missing property \"name\"");
    }

    #[test]
    fn data_store_errors_map_to_catalog() {
        assert_eq!(
            ApiError::from(DataStoreError::NotFound).status,
            ApiStatus::FAILED_FIND
        );
        assert_eq!(
            ApiError::from(DataStoreError::Constraint(
                "users_unique_email".to_string()
            ))
            .status,
            ApiStatus::USER_EMAIL_TAKEN
        );
        assert_eq!(
            ApiError::from(DataStoreError::Internal("boom".to_string())).status,
            ApiStatus::FAILED
        );
        assert_eq!(
            ApiError::not_found(ApiStatus::CHARTER_NOT_FOUND)(DataStoreError::NotFound).status,
            ApiStatus::CHARTER_NOT_FOUND
        );
        assert_eq!(
            ApiError::not_found(ApiStatus::CHARTER_NOT_FOUND)(DataStoreError::Constraint(
                "charters_unique_name".to_string()
            ))
            .status,
            ApiStatus::CHARTER_NAME_TAKEN
        );
    }
}
