//! # Request Body Validation
//!
//! Request bodies are plain JSON objects. [`ApiJson`] reads and decodes them;
//! the checks in this module then validate individual properties and report
//! failures as `FAILED_VALIDATION` errors whose title names the property and
//! whose source pointer points at it.
//!
//! ```rust
//! use galley::validate::{ValidationError, required};
//!
//! let missing: Option<String> = None;
//! let err = required(&missing, "environment").unwrap_err();
//! assert_eq!(err.to_string(), "missing property \"environment\"");
//! ```

use std::sync::LazyLock;

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::api_status::{ApiError, ApiStatus};

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());
static CPU_QUANTITY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([0-9]+(\.[0-9]+)?|[0-9]+m)$").ok());
static MEMORY_QUANTITY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$").ok());

fn matches(regex: &LazyLock<Option<Regex>>, value: &str) -> bool {
    regex
        .as_ref()
        .map(|re| re.is_match(value))
        .unwrap_or(false)
}

/// A property of the request body failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The body is not a JSON object.
    NotAnObject,
    /// A required property is absent, null or blank.
    MissingRequiredProperty {
        /// Name of the missing property
        property: String,
    },
    /// A property is present but malformed.
    InvalidProperty {
        /// Name of the offending property
        property: String,
        /// What was expected of it
        expected: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::NotAnObject => write!(f, "request body must be a JSON object"),
            ValidationError::MissingRequiredProperty { property } => {
                write!(f, "missing property \"{}\"", property)
            }
            ValidationError::InvalidProperty { property, expected } => {
                write!(f, "property \"{}\" must be {}", property, expected)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    fn invalid(property: &str, expected: &str) -> Self {
        ValidationError::InvalidProperty {
            property: property.to_string(),
            expected: expected.to_string(),
        }
    }

    /// JSON pointer of the offending property.
    pub fn pointer(&self) -> String {
        match self {
            ValidationError::NotAnObject => String::new(),
            ValidationError::MissingRequiredProperty { property }
            | ValidationError::InvalidProperty { property, .. } => format!("/{}", property),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::new(ApiStatus::FAILED_VALIDATION)
            .with_title(err.to_string())
            .with_pointer(err.pointer())
    }
}

/// Returns the value of a required, non-blank string property.
pub fn required<'a>(value: &'a Option<String>, property: &str) -> Result<&'a str, ValidationError> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ValidationError::MissingRequiredProperty {
            property: property.to_string(),
        }),
    }
}

/// Rejects a present but blank string property.
pub fn not_blank<'a>(
    value: &'a Option<String>,
    property: &str,
) -> Result<Option<&'a str>, ValidationError> {
    match value.as_deref().map(str::trim) {
        None => Ok(None),
        Some("") => Err(ValidationError::invalid(property, "a non-empty string")),
        Some(value) => Ok(Some(value)),
    }
}

pub fn email(value: &str, property: &str) -> Result<(), ValidationError> {
    if matches(&EMAIL, value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(property, "an email address"))
    }
}

/// A Kubernetes CPU quantity such as `0.5`, `2` or `250m`.
pub fn cpu_quantity(value: &str, property: &str) -> Result<(), ValidationError> {
    if matches(&CPU_QUANTITY, value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(property, "a CPU quantity"))
    }
}

/// A Kubernetes memory quantity such as `512Mi` or `1Gi`.
pub fn memory_quantity(value: &str, property: &str) -> Result<(), ValidationError> {
    if matches(&MEMORY_QUANTITY, value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(property, "a memory quantity"))
    }
}

/// Requires `value` to be one of `allowed`.
pub fn one_of(value: &str, property: &str, allowed: &[&str]) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            property,
            &format!("one of {}", allowed.join(", ")),
        ))
    }
}

/// Parses a path or body identifier; malformed ids are `UUID_PARSE`.
pub fn parse_uuid(value: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value).map_err(|_| ApiError::new(ApiStatus::UUID_PARSE))
}

////////////////////////////////////////////// ApiJson /////////////////////////////////////////////

/// Extracts a JSON object request body into `T`.
///
/// An empty body is `REQUEST_BODY_MISSING`; a body that is not an object is
/// `FAILED_VALIDATION`; a property of the wrong JSON type is `HTTP_CLASS_CAST`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|_| ApiError::new(ApiStatus::REQUEST_BODY_MISSING))?;
        decode_body(&bytes).map(ApiJson)
    }
}

/// Decodes a request body the way [`ApiJson`] does.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::new(ApiStatus::REQUEST_BODY_MISSING));
    }
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|_| ApiError::from(ValidationError::NotAnObject))?;
    if !value.is_object() {
        return Err(ValidationError::NotAnObject.into());
    }
    serde_json::from_value(value).map_err(|e| {
        tracing::debug!(error = %e, "request body has wrong property types");
        ApiError::new(ApiStatus::HTTP_CLASS_CAST)
    })
}

///////////////////////////////////////////// ApiQuery /////////////////////////////////////////////

/// Extracts query parameters into `T`.
///
/// A parameter that does not decode, such as `?page=abc`, is
/// `FAILED_VALIDATION` titled with the decoder's message.
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Query::<T>::from_request_parts(parts, state).await {
            Ok(Query(value)) => Ok(ApiQuery(value)),
            Err(rejection) => {
                let title = rejection.body_text();
                tracing::debug!(error = %title, "query string rejected");
                Err(ApiError::new(ApiStatus::FAILED_VALIDATION).with_title(title))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    use crate::pagination::PageQuery;

    #[derive(Debug, Deserialize)]
    struct Body {
        name: Option<String>,
        count: Option<i64>,
    }

    #[test]
    fn missing_property_names_field_and_pointer() {
        let err = ApiError::from(required(&None, "environment").unwrap_err());
        assert_eq!(err.status, ApiStatus::FAILED_VALIDATION);
        assert_eq!(err.title(), "missing property \"environment\"");
        assert_eq!(err.pointer(), Some("/environment"));
    }

    #[test]
    fn blank_required_is_missing() {
        let blank = Some("   ".to_string());
        assert!(matches!(
            required(&blank, "name"),
            Err(ValidationError::MissingRequiredProperty { .. })
        ));
        assert_eq!(required(&Some(" a ".to_string()), "name"), Ok("a"));
        assert!(not_blank(&Some(String::new()), "name").is_err());
        assert_eq!(not_blank(&None, "name"), Ok(None));
    }

    #[test]
    fn emails() {
        assert!(email("ada@example.com", "email").is_ok());
        assert!(email("ada@example", "email").is_err());
        assert!(email("ada example.com", "email").is_err());
    }

    #[test]
    fn quantities() {
        for ok in ["0.25", "1", "250m", "4"] {
            assert!(cpu_quantity(ok, "cpu").is_ok(), "{ok}");
        }
        for bad in ["", "1Gi", "-1", "0.5m"] {
            assert!(cpu_quantity(bad, "cpu").is_err(), "{bad}");
        }
        for ok in ["256Mi", "1Gi", "1024", "1.5Gi"] {
            assert!(memory_quantity(ok, "memory").is_ok(), "{ok}");
        }
        for bad in ["Mi", "1 Gi", "1GB"] {
            assert!(memory_quantity(bad, "memory").is_err(), "{bad}");
        }
    }

    #[test]
    fn one_of_lists_choices() {
        let err = one_of("svn", "type", &["git", "registry"]).unwrap_err();
        assert_eq!(err.to_string(), "property \"type\" must be one of git, registry");
    }

    #[test]
    fn malformed_ids() {
        assert_eq!(
            parse_uuid("not-a-uuid").unwrap_err().status,
            ApiStatus::UUID_PARSE
        );
        let id = Uuid::new_v4();
        assert_eq!(parse_uuid(&id.to_string()).unwrap(), id);
    }

    async fn query(uri: &str) -> Result<PageQuery, ApiError> {
        let (mut parts, ()) = axum::http::Request::builder()
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        ApiQuery::<PageQuery>::from_request_parts(&mut parts, &())
            .await
            .map(|ApiQuery(query)| query)
    }

    #[tokio::test]
    async fn non_numeric_paging_is_a_validation_error() {
        for uri in ["/vessels?page=abc", "/vessels?limit=ten", "/vessels?offset=1.5"] {
            let err = query(uri).await.unwrap_err();
            assert_eq!(err.status, ApiStatus::FAILED_VALIDATION, "{uri}");
            assert_eq!(err.to_error_object()["status"], 1101);
        }
        let ok = query("/vessels?page=2&limit=5").await.unwrap();
        assert_eq!(ok.page, Some(2));
        assert_eq!(ok.limit, Some(5));
    }

    #[test]
    fn body_decoding() {
        let body: Body = decode_body(br#"{"name": "x"}"#).unwrap();
        assert_eq!(body.name.as_deref(), Some("x"));
        assert!(body.count.is_none());

        let err = decode_body::<Body>(b"").unwrap_err();
        assert_eq!(err.status, ApiStatus::REQUEST_BODY_MISSING);

        let err = decode_body::<Body>(b"[1, 2]").unwrap_err();
        assert_eq!(err.status, ApiStatus::FAILED_VALIDATION);

        let err = decode_body::<Body>(br#"{"count": "many"}"#).unwrap_err();
        assert_eq!(err.status, ApiStatus::HTTP_CLASS_CAST);
    }
}
