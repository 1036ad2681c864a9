//! JSON:API documents and resource objects.
//!
//! Every handler answers with an [`ApiResponse`]. The response normalizes its
//! status before it is written:
//!
//! - `204 No Content` carrying data is served as `200 OK`;
//! - `200 OK` without data is served as `204 No Content` with an empty body;
//! - any `2xx` carrying errors is served as `500 Internal Server Error`.
//!
//! When errors are present the `data` and `included` members are dropped.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::api_status::ApiError;
use crate::negotiation::MediaType;

/// A row that can be rendered as a JSON:API resource object.
pub trait Resource {
    /// The JSON:API `type` member.
    const TYPE: &'static str;

    fn id(&self) -> Uuid;

    fn attributes(&self) -> Value;

    fn to_resource_object(&self) -> Value {
        json!({
            "type": Self::TYPE,
            "id": self.id(),
            "attributes": self.attributes(),
        })
    }
}

/// Renders a slice of resources as a JSON:API array.
pub fn collection<R: Resource>(items: &[R]) -> Value {
    Value::Array(items.iter().map(Resource::to_resource_object).collect())
}

/// A JSON:API response document under construction.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    data: Option<Value>,
    meta: Option<Value>,
    links: Option<Value>,
    included: Option<Vec<Value>>,
    errors: Vec<ApiError>,
}

impl Default for ApiResponse {
    fn default() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }
}

impl ApiResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            data: None,
            meta: None,
            links: None,
            included: None,
            errors: Vec::new(),
        }
    }

    /// A `200 OK` document with primary data.
    pub fn ok(data: Value) -> Self {
        Self::new(StatusCode::OK).with_data(data)
    }

    /// A `201 Created` document with primary data.
    pub fn created(data: Value) -> Self {
        Self::new(StatusCode::CREATED).with_data(data)
    }

    /// A `204 No Content` response.
    pub fn no_content() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    /// A document carrying a single error, served with the error's status.
    pub fn error(error: ApiError) -> Self {
        Self::new(error.http_status()).with_error(error)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_links(mut self, links: Value) -> Self {
        self.links = Some(links);
        self
    }

    pub fn with_included(mut self, included: Vec<Value>) -> Self {
        self.included = Some(included);
        self
    }

    /// Adds an error; the first error decides the status of the document.
    pub fn with_error(mut self, error: ApiError) -> Self {
        if self.errors.is_empty() {
            self.status = error.http_status();
        }
        self.errors.push(error);
        self
    }

    /// The status after normalization.
    pub fn status(&self) -> StatusCode {
        if !self.errors.is_empty() {
            if self.status.is_success() {
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
            return self.status;
        }
        match (self.status, &self.data) {
            (StatusCode::NO_CONTENT, Some(_)) => StatusCode::OK,
            (StatusCode::OK, None) => StatusCode::NO_CONTENT,
            (status, _) => status,
        }
    }

    /// The document body, or `None` when the response has no body.
    pub fn body(&self) -> Option<Value> {
        if self.status() == StatusCode::NO_CONTENT {
            return None;
        }
        let mut document = Map::new();
        if !self.errors.is_empty() {
            document.insert(
                "errors".to_string(),
                Value::Array(self.errors.iter().map(ApiError::to_error_object).collect()),
            );
        } else {
            document.insert(
                "data".to_string(),
                self.data.clone().unwrap_or(Value::Null),
            );
            if let Some(included) = &self.included {
                document.insert("included".to_string(), Value::Array(included.clone()));
            }
        }
        if let Some(meta) = &self.meta {
            document.insert("meta".to_string(), meta.clone());
        }
        if let Some(links) = &self.links {
            document.insert("links".to_string(), links.clone());
        }
        Some(Value::Object(document))
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        for error in &self.errors {
            if error.http_status().is_server_error() {
                tracing::error!(code = error.status.code, title = %error.title(), "request failed");
            }
        }
        let content_type = HeaderValue::from_str(&MediaType::default().to_string())
            .unwrap_or(HeaderValue::from_static("application/vnd.galley.v1+json"));
        match self.body() {
            Some(body) => (
                status,
                [(header::CONTENT_TYPE, content_type)],
                body.to_string(),
            )
                .into_response(),
            None => status.into_response(),
        }
    }
}
