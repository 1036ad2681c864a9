//! Content negotiation and response hardening middleware.

use std::fmt::{Display, Formatter, Result as FmtResult};

use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api_status::{ApiError, ApiStatus};

const VENDOR_PREFIX: &str = "application/vnd.galley.";

/// The request body media type clients send.
pub const REQUEST_MEDIA_TYPE: &str = "application/vnd.galley.v1+json";

/// The request body media type node agents send.
pub const NODE_AGENT_MEDIA_TYPE: &str = "application/vnd.galley-node-agent.v1+json";

/// A negotiated `application/vnd.galley.{version}+{format}` media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    pub version: String,
    pub format: String,
}

impl Default for MediaType {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Display for MediaType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}{}+{}", VENDOR_PREFIX, self.version, self.format)
    }
}

impl MediaType {
    /// Negotiates the response media type from an `Accept` header value.
    ///
    /// Returns `None` when none of the accepted ranges is `*/*`, `.../json`
    /// or `...+json`.
    pub fn from_accept(accept: &str) -> Option<MediaType> {
        let ranges: Vec<&str> = accept
            .split(',')
            .map(|range| range.split(';').next().unwrap_or("").trim())
            .filter(|range| !range.is_empty())
            .collect();

        let producible = ranges
            .iter()
            .any(|range| *range == "*/*" || range.contains("/json") || range.contains("+json"));
        if !producible {
            return None;
        }

        let negotiated = ranges
            .iter()
            .filter_map(|range| range.strip_prefix(VENDOR_PREFIX))
            .filter_map(|rest| rest.split_once('+'))
            .find(|(version, format)| !version.is_empty() && *format == "json")
            .map(|(version, format)| MediaType {
                version: version.to_string(),
                format: format.to_string(),
            });
        Some(negotiated.unwrap_or_default())
    }
}

/// True when a request `Content-Type` value is a vendor JSON type.
pub fn is_request_media_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .map(|essence| {
            essence.eq_ignore_ascii_case(REQUEST_MEDIA_TYPE)
                || essence.eq_ignore_ascii_case(NODE_AGENT_MEDIA_TYPE)
        })
        .unwrap_or(false)
}

fn carries_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .map(|length| length > 0)
        .unwrap_or(false)
}

/// Checks the request's media types before it reaches a handler.
pub fn negotiate(method: &Method, headers: &HeaderMap) -> Result<MediaType, ApiError> {
    let media_type = match headers.get(header::ACCEPT) {
        None => MediaType::default(),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(MediaType::from_accept)
            .ok_or_else(|| ApiError::new(ApiStatus::ACCEPT_NOT_SUPPORTED))?,
    };

    if matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        match headers.get(header::CONTENT_TYPE) {
            Some(value) => {
                let supported = value.to_str().map(is_request_media_type).unwrap_or(false);
                if !supported {
                    return Err(ApiError::new(ApiStatus::CONTENT_TYPE_NOT_DEFINED));
                }
            }
            None if carries_body(headers) => {
                return Err(ApiError::new(ApiStatus::CONTENT_TYPE_NOT_DEFINED));
            }
            None => {}
        }
    }

    Ok(media_type)
}

/// Rejects requests with unsupported media types (406/415) and stamps the
/// negotiated vendor type onto JSON:API responses.
pub async fn content_negotiation(mut request: Request, next: Next) -> Response {
    let media_type = match negotiate(request.method(), request.headers()) {
        Ok(media_type) => media_type,
        Err(err) => {
            tracing::debug!(method = %request.method(), uri = %request.uri(), error = %err, "negotiation rejected request");
            return err.into_response();
        }
    };
    request.extensions_mut().insert(media_type.clone());

    let mut response = next.run(request).await;
    let is_vendor = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with(VENDOR_PREFIX))
        .unwrap_or(false);
    if is_vendor {
        if let Ok(value) = HeaderValue::from_str(&media_type.to_string()) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    response
}

/// Adds the fixed security headers to every response.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=15768000"),
    );
    headers.insert("x-download-options", HeaderValue::from_static("noopen"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn vendor_accept_selects_version() {
        let media = MediaType::from_accept("application/vnd.galley.v2+json").unwrap();
        assert_eq!(media.version, "v2");
        assert_eq!(media.to_string(), "application/vnd.galley.v2+json");
    }

    #[test]
    fn wildcard_and_plain_json_default_to_v1() {
        assert_eq!(MediaType::from_accept("*/*"), Some(MediaType::default()));
        assert_eq!(
            MediaType::from_accept("text/html, application/json;q=0.9"),
            Some(MediaType::default())
        );
    }

    #[test]
    fn non_json_accept_is_refused() {
        assert_eq!(MediaType::from_accept("text/html"), None);
        assert_eq!(MediaType::from_accept("application/xml, text/plain"), None);
        assert_eq!(MediaType::from_accept("application/vnd.galley.v1+xml"), None);
    }

    #[test]
    fn request_media_type_ignores_parameters() {
        assert!(is_request_media_type("application/vnd.galley.v1+json"));
        assert!(is_request_media_type(
            "application/vnd.galley.v1+json; charset=utf-8"
        ));
        assert!(is_request_media_type(NODE_AGENT_MEDIA_TYPE));
        assert!(!is_request_media_type("application/vnd.galley-node-agent.v2+json"));
        assert!(!is_request_media_type("application/json"));
        assert!(!is_request_media_type("text/plain"));
    }

    #[test]
    fn body_requests_require_vendor_content_type() {
        let plain = headers(&[(header::CONTENT_TYPE, "application/json")]);
        let err = negotiate(&Method::POST, &plain).unwrap_err();
        assert_eq!(err.status, ApiStatus::CONTENT_TYPE_NOT_DEFINED);

        let vendor = headers(&[(header::CONTENT_TYPE, "application/vnd.galley.v1+json")]);
        assert!(negotiate(&Method::PATCH, &vendor).is_ok());

        // reads do not care about Content-Type
        assert!(negotiate(&Method::GET, &plain).is_ok());
    }

    #[test]
    fn bodiless_post_without_content_type_passes() {
        assert!(negotiate(&Method::POST, &HeaderMap::new()).is_ok());
        let sized = headers(&[(header::CONTENT_LENGTH, "12")]);
        assert!(negotiate(&Method::POST, &sized).is_err());
    }

    #[test]
    fn unacceptable_accept_is_406() {
        let html = headers(&[(header::ACCEPT, "text/html")]);
        let err = negotiate(&Method::GET, &html).unwrap_err();
        assert_eq!(err.status, ApiStatus::ACCEPT_NOT_SUPPORTED);
        assert_eq!(err.http_status().as_u16(), 406);
    }
}
