use std::error::Error;
use std::fmt;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use crate::cli_utils;
use crate::negotiation::REQUEST_MEDIA_TYPE;

/// A failed API call, carrying the JSON:API error titles when the server sent
/// them.
#[derive(Debug)]
pub struct HttpError {
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl Error for HttpError {}

/// Joins the `code title` pairs of a JSON:API error document.
pub fn error_message(body: &str) -> String {
    let titles: Vec<String> = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|doc| doc.get("errors").and_then(Value::as_array).cloned())
        .unwrap_or_default()
        .iter()
        .map(|error| {
            let code = error.get("status").map(Value::to_string).unwrap_or_default();
            let title = error.get("title").and_then(Value::as_str).unwrap_or_default();
            format!("{} {}", code, title).trim().to_string()
        })
        .collect();
    if !titles.is_empty() {
        titles.join("; ")
    } else if body.trim().is_empty() {
        "No error details".to_string()
    } else {
        body.trim().to_string()
    }
}

pub struct GalleyClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GalleyClient {
    pub fn new(base_url: String, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Constructs a full API URL from a path
    pub fn api_url(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{}/{}", self.base_url, path)
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, REQUEST_MEDIA_TYPE);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn get(&self, path: &str) -> Result<Value, Box<dyn Error>> {
        let request = self.prepare(self.client.get(self.api_url(path)));
        self.handle_response(request.send().await?).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, Box<dyn Error>> {
        self.send_body(self.client.post(self.api_url(path)), body)
            .await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<Value, Box<dyn Error>> {
        self.send_body(self.client.patch(self.api_url(path)), body)
            .await
    }

    /// Makes a DELETE request; the API answers 204 without a body.
    pub async fn delete(&self, path: &str) -> Result<Value, Box<dyn Error>> {
        let request = self.prepare(self.client.delete(self.api_url(path)));
        self.handle_response(request.send().await?).await
    }

    async fn send_body(&self, request: RequestBuilder, body: &Value) -> Result<Value, Box<dyn Error>> {
        let request = self
            .prepare(request)
            .header(CONTENT_TYPE, REQUEST_MEDIA_TYPE)
            .body(serde_json::to_vec(body)?);
        self.handle_response(request.send().await?).await
    }

    /// Returns the response document, or `Null` for an empty success.
    async fn handle_response(&self, response: Response) -> Result<Value, Box<dyn Error>> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            if text.trim().is_empty() {
                Ok(Value::Null)
            } else {
                Ok(serde_json::from_str(&text)?)
            }
        } else {
            Err(Box::new(HttpError {
                status: Some(status.as_u16()),
                message: error_message(&text),
            }))
        }
    }
}

/// Execute an HTTP operation and exit on error with formatted message
pub async fn execute_or_exit<T, F, Fut>(operation: F, context: &str) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, Box<dyn Error>>>,
{
    match operation().await {
        Ok(result) => result,
        Err(e) => cli_utils::exit_with_error(&format!("{}: {}", context, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_cleanly() {
        let client = GalleyClient::new("http://localhost:8080/".to_string(), None);
        assert_eq!(client.api_url("/vessels"), "http://localhost:8080/vessels");
        assert_eq!(client.api_url("auth/sign-in"), "http://localhost:8080/auth/sign-in");
    }

    #[test]
    fn error_documents_are_summarized() {
        let body = r#"{"errors":[{"status":1401,"title":"The charter could not be found"}]}"#;
        assert_eq!(error_message(body), "1401 The charter could not be found");
        assert_eq!(error_message(""), "No error details");
        assert_eq!(error_message("gateway down"), "gateway down");
    }
}
