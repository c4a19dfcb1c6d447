//! HTTP session and response handling shared by all clients

use std::sync::Mutex;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Map, Value};

use super::{Failure, OperationResult, Payload};

/// Lazily opened HTTP session owned by one client
///
/// The connection pool is created on first use and dropped by
/// [`close`](Self::close).
#[derive(Debug)]
pub struct Session {
    timeout: Duration,
    client: Mutex<Option<reqwest::Client>>,
}

impl Session {
    /// Create a closed session with the given per-request timeout
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: Mutex::new(None),
        }
    }

    /// Get the open HTTP client, opening it if needed
    ///
    /// # Errors
    ///
    /// Returns a transport failure if the client cannot be built
    pub fn client(&self) -> Result<reqwest::Client, Failure> {
        let mut slot = self.client.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Failure::transport(format!("failed to open HTTP session: {e}")))?;
        *slot = Some(client.clone());
        Ok(client)
    }

    /// Drop the HTTP client and its pooled connections
    pub fn close(&self) {
        let mut slot = self.client.lock().unwrap_or_else(|e| e.into_inner());
        if slot.take().is_some() {
            tracing::trace!("HTTP session closed");
        }
    }

    /// Whether the session currently holds an HTTP client
    pub fn is_open(&self) -> bool {
        self.client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

/// Status and decoded body of a device API response
#[derive(Debug)]
pub(crate) struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    /// Whether the API accepted the request
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Error detail: the body's `error` field, the raw body, or the status code
    pub fn error_detail(&self) -> String {
        if let Some(error) = self.body.get("error").and_then(Value::as_str) {
            return error.to_string();
        }
        match &self.body {
            Value::Null => format!("HTTP {}", self.status.as_u16()),
            Value::Object(map) if map.is_empty() => format!("HTTP {}", self.status.as_u16()),
            body => body.to_string(),
        }
    }

    /// Read a string field from the body
    pub fn str_field(&self, key: &str) -> Option<String> {
        self.body.get(key).and_then(Value::as_str).map(ToString::to_string)
    }

    /// Read an unsigned integer field from the body
    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.body.get(key).and_then(Value::as_u64)
    }

    /// Turn a push response into an operation result
    pub fn into_push_result(self, message: &str, image_url: Option<&str>) -> OperationResult {
        if !self.is_success() {
            return Failure::remote(self.status.as_u16(), self.error_detail()).into();
        }
        OperationResult::Success(Payload::Pushed {
            message: message.to_string(),
            image_url: image_url.map(ToString::to_string),
            response: self.body,
        })
    }
}

/// Send a request and decode the response
///
/// A response without a JSON content type decodes to an empty object. A JSON
/// body that fails to parse is a transport failure on success statuses and is
/// ignored on error statuses, where the status code carries the detail.
pub(crate) async fn execute(request: reqwest::RequestBuilder) -> Result<ApiResponse, Failure> {
    let response = request.send().await.map_err(transport_failure)?;
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_json_content_type);

    let bytes = response.bytes().await.map_err(transport_failure)?;

    let body = if !is_json {
        Value::Object(Map::new())
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return Err(Failure::transport(format!("malformed response body: {e}")));
            }
            Err(_) => Value::Null,
        }
    };

    Ok(ApiResponse { status, body })
}

/// Whether a `Content-Type` value names JSON, including `+json` subtypes
fn is_json_content_type(content_type: &str) -> bool {
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media_type == "application/json"
        || (media_type.starts_with("application/") && media_type.ends_with("+json"))
}

fn transport_failure(e: reqwest::Error) -> Failure {
    if e.is_timeout() {
        Failure::transport(format!("request timed out: {e}"))
    } else if e.is_connect() {
        Failure::transport(format!("connection failed: {e}"))
    } else {
        Failure::transport(e.to_string())
    }
}
