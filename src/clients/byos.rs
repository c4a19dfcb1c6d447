//! Clients for self-hosted (BYOS) TRMNL servers
//!
//! BYOS servers expose one display endpoint: POST sets what the device shows,
//! GET reads it back. `/api/setup` is used as a reachability check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{Map, Value, json};

use super::http::{self, Session};
use super::{ConnectionState, DeviceClient, DeviceStatus, Failure, MergeStrategy, OperationResult, Payload};
use crate::config::DeviceConfig;

const DISPLAY_PATH: &str = "/api/display";
const SETUP_PATH: &str = "/api/setup";

/// Refresh rate BYOS servers assume when they do not report one
pub const DEFAULT_REFRESH_RATE: u64 = 1800;

/// Generic BYOS client
pub struct ByosClient {
    config: Arc<DeviceConfig>,
    session: Session,
}

impl ByosClient {
    /// Create a client for a BYOS server
    #[must_use]
    pub fn new(config: Arc<DeviceConfig>, timeout: Duration) -> Self {
        Self {
            config,
            session: Session::new(timeout),
        }
    }

    /// Whether the HTTP session is currently open
    #[must_use]
    pub fn session_open(&self) -> bool {
        self.session.is_open()
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("ID", &self.config.device_id);
        match &self.config.credential {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn post_display(&self, body: Value, message: &str, image_url: Option<&str>) -> OperationResult {
        let client = match self.session.client() {
            Ok(client) => client,
            Err(failure) => return failure.into(),
        };

        let request = self
            .authorize(client.post(self.config.url(DISPLAY_PATH)))
            .json(&body);

        match http::execute(request).await {
            Ok(response) => {
                let result = response.into_push_result(message, image_url);
                if let OperationResult::Failure(failure) = &result {
                    tracing::error!(
                        device_id = %self.config.device_id,
                        error = %failure.message,
                        "BYOS server rejected push"
                    );
                } else {
                    tracing::debug!(device_id = %self.config.device_id, "{message}");
                }
                result
            }
            Err(failure) => {
                tracing::error!(
                    device_id = %self.config.device_id,
                    error = %failure.message,
                    "BYOS push failed"
                );
                failure.into()
            }
        }
    }
}

#[async_trait]
impl DeviceClient for ByosClient {
    fn name(&self) -> &'static str {
        "generic_byos"
    }

    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    async fn push_image(&self, image_url: &str, refresh_rate: Option<u32>) -> OperationResult {
        let mut body = Map::new();
        body.insert("image_url".to_string(), json!(image_url));
        if let Some(rate) = refresh_rate {
            body.insert("refresh_rate".to_string(), json!(rate));
        }

        self.post_display(Value::Object(body), "Image sent to BYOS device", Some(image_url))
            .await
    }

    async fn push_variables(
        &self,
        variables: &Map<String, Value>,
        merge_strategy: MergeStrategy,
    ) -> OperationResult {
        self.post_display(
            json!({
                "variables": variables,
                "merge_strategy": merge_strategy.as_str(),
            }),
            "Variables updated",
            None,
        )
        .await
    }

    async fn get_status(&self) -> OperationResult {
        let client = match self.session.client() {
            Ok(client) => client,
            Err(failure) => return failure.into(),
        };

        let request = self.authorize(client.get(self.config.url(DISPLAY_PATH)));
        let failure = match http::execute(request).await {
            Ok(response) if response.is_success() => {
                return OperationResult::Success(Payload::Status(DeviceStatus {
                    state: ConnectionState::Online,
                    device_id: self.config.device_id.clone(),
                    image_url: response.str_field("image_url"),
                    refresh_rate: Some(
                        response
                            .u64_field("refresh_rate")
                            .unwrap_or(DEFAULT_REFRESH_RATE),
                    ),
                    filename: None,
                }));
            }
            Ok(response) => Failure::remote(response.status.as_u16(), response.error_detail()),
            Err(failure) => failure,
        };

        tracing::error!(
            device_id = %self.config.device_id,
            state = %failure.connection_state(),
            error = %failure.message,
            "failed to get BYOS device status"
        );
        failure.into()
    }

    async fn test_connection(&self) -> bool {
        let client = match self.session.client() {
            Ok(client) => client,
            Err(failure) => {
                tracing::error!(error = %failure.message, "failed to test BYOS connection");
                return false;
            }
        };

        let request = self.authorize(client.get(self.config.url(SETUP_PATH)));
        match http::execute(request).await {
            Ok(response) if response.is_success() => {
                tracing::debug!(endpoint = %self.config.endpoint_base_url, "connected to BYOS server");
                true
            }
            Ok(response) => {
                tracing::error!(
                    status = response.status.as_u16(),
                    error = %response.error_detail(),
                    "BYOS server refused connection test"
                );
                false
            }
            Err(failure) => {
                tracing::error!(error = %failure.message, "failed to test BYOS connection");
                false
            }
        }
    }

    fn close(&self) {
        self.session.close();
    }
}

/// Terminus BYOS client
///
/// Terminus speaks the generic BYOS protocol; it keeps its own type so
/// Terminus-specific push handling has a place to live.
pub struct TerminusClient {
    inner: ByosClient,
}

impl TerminusClient {
    /// Create a client for a Terminus server
    #[must_use]
    pub fn new(config: Arc<DeviceConfig>, timeout: Duration) -> Self {
        Self {
            inner: ByosClient::new(config, timeout),
        }
    }

    /// Whether the HTTP session is currently open
    #[must_use]
    pub fn session_open(&self) -> bool {
        self.inner.session_open()
    }
}

#[async_trait]
impl DeviceClient for TerminusClient {
    fn name(&self) -> &'static str {
        "terminus"
    }

    fn device_id(&self) -> &str {
        self.inner.device_id()
    }

    async fn push_image(&self, image_url: &str, refresh_rate: Option<u32>) -> OperationResult {
        tracing::trace!(device_id = %self.device_id(), "pushing image to Terminus");
        self.inner.push_image(image_url, refresh_rate).await
    }

    async fn push_variables(
        &self,
        variables: &Map<String, Value>,
        merge_strategy: MergeStrategy,
    ) -> OperationResult {
        self.inner.push_variables(variables, merge_strategy).await
    }

    async fn get_status(&self) -> OperationResult {
        self.inner.get_status().await
    }

    async fn test_connection(&self) -> bool {
        self.inner.test_connection().await
    }

    fn close(&self) {
        self.inner.close();
    }
}
