//! Client for the hosted TRMNL service
//!
//! Content is pushed through a private plugin webhook
//! (`/api/custom_plugins/{uuid}`); status is read from `/api/current_screen`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::{Map, Value, json};

use super::http::{self, Session};
use super::{ConnectionState, DeviceClient, DeviceStatus, Failure, MergeStrategy, OperationResult, Payload};
use crate::config::DeviceConfig;

const CURRENT_SCREEN_PATH: &str = "/api/current_screen";
const CUSTOM_PLUGINS_PATH: &str = "/api/custom_plugins";

/// Hosted TRMNL client
pub struct HostedClient {
    config: Arc<DeviceConfig>,
    plugin_handle: Option<String>,
    session: Session,
}

impl HostedClient {
    /// Create a client; the plugin handle is taken from the device config
    #[must_use]
    pub fn new(config: Arc<DeviceConfig>, timeout: Duration) -> Self {
        Self {
            plugin_handle: config.plugin_handle.clone(),
            config,
            session: Session::new(timeout),
        }
    }

    /// Set the private plugin UUID that pushes are routed through
    ///
    /// Overrides the handle seeded from [`DeviceConfig::plugin_handle`], for
    /// library users that build a client directly instead of going through
    /// the dispatcher.
    pub fn set_plugin_handle(&mut self, plugin_handle: impl Into<String>) {
        let plugin_handle = plugin_handle.into();
        tracing::debug!(device_id = %self.config.device_id, %plugin_handle, "plugin UUID set");
        self.plugin_handle = Some(plugin_handle);
    }

    /// Plugin UUID in use, if any
    #[must_use]
    pub fn plugin_handle(&self) -> Option<&str> {
        self.plugin_handle.as_deref()
    }

    /// Whether the HTTP session is currently open
    #[must_use]
    pub fn session_open(&self) -> bool {
        self.session.is_open()
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("ID", &self.config.device_id);
        match &self.config.credential {
            Some(key) => request.header("Access-Token", key.expose_secret()),
            None => request,
        }
    }

    /// POST a merge-variables body to the plugin webhook
    async fn post_to_plugin(
        &self,
        body: Value,
        message: &str,
        image_url: Option<&str>,
    ) -> OperationResult {
        let Some(handle) = self.plugin_handle.as_deref() else {
            return Failure::precondition(
                "plugin UUID not configured; set plugin_uuid before pushing",
            )
            .into();
        };

        let client = match self.session.client() {
            Ok(client) => client,
            Err(failure) => return failure.into(),
        };

        let url = self.config.url(&format!("{CUSTOM_PLUGINS_PATH}/{handle}"));
        let request = self.authorize(client.post(url)).json(&body);

        match http::execute(request).await {
            Ok(response) => {
                let result = response.into_push_result(message, image_url);
                match &result {
                    OperationResult::Success(_) => {
                        tracing::debug!(device_id = %self.config.device_id, "{message}");
                    }
                    OperationResult::Failure(failure) => {
                        tracing::error!(
                            device_id = %self.config.device_id,
                            error = %failure.message,
                            "TRMNL API rejected push"
                        );
                    }
                }
                result
            }
            Err(failure) => {
                tracing::error!(
                    device_id = %self.config.device_id,
                    error = %failure.message,
                    "TRMNL push failed"
                );
                failure.into()
            }
        }
    }
}

#[async_trait]
impl DeviceClient for HostedClient {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    async fn push_image(&self, image_url: &str, refresh_rate: Option<u32>) -> OperationResult {
        let mut variables = Map::new();
        variables.insert("image_url".to_string(), json!(image_url));
        if let Some(rate) = refresh_rate {
            variables.insert("refresh_rate".to_string(), json!(rate));
        }

        self.post_to_plugin(
            json!({ "merge_variables": variables }),
            "Image sent to TRMNL device",
            Some(image_url),
        )
        .await
    }

    async fn push_variables(
        &self,
        variables: &Map<String, Value>,
        merge_strategy: MergeStrategy,
    ) -> OperationResult {
        self.post_to_plugin(
            json!({
                "merge_variables": variables,
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

        let request = self.authorize(client.get(self.config.url(CURRENT_SCREEN_PATH)));
        let failure = match http::execute(request).await {
            Ok(response) if response.is_success() => {
                return OperationResult::Success(Payload::Status(DeviceStatus {
                    state: ConnectionState::Online,
                    device_id: self.config.device_id.clone(),
                    image_url: response.str_field("image_url"),
                    refresh_rate: response.u64_field("refresh_rate"),
                    filename: response.str_field("filename"),
                }));
            }
            Ok(response) => Failure::remote(response.status.as_u16(), response.error_detail()),
            Err(failure) => failure,
        };

        tracing::error!(
            device_id = %self.config.device_id,
            state = %failure.connection_state(),
            error = %failure.message,
            "failed to get device status"
        );
        failure.into()
    }

    async fn test_connection(&self) -> bool {
        let client = match self.session.client() {
            Ok(client) => client,
            Err(failure) => {
                tracing::error!(error = %failure.message, "failed to test TRMNL connection");
                return false;
            }
        };

        let request = self.authorize(client.get(self.config.url(CURRENT_SCREEN_PATH)));
        match http::execute(request).await {
            Ok(response) if response.is_success() => {
                tracing::debug!("connected to TRMNL server");
                true
            }
            Ok(response) => {
                tracing::error!(
                    status = response.status.as_u16(),
                    error = %response.error_detail(),
                    "TRMNL server refused connection test"
                );
                false
            }
            Err(failure) => {
                tracing::error!(error = %failure.message, "failed to test TRMNL connection");
                false
            }
        }
    }

    fn close(&self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::FailureKind;
    use mockito::{Matcher, Server};

    fn client(endpoint: &str, plugin: Option<&str>) -> HostedClient {
        let mut config = DeviceConfig::new("AA:BB", "standard", endpoint).with_credential("key-1");
        if let Some(plugin) = plugin {
            config = config.with_plugin_handle(plugin);
        }
        HostedClient::new(Arc::new(config), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn push_without_plugin_handle_sends_nothing() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = client(&server.url(), None);
        let result = client.push_image("https://x/a.png", None).await;

        match result {
            OperationResult::Failure(failure) => {
                assert_eq!(failure.kind, FailureKind::Precondition);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!client.session_open());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn push_image_posts_merge_variables_to_plugin() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/custom_plugins/plugin-1")
            .match_header("ID", "AA:BB")
            .match_header("Access-Token", "key-1")
            .match_body(Matcher::Json(json!({
                "merge_variables": {"image_url": "https://x/a.png", "refresh_rate": 900}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let client = client(&server.url(), Some("plugin-1"));
        let result = client.push_image("https://x/a.png", Some(900)).await;

        assert!(result.success(), "{result:?}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn set_plugin_handle_enables_push() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/custom_plugins/late-uuid")
            .match_body(Matcher::Json(json!({
                "merge_variables": {"temp": 21},
                "merge_strategy": "stream"
            })))
            .with_status(200)
            .create_async()
            .await;

        let mut client = client(&server.url(), None);
        client.set_plugin_handle("late-uuid");
        assert_eq!(client.plugin_handle(), Some("late-uuid"));

        let mut vars = Map::new();
        vars.insert("temp".to_string(), json!(21));
        let result = client.push_variables(&vars, MergeStrategy::Stream).await;

        assert!(result.success(), "{result:?}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_a_failure_value() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/custom_plugins/plugin-1")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "render failed"}"#)
            .create_async()
            .await;

        let client = client(&server.url(), Some("plugin-1"));
        let result = client.push_variables(&Map::new(), MergeStrategy::DeepMerge).await;

        assert_eq!(
            result,
            OperationResult::Failure(Failure::remote(500, "render failed"))
        );
    }

    #[tokio::test]
    async fn status_reports_current_screen() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/current_screen")
            .match_header("Access-Token", "key-1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"image_url": "https://x/s.png", "refresh_rate": 1800, "filename": "plugin-7"}"#,
            )
            .create_async()
            .await;

        let client = client(&server.url(), None);
        let result = client.get_status().await;

        let OperationResult::Success(Payload::Status(status)) = result else {
            panic!("unexpected result: {result:?}");
        };
        assert_eq!(status.state, ConnectionState::Online);
        assert_eq!(status.image_url.as_deref(), Some("https://x/s.png"));
        assert_eq!(status.refresh_rate, Some(1800));
        assert_eq!(status.filename.as_deref(), Some("plugin-7"));
    }

    #[tokio::test]
    async fn status_error_code_is_offline() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/current_screen")
            .with_status(401)
            .create_async()
            .await;

        let client = client(&server.url(), None);
        let OperationResult::Failure(failure) = client.get_status().await else {
            panic!("expected failure");
        };
        assert_eq!(failure.connection_state(), ConnectionState::Offline);
        assert_eq!(failure.message, "HTTP 401");
    }

    #[tokio::test]
    async fn test_connection_checks_current_screen() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/current_screen")
            .with_status(200)
            .create_async()
            .await;

        let client = client(&server.url(), None);
        assert!(client.test_connection().await);

        client.close();
        assert!(!client.session_open());
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_failure() {
        // Port 9 (discard) on localhost is not expected to accept connections
        let client = client("http://127.0.0.1:9", Some("plugin-1"));

        let OperationResult::Failure(failure) = client.push_image("https://x/a.png", None).await
        else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind, FailureKind::Transport);
        assert!(!client.test_connection().await);
    }
}
