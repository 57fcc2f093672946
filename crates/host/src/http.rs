//! JSON-over-HTTP host client
//!
//! Every command is `POST {base_url}/invoke/{command}` with a JSON object of
//! arguments. A 2xx body is the command's result; anything else carries
//! `{ "error": "..." }`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use robodock_protocol::{
    ActivityConfig, ControlType, HostEventBatch, PairedConnection, PairingCode, PollStatus,
    RemoteConfig,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::events::EventFeed;
use crate::{start_command, status_command, stop_command, HostCollaborator, HostError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// How long the host may hold an event long-poll open
const EVENT_WAIT: Duration = Duration::from_secs(25);

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Host reached over HTTP, either on this machine or a paired robot
#[derive(Clone)]
pub struct HttpHost {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpHost {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, HostError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HostError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    /// The native backend on this machine
    pub fn local(port: u16) -> Result<Self, HostError> {
        Self::new(format!("http://127.0.0.1:{}", port), None, DEFAULT_TIMEOUT)
    }

    /// A paired robot's service, authenticated with the pairing token
    pub fn paired(connection: &PairedConnection) -> Result<Self, HostError> {
        Self::new(
            connection.base_url(),
            Some(connection.token.clone()),
            DEFAULT_TIMEOUT,
        )
    }

    /// Same host, different per-request timeout
    pub fn with_timeout(self, timeout: Duration) -> Result<Self, HostError> {
        Self::new(self.base_url, self.token, timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn invoke<T: DeserializeOwned>(&self, command: &str, args: Value) -> Result<T, HostError> {
        let url = format!("{}/invoke/{}", self.base_url, command);
        let mut request = self.client.post(&url).json(&args);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HostError::Unreachable(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HostError::Unreachable(e.to_string()))?;

        debug!(
            component = "host",
            event = "host.invoke",
            command = %command,
            status = %status,
            "Host command answered"
        );

        decode_response(command, status, &body)
    }

    /// `GET {base_url}/events?after=..&wait_ms=..`. The host holds the
    /// request open until it has events newer than `after` or the wait ends.
    async fn poll_events(&self, after: u64) -> Result<HostEventBatch, HostError> {
        let url = format!(
            "{}/events?after={}&wait_ms={}",
            self.base_url,
            after,
            EVENT_WAIT.as_millis()
        );
        let mut request = self.client.get(&url).timeout(EVENT_WAIT + self.timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HostError::Unreachable(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| HostError::Unreachable(e.to_string()))?;
        decode_response("events", status, &body)
    }
}

#[async_trait]
impl EventFeed for HttpHost {
    async fn next_events(&self, after: u64) -> Result<HostEventBatch, HostError> {
        self.poll_events(after).await
    }
}

fn decode_response<T: DeserializeOwned>(
    command: &str,
    status: StatusCode,
    body: &str,
) -> Result<T, HostError> {
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(body)
            .map(|e| e.error)
            .unwrap_or_else(|_| {
                if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body.trim().to_string()
                }
            });
        return Err(HostError::Rejected {
            command: command.to_string(),
            message,
        });
    }

    serde_json::from_str(body).map_err(|source| HostError::Malformed {
        command: command.to_string(),
        source,
    })
}

#[async_trait]
impl HostCollaborator for HttpHost {
    async fn start_activity(&self, config: ActivityConfig) -> Result<String, HostError> {
        let command = start_command(config.control_type());
        let args = config.to_host_args().map_err(|source| HostError::Malformed {
            command: command.clone(),
            source,
        })?;
        self.invoke(&command, json!({ "config": args })).await
    }

    async fn stop_activity(
        &self,
        control_type: ControlType,
        nickname: &str,
    ) -> Result<String, HostError> {
        self.invoke(&stop_command(control_type), json!({ "nickname": nickname }))
            .await
    }

    async fn activity_status(
        &self,
        control_type: ControlType,
        nickname: Option<&str>,
    ) -> Result<PollStatus, HostError> {
        self.invoke(&status_command(control_type), json!({ "nickname": nickname }))
            .await
    }

    async fn kiosk_pairing_info(&self) -> Result<PairingCode, HostError> {
        self.invoke("get_kiosk_pairing_info", json!({})).await
    }

    async fn read_remote_config(&self, nickname: &str) -> Result<RemoteConfig, HostError> {
        self.invoke("read_remote_config", json!({ "nickname": nickname }))
            .await
    }

    async fn connect_remote(
        &self,
        nickname: &str,
        config: RemoteConfig,
    ) -> Result<String, HostError> {
        self.invoke(
            "connect_remote",
            json!({ "nickname": nickname, "config": config }),
        )
        .await
    }

    async fn disconnect_remote(&self, nickname: &str) -> Result<String, HostError> {
        self.invoke("disconnect_remote", json!({ "nickname": nickname }))
            .await
    }
}
