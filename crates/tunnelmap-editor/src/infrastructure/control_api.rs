//! Client for the remote control APIs that host tunnel instances.
//!
//! Each master container stands for one control API.  The editor needs three
//! calls from it:
//!
//! | Call             | Request                                            |
//! |------------------|----------------------------------------------------|
//! | create instance  | `POST {api_url}/instances` with `{"url": "..."}`   |
//! | list instances   | `GET {api_url}/instances`                          |
//! | event stream     | `GET {api_url}/events`, `Accept: text/event-stream`|
//!
//! Every request carries the master's key in the `X-API-Key` header.
//!
//! The [`ControlApi`] trait is the seam the submission use case depends on;
//! [`HttpControlApi`] is the reqwest-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use tunnelmap_core::MasterConfig;

use crate::infrastructure::sse::{decode_stream, SseError, SseEvent};

/// Header carrying the master's API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Time allowed to establish a TCP/TLS connection to a control API.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while talking to a control API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The HTTP client could not be constructed.
    #[error("failed to initialise HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request never produced a response (DNS, connect, TLS, reset).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The control API answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("unexpected response from control API: {0}")]
    InvalidResponse(String),

    /// The event stream ended before anything was read from it.
    #[error("event stream closed by the control API")]
    StreamClosed,

    /// The event stream could not be decoded.
    #[error("malformed event stream: {0}")]
    Decode(#[from] SseError),
}

/// An instance as reported by a control API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
}

/// Decoded server-sent events of one control API.
pub type EventStream = BoxStream<'static, Result<SseEvent, ApiError>>;

/// Operations the editor performs against a control API.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Creates one tunnel instance from its instance URL.
    async fn create_instance(
        &self,
        master: &MasterConfig,
        instance_url: &str,
    ) -> Result<InstanceRecord, ApiError>;

    /// Lists the instances currently defined on the master.
    async fn list_instances(&self, master: &MasterConfig) -> Result<Vec<InstanceRecord>, ApiError>;

    /// Opens the master's event stream.
    async fn open_events(&self, master: &MasterConfig) -> Result<EventStream, ApiError>;
}

/// [`ControlApi`] over HTTP using reqwest.
#[derive(Debug, Clone)]
pub struct HttpControlApi {
    client: reqwest::Client,
}

impl HttpControlApi {
    /// # Errors
    ///
    /// Returns [`ApiError::Client`] if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("tunnelmap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self { client })
    }

    fn endpoint(master: &MasterConfig, path: &str) -> String {
        format!("{}/{path}", master.api_url.trim().trim_end_matches('/'))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let response = request.send().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(status_error(response).await)
        }
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn create_instance(
        &self,
        master: &MasterConfig,
        instance_url: &str,
    ) -> Result<InstanceRecord, ApiError> {
        let url = Self::endpoint(master, "instances");
        debug!("POST {url} {instance_url}");
        let request = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &master.api_key)
            .json(&serde_json::json!({ "url": instance_url }));
        let response = self.send(request, &url).await?;

        let body = response.bytes().await.map_err(|source| ApiError::Transport {
            url: url.clone(),
            source,
        })?;
        // Some control APIs answer with an empty body.
        Ok(serde_json::from_slice(&body).unwrap_or_else(|_| InstanceRecord {
            id: String::new(),
            url: instance_url.to_string(),
        }))
    }

    async fn list_instances(&self, master: &MasterConfig) -> Result<Vec<InstanceRecord>, ApiError> {
        let url = Self::endpoint(master, "instances");
        debug!("GET {url}");
        let request = self.client.get(&url).header(API_KEY_HEADER, &master.api_key);
        let response = self.send(request, &url).await?;
        response
            .json::<Vec<InstanceRecord>>()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn open_events(&self, master: &MasterConfig) -> Result<EventStream, ApiError> {
        let url = Self::endpoint(master, "events");
        debug!("GET {url} (event stream)");
        let request = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &master.api_key)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = self.send(request, &url).await?;

        let chunks = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|source| ApiError::Transport {
                url: url.clone(),
                source,
            })
        });
        Ok(decode_stream(chunks).boxed())
    }
}

/// Builds an [`ApiError::Status`] from a non-success response.
///
/// The message is the body's `error` or `message` field when the body is JSON,
/// otherwise the status reason phrase.
async fn status_error(response: reqwest::Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = error_message_from_body(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    });
    ApiError::Status {
        status: status.as_u16(),
        message,
    }
}

fn error_message_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["error", "message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|m| m.as_str()))
        .map(str::to_string)
}
