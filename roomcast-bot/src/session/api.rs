//! Room endpoint transport
//!
//! The remote endpoint exposes three GET operations distinguished by the
//! `a` parameter: `join`, `recv`, and `send`. All three share one HTTP
//! timeout; responses are line oriented with `OK` on the first line.

use roomcast_common::config::RoomConfig;
use thiserror::Error;

/// Transient transport failure (connection refused, timeout, TLS)
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// The three calls the session client makes.
///
/// Behind a trait so tests can script transport and protocol failures.
#[allow(async_fn_in_trait)]
pub trait RoomApi: Send {
    async fn join(&self) -> Result<String, TransportError>;
    async fn recv(&self, room_key: &str) -> Result<String, TransportError>;
    async fn send(&self, room_key: &str, message: &str) -> Result<String, TransportError>;
}

/// Production transport over reqwest
pub struct HttpRoomApi {
    client: reqwest::Client,
    config: RoomConfig,
}

impl HttpRoomApi {
    pub fn new(config: RoomConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self { client, config })
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<String, TransportError> {
        let response = self
            .client
            .get(&self.config.entrypoint_url)
            .query(params)
            .send()
            .await?;
        Ok(response.text().await?)
    }
}

impl RoomApi for HttpRoomApi {
    async fn join(&self) -> Result<String, TransportError> {
        self.get(&[
            ("v", "1"),
            ("u", &self.config.app_username),
            ("p", &self.config.api_key),
            ("a", "join"),
            ("w", &self.config.room_name),
        ])
        .await
    }

    async fn recv(&self, room_key: &str) -> Result<String, TransportError> {
        self.get(&[("v", "1"), ("k", room_key), ("a", "recv")]).await
    }

    async fn send(&self, room_key: &str, message: &str) -> Result<String, TransportError> {
        self.get(&[("v", "1"), ("k", room_key), ("a", "send"), ("w", message)])
            .await
    }
}
