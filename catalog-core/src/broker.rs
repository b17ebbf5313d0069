/**
 * BROKER BOUNDARY - What a sampling session needs from a broker connection
 *
 * ROLE: lets the collector drive a real MQTT client in production and an
 * in-process mock in tests through the same four calls:
 * connect → subscribe → recv (repeatedly) → disconnect.
 *
 * Reconnect policy lives behind `recv`, never in the session.
 */

use crate::models::BrokerDescriptor;
use async_trait::async_trait;
use std::time::Duration;

/// Subscription filter matching every topic on a broker.
pub const WILDCARD_FILTER: &str = "#";

/// Upper bound for establishing a connection (and for the subscription ack).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Best-effort window for a clean disconnect.
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("invalid broker url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("connection lost: {0}")]
    Disconnected(String),
}

/// One message handed over by the connection layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait BrokerConnection: Send {
    /// Open the session with the broker, bounded by [`CONNECT_TIMEOUT`].
    async fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Subscribe to `filter` and wait for the broker to acknowledge it.
    async fn subscribe(&mut self, filter: &str) -> Result<(), ConnectionError>;

    /// Next inbound message. `Ok(None)` means the connection is closed for good.
    async fn recv(&mut self) -> Result<Option<InboundMessage>, ConnectionError>;

    /// Leave the broker, bounded by [`DISCONNECT_GRACE`].
    async fn disconnect(&mut self) -> Result<(), ConnectionError>;
}

/// Builds one connection per broker descriptor.
pub trait Connector: Send + Sync {
    fn open(&self, descriptor: &BrokerDescriptor) -> Result<Box<dyn BrokerConnection>, ConnectionError>;
}
