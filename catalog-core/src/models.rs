/**
 * MODELS - Data shared by the collector, the catalog store and the HTTP API
 *
 * ROLE: one transient shape (`Sample`, produced by a broker session) and one
 * durable shape (`CatalogEntry`, one row per (broker, topic) pair).
 *
 * WIRE FORMAT: payload bytes travel as standard base64, timestamps as RFC3339,
 * payload types as lowercase tags ("json", "xml", "text", "binary").
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// Coarse encoding of a payload. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    Json,
    Xml,
    Text,
    Binary,
}

impl PayloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadType::Json => "json",
            PayloadType::Xml => "xml",
            PayloadType::Text => "text",
            PayloadType::Binary => "binary",
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown payload type: {0:?}")]
pub struct UnknownPayloadType(pub String);

impl FromStr for PayloadType {
    type Err = UnknownPayloadType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(PayloadType::Json),
            "xml" => Ok(PayloadType::Xml),
            "text" => Ok(PayloadType::Text),
            "binary" => Ok(PayloadType::Binary),
            other => Err(UnknownPayloadType(other.to_string())),
        }
    }
}

/// One observed message for a (broker, topic) pair, on its way to a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub broker_id: String,
    pub topic: String,
    pub payload_type: PayloadType,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Durable catalog row. `(broker_id, topic)` is the natural key, `id` a surrogate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub broker_id: String,
    pub topic: String,
    pub payload_type: PayloadType,
    #[serde(with = "base64_bytes")]
    pub sample_payload: Vec<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Body of `GET /api/topics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicListResponse {
    pub topics: Vec<CatalogEntry>,
    pub total: u64,
}

/// Connection descriptor for one broker, as listed in the brokers file.
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerDescriptor {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl BrokerDescriptor {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            username: None,
            password: None,
            client_id: None,
        }
    }

    /// Client identity announced to the broker, `mqtt-catalog-<id>-<unix secs>`
    /// when none is configured.
    pub fn client_id(&self) -> String {
        match self.client_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!(
                "mqtt-catalog-{}-{}",
                self.id,
                OffsetDateTime::now_utc().unix_timestamp()
            ),
        }
    }
}

impl fmt::Debug for BrokerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerDescriptor")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .finish()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
