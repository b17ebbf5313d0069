//! Collector configuration: brokers file + environment.
//!
//! | Variable              | Default                  |
//! |-----------------------|--------------------------|
//! | `BROKERS_CONFIG`      | `brokers.json`           |
//! | `COLLECTION_DURATION` | `1m`                     |
//! | `CATALOG_SINK`        | `http` (or `database`)   |
//! | `DB_SERVICE_URL`      | `http://localhost:8080`  |
//! | `DATABASE_URL`        | required for `database`  |
//!
//! Empty variables count as unset.

use catalog_core::BrokerDescriptor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

const DEFAULT_BROKERS_CONFIG: &str = "brokers.json";
const DEFAULT_DB_SERVICE_URL: &str = "http://localhost:8080";
const DEFAULT_COLLECTION_DURATION: &str = "1m";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read brokers config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse brokers config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid collection duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },
    #[error("unknown CATALOG_SINK {0:?} (expected \"http\" or \"database\")")]
    UnknownSink(String),
    #[error("CATALOG_SINK=database requires DATABASE_URL")]
    MissingDatabaseUrl,
}

/// Where sampled topics end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    /// POST to a running catalog server.
    Http { base_url: String },
    /// Write straight into the catalog database.
    Database { url: String },
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub brokers: Vec<BrokerDescriptor>,
    pub sink: SinkTarget,
    pub collection_duration: Duration,
}

impl CollectorConfig {
    pub async fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok()).await
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub async fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let collection_duration = parse_duration(&var("COLLECTION_DURATION", DEFAULT_COLLECTION_DURATION))?;

        let sink = match var("CATALOG_SINK", "http").as_str() {
            "http" => SinkTarget::Http {
                base_url: var("DB_SERVICE_URL", DEFAULT_DB_SERVICE_URL),
            },
            "database" => SinkTarget::Database {
                url: lookup("DATABASE_URL")
                    .filter(|v| !v.is_empty())
                    .ok_or(ConfigError::MissingDatabaseUrl)?,
            },
            other => return Err(ConfigError::UnknownSink(other.to_string())),
        };

        let brokers = load_brokers(var("BROKERS_CONFIG", DEFAULT_BROKERS_CONFIG)).await?;

        Ok(Self {
            brokers,
            sink,
            collection_duration,
        })
    }
}

/// Read a list of broker descriptors. JSON and YAML are both accepted.
pub async fn load_brokers(path: impl AsRef<Path>) -> Result<Vec<BrokerDescriptor>, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `30s`, `1m`, `1h 30m`... Zero is rejected.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let duration = humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })?;

    if duration.is_zero() {
        return Err(ConfigError::InvalidDuration {
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}
