use std::net::SocketAddr;

const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_SQLITE_PATH: &str = "mqtt_catalog.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid SERVER_ADDR {value:?}: {reason}")]
    InvalidAddr { value: String, reason: String },
}

/// Server settings read from `SERVER_ADDR`, `DATABASE_URL` and `SQLITE_PATH`.
#[derive(Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub database_url: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // the URL may carry credentials
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("database_url", &"<redacted>")
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let addr = parse_addr(&var("SERVER_ADDR").unwrap_or_else(|| DEFAULT_SERVER_ADDR.to_string()))?;

        let database_url = var("DATABASE_URL").unwrap_or_else(|| {
            let path = var("SQLITE_PATH").unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string());
            format!("sqlite://{path}?mode=rwc")
        });

        Ok(Self { addr, database_url })
    }
}

/// Accepts `host:port` or a bare `:port` (all interfaces).
pub fn parse_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    let full = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => value.to_string(),
    };

    full.parse().map_err(|e: std::net::AddrParseError| ConfigError::InvalidAddr {
        value: value.to_string(),
        reason: e.to_string(),
    })
}
