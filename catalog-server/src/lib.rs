//! Catalog REST API: sample ingestion, topic listing and lookup.

pub mod config;
pub mod http;

pub use config::{ConfigError, ServerConfig};
pub use http::{build_router, AppState};
