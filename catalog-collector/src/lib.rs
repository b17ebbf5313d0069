/*!
# catalog-collector - samples every topic of the configured MQTT brokers

- `config`      : brokers file + environment
- `mqtt`        : rumqttc implementation of the broker connection boundary
- `session`     : one sampling session per broker (dedup, classify, deliver)
- `coordinator` : runs all sessions concurrently under one cancellation token
- `http_sink`   : delivers samples to a remote catalog server
*/

pub mod config;
pub mod coordinator;
pub mod http_sink;
pub mod mqtt;
pub mod session;

pub use config::{CollectorConfig, ConfigError, SinkTarget};
pub use coordinator::{CollectionSummary, Coordinator, CoordinatorError, SessionFailure};
pub use http_sink::HttpSink;
pub use mqtt::{MqttConnection, MqttConnector};
pub use session::{BrokerSession, SessionError, SessionReport, SessionState, StopReason};
