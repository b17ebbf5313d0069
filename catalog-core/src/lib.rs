/*!
# catalog-core - shared building blocks of the MQTT topic catalog

- `models`  : samples, catalog entries, broker descriptors
- `payload` : json / xml / text / binary classification
- `broker`  : connection boundary used by sampling sessions
- `sink`    : where sampled topics are delivered
- `store`   : SQL catalog with upsert-merge and paginated reads
*/

pub mod broker;
pub mod models;
pub mod payload;
pub mod sink;
pub mod store;

pub use broker::{BrokerConnection, ConnectionError, Connector, InboundMessage};
pub use models::{BrokerDescriptor, CatalogEntry, PayloadType, Sample, TopicListResponse};
pub use payload::classify;
pub use sink::{SampleSink, SinkError, StoreSink};
pub use store::{CatalogStore, Dialect, ListQuery, Page, SqlCatalogStore, StoreError};
