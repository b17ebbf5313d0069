/*!
# Catalog DevKit - test doubles for the topic catalog

Lets collector code run without a real broker or catalog server:
- Mock MQTT brokers that implement the connection boundary
- Sample sinks that record (or refuse) what they receive
- A small harness wiring both together
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{MockBroker, MockConnection, MockConnector};
pub use test_utils::{init_tracing, RecordingSink, TestHarness};
