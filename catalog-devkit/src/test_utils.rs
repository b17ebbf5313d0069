/*!
Test harness for collector code

- `RecordingSink`: keeps every sample it accepts, can refuse chosen topics
  and slow every call down to force overlapping deliveries
- `TestHarness`: one mock connector + one recording sink
*/

use crate::mqtt_stub::{MockBroker, MockConnector};
use async_trait::async_trait;
use catalog_core::{BrokerDescriptor, Sample, SampleSink, SinkError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;

/// Install a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct SinkInner {
    samples: Mutex<Vec<Sample>>,
    attempts: AtomicUsize,
    failing_topics: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
}

#[derive(Clone, Default)]
pub struct RecordingSink {
    inner: Arc<SinkInner>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `send` sleeps this long before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock() = Some(delay);
        self
    }

    /// Reject samples for `topic` with a transport error.
    pub fn fail_topic(&self, topic: &str) {
        self.inner.failing_topics.lock().insert(topic.to_string());
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.inner.samples.lock().clone()
    }

    pub fn samples_for(&self, broker_id: &str) -> Vec<Sample> {
        self.inner
            .samples
            .lock()
            .iter()
            .filter(|s| s.broker_id == broker_id)
            .cloned()
            .collect()
    }

    /// Calls to `send`, accepted or not.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` samples were accepted or `within` runs out.
    pub async fn wait_for(&self, count: usize, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.inner.samples.lock().len() >= count {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }
        self.inner.samples.lock().len() >= count
    }
}

#[async_trait]
impl SampleSink for RecordingSink {
    async fn send(&self, sample: &Sample) -> Result<(), SinkError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.inner.delay.lock();
        if let Some(delay) = delay {
            sleep(delay).await;
        }

        if self.inner.failing_topics.lock().contains(&sample.topic) {
            return Err(SinkError::Transport(format!("recording sink refused {}", sample.topic)));
        }

        self.inner.samples.lock().push(sample.clone());
        Ok(())
    }
}

/// Mock connector and recording sink, ready to hand to sessions or a coordinator.
pub struct TestHarness {
    pub connector: Arc<MockConnector>,
    pub sink: Arc<RecordingSink>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_sink(RecordingSink::new())
    }

    pub fn with_sink(sink: RecordingSink) -> Self {
        init_tracing();
        Self {
            connector: Arc::new(MockConnector::new()),
            sink: Arc::new(sink),
        }
    }

    /// Register a mock broker and return it with a matching descriptor.
    pub fn broker(&self, id: &str) -> (MockBroker, BrokerDescriptor) {
        let broker = self.connector.broker(id);
        let descriptor = BrokerDescriptor::new(id, format!("tcp://{id}.mock:1883"));
        (broker, descriptor)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
