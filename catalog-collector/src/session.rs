/**
 * BROKER SESSION - One sampling pass over one broker
 *
 * ROLE: connect, subscribe to every topic, forward the first message seen on
 * each topic to the sample sink, stop on deadline or cancellation.
 *
 * LIFECYCLE:
 *   Idle → Connecting → Subscribed → Collecting → Draining → Closed
 *   Connecting / Subscribed may end in Failed (no retry at this level).
 *
 * DELIVERY:
 * - every inbound message runs on its own task of a `JoinSet`, so deliveries
 *   of one session overlap
 * - a topic is admitted once per session: test-and-insert happens in a single
 *   critical section of `TopicDedup`, before classification and before the sink
 *   is called
 * - sink failures are counted and logged; the topic stays marked as seen
 * - Draining disconnects, then joins whatever deliveries are still running
 */

use catalog_core::broker::WILDCARD_FILTER;
use catalog_core::{
    classify, BrokerConnection, BrokerDescriptor, ConnectionError, Connector, InboundMessage, Sample, SampleSink,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Subscribed,
    Collecting,
    Draining,
    Closed,
    Failed,
}

/// Why a session left `Collecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Elapsed,
    Cancelled,
    ConnectionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub broker_id: String,
    /// Distinct topics admitted during the session.
    pub topics_sampled: usize,
    pub samples_delivered: u64,
    pub delivery_failures: u64,
    pub stop: StopReason,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("broker {broker_id}: {source}")]
    Connect {
        broker_id: String,
        #[source]
        source: ConnectionError,
    },
    #[error("broker {broker_id}: {source}")]
    Subscribe {
        broker_id: String,
        #[source]
        source: ConnectionError,
    },
    #[error("broker {broker_id}: session task aborted")]
    Aborted { broker_id: String },
}

impl SessionError {
    pub fn broker_id(&self) -> &str {
        match self {
            SessionError::Connect { broker_id, .. }
            | SessionError::Subscribe { broker_id, .. }
            | SessionError::Aborted { broker_id } => broker_id,
        }
    }
}

/// Topics already admitted in this session.
#[derive(Default)]
struct TopicDedup {
    seen: Mutex<HashSet<String>>,
}

impl TopicDedup {
    /// True exactly once per topic.
    fn first_sighting(&self, topic: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(topic) {
            return false;
        }
        seen.insert(topic.to_string())
    }

    fn len(&self) -> usize {
        self.seen.lock().len()
    }
}

struct Delivery {
    broker_id: String,
    dedup: TopicDedup,
    sink: Arc<dyn SampleSink>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Delivery {
    async fn handle(&self, message: InboundMessage) {
        if !self.dedup.first_sighting(&message.topic) {
            return;
        }

        let payload_type = classify(&message.payload);
        let sample = Sample {
            broker_id: self.broker_id.clone(),
            topic: message.topic,
            payload_type,
            payload: message.payload,
            timestamp: OffsetDateTime::now_utc(),
        };

        match self.sink.send(&sample).await {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                info!(
                    broker_id = %sample.broker_id,
                    topic = %sample.topic,
                    payload_type = %sample.payload_type,
                    size = sample.payload.len(),
                    "sampled new topic"
                );
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(broker_id = %sample.broker_id, topic = %sample.topic, error = %e, "failed to deliver sample");
            }
        }
    }
}

pub struct BrokerSession {
    descriptor: BrokerDescriptor,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn SampleSink>,
    duration: Duration,
    state: SessionState,
}

impl BrokerSession {
    pub fn new(
        descriptor: BrokerDescriptor,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn SampleSink>,
        duration: Duration,
    ) -> Self {
        Self {
            descriptor,
            connector,
            sink,
            duration,
            state: SessionState::Idle,
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn enter(&mut self, next: SessionState) {
        debug!(broker_id = %self.descriptor.id, from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    /// Run the session to completion. Returns once every delivery has finished.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<SessionReport, SessionError> {
        let broker_id = self.descriptor.id.clone();

        self.enter(SessionState::Connecting);
        let mut connection = match self.open_and_connect().await {
            Ok(connection) => connection,
            Err(source) => {
                self.enter(SessionState::Failed);
                error!(broker_id = %broker_id, url = %self.descriptor.url, error = %source, "connection failed");
                return Err(SessionError::Connect { broker_id, source });
            }
        };
        info!(broker_id = %broker_id, url = %self.descriptor.url, "connected");

        self.enter(SessionState::Subscribed);
        if let Err(source) = connection.subscribe(WILDCARD_FILTER).await {
            self.enter(SessionState::Failed);
            error!(broker_id = %broker_id, error = %source, "subscription failed");
            if let Err(e) = connection.disconnect().await {
                warn!(broker_id = %broker_id, error = %e, "disconnect did not complete cleanly");
            }
            return Err(SessionError::Subscribe { broker_id, source });
        }

        self.enter(SessionState::Collecting);
        info!(broker_id = %broker_id, duration = ?self.duration, "collecting");

        let delivery = Arc::new(Delivery {
            broker_id: broker_id.clone(),
            dedup: TopicDedup::default(),
            sink: self.sink.clone(),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        let mut deliveries = JoinSet::new();
        let deadline = sleep(self.duration);
        tokio::pin!(deadline);

        let stop = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                _ = &mut deadline => break StopReason::Elapsed,
                Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                    if let Err(e) = joined {
                        error!(broker_id = %broker_id, error = %e, "delivery task failed");
                    }
                }
                received = connection.recv() => match received {
                    Ok(Some(message)) => {
                        let delivery = delivery.clone();
                        deliveries.spawn(async move { delivery.handle(message).await });
                    }
                    Ok(None) => break StopReason::ConnectionClosed,
                    Err(e) => {
                        warn!(broker_id = %broker_id, error = %e, "connection ended");
                        break StopReason::ConnectionClosed;
                    }
                },
            }
        };

        self.enter(SessionState::Draining);
        if let Err(e) = connection.disconnect().await {
            warn!(broker_id = %broker_id, error = %e, "disconnect did not complete cleanly");
        }
        while let Some(joined) = deliveries.join_next().await {
            if let Err(e) = joined {
                error!(broker_id = %broker_id, error = %e, "delivery task failed");
            }
        }

        self.enter(SessionState::Closed);
        let report = SessionReport {
            broker_id,
            topics_sampled: delivery.dedup.len(),
            samples_delivered: delivery.delivered.load(Ordering::Relaxed),
            delivery_failures: delivery.failed.load(Ordering::Relaxed),
            stop,
        };
        info!(
            broker_id = %report.broker_id,
            topics = report.topics_sampled,
            delivered = report.samples_delivered,
            failures = report.delivery_failures,
            stop = ?report.stop,
            "session closed"
        );
        Ok(report)
    }

    async fn open_and_connect(&self) -> Result<Box<dyn BrokerConnection>, ConnectionError> {
        let mut connection = self.connector.open(&self.descriptor)?;
        connection.connect().await?;
        Ok(connection)
    }
}
