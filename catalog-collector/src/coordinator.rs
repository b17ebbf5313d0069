//! Collection coordinator: one broker session per descriptor, all run together.
//!
//! Every session gets a child of the caller's cancellation token, so cancelling
//! the root stops them all while a session ending on its own leaves siblings
//! untouched. `run` returns only after every session task has been joined.

use crate::session::{BrokerSession, SessionError, SessionReport};
use catalog_core::{BrokerDescriptor, Connector, SampleSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("no brokers configured")]
    NoBrokers,
    #[error("collection duration must be greater than zero")]
    InvalidDuration,
}

#[derive(Debug)]
pub struct SessionFailure {
    pub broker_id: String,
    pub error: SessionError,
}

#[derive(Debug, Default)]
pub struct CollectionSummary {
    pub reports: Vec<SessionReport>,
    pub failures: Vec<SessionFailure>,
}

impl CollectionSummary {
    pub fn topics_sampled(&self) -> usize {
        self.reports.iter().map(|r| r.topics_sampled).sum()
    }
}

pub struct Coordinator {
    brokers: Vec<BrokerDescriptor>,
    duration: Duration,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn SampleSink>,
}

impl Coordinator {
    pub fn new(
        brokers: Vec<BrokerDescriptor>,
        duration: Duration,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn SampleSink>,
    ) -> Result<Self, CoordinatorError> {
        if brokers.is_empty() {
            return Err(CoordinatorError::NoBrokers);
        }
        if duration.is_zero() {
            return Err(CoordinatorError::InvalidDuration);
        }

        Ok(Self {
            brokers,
            duration,
            connector,
            sink,
        })
    }

    pub async fn run(&self, cancel: &CancellationToken) -> CollectionSummary {
        info!(brokers = self.brokers.len(), duration = ?self.duration, "starting collection");

        let mut sessions = JoinSet::new();
        let mut outstanding = HashMap::new();

        for descriptor in &self.brokers {
            let broker_id = descriptor.id.clone();
            let mut session = BrokerSession::new(
                descriptor.clone(),
                self.connector.clone(),
                self.sink.clone(),
                self.duration,
            );
            let token = cancel.child_token();
            let handle = sessions.spawn(async move { session.run(&token).await });
            outstanding.insert(handle.id(), broker_id);
        }

        let mut summary = CollectionSummary::default();
        while let Some(joined) = sessions.join_next_with_id().await {
            match joined {
                Ok((id, Ok(report))) => {
                    outstanding.remove(&id);
                    summary.reports.push(report);
                }
                Ok((id, Err(error))) => {
                    let broker_id = outstanding.remove(&id).unwrap_or_else(|| error.broker_id().to_string());
                    error!(broker_id = %broker_id, error = %error, "session failed");
                    summary.failures.push(SessionFailure { broker_id, error });
                }
                Err(join_error) => {
                    let broker_id = outstanding.remove(&join_error.id()).unwrap_or_default();
                    error!(broker_id = %broker_id, error = %join_error, "session task aborted");
                    summary.failures.push(SessionFailure {
                        broker_id: broker_id.clone(),
                        error: SessionError::Aborted { broker_id },
                    });
                }
            }
        }

        summary.reports.sort_by(|a, b| a.broker_id.cmp(&b.broker_id));
        summary.failures.sort_by(|a, b| a.broker_id.cmp(&b.broker_id));

        info!(
            succeeded = summary.reports.len(),
            failed = summary.failures.len(),
            topics = summary.topics_sampled(),
            "collection finished"
        );
        summary
    }
}

