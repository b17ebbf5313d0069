/*!
Mock MQTT broker for running sessions without a network

A `MockBroker` is a scripted inbox: tests `publish` messages (before or during
a session) and `close` it to end the session's stream. Connections opened by
`MockConnector` drain that inbox and record what the session asked for.
*/

use async_trait::async_trait;
use catalog_core::{BrokerConnection, BrokerDescriptor, ConnectionError, Connector, InboundMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

enum BrokerEvent {
    Message(InboundMessage),
    Close,
}

struct BrokerInner {
    id: String,
    sender: mpsc::UnboundedSender<BrokerEvent>,
    inbox: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<BrokerEvent>>>,
    refuse_connect: AtomicBool,
    refuse_subscribe: AtomicBool,
    subscriptions: Mutex<Vec<String>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// Scriptable broker shared between a test and the connections it hands out.
#[derive(Clone)]
pub struct MockBroker {
    inner: Arc<BrokerInner>,
}

impl MockBroker {
    pub fn new(id: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(BrokerInner {
                id: id.into(),
                sender,
                inbox: Arc::new(tokio::sync::Mutex::new(receiver)),
                refuse_connect: AtomicBool::new(false),
                refuse_subscribe: AtomicBool::new(false),
                subscriptions: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Queue a message for delivery to the connected session.
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let _ = self
            .inner
            .sender
            .send(BrokerEvent::Message(InboundMessage::new(topic, payload)));
    }

    /// End the message stream once everything queued so far has been read.
    pub fn close(&self) {
        let _ = self.inner.sender.send(BrokerEvent::Close);
    }

    pub fn refuse_connections(&self) {
        self.inner.refuse_connect.store(true, Ordering::SeqCst);
    }

    pub fn refuse_subscriptions(&self) {
        self.inner.refuse_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    fn connection(&self) -> MockConnection {
        MockConnection {
            broker: self.clone(),
            connected: false,
        }
    }
}

/// Connection to a [`MockBroker`].
pub struct MockConnection {
    broker: MockBroker,
    connected: bool,
}

#[async_trait]
impl BrokerConnection for MockConnection {
    async fn connect(&mut self) -> Result<(), ConnectionError> {
        let inner = &self.broker.inner;
        if inner.refuse_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Connect(format!("mock broker {} refused the connection", inner.id)));
        }
        inner.connects.fetch_add(1, Ordering::SeqCst);
        self.connected = true;
        debug!(broker_id = %inner.id, "mock connection established");
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), ConnectionError> {
        let inner = &self.broker.inner;
        if !self.connected {
            return Err(ConnectionError::Subscribe("not connected".into()));
        }
        if inner.refuse_subscribe.load(Ordering::SeqCst) {
            return Err(ConnectionError::Subscribe(format!("mock broker {} refused {filter:?}", inner.id)));
        }
        inner.subscriptions.lock().push(filter.to_string());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<InboundMessage>, ConnectionError> {
        let mut inbox = self.broker.inner.inbox.lock().await;
        match inbox.recv().await {
            Some(BrokerEvent::Message(message)) => Ok(Some(message)),
            Some(BrokerEvent::Close) | None => Ok(None),
        }
    }

    async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if self.connected {
            self.connected = false;
            self.broker.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Hands out connections to registered mock brokers, keyed by broker id.
#[derive(Default)]
pub struct MockConnector {
    brokers: Mutex<HashMap<String, MockBroker>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the broker answering for `id`.
    pub fn broker(&self, id: &str) -> MockBroker {
        self.brokers
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| MockBroker::new(id))
            .clone()
    }
}

impl Connector for MockConnector {
    fn open(&self, descriptor: &BrokerDescriptor) -> Result<Box<dyn BrokerConnection>, ConnectionError> {
        let brokers = self.brokers.lock();
        let broker = brokers
            .get(&descriptor.id)
            .ok_or_else(|| ConnectionError::Connect(format!("no mock broker registered for {}", descriptor.id)))?;
        Ok(Box::new(broker.connection()))
    }
}
