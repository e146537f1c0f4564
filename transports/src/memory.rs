//! In-process broker (`memory://<name>`)
//!
//! Queues live in a process-wide registry keyed by broker name, so every
//! connector built for the same URL talks to the same broker. Consumers on
//! one destination compete for messages. Accept removes a message, release
//! puts it back at the head of the queue, and a delivery dropped without
//! being settled is released.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use loadgen_core::{
    AckError, Connection, ConnectionError, Connector, Delivery, DeliveryHandle, Message,
    MessageReceiver, MessageSender, ReceiverOptions, SendError,
};

fn registry() -> &'static Mutex<HashMap<String, Arc<MemoryBroker>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<MemoryBroker>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

#[derive(Default)]
struct Queue {
    items: Mutex<VecDeque<Bytes>>,
    ready: Notify,
}

impl Queue {
    fn push_back(&self, body: Bytes) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(body);
        self.ready.notify_one();
    }

    fn push_front(&self, body: Bytes) {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_front(body);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<Bytes> {
        self.items
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// A set of named in-memory queues
#[derive(Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, Arc<Queue>>>,
}

impl MemoryBroker {
    /// Create a private broker
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get or create the process-wide broker called `name`
    pub fn named(name: &str) -> Arc<Self> {
        let mut brokers = registry().lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(brokers.entry(name.to_string()).or_default())
    }

    /// Messages waiting on `destination`
    pub fn depth(&self, destination: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(destination)
            .map_or(0, |q| q.len())
    }

    fn queue(&self, destination: &str) -> Arc<Queue> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(queues.entry(destination.to_string()).or_default())
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("MemoryBroker")
            .field("queues", &queues.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Connector for a [`MemoryBroker`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
}

impl MemoryConnector {
    /// Connect to an existing broker
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self { broker }
    }

    /// Connect to the process-wide broker called `name`
    pub fn named(name: &str) -> Self {
        Self::new(MemoryBroker::named(name))
    }

    /// The broker behind this connector
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn transport_name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        Ok(Box::new(MemoryConnection {
            broker: Arc::clone(&self.broker),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MemoryConnection {
    broker: Arc<MemoryBroker>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_sender(
        &mut self,
        destination: &str,
    ) -> Result<Box<dyn MessageSender>, ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        Ok(Box::new(MemorySender {
            queue: self.broker.queue(destination),
            connection: Arc::clone(&self.closed),
            closed: false,
        }))
    }

    async fn open_receiver(
        &mut self,
        destination: &str,
        _options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>, ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        Ok(Box::new(MemoryReceiver {
            queue: self.broker.queue(destination),
            connection: Arc::clone(&self.closed),
            closed: false,
        }))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MemorySender {
    queue: Arc<Queue>,
    connection: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl MessageSender for MemorySender {
    async fn send(&mut self, message: Message) -> Result<(), SendError> {
        if self.closed || self.connection.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        self.queue.push_back(message.into_body());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.closed = true;
        Ok(())
    }
}

struct MemoryReceiver {
    queue: Arc<Queue>,
    connection: Arc<AtomicBool>,
    closed: bool,
}

#[async_trait]
impl MessageReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<Result<Delivery, ConnectionError>> {
        // Let producers and other consumers run between deliveries. This must
        // happen before the pop so a cancelled recv never loses a message.
        tokio::task::yield_now().await;
        loop {
            if self.closed || self.connection.load(Ordering::Acquire) {
                return None;
            }
            let ready = self.queue.ready.notified();
            if let Some(body) = self.queue.pop() {
                let handle = MemoryDelivery {
                    queue: Arc::clone(&self.queue),
                    body: Some(body.clone()),
                };
                return Some(Ok(Delivery::new(body, Box::new(handle))));
            }
            ready.await;
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.closed = true;
        Ok(())
    }
}

struct MemoryDelivery {
    queue: Arc<Queue>,
    /// `Some` until settled
    body: Option<Bytes>,
}

#[async_trait]
impl DeliveryHandle for MemoryDelivery {
    async fn accept(&mut self) -> Result<(), AckError> {
        self.body.take().map(drop).ok_or(AckError::AlreadySettled)
    }

    async fn release(&mut self) -> Result<(), AckError> {
        let body = self.body.take().ok_or(AckError::AlreadySettled)?;
        self.queue.push_front(body);
        Ok(())
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        if let Some(body) = self.body.take() {
            self.queue.push_front(body);
        }
    }
}
