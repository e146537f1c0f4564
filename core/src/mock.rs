//! In-process broker double for unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;

use crate::message::Message;
use crate::traits::{
    AckError, Connection, ConnectionError, Connector, Delivery, DeliveryHandle, MessageReceiver,
    MessageSender, Outcome, ReceiverOptions, SendError,
};

/// Single-queue broker with switchable faults
#[derive(Default)]
pub struct MockBroker {
    queue: Mutex<VecDeque<Bytes>>,
    ready: Notify,
    pub connects: AtomicU64,
    pub stored: AtomicU64,
    pub settlements: Mutex<Vec<Outcome>>,
    /// Every connect attempt fails
    pub refuse_connections: AtomicBool,
    /// Fail every n-th send with a transient error
    pub fail_send_every: AtomicU64,
    /// The n-th send closes the link
    pub drop_link_at: AtomicU64,
    /// Receivers accept deliveries but never surface them
    pub black_hole: AtomicBool,
    /// Settle calls fail
    pub reject_settles: AtomicBool,
    /// Receiver close never returns
    pub hang_on_close: AtomicBool,
    sends: AtomicU64,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(MockConnector(self.clone()))
    }

    pub fn depth(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn outcomes(&self, outcome: Outcome) -> usize {
        self.settlements
            .lock()
            .unwrap()
            .iter()
            .filter(|o| **o == outcome)
            .count()
    }

    pub fn bodies(&self) -> Vec<Bytes> {
        self.queue.lock().unwrap().iter().cloned().collect()
    }

    fn push_back(&self, body: Bytes) {
        self.queue.lock().unwrap().push_back(body);
        self.ready.notify_one();
    }

    fn push_front(&self, body: Bytes) {
        self.queue.lock().unwrap().push_front(body);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<Bytes> {
        self.queue.lock().unwrap().pop_front()
    }
}

struct MockConnector(Arc<MockBroker>);

#[async_trait]
impl Connector for MockConnector {
    fn transport_name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        if self.0.refuse_connections.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transport("connection refused".into()));
        }
        Ok(Box::new(MockConnection {
            broker: self.0.clone(),
        }))
    }
}

struct MockConnection {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn open_sender(
        &mut self,
        _destination: &str,
    ) -> Result<Box<dyn MessageSender>, ConnectionError> {
        Ok(Box::new(MockSender {
            broker: self.broker.clone(),
            closed: false,
        }))
    }

    async fn open_receiver(
        &mut self,
        _destination: &str,
        _options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>, ConnectionError> {
        Ok(Box::new(MockReceiver {
            broker: self.broker.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

struct MockSender {
    broker: Arc<MockBroker>,
    closed: bool,
}

#[async_trait]
impl MessageSender for MockSender {
    async fn send(&mut self, message: Message) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }

        let n = self.broker.sends.fetch_add(1, Ordering::SeqCst) + 1;
        let drop_at = self.broker.drop_link_at.load(Ordering::SeqCst);
        if drop_at > 0 && n >= drop_at {
            self.closed = true;
            return Err(SendError::Closed);
        }
        let every = self.broker.fail_send_every.load(Ordering::SeqCst);
        if every > 0 && n % every == 0 {
            return Err(SendError::Transport("injected failure".into()));
        }

        self.broker.stored.fetch_add(1, Ordering::SeqCst);
        self.broker.push_back(message.into_body());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.closed = true;
        Ok(())
    }
}

struct MockReceiver {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl MessageReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<Result<Delivery, ConnectionError>> {
        if self.broker.black_hole.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }

        tokio::task::yield_now().await;
        loop {
            let ready = self.broker.ready.notified();
            if let Some(body) = self.broker.pop() {
                let handle = MockHandle {
                    broker: self.broker.clone(),
                    body: Some(body.clone()),
                };
                return Some(Ok(Delivery::new(body, Box::new(handle))));
            }
            ready.await;
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.broker.hang_on_close.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        Ok(())
    }
}

struct MockHandle {
    broker: Arc<MockBroker>,
    body: Option<Bytes>,
}

impl MockHandle {
    fn settle(&mut self, outcome: Outcome) -> Result<Bytes, AckError> {
        if self.broker.reject_settles.load(Ordering::SeqCst) {
            return Err(AckError::Transport("injected failure".into()));
        }
        let body = self.body.take().ok_or(AckError::AlreadySettled)?;
        self.broker.settlements.lock().unwrap().push(outcome);
        Ok(body)
    }
}

#[async_trait]
impl DeliveryHandle for MockHandle {
    async fn accept(&mut self) -> Result<(), AckError> {
        self.settle(Outcome::Accepted).map(|_| ())
    }

    async fn release(&mut self) -> Result<(), AckError> {
        let body = self.settle(Outcome::Released)?;
        self.broker.push_front(body);
        Ok(())
    }
}
