//! Connection contract between the engine and broker transports
//!
//! The engine never speaks a wire protocol itself. It drives a [`Connector`]
//! to obtain [`Connection`]s and uses the sender/receiver links they open.
//! Implementations live in the `loadgen-transports` crate.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::message::Message;

// ============================================================================
// Connector / Connection
// ============================================================================

/// Factory for broker connections
///
/// One connector is shared (via `Arc`) by every worker of a run; each worker
/// calls [`Connector::connect`] once and owns the resulting connection.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Transport identifier (e.g., "stomp+ws", "memory")
    fn transport_name(&self) -> &str;

    /// Open a transport session and complete the authentication handshake
    ///
    /// Resolves once the connection is open and ready for links.
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// An open broker session
#[async_trait]
pub trait Connection: Send {
    /// Open a sending link to `destination`; resolves when it is ready to send
    async fn open_sender(
        &mut self,
        destination: &str,
    ) -> Result<Box<dyn MessageSender>, ConnectionError>;

    /// Open a receiving link on `destination`
    async fn open_receiver(
        &mut self,
        destination: &str,
        options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>, ConnectionError>;

    /// Close the session. Idempotent and best-effort.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Options for [`Connection::open_receiver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverOptions {
    /// Deliveries must be settled explicitly with accept/release
    pub manual_ack: bool,
}

impl ReceiverOptions {
    /// Receiver whose deliveries are settled by the caller
    pub fn manual_ack() -> Self {
        Self { manual_ack: true }
    }
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self::manual_ack()
    }
}

// ============================================================================
// Links
// ============================================================================

/// Sending half of a link
#[async_trait]
pub trait MessageSender: Send {
    /// Hand one message to the transport
    async fn send(&mut self, message: Message) -> Result<(), SendError>;

    /// Close the link. Idempotent and best-effort.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Receiving half of a link
#[async_trait]
pub trait MessageReceiver: Send {
    /// Wait for the next delivery
    ///
    /// Returns `None` once the link or its connection is closed.
    async fn recv(&mut self) -> Option<Result<Delivery, ConnectionError>>;

    /// Close the link. Idempotent and best-effort.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Settles a single delivery with the broker
#[async_trait]
pub trait DeliveryHandle: Send {
    /// Positive acknowledgment: the message is consumed
    async fn accept(&mut self) -> Result<(), AckError>;

    /// Negative acknowledgment: the broker may redeliver the message
    async fn release(&mut self) -> Result<(), AckError>;
}

/// Settlement decision for a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Accept (ack)
    Accepted,
    /// Release (nack / requeue)
    Released,
}

/// A received message plus the handle used to settle it
pub struct Delivery {
    body: Bytes,
    handle: Box<dyn DeliveryHandle>,
}

impl Delivery {
    /// Wrap a payload and its settlement handle
    pub fn new(body: impl Into<Bytes>, handle: Box<dyn DeliveryHandle>) -> Self {
        Self {
            body: body.into(),
            handle,
        }
    }

    /// Message payload
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Settle the delivery with the given outcome
    pub async fn settle(mut self, outcome: Outcome) -> Result<(), AckError> {
        match outcome {
            Outcome::Accepted => self.handle.accept().await,
            Outcome::Released => self.handle.release().await,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("len", &self.body.len())
            .finish()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Transport or handshake failure; local to the worker that owns the connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Network/transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Broker rejected the credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Broker sent something the transport could not interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker reported an error frame
    #[error("Broker error: {0}")]
    Broker(String),

    /// Handshake did not finish in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Operation on a closed connection
    #[error("Connection closed")]
    Closed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single send attempt failed; the message is not counted as sent
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The link or its connection is closed
    #[error("Sender closed")]
    Closed,

    /// Transport refused the message
    #[error("Send failed: {0}")]
    Transport(String),
}

impl SendError {
    /// Whether no further send on this link can succeed
    pub fn is_terminal(&self) -> bool {
        matches!(self, SendError::Closed)
    }
}

/// Accept/release signal failed after the delivery was already counted
#[derive(Debug, thiserror::Error)]
pub enum AckError {
    /// The link or its connection is closed
    #[error("Receiver closed")]
    Closed,

    /// Delivery was settled before
    #[error("Delivery already settled")]
    AlreadySettled,

    /// Transport refused the settlement
    #[error("Settle failed: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingHandle {
        log: Arc<Mutex<Vec<Outcome>>>,
    }

    #[async_trait]
    impl DeliveryHandle for RecordingHandle {
        async fn accept(&mut self) -> Result<(), AckError> {
            self.log.lock().unwrap().push(Outcome::Accepted);
            Ok(())
        }

        async fn release(&mut self) -> Result<(), AckError> {
            self.log.lock().unwrap().push(Outcome::Released);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delivery_settle_dispatches_outcome() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let accepted = Delivery::new(
            Bytes::from_static(b"a"),
            Box::new(RecordingHandle { log: log.clone() }),
        );
        accepted.settle(Outcome::Accepted).await.unwrap();

        let released = Delivery::new(
            Bytes::from_static(b"b"),
            Box::new(RecordingHandle { log: log.clone() }),
        );
        assert_eq!(released.body(), b"b");
        released.settle(Outcome::Released).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![Outcome::Accepted, Outcome::Released]
        );
    }

    #[test]
    fn test_send_error_terminal() {
        assert!(SendError::Closed.is_terminal());
        assert!(!SendError::Transport("buffer full".into()).is_terminal());
    }

    #[test]
    fn test_receiver_options_default_is_manual() {
        assert!(ReceiverOptions::default().manual_ack);
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(
            serde_json::to_string(&Outcome::Released).unwrap(),
            "\"released\""
        );
    }
}
