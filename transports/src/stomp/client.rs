//! STOMP connector, connection and links

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use loadgen_core::{
    AckError, BrokerEndpoint, Connection, ConnectionError, Connector, Credentials, Delivery,
    DeliveryHandle, Message, MessageReceiver, MessageSender, ReceiverOptions, SendError,
    TransportKind,
};

use super::frame::{Command, Frame};
use super::io::{self, FrameReader, FrameWriter};

/// Default bound on transport connect plus the CONNECT/CONNECTED exchange
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frames queued for the writer task before `send` waits
pub const OUTBOUND_BUFFER: usize = 1024;

/// Unacknowledged deliveries the broker may push to one subscription
pub const DEFAULT_PREFETCH: u16 = 100;

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Map a destination name onto a STOMP destination header
///
/// Bare names are treated as queues; anything starting with `/` is passed
/// through so `/topic/..` or `/exchange/..` can be addressed directly.
pub fn stomp_destination(destination: &str) -> String {
    if destination.starts_with('/') {
        destination.to_string()
    } else {
        format!("/queue/{}", destination)
    }
}

/// Opens STOMP 1.2 sessions over TCP or WebSocket
#[derive(Debug, Clone)]
pub struct StompConnector {
    endpoint: BrokerEndpoint,
    credentials: Option<Credentials>,
    virtual_host: String,
    connect_timeout: Duration,
    prefetch: u16,
    name: &'static str,
}

impl StompConnector {
    /// Create a connector
    ///
    /// The virtual host defaults to `/` and can be overridden with a
    /// `vhost` query parameter on the broker URL.
    pub fn new(endpoint: BrokerEndpoint, credentials: Option<Credentials>) -> Self {
        let virtual_host = endpoint.virtual_host().unwrap_or_else(|| "/".to_string());
        let name = match (endpoint.kind(), endpoint.is_secure()) {
            (TransportKind::StompWebSocket, true) => "stomp+wss",
            (TransportKind::StompWebSocket, false) => "stomp+ws",
            _ => "stomp+tcp",
        };

        Self {
            endpoint,
            credentials,
            virtual_host,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            prefetch: DEFAULT_PREFETCH,
            name,
        }
    }

    /// Override the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the per-subscription prefetch (floored at 1)
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", self.virtual_host.clone())
            .header("heart-beat", "0,0");
        if let Some(credentials) = &self.credentials {
            frame = frame
                .header("login", credentials.username.clone())
                .header("passcode", credentials.password.clone());
        }
        frame
    }

    async fn handshake(&self) -> Result<StompConnection, ConnectionError> {
        let (mut reader, mut writer) = io::open(&self.endpoint).await?;
        writer.write_frame(&self.connect_frame()).await?;

        match reader.next_frame().await? {
            Some(frame) if frame.command == Command::Connected => {
                tracing::debug!(
                    broker = %self.endpoint,
                    version = frame.get("version").unwrap_or("1.0"),
                    server = frame.get("server").unwrap_or("unknown"),
                    "STOMP session established"
                );
                Ok(StompConnection::start(reader, writer, self.prefetch))
            }
            Some(frame) if frame.command == Command::Error => {
                writer.shutdown().await;
                Err(ConnectionError::Auth(error_text(&frame)))
            }
            Some(frame) => {
                writer.shutdown().await;
                Err(ConnectionError::Protocol(format!(
                    "expected CONNECTED, got {}",
                    frame.command
                )))
            }
            None => Err(ConnectionError::Closed),
        }
    }
}

#[async_trait]
impl Connector for StompConnector {
    fn transport_name(&self) -> &str {
        self.name
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        match tokio::time::timeout(self.connect_timeout, self.handshake()).await {
            Ok(Ok(connection)) => Ok(Box::new(connection)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::Timeout(self.connect_timeout)),
        }
    }
}

fn error_text(frame: &Frame) -> String {
    let message = frame.get("message").unwrap_or("broker error");
    let body = String::from_utf8_lossy(&frame.body);
    let body = body.trim();
    if body.is_empty() {
        message.to_string()
    } else {
        format!("{}: {}", message, body)
    }
}

// ============================================================================
// Connection
// ============================================================================

enum Outbound {
    Frame(Frame),
    /// Write the frame, then close the transport
    Close(Frame),
}

type Routes = Mutex<HashMap<String, mpsc::Sender<Result<Frame, ConnectionError>>>>;

struct Shared {
    routes: Routes,
    next_subscription: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Hand a MESSAGE to its subscription, waiting if its buffer is full
    async fn route(&self, frame: Frame) {
        let Some(id) = frame.get("subscription").map(str::to_string) else {
            tracing::warn!("MESSAGE frame without subscription header");
            return;
        };
        let tx = self
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned();
        match tx {
            Some(tx) => {
                let _ = tx.send(Ok(frame)).await;
            }
            None => tracing::debug!(subscription = %id, "MESSAGE for unknown subscription"),
        }
    }

    fn fail_all(&self, error: impl Fn() -> ConnectionError) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        for (_, tx) in routes.drain() {
            let _ = tx.try_send(Err(error()));
        }
    }
}

/// An open STOMP session
///
/// A writer task owns the sending half and drains an outbound queue shared
/// by every link; a reader task routes MESSAGE frames to subscriptions.
pub struct StompConnection {
    outbound: mpsc::Sender<Outbound>,
    shared: Arc<Shared>,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
    prefetch: u16,
}

impl StompConnection {
    fn start(reader: FrameReader, writer: FrameWriter, prefetch: u16) -> Self {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let shared = Arc::new(Shared {
            routes: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        let writer = tokio::spawn(write_loop(writer, rx, Arc::clone(&shared)));
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&shared)));

        Self {
            outbound: tx,
            shared,
            writer: Some(writer),
            reader,
            prefetch,
        }
    }
}

async fn write_loop(mut writer: FrameWriter, mut rx: mpsc::Receiver<Outbound>, shared: Arc<Shared>) {
    while let Some(item) = rx.recv().await {
        let (frame, last) = match item {
            Outbound::Frame(frame) => (frame, false),
            Outbound::Close(frame) => (frame, true),
        };
        if let Err(e) = writer.write_frame(&frame).await {
            if !shared.is_closed() {
                tracing::error!(error = %e, command = %frame.command, "STOMP write failed");
            }
            break;
        }
        if last {
            break;
        }
    }
    shared.closed.store(true, Ordering::Release);
    writer.shutdown().await;
}

async fn read_loop(mut reader: FrameReader, shared: Arc<Shared>) {
    loop {
        match reader.next_frame().await {
            Ok(Some(frame)) => match frame.command {
                Command::Message => shared.route(frame).await,
                Command::Receipt => {
                    tracing::trace!(receipt = frame.get("receipt-id").unwrap_or(""), "RECEIPT");
                }
                Command::Error => {
                    let text = error_text(&frame);
                    tracing::error!(error = %text, "Broker sent ERROR frame");
                    shared.fail_all(|| ConnectionError::Broker(text.clone()));
                    break;
                }
                other => tracing::debug!(command = %other, "Ignoring unexpected frame"),
            },
            Ok(None) => {
                if !shared.is_closed() {
                    tracing::warn!("Broker closed the connection");
                }
                break;
            }
            Err(e) => {
                if !shared.is_closed() {
                    tracing::error!(error = %e, "STOMP read failed");
                    shared.fail_all(|| ConnectionError::Transport(e.to_string()));
                }
                break;
            }
        }
    }
    shared.closed.store(true, Ordering::Release);
    // Dropping the routes ends every receiver's stream.
    shared
        .routes
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
}

#[async_trait]
impl Connection for StompConnection {
    async fn open_sender(
        &mut self,
        destination: &str,
    ) -> Result<Box<dyn MessageSender>, ConnectionError> {
        if self.shared.is_closed() {
            return Err(ConnectionError::Closed);
        }
        Ok(Box::new(StompSender {
            destination: stomp_destination(destination),
            outbound: self.outbound.clone(),
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    async fn open_receiver(
        &mut self,
        destination: &str,
        options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>, ConnectionError> {
        if self.shared.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let id = format!(
            "sub-{}",
            self.shared.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        // The broker never has more than `prefetch` unacknowledged deliveries
        // outstanding, so the buffer does not fill on a well-behaved broker.
        let (tx, rx) = mpsc::channel(usize::from(self.prefetch));
        self.shared
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), tx);

        let ack_mode = if options.manual_ack {
            "client-individual"
        } else {
            "auto"
        };
        let subscribe = Frame::new(Command::Subscribe)
            .header("id", id.clone())
            .header("destination", stomp_destination(destination))
            .header("ack", ack_mode)
            .header("prefetch-count", self.prefetch.to_string());
        self.outbound
            .send(Outbound::Frame(subscribe))
            .await
            .map_err(|_| ConnectionError::Closed)?;

        Ok(Box::new(StompReceiver {
            id,
            manual_ack: options.manual_ack,
            deliveries: rx,
            outbound: self.outbound.clone(),
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        if !self.shared.is_closed() {
            let _ = self
                .outbound
                .send(Outbound::Close(Frame::new(Command::Disconnect)))
                .await;
        }
        self.shared.closed.store(true, Ordering::Release);

        if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut writer)
            .await
            .is_err()
        {
            tracing::debug!("Writer did not finish DISCONNECT in time");
            writer.abort();
        }
        self.reader.abort();
        Ok(())
    }
}

impl Drop for StompConnection {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        self.reader.abort();
    }
}

// ============================================================================
// Links
// ============================================================================

struct StompSender {
    destination: String,
    outbound: mpsc::Sender<Outbound>,
    shared: Arc<Shared>,
    closed: bool,
}

#[async_trait]
impl MessageSender for StompSender {
    async fn send(&mut self, message: Message) -> Result<(), SendError> {
        if self.closed || self.shared.is_closed() {
            return Err(SendError::Closed);
        }
        let frame = Frame::new(Command::Send)
            .header("destination", self.destination.clone())
            .header("content-type", "text/plain")
            .body(message.into_body());
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| SendError::Closed)
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.closed = true;
        Ok(())
    }
}

struct StompReceiver {
    id: String,
    manual_ack: bool,
    deliveries: mpsc::Receiver<Result<Frame, ConnectionError>>,
    outbound: mpsc::Sender<Outbound>,
    shared: Arc<Shared>,
    closed: bool,
}

#[async_trait]
impl MessageReceiver for StompReceiver {
    async fn recv(&mut self) -> Option<Result<Delivery, ConnectionError>> {
        if self.closed {
            return None;
        }
        let frame = match self.deliveries.recv().await? {
            Ok(frame) => frame,
            Err(e) => return Some(Err(e)),
        };

        let ack_id = if self.manual_ack {
            match frame.get("ack") {
                Some(id) => Some(id.to_string()),
                None => {
                    return Some(Err(ConnectionError::Protocol(
                        "MESSAGE without ack header on a client-ack subscription".into(),
                    )))
                }
            }
        } else {
            None
        };

        let handle = StompDeliveryHandle {
            ack_id,
            outbound: self.outbound.clone(),
        };
        Some(Ok(Delivery::new(frame.body, Box::new(handle))))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.deliveries.close();
        self.shared
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);

        if !self.shared.is_closed() {
            let unsubscribe = Frame::new(Command::Unsubscribe).header("id", self.id.clone());
            let _ = self.outbound.send(Outbound::Frame(unsubscribe)).await;
        }
        Ok(())
    }
}

struct StompDeliveryHandle {
    /// `None` once settled, or for auto-ack subscriptions
    ack_id: Option<String>,
    outbound: mpsc::Sender<Outbound>,
}

impl StompDeliveryHandle {
    async fn settle(&mut self, command: Command) -> Result<(), AckError> {
        let id = self.ack_id.take().ok_or(AckError::AlreadySettled)?;
        let frame = Frame::new(command).header("id", id);
        self.outbound
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| AckError::Closed)
    }
}

#[async_trait]
impl DeliveryHandle for StompDeliveryHandle {
    async fn accept(&mut self) -> Result<(), AckError> {
        self.settle(Command::Ack).await
    }

    async fn release(&mut self) -> Result<(), AckError> {
        self.settle(Command::Nack).await
    }
}
