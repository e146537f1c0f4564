//! AMQP 1.0 connector, connection and links

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::delivery::DeliveryInfo;
use fe2o3_amqp::link::receiver::CreditMode;
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::messaging::{AmqpValue, Body, Outcome as Disposition};
use fe2o3_amqp::types::primitives::Value;
use fe2o3_amqp::{Receiver, Sender, Session};
use fe2o3_amqp_ws::WebSocketStream;
use tokio::sync::{Mutex, MutexGuard};

use loadgen_core::{
    AckError, BrokerEndpoint, Connection, ConnectionError, Connector, Credentials, Delivery,
    DeliveryHandle, Message, MessageReceiver, MessageSender, ReceiverOptions, SendError,
    TransportKind,
};

/// Default bound on transport connect plus the SASL and open exchange
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Link credit granted to the broker per receiver
pub const DEFAULT_CREDIT: u32 = 100;

/// Opens AMQP 1.0 connections over TCP or WebSocket
#[derive(Debug)]
pub struct AmqpConnector {
    endpoint: BrokerEndpoint,
    credentials: Option<Credentials>,
    connect_timeout: Duration,
    credit: u32,
    name: &'static str,
    next_container: AtomicU64,
}

impl AmqpConnector {
    /// Create a connector
    ///
    /// A `vhost` query parameter on the broker URL is sent as the
    /// `vhost:<name>` hostname in the open frame.
    pub fn new(endpoint: BrokerEndpoint, credentials: Option<Credentials>) -> Self {
        let name = match (endpoint.kind(), endpoint.is_secure()) {
            (TransportKind::AmqpWebSocket, true) => "amqp+wss",
            (TransportKind::AmqpWebSocket, false) => "amqp+ws",
            (_, true) => "amqps",
            (_, false) => "amqp",
        };

        Self {
            endpoint,
            credentials,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            credit: DEFAULT_CREDIT,
            name,
            next_container: AtomicU64::new(0),
        }
    }

    /// Override the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the receiver link credit (floored at 1)
    pub fn with_credit(mut self, credit: u32) -> Self {
        self.credit = credit.max(1);
        self
    }

    /// Address handed to the TCP client, without userinfo
    pub(crate) fn tcp_address(&self) -> String {
        let scheme = if self.endpoint.is_secure() {
            "amqps"
        } else {
            "amqp"
        };
        format!(
            "{}://{}:{}",
            scheme,
            self.endpoint.host(),
            self.endpoint.port()
        )
    }

    /// Hostname for the open frame
    pub(crate) fn open_hostname(&self) -> Option<String> {
        self.endpoint
            .virtual_host()
            .map(|vhost| format!("vhost:{}", vhost))
    }

    /// SASL PLAIN with credentials, ANONYMOUS without
    pub(crate) fn sasl_profile(&self) -> SaslProfile {
        match &self.credentials {
            Some(credentials) => SaslProfile::Plain {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            },
            None => SaslProfile::Anonymous,
        }
    }

    async fn open(&self) -> Result<AmqpConnection, ConnectionError> {
        let container_id = format!(
            "broker-loadgen-{}-{}",
            std::process::id(),
            self.next_container.fetch_add(1, Ordering::Relaxed)
        );
        let hostname = self.open_hostname();

        let builder = fe2o3_amqp::Connection::builder()
            .container_id(container_id)
            .sasl_profile(self.sasl_profile());
        let builder = match hostname.as_deref() {
            Some(hostname) => builder.hostname(hostname),
            None => builder,
        };

        let mut connection = if self.endpoint.kind().is_websocket() {
            let stream = WebSocketStream::connect(self.endpoint.websocket_url())
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
            tracing::trace!(status = %stream.response().status(), "WebSocket upgraded");
            builder
                .open_with_stream(stream)
                .await
                .map_err(|e| classify_open_error(&e.to_string()))?
        } else {
            builder
                .open(self.tcp_address().as_str())
                .await
                .map_err(|e| classify_open_error(&e.to_string()))?
        };

        let session = match Session::begin(&mut connection).await {
            Ok(session) => session,
            Err(e) => {
                let _ = connection.close().await;
                return Err(ConnectionError::Protocol(format!(
                    "session begin failed: {}",
                    e
                )));
            }
        };

        tracing::debug!(broker = %self.endpoint, transport = self.name, "AMQP session established");
        Ok(AmqpConnection {
            connection,
            session,
            credit: self.credit,
            next_link: 0,
            closed: false,
        })
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    fn transport_name(&self) -> &str {
        self.name
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        match tokio::time::timeout(self.connect_timeout, self.open()).await {
            Ok(Ok(connection)) => Ok(Box::new(connection)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::Timeout(self.connect_timeout)),
        }
    }
}

/// Split SASL rejections from other open failures
pub(crate) fn classify_open_error(text: &str) -> ConnectionError {
    let lower = text.to_ascii_lowercase();
    if lower.contains("sasl") || lower.contains("auth") {
        ConnectionError::Auth(text.to_string())
    } else {
        ConnectionError::Transport(text.to_string())
    }
}

/// Payload bytes of an AMQP body
///
/// String and binary `amqp-value` bodies are what AMQP clients send for
/// plain payloads; other sections carry nothing the engine reads.
pub(crate) fn body_bytes(body: &Body<Value>) -> Bytes {
    match body {
        Body::Value(AmqpValue(Value::String(text))) => Bytes::copy_from_slice(text.as_bytes()),
        Body::Value(AmqpValue(Value::Binary(data))) => Bytes::copy_from_slice(data),
        _ => Bytes::new(),
    }
}

// ============================================================================
// Connection
// ============================================================================

/// An open AMQP connection with one session shared by its links
pub struct AmqpConnection {
    connection: ConnectionHandle<()>,
    session: SessionHandle<()>,
    credit: u32,
    next_link: u64,
    closed: bool,
}

impl AmqpConnection {
    fn link_name(&mut self, role: &str) -> String {
        self.next_link += 1;
        format!("loadgen-{}-{}", role, self.next_link)
    }
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn open_sender(
        &mut self,
        destination: &str,
    ) -> Result<Box<dyn MessageSender>, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        let name = self.link_name("sender");
        let sender = Sender::attach(&mut self.session, name, destination)
            .await
            .map_err(|e| ConnectionError::Protocol(format!("sender attach failed: {}", e)))?;
        Ok(Box::new(AmqpSender {
            link: Some(sender),
        }))
    }

    async fn open_receiver(
        &mut self,
        destination: &str,
        options: ReceiverOptions,
    ) -> Result<Box<dyn MessageReceiver>, ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        let name = self.link_name("receiver");
        let receiver = Receiver::builder()
            .name(name)
            .source(destination)
            .credit_mode(CreditMode::Auto(self.credit))
            .attach(&mut self.session)
            .await
            .map_err(|e| ConnectionError::Protocol(format!("receiver attach failed: {}", e)))?;
        Ok(Box::new(AmqpReceiver {
            link: Arc::new(Mutex::new(Some(receiver))),
            manual_ack: options.manual_ack,
        }))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.session.end().await {
            tracing::debug!(error = %e, "Session end failed");
        }
        self.connection
            .close()
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))
    }
}

// ============================================================================
// Links
// ============================================================================

struct AmqpSender {
    link: Option<Sender>,
}

#[async_trait]
impl MessageSender for AmqpSender {
    async fn send(&mut self, message: Message) -> Result<(), SendError> {
        let sender = self.link.as_mut().ok_or(SendError::Closed)?;
        let body = String::from_utf8_lossy(&message.into_body()).into_owned();
        match sender.send(body).await {
            Ok(Disposition::Accepted(_)) => Ok(()),
            Ok(other) => Err(SendError::Transport(format!(
                "broker did not accept the message: {:?}",
                other
            ))),
            Err(e) => {
                tracing::debug!(error = %e, "AMQP send failed");
                Err(SendError::Closed)
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if let Some(mut sender) = self.link.take() {
            sender
                .close()
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

/// Shared with delivery handles, which settle through the same link
type SharedReceiver = Arc<Mutex<Option<Receiver>>>;

struct AmqpReceiver {
    link: SharedReceiver,
    manual_ack: bool,
}

#[async_trait]
impl MessageReceiver for AmqpReceiver {
    async fn recv(&mut self) -> Option<Result<Delivery, ConnectionError>> {
        let mut guard = self.link.lock().await;
        let receiver = guard.as_mut()?;

        match receiver.recv::<Body<Value>>().await {
            Ok(delivery) => {
                let body = body_bytes(delivery.body());
                let info = DeliveryInfo::from(&delivery);
                if !self.manual_ack {
                    if let Err(e) = receiver.accept(info).await {
                        return Some(Err(ConnectionError::Transport(e.to_string())));
                    }
                    let handle = AmqpDeliveryHandle {
                        link: Arc::clone(&self.link),
                        info: None,
                    };
                    return Some(Ok(Delivery::new(body, Box::new(handle))));
                }
                let handle = AmqpDeliveryHandle {
                    link: Arc::clone(&self.link),
                    info: Some(info),
                };
                Some(Ok(Delivery::new(body, Box::new(handle))))
            }
            Err(e) => {
                // The link is unusable after a receive error.
                guard.take();
                Some(Err(ConnectionError::Transport(e.to_string())))
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let receiver = self.link.lock().await.take();
        if let Some(mut receiver) = receiver {
            receiver
                .close()
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

struct AmqpDeliveryHandle {
    link: SharedReceiver,
    /// `None` once settled, or for auto-accepted deliveries
    info: Option<DeliveryInfo>,
}

impl AmqpDeliveryHandle {
    async fn take(
        &mut self,
    ) -> Result<(DeliveryInfo, MutexGuard<'_, Option<Receiver>>), AckError> {
        let info = self.info.take().ok_or(AckError::AlreadySettled)?;
        let guard = self.link.lock().await;
        if guard.is_none() {
            return Err(AckError::Closed);
        }
        Ok((info, guard))
    }
}

#[async_trait]
impl DeliveryHandle for AmqpDeliveryHandle {
    async fn accept(&mut self) -> Result<(), AckError> {
        let (info, mut guard) = self.take().await?;
        let receiver = guard.as_mut().ok_or(AckError::Closed)?;
        receiver
            .accept(info)
            .await
            .map_err(|e| AckError::Transport(e.to_string()))
    }

    async fn release(&mut self) -> Result<(), AckError> {
        let (info, mut guard) = self.take().await?;
        let receiver = guard.as_mut().ok_or(AckError::Closed)?;
        receiver
            .release(info)
            .await
            .map_err(|e| AckError::Transport(e.to_string()))
    }
}
