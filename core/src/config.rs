//! Run configuration types
//!
//! A [`RunConfig`] is built once at startup (from CLI flags, optionally
//! layered over a JSON file) and shared read-only by every worker.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::{Position, Url};

use crate::completion::safety_timeout;

/// Default broker address (a local AMQP 1.0 over WebSocket endpoint)
pub const DEFAULT_BROKER: &str = "ws://localhost:15678/ws";

/// Default destination queue
pub const DEFAULT_DESTINATION: &str = "q.test";

/// Default AMQP port for `amqp://` endpoints without an explicit port
pub const DEFAULT_AMQP_PORT: u16 = 5672;

/// Default AMQP port for `amqps://` endpoints without an explicit port
pub const DEFAULT_AMQPS_PORT: u16 = 5671;

/// Default STOMP port for `stomp://` endpoints without an explicit port
pub const DEFAULT_STOMP_PORT: u16 = 61613;

/// Transport family selected by the broker URL scheme
///
/// | Scheme | Transport |
/// |---|---|
/// | `ws`, `wss` | AMQP 1.0 over WebSocket |
/// | `amqp`, `amqps`, `tcp` | AMQP 1.0 over TCP |
/// | `stomp+ws`, `stomp+wss` | STOMP 1.2 over WebSocket |
/// | `stomp` | STOMP 1.2 over TCP |
/// | `memory` | in-process broker |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// AMQP 1.0 over a raw TCP socket
    Amqp,
    /// AMQP 1.0 over WebSocket
    AmqpWebSocket,
    /// STOMP 1.2 over a raw TCP socket
    StompTcp,
    /// STOMP 1.2 over WebSocket
    StompWebSocket,
    /// In-process broker
    Memory,
}

impl TransportKind {
    fn from_scheme(scheme: &str) -> Result<Self, ConfigError> {
        match scheme {
            "ws" | "wss" => Ok(TransportKind::AmqpWebSocket),
            "amqp" | "amqps" | "tcp" => Ok(TransportKind::Amqp),
            "stomp+ws" | "stomp+wss" => Ok(TransportKind::StompWebSocket),
            "stomp" => Ok(TransportKind::StompTcp),
            "memory" => Ok(TransportKind::Memory),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Whether the transport tunnels through a WebSocket upgrade
    pub fn is_websocket(&self) -> bool {
        matches!(
            self,
            TransportKind::AmqpWebSocket | TransportKind::StompWebSocket
        )
    }
}

/// A parsed, validated broker address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BrokerEndpoint {
    url: Url,
    kind: TransportKind,
}

impl BrokerEndpoint {
    /// Parse a broker address
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidBroker`] for malformed URLs and
    /// [`ConfigError::UnsupportedScheme`] for schemes without a transport.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(raw).map_err(|e| ConfigError::InvalidBroker {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        let kind = TransportKind::from_scheme(url.scheme())?;

        if kind != TransportKind::Memory && url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidBroker {
                url: raw.to_string(),
                reason: "missing host".into(),
            });
        }

        Ok(Self { url, kind })
    }

    /// Transport family
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// The full URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host name (for `memory://` this is the broker name)
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("default")
    }

    /// Whether the scheme asks for TLS
    pub fn is_secure(&self) -> bool {
        matches!(
            self.url.scheme(),
            "wss" | "amqps" | "stomp+wss"
        )
    }

    /// Port, falling back to the transport's well-known port
    pub fn port(&self) -> u16 {
        if let Some(port) = self.url.port() {
            return port;
        }
        match (self.kind, self.is_secure()) {
            (TransportKind::Amqp, false) => DEFAULT_AMQP_PORT,
            (TransportKind::Amqp, true) => DEFAULT_AMQPS_PORT,
            (TransportKind::StompTcp, _) => DEFAULT_STOMP_PORT,
            (_, true) => 443,
            (_, false) => 80,
        }
    }

    /// The address a WebSocket client dials: the URL with its scheme
    /// reduced to `ws` or `wss` and any userinfo stripped
    pub fn websocket_url(&self) -> String {
        let scheme = if self.is_secure() { "wss" } else { "ws" };
        let mut url = self.url.clone();
        let _ = url.set_username("");
        let _ = url.set_password(None);
        format!("{}{}", scheme, &url[Position::AfterScheme..])
    }

    /// `vhost` query parameter, if given
    pub fn virtual_host(&self) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == "vhost")
            .map(|(_, v)| v.into_owned())
    }

    /// Credentials embedded in the URL userinfo, percent-decoded
    pub fn embedded_credentials(&self) -> Option<Credentials> {
        if self.url.username().is_empty() {
            return None;
        }
        let decode = |s: &str| percent_decode_str(s).decode_utf8_lossy().into_owned();
        Some(Credentials::new(
            decode(self.url.username()),
            decode(self.url.password().unwrap_or_default()),
        ))
    }

    /// Address with any userinfo stripped, safe for logs
    pub fn redacted(&self) -> String {
        let mut url = self.url.clone();
        // Only fails for cannot-be-a-base URLs, which parse() never yields with a host.
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.to_string()
    }
}

impl TryFrom<String> for BrokerEndpoint {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BrokerEndpoint::parse(&value)
    }
}

impl From<BrokerEndpoint> for String {
    fn from(endpoint: BrokerEndpoint) -> Self {
        endpoint.url.to_string()
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Username/password pair used during the connection handshake
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name
    pub username: String,

    /// Passcode (never serialized back out)
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Run configuration
///
/// Immutable once the run starts. `rate` is per producer, so the aggregate
/// offered load is `producers * rate` messages per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Broker address
    pub broker: BrokerEndpoint,

    /// Explicit credentials; URL userinfo is used when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,

    /// Number of producer connections
    pub producers: usize,

    /// Number of consumer connections
    pub consumers: usize,

    /// Messages sent by each producer
    pub messages_per_producer: u64,

    /// Target send rate per producer (messages/second)
    pub rate: u32,

    /// Filler bytes per message body (the tag is appended on top)
    pub message_size: usize,

    /// Queue or address messages are sent to and received from
    pub destination: String,

    /// Percent chance (0-100) that a consumer accepts a message
    pub ack_probability: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            broker: BrokerEndpoint::parse(DEFAULT_BROKER)
                .unwrap_or_else(|_| unreachable!("default broker address is valid")),
            credentials: None,
            producers: 1,
            consumers: 0,
            messages_per_producer: 1000,
            rate: 100,
            message_size: 128,
            destination: DEFAULT_DESTINATION.to_string(),
            ack_probability: 100.0,
        }
    }
}

impl RunConfig {
    /// Create a config for the given broker with default workload settings
    pub fn new(broker: BrokerEndpoint) -> Self {
        Self {
            broker,
            ..Default::default()
        }
    }

    /// Load a config from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Set the number of producers
    pub fn with_producers(mut self, producers: usize) -> Self {
        self.producers = producers;
        self
    }

    /// Set the number of consumers
    pub fn with_consumers(mut self, consumers: usize) -> Self {
        self.consumers = consumers;
        self
    }

    /// Set the messages sent by each producer
    pub fn with_messages(mut self, messages: u64) -> Self {
        self.messages_per_producer = messages;
        self
    }

    /// Set the per-producer rate
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    /// Set the filler size of each message body
    pub fn with_message_size(mut self, size: usize) -> Self {
        self.message_size = size;
        self
    }

    /// Set the destination
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = destination.into();
        self
    }

    /// Set the accept probability (percent)
    pub fn with_ack_probability(mut self, percent: f64) -> Self {
        self.ack_probability = percent;
        self
    }

    /// Set explicit credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Credentials to present: explicit ones first, then URL userinfo
    pub fn effective_credentials(&self) -> Option<Credentials> {
        self.credentials
            .clone()
            .or_else(|| self.broker.embedded_credentials())
    }

    /// Total messages the run expects to move (`producers * messages`)
    ///
    /// Saturates at `u64::MAX`; [`RunConfig::validate`] rejects such totals.
    pub fn expected_total(&self) -> u64 {
        (self.producers as u64).saturating_mul(self.messages_per_producer)
    }

    /// Interval between producer sends
    ///
    /// Floored at 1 ms, which caps a single producer at 1000 msg/s.
    pub fn send_interval(&self) -> Duration {
        let millis = 1000 / u64::from(self.rate.max(1));
        Duration::from_millis(millis.max(1))
    }

    /// Upper bound on how long the run waits for consumers after producers finish
    pub fn safety_timeout(&self) -> Duration {
        safety_timeout(self.expected_total(), self.rate, self.producers)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate == 0 {
            return Err(ConfigError::InvalidRate(self.rate));
        }

        if !(0.0..=100.0).contains(&self.ack_probability) {
            return Err(ConfigError::InvalidAckProbability(self.ack_probability));
        }

        if (self.producers as u64)
            .checked_mul(self.messages_per_producer)
            .is_none()
        {
            return Err(ConfigError::TooManyMessages {
                producers: self.producers,
                messages: self.messages_per_producer,
            });
        }

        if self.destination.trim().is_empty() {
            return Err(ConfigError::InvalidDestination(
                "destination must not be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Broker address could not be parsed
    #[error("Invalid broker URL {url}: {reason}")]
    InvalidBroker {
        /// The address as given
        url: String,
        /// Parser message
        reason: String,
    },

    /// Broker scheme has no transport implementation
    #[error("Unsupported broker scheme: {0}")]
    UnsupportedScheme(String),

    /// Rate must be positive
    #[error("Invalid rate: {0} (must be at least 1 msg/s)")]
    InvalidRate(u32),

    /// Ack probability outside 0-100
    #[error("Invalid ack probability: {0} (must be within 0-100)")]
    InvalidAckProbability(f64),

    /// `producers * messages` does not fit in a u64
    #[error("Too many messages: {producers} producers x {messages} messages overflows")]
    TooManyMessages {
        /// Producer count
        producers: usize,
        /// Messages per producer
        messages: u64,
    },

    /// Empty or malformed destination
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// Config file could not be read or parsed
    #[error("Failed to load config {path}: {reason}")]
    Load {
        /// File path
        path: String,
        /// Underlying error
        reason: String,
    },
}
