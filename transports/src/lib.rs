//! Broker transports for loadgen-core
//!
//! This crate provides implementations of the `Connector` trait for:
//!
//! - AMQP 1.0 over WebSocket (`ws://`, `wss://`)
//! - AMQP 1.0 over TCP (`amqp://`, `amqps://`)
//! - STOMP 1.2 over WebSocket (`stomp+ws://`, `stomp+wss://`)
//! - STOMP 1.2 over TCP (`stomp://`)
//! - An in-process broker (`memory://<name>`) for tests and dry runs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod amqp;
pub mod memory;
pub mod stomp;

use std::sync::Arc;

use loadgen_core::{Connector, RunConfig, TransportKind};

pub use amqp::AmqpConnector;
pub use memory::{MemoryBroker, MemoryConnector};
pub use stomp::StompConnector;

/// Build the connector matching the broker URL scheme
pub fn connector_for(config: &RunConfig) -> Arc<dyn Connector> {
    let endpoint = &config.broker;
    match endpoint.kind() {
        TransportKind::Memory => Arc::new(MemoryConnector::named(endpoint.host())),
        TransportKind::Amqp | TransportKind::AmqpWebSocket => Arc::new(AmqpConnector::new(
            endpoint.clone(),
            config.effective_credentials(),
        )),
        TransportKind::StompTcp | TransportKind::StompWebSocket => Arc::new(StompConnector::new(
            endpoint.clone(),
            config.effective_credentials(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgen_core::{BrokerEndpoint, LoadTestBuilder, RunPhase};
    use std::time::Duration;

    fn config(url: &str) -> RunConfig {
        RunConfig::new(BrokerEndpoint::parse(url).unwrap())
    }

    #[test]
    fn test_connector_for_scheme() {
        assert_eq!(
            connector_for(&config("memory://dispatch")).transport_name(),
            "memory"
        );
        assert_eq!(
            connector_for(&config("ws://localhost:15678/ws")).transport_name(),
            "amqp+ws"
        );
        assert_eq!(
            connector_for(&config("amqp://localhost:5672")).transport_name(),
            "amqp"
        );
        assert_eq!(
            connector_for(&config("stomp+ws://localhost:15674/ws")).transport_name(),
            "stomp+ws"
        );
        assert_eq!(
            connector_for(&config("stomp+wss://broker.example.com/ws")).transport_name(),
            "stomp+wss"
        );
        assert_eq!(
            connector_for(&config("stomp://localhost")).transport_name(),
            "stomp+tcp"
        );
    }

    #[tokio::test]
    async fn test_end_to_end_full_ack_over_memory() {
        let config = config("memory://e2e-full-ack")
            .with_producers(2)
            .with_messages(100)
            .with_rate(50)
            .with_consumers(1)
            .with_ack_probability(100.0)
            .with_message_size(16)
            .with_destination("q.full");

        let runner = LoadTestBuilder::new()
            .connector(connector_for(&config))
            .config(config.clone())
            .flush_grace(Duration::from_millis(10))
            .build()
            .unwrap();
        let summary = runner.run().await.unwrap();

        assert_eq!(summary.outcome, RunPhase::Completed);
        assert_eq!(summary.totals.sent, 200);
        assert_eq!(summary.totals.consumed, 200);
        assert_eq!(summary.totals.acked, 200);
        assert_eq!(summary.totals.nacked, 0);
        assert!(summary.elapsed < config.safety_timeout());
        assert_eq!(MemoryBroker::named("e2e-full-ack").depth("q.full"), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_zero_ack_over_memory() {
        let config = config("memory://e2e-zero-ack")
            .with_producers(1)
            .with_messages(40)
            .with_rate(1000)
            .with_consumers(2)
            .with_ack_probability(0.0)
            .with_destination("q.zero");

        let runner = LoadTestBuilder::new()
            .connector(connector_for(&config))
            .config(config)
            .seed(3)
            .build()
            .unwrap();
        let summary = runner.run().await.unwrap();

        assert_eq!(summary.outcome, RunPhase::Completed);
        assert_eq!(summary.totals.sent, 40);
        assert!(summary.totals.consumed >= 40);
        assert_eq!(summary.totals.acked, 0);
        assert_eq!(summary.totals.nacked, summary.totals.consumed);
    }
}
