//! AMQP 1.0 transport over TCP (`amqp://`, `amqps://`) or WebSocket (`ws://`, `wss://`)
//!
//! Accept maps to the `accepted` disposition, release to `released`. Each
//! connection opens one session; receivers attach with a fixed link credit
//! that is topped up as deliveries arrive.

mod client;

pub use client::{AmqpConnection, AmqpConnector, DEFAULT_CONNECT_TIMEOUT, DEFAULT_CREDIT};

#[cfg(test)]
mod tests;
