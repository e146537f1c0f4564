//! STOMP 1.2 transport over TCP (`stomp://`) or WebSocket (`stomp+ws://`, `stomp+wss://`)
//!
//! Accept maps to `ACK`, release to `NACK`. Subscriptions use
//! `ack:client-individual`, so each delivery is settled on its own.

mod client;
pub mod frame;
mod io;

pub use client::{
    stomp_destination, StompConnection, StompConnector, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PREFETCH,
    OUTBOUND_BUFFER,
};
pub use frame::{Command, Frame, FrameError};
pub use io::STOMP_SUBPROTOCOLS;
