//! Minimal CDP client
//!
//! - `transport`: WebSocket framing, request/response matching, Chrome launch
//! - `connection`: browser-level `Connection` and per-page `Session`
//! - `types`: the few command/event payloads we need

pub mod connection;
pub mod transport;
pub mod types;

pub use connection::{Connection, Session};
pub use transport::{CdpMessage, Transport};
