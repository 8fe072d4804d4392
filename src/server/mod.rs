//! Relay server module
//!
//! Accepts WebSocket sessions, decodes control frames and serves the HTTP
//! push/broadcast/state interface on the same listener.

mod dispatcher;
mod http;
mod protocol;
mod websocket;

pub use websocket::{RelayServer, ServerConfig};
