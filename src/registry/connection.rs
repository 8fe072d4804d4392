//! Connection handle
//!
//! Connection identifiers and the channel feeding the socket writer task
//! owned by the transport. The registry keys connections by id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Opaque identifier of an open connection
///
/// Allocated by the dispatcher when the transport reports a new session and
/// never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConnectionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Sending half of a connection's outbound queue
pub type Outbound = mpsc::UnboundedSender<String>;

/// Receiving half, drained by the transport's writer task
pub type OutboundReceiver = mpsc::UnboundedReceiver<String>;

/// Create the outbound queue for a new connection
pub fn outbound_channel() -> (Outbound, OutboundReceiver) {
    mpsc::unbounded_channel()
}

/// A live connection as seen by the registry
#[derive(Debug, Clone)]
pub struct Connection {
    outbound: Outbound,
}

impl Connection {
    pub fn new(outbound: Outbound) -> Self {
        Self { outbound }
    }

    /// Hand a text frame to the transport.
    ///
    /// Returns `false` when the writer task is gone; the frame is dropped.
    pub fn send(&self, text: &str) -> bool {
        self.outbound.send(text.to_owned()).is_ok()
    }
}
