//! Control-frame dispatch and external push/broadcast
//!
//! Turns transport events and HTTP requests into registry operations.
//! The registry sits behind a single lock so each operation is one
//! read-modify-write with respect to every other.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::protocol::{
    ApiError, ControlEvent, ControlFrame, ControlReply, Params, MISS_CHANNEL, MISS_EVENT,
};
use crate::registry::{ConnectionId, Outbound, Registry, Snapshot};

/// Routes control frames and external requests to the registry
pub struct Dispatcher {
    registry: RwLock<Registry>,
    /// Source of connection ids; never hands out the same id twice
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry: RwLock::new(registry),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the id for a connection the transport just accepted
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn on_connect(&self, id: ConnectionId, outbound: Outbound) {
        self.registry.write().await.add_connection(id, outbound);
        info!("Session open, connection {}", id);
    }

    pub async fn on_disconnect(&self, id: ConnectionId) {
        let mut registry = self.registry.write().await;
        let joined = registry.rooms_of(id).len();
        if registry.remove_connection(id) {
            info!("Session closed, connection {} (was in {} room(s))", id, joined);
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Returns the reply for the originating connection, or `None` for
    /// events that are silently ignored.
    pub async fn on_text_message(&self, id: ConnectionId, text: &str) -> Option<ControlReply> {
        debug!("Received frame from connection {}: {}", id, text);

        let frame = match ControlFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Undecodable frame from connection {}: {}", id, e);
                return Some(e.into());
            }
        };
        let seq = frame.seq();

        let Some(event) = frame.kind() else {
            return Some(ControlReply::error(MISS_EVENT, seq));
        };
        if event == ControlEvent::Ping {
            return Some(ControlReply::pong(seq));
        }
        let Some(channel) = frame.channel.as_deref() else {
            return Some(ControlReply::error(MISS_CHANNEL, seq));
        };

        match event {
            ControlEvent::Sub => {
                let mut registry = self.registry.write().await;
                registry.join(channel, id);
                debug!("Room {} has {} member(s)", channel, registry.members(channel).len());
                Some(ControlReply::subscribed(channel, seq))
            }
            ControlEvent::Unsub => {
                let mut registry = self.registry.write().await;
                registry.leave(channel, id);
                debug!("Room {} has {} member(s)", channel, registry.members(channel).len());
                Some(ControlReply::unsubscribed(channel, seq))
            }
            other => {
                debug!("Ignoring event {:?} from connection {}", other, id);
                None
            }
        }
    }

    /// Send to a single connection; unknown ids are dropped.
    pub async fn push(&self, id: ConnectionId, text: &str) -> bool {
        let sent = self.registry.read().await.send(id, text);
        debug!("Push to connection {}, delivered={}", id, sent);
        sent
    }

    /// Send to every member of a room; returns the recipient count.
    pub async fn broadcast(&self, room: &str, text: &str) -> usize {
        self.registry.read().await.broadcast(room, text)
    }

    /// Validate `fd` and `message` then push.
    ///
    /// Returns how many connections the message was handed to (0 or 1).
    pub async fn push_to(&self, params: &Params) -> Result<usize, ApiError> {
        let fd = params.require("fd")?;
        let message = params.require("message")?;
        let id = fd
            .parse::<ConnectionId>()
            .map_err(|_| ApiError::InvalidParam("fd"))?;

        Ok(usize::from(self.push(id, message).await))
    }

    /// Validate `channel` and `message` then broadcast.
    pub async fn broadcast_to(&self, params: &Params) -> Result<usize, ApiError> {
        let channel = params.require("channel")?;
        let message = params.require("message")?;

        Ok(self.broadcast(channel, message).await)
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.registry.read().await.snapshot()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connection_count()
    }

    pub async fn room_count(&self) -> usize {
        self.registry.read().await.room_count()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
