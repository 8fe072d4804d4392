//! Point-in-time view of the registry
//!
//! The field names (`clients`, `rooms`, `relation`) are what the `/state`
//! endpoint has always returned; dashboards read them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ConnectionId;

/// Read-only dump of connections, rooms and memberships
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Every registered connection, ascending
    pub clients: Vec<ConnectionId>,
    /// Room name to members, in join order
    pub rooms: BTreeMap<String, Vec<ConnectionId>>,
    /// Connection to the rooms it belongs to, in join order
    pub relation: BTreeMap<ConnectionId, Vec<String>>,
}

impl Snapshot {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty() && self.rooms.is_empty() && self.relation.is_empty()
    }
}
