//! Connection table and room membership index
//!
//! Keeps the two directions of the membership relation (room -> members and
//! connection -> rooms) consistent. Every public method leaves the registry
//! in a state where:
//! - a connection is in a room's member list iff the room is in that
//!   connection's room list
//! - no room and no membership entry is empty
//! - membership entries only exist for registered connections

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use super::{Connection, ConnectionId, Outbound, Snapshot};

/// In-memory registry of live connections and the rooms they joined
#[derive(Debug, Default)]
pub struct Registry {
    /// Live connections by id
    connections: BTreeMap<ConnectionId, Connection>,
    /// Room name to members, in join order
    rooms: HashMap<String, Vec<ConnectionId>>,
    /// Connection to joined room names, in join order
    relations: HashMap<ConnectionId, Vec<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    ///
    /// A known id keeps its memberships and gets the new send handle.
    pub fn add_connection(&mut self, id: ConnectionId, outbound: Outbound) {
        let replaced = self
            .connections
            .insert(id, Connection::new(outbound))
            .is_some();
        if replaced {
            warn!("Connection {} re-registered, replacing its sender", id);
        } else {
            debug!("Connection {} added", id);
        }
    }

    /// Drop a connection and every membership it holds.
    ///
    /// Returns `false` if the id was not registered.
    pub fn remove_connection(&mut self, id: ConnectionId) -> bool {
        if self.connections.remove(&id).is_none() {
            return false;
        }
        debug!("Connection {} removed", id);

        if let Some(names) = self.relations.remove(&id) {
            for name in &names {
                self.detach_member(name, id);
            }
            debug!("Connection {} left {} room(s) on removal", id, names.len());
        }
        true
    }

    /// Subscribe a connection to a room, creating the room if needed.
    ///
    /// Returns `true` if a new membership was created. Unknown connections
    /// and repeated joins leave the registry untouched.
    pub fn join(&mut self, room: &str, id: ConnectionId) -> bool {
        if !self.connections.contains_key(&id) {
            warn!("Ignoring join of unknown connection {} to room {}", id, room);
            return false;
        }

        let members = self.rooms.entry(room.to_string()).or_default();
        if members.contains(&id) {
            return false;
        }
        if members.is_empty() {
            debug!("Room {} created", room);
        }
        members.push(id);

        let names = self.relations.entry(id).or_default();
        if !names.iter().any(|name| name == room) {
            names.push(room.to_string());
        }

        debug!("Connection {} joined room {}", id, room);
        true
    }

    /// Unsubscribe a connection from a room, deleting the room once empty.
    ///
    /// Returns `true` if a membership was removed.
    pub fn leave(&mut self, room: &str, id: ConnectionId) -> bool {
        if !self.rooms.contains_key(room) {
            return false;
        }
        let was_member = self.detach_member(room, id);

        if let Some(names) = self.relations.get_mut(&id) {
            names.retain(|name| name != room);
            if names.is_empty() {
                self.relations.remove(&id);
            }
        }

        if was_member {
            debug!("Connection {} left room {}", id, room);
        }
        was_member
    }

    /// Hand a text frame to one connection.
    ///
    /// Returns `false` if the connection is unknown or its transport is gone.
    pub fn send(&self, id: ConnectionId, text: &str) -> bool {
        match self.connections.get(&id) {
            Some(conn) => {
                let sent = conn.send(text);
                if !sent {
                    debug!("Dropped frame for connection {}, writer closed", id);
                }
                sent
            }
            None => {
                debug!("Dropped frame for unknown connection {}", id);
                false
            }
        }
    }

    /// Send a text frame to every member of a room.
    ///
    /// Returns how many members the frame was handed to. Members whose
    /// transport is gone are skipped.
    pub fn broadcast(&self, room: &str, text: &str) -> usize {
        let Some(members) = self.rooms.get(room) else {
            debug!("Broadcast to unknown room {} dropped", room);
            return 0;
        };

        let delivered = members.iter().filter(|id| self.send(**id, text)).count();
        debug!(
            "Broadcast to room {} reached {}/{} member(s)",
            room,
            delivered,
            members.len()
        );
        delivered
    }

    /// Copy the whole registry at one point in time; map keys come out sorted.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            clients: self.connections.keys().copied().collect(),
            rooms: self
                .rooms
                .iter()
                .map(|(name, members)| (name.clone(), members.clone()))
                .collect(),
            relation: self
                .relations
                .iter()
                .map(|(id, names)| (*id, names.clone()))
                .collect(),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Members of a room in join order; empty if the room does not exist
    pub fn members(&self, room: &str) -> &[ConnectionId] {
        self.rooms.get(room).map(Vec::as_slice).unwrap_or_default()
    }

    /// Rooms a connection belongs to in join order
    pub fn rooms_of(&self, id: ConnectionId) -> &[String] {
        self.relations
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Remove `id` from the room's member list only, pruning an emptied room.
    fn detach_member(&mut self, room: &str, id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };

        let before = members.len();
        members.retain(|member| *member != id);
        let removed = members.len() != before;

        if members.is_empty() {
            self.rooms.remove(room);
            debug!("Room {} cleaned", room);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{outbound_channel, OutboundReceiver};

    fn id(raw: u64) -> ConnectionId {
        ConnectionId::new(raw)
    }

    fn connect(registry: &mut Registry, raw: u64) -> OutboundReceiver {
        let (tx, rx) = outbound_channel();
        registry.add_connection(id(raw), tx);
        rx
    }

    fn drain(rx: &mut OutboundReceiver) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Both directions of the membership relation agree and nothing is empty.
    fn assert_consistent(registry: &Registry) {
        let snapshot = registry.snapshot();
        for (room, members) in &snapshot.rooms {
            assert!(!members.is_empty(), "room {} is empty", room);
            for member in members {
                assert!(snapshot.clients.contains(member));
                assert!(snapshot.relation[member].contains(room));
            }
        }
        for (conn, rooms) in &snapshot.relation {
            assert!(!rooms.is_empty(), "relation of {} is empty", conn);
            assert!(snapshot.clients.contains(conn));
            for room in rooms {
                assert!(snapshot.rooms[room].contains(conn));
            }
        }
    }

    #[test]
    fn test_registry_new() {
        let registry = Registry::new();
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.room_count(), 0);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_join_is_idempotent() {
        let mut registry = Registry::new();
        let _rx = connect(&mut registry, 1);

        assert!(registry.join("chat", id(1)));
        let once = registry.snapshot();
        assert!(!registry.join("chat", id(1)));
        let twice = registry.snapshot();

        assert_eq!(once, twice);
        assert_eq!(registry.members("chat"), &[id(1)]);
        assert_eq!(registry.rooms_of(id(1)), &["chat".to_string()]);
        assert_consistent(&registry);
    }

    #[test]
    fn test_join_unknown_connection_is_noop() {
        let mut registry = Registry::new();
        assert!(!registry.join("chat", id(9)));
        assert_eq!(registry.room_count(), 0);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_leave_never_joined_is_noop() {
        let mut registry = Registry::new();
        let _rx1 = connect(&mut registry, 1);
        let _rx2 = connect(&mut registry, 2);
        registry.join("chat", id(1));
        let before = registry.snapshot();

        assert!(!registry.leave("chat", id(2)));
        assert!(!registry.leave("missing", id(1)));
        assert!(!registry.leave("missing", id(42)));

        assert_eq!(registry.snapshot(), before);
        assert_consistent(&registry);
    }

    #[test]
    fn test_last_leave_deletes_room() {
        let mut registry = Registry::new();
        let _rx = connect(&mut registry, 1);
        registry.join("chat", id(1));
        assert_eq!(registry.room_count(), 1);

        assert!(registry.leave("chat", id(1)));
        let snapshot = registry.snapshot();
        assert!(snapshot.rooms.is_empty());
        assert!(snapshot.relation.is_empty());
        assert_eq!(snapshot.clients, vec![id(1)]);
    }

    #[test]
    fn test_leave_keeps_other_members() {
        let mut registry = Registry::new();
        let _rx1 = connect(&mut registry, 1);
        let _rx2 = connect(&mut registry, 2);
        registry.join("chat", id(1));
        registry.join("chat", id(2));

        registry.leave("chat", id(1));
        assert_eq!(registry.members("chat"), &[id(2)]);
        assert!(registry.rooms_of(id(1)).is_empty());
        assert_consistent(&registry);
    }

    #[test]
    fn test_remove_connection_cascades() {
        let mut registry = Registry::new();
        let _rx1 = connect(&mut registry, 1);
        let _rx2 = connect(&mut registry, 2);
        registry.join("a", id(1));
        registry.join("b", id(1));
        registry.join("b", id(2));

        assert!(registry.remove_connection(id(1)));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.clients, vec![id(2)]);
        assert!(!snapshot.rooms.contains_key("a"));
        assert_eq!(snapshot.rooms["b"], vec![id(2)]);
        assert!(!snapshot.relation.contains_key(&id(1)));
        assert_consistent(&registry);
    }

    #[test]
    fn test_remove_unknown_connection_is_noop() {
        let mut registry = Registry::new();
        let _rx = connect(&mut registry, 1);
        registry.join("chat", id(1));
        let before = registry.snapshot();

        assert!(!registry.remove_connection(id(2)));
        assert_eq!(registry.snapshot(), before);
    }

    #[test]
    fn test_readd_replaces_sender_and_keeps_rooms() {
        let mut registry = Registry::new();
        let mut old_rx = connect(&mut registry, 1);
        registry.join("chat", id(1));

        let mut new_rx = connect(&mut registry, 1);
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.rooms_of(id(1)), &["chat".to_string()]);

        registry.send(id(1), "hello");
        assert!(drain(&mut old_rx).is_empty());
        assert_eq!(drain(&mut new_rx), vec!["hello"]);
    }

    #[test]
    fn test_send_unknown_connection_is_dropped() {
        let registry = Registry::new();
        assert!(!registry.send(id(3), "nobody"));
    }

    #[test]
    fn test_broadcast_reaches_exactly_members() {
        let mut registry = Registry::new();
        let mut receivers: Vec<_> = (1..=4).map(|raw| connect(&mut registry, raw)).collect();
        for raw in 1..=3 {
            registry.join("x", id(raw));
        }

        assert_eq!(registry.broadcast("x", "m"), 3);

        for rx in &mut receivers[..3] {
            assert_eq!(drain(rx), vec!["m"]);
        }
        assert!(drain(&mut receivers[3]).is_empty());
    }

    #[test]
    fn test_broadcast_unknown_room() {
        let mut registry = Registry::new();
        let mut rx = connect(&mut registry, 1);
        assert_eq!(registry.broadcast("nowhere", "m"), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_broadcast_skips_closed_transport() {
        let mut registry = Registry::new();
        let mut rx1 = connect(&mut registry, 1);
        let rx2 = connect(&mut registry, 2);
        registry.join("x", id(1));
        registry.join("x", id(2));
        drop(rx2);

        assert_eq!(registry.broadcast("x", "m"), 1);
        assert_eq!(drain(&mut rx1), vec!["m"]);
    }

    #[test]
    fn test_snapshot_scenario() {
        let mut registry = Registry::new();
        let mut rx = connect(&mut registry, 5);
        registry.join("chat", id(5));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.clients, vec![id(5)]);
        assert_eq!(snapshot.rooms["chat"], vec![id(5)]);
        assert_eq!(snapshot.relation[&id(5)], vec!["chat".to_string()]);

        assert!(registry.send(id(5), "hi"));
        assert_eq!(drain(&mut rx), vec!["hi"]);

        registry.remove_connection(id(5));
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_membership_order_is_join_order() {
        let mut registry = Registry::new();
        let _rxs: Vec<_> = [3, 1, 2].iter().map(|raw| connect(&mut registry, *raw)).collect();
        registry.join("r", id(3));
        registry.join("r", id(1));
        registry.join("r", id(2));
        registry.join("b", id(1));
        registry.join("a", id(1));

        assert_eq!(registry.members("r"), &[id(3), id(1), id(2)]);
        assert_eq!(
            registry.rooms_of(id(1)),
            &["r".to_string(), "b".to_string(), "a".to_string()]
        );
        assert_eq!(registry.snapshot().clients, vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn test_churn_keeps_invariants() {
        let mut registry = Registry::new();
        let rooms = ["a", "b", "c"];
        let mut receivers = Vec::new();

        for step in 0u64..60 {
            let raw = step % 7;
            let conn = id(raw);
            match step % 5 {
                0 => receivers.push(connect(&mut registry, raw)),
                1 | 2 => {
                    registry.join(rooms[(step % 3) as usize], conn);
                }
                3 => {
                    registry.leave(rooms[(step % 2) as usize], conn);
                }
                _ => {
                    registry.remove_connection(conn);
                }
            }
            assert_consistent(&registry);
        }
    }
}
