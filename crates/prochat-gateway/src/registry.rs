use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use uuid::Uuid;

use prochat_types::events::ServerEvent;

/// Identifies one live socket. A user may hold several.
pub type ConnId = Uuid;

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<ServerEvent>,
    rooms: HashSet<Uuid>,
}

/// Live connections and room membership.
///
/// Rooms are keyed by user id. Every connection appears in `rooms` only for
/// rooms listed in its own entry, so removing a connection removes it from
/// every room it joined.
#[derive(Default)]
pub struct Registry {
    connections: HashMap<ConnId, ConnectionEntry>,
    rooms: HashMap<Uuid, HashSet<ConnId>>,
}

impl Registry {
    pub fn insert(&mut self, conn_id: ConnId, tx: mpsc::UnboundedSender<ServerEvent>) {
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                tx,
                rooms: HashSet::new(),
            },
        );
    }

    /// Add a connection to a room. Returns false if the connection is unknown
    /// or was already a member.
    pub fn join(&mut self, conn_id: ConnId, room: Uuid) -> bool {
        let Some(entry) = self.connections.get_mut(&conn_id) else {
            return false;
        };
        if !entry.rooms.insert(room) {
            return false;
        }
        self.rooms.entry(room).or_default().insert(conn_id);
        true
    }

    /// Drop a connection and its memberships. Returns the rooms it had joined.
    pub fn remove(&mut self, conn_id: ConnId) -> Vec<Uuid> {
        let Some(entry) = self.connections.remove(&conn_id) else {
            return Vec::new();
        };
        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        entry.rooms.into_iter().collect()
    }

    pub fn send_to(&self, conn_id: ConnId, event: ServerEvent) -> bool {
        match self.connections.get(&conn_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver to every connection in `room` except `skip`. Returns how many
    /// connections the event was handed to.
    pub fn send_to_room(&self, room: Uuid, skip: Option<ConnId>, event: &ServerEvent) -> usize {
        let Some(members) = self.rooms.get(&room) else {
            return 0;
        };
        members
            .iter()
            .filter(|id| Some(**id) != skip)
            .filter_map(|id| self.connections.get(id))
            .filter(|entry| entry.tx.send(event.clone()).is_ok())
            .count()
    }

    /// Deliver to every live connection except `skip`.
    pub fn send_to_all(&self, skip: Option<ConnId>, event: &ServerEvent) -> usize {
        self.connections
            .iter()
            .filter(|(id, _)| Some(**id) != skip)
            .filter(|(_, entry)| entry.tx.send(event.clone()).is_ok())
            .count()
    }

    pub fn room_size(&self, room: Uuid) -> usize {
        self.rooms.get(&room).map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
