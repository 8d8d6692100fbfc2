//! Room registry: one room per document id.
//!
//! Each room keeps a merged Loro document so a late joiner receives the full
//! state in its `joined` reply instead of only the last delta.

use dashmap::DashMap;
use dragbox_core::protocol::base64_encode;
use dragbox_core::{ClientId, ServerMessage};
use loro::{ExportMode, LoroDoc, LoroError};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Errors from room operations.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("Room not found: {0}")]
    NotFound(String),
    #[error("Loro error: {0}")]
    Loro(#[from] LoroError),
}

/// A message tagged with the connection that produced it, so it is not echoed back.
pub type Envelope = (Uuid, ServerMessage);

struct Room {
    tx: broadcast::Sender<Envelope>,
    /// Connection id to the client id it announced in `join`.
    peers: HashMap<Uuid, ClientId>,
    doc: LoroDoc,
    has_history: bool,
}

impl Room {
    fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            peers: HashMap::new(),
            doc: LoroDoc::new(),
            has_history: false,
        }
    }

    fn snapshot(&self) -> Option<String> {
        if !self.has_history {
            return None;
        }
        match self.doc.export(ExportMode::Snapshot) {
            Ok(bytes) => Some(base64_encode(&bytes)),
            Err(e) => {
                tracing::error!(error = %e, "room snapshot export failed");
                None
            }
        }
    }
}

/// What a connection gets back from [`AppState::join_room`].
pub struct Membership {
    pub rx: broadcast::Receiver<Envelope>,
    pub initial_sync: Option<String>,
    pub peer_count: usize,
}

/// Shared application state
pub struct AppState {
    rooms: DashMap<String, Room>,
    channel_capacity: usize,
}

impl AppState {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            channel_capacity,
        }
    }

    /// Add a connection to a room, creating the room on first use.
    pub fn join_room(&self, room_id: &str, conn: Uuid, client_id: ClientId) -> Membership {
        let mut room = self
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(self.channel_capacity));
        room.peers.insert(conn, client_id);
        Membership {
            rx: room.tx.subscribe(),
            initial_sync: room.snapshot(),
            peer_count: room.peers.len(),
        }
    }

    /// Remove a connection. Returns the client id it had announced.
    ///
    /// Empty rooms are dropped along with their document. The emptiness check
    /// runs under the map's lock, so a concurrent join keeps the room alive.
    pub fn leave_room(&self, room_id: &str, conn: Uuid) -> Option<ClientId> {
        let client_id = self.rooms.get_mut(room_id)?.peers.remove(&conn);
        if self
            .rooms
            .remove_if(room_id, |_, room| room.peers.is_empty())
            .is_some()
        {
            tracing::debug!(%room_id, "room closed");
        }
        client_id
    }

    /// Merge a client's update into the room document.
    pub fn merge_sync(&self, room_id: &str, bytes: &[u8]) -> Result<(), RoomError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::NotFound(room_id.to_string()))?;
        room.doc.import(bytes)?;
        room.has_history = true;
        Ok(())
    }

    /// Merged room state, for a connection that fell behind.
    pub fn snapshot(&self, room_id: &str) -> Option<String> {
        self.rooms.get(room_id)?.snapshot()
    }

    /// Send a message to every connection in the room except `from`.
    pub fn broadcast(&self, room_id: &str, from: Uuid, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            // No receivers is fine: the sender is alone in the room.
            let _ = room.tx.send((from, msg));
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn peer_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.peers.len())
    }
}
