//! Ephemeral per-client presence (awareness).
//!
//! Presence is never persisted and never merged: each client owns exactly one
//! entry, broadcasts it whole on every change, and peers replace their copy
//! on receipt. Entries disappear when the relay reports the client gone.

use crate::color::Color;
use crate::identity::ClientId;
use kurbo::Point;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// All known entries, ordered by client id.
///
/// The ordering is what makes the active-selector scan stable across events.
pub type Presences = BTreeMap<ClientId, PresenceEntry>;

/// Presence state of one client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceEntry {
    pub color: Color,
    /// Last known pointer position; `None` when the pointer is outside the canvas.
    pub cursor: Option<Point>,
    /// Advisory "currently dragging the box" flag.
    pub is_selecting: bool,
}

impl PresenceEntry {
    /// Fresh entry for a client that just connected.
    pub fn new(color: Color) -> Self {
        Self {
            color,
            cursor: None,
            is_selecting: false,
        }
    }

    fn apply(&mut self, field: PresenceField) {
        match field {
            PresenceField::Cursor(cursor) => self.cursor = cursor,
            PresenceField::IsSelecting(flag) => self.is_selecting = flag,
        }
    }
}

/// A mutable field of the local entry, for [`PresenceRegistry::set_local_field`].
///
/// The color is fixed by the session identity and cannot be changed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresenceField {
    Cursor(Option<Point>),
    IsSelecting(bool),
}

/// Cursor position on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// Presence payload as it travels through the relay.
///
/// Every field is optional here so that a malformed payload can be reported
/// instead of failing the whole envelope; [`PresenceEntry::try_from`] enforces
/// the required fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WirePresence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub cursor: Option<CursorPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_selecting: Option<bool>,
}

/// Reasons a presence payload is dropped at the channel boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidPresence {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("bad color {0:?}")]
    BadColor(String),
    #[error("cursor coordinates are not finite")]
    NonFiniteCursor,
}

impl From<&PresenceEntry> for WirePresence {
    fn from(entry: &PresenceEntry) -> Self {
        Self {
            color: Some(entry.color.to_string()),
            cursor: entry.cursor.map(|p| CursorPosition { x: p.x, y: p.y }),
            is_selecting: Some(entry.is_selecting),
        }
    }
}

impl TryFrom<WirePresence> for PresenceEntry {
    type Error = InvalidPresence;

    fn try_from(wire: WirePresence) -> Result<Self, Self::Error> {
        let raw_color = wire.color.ok_or(InvalidPresence::MissingField("color"))?;
        let color = raw_color
            .parse()
            .map_err(|_| InvalidPresence::BadColor(raw_color.clone()))?;
        let is_selecting = wire
            .is_selecting
            .ok_or(InvalidPresence::MissingField("is_selecting"))?;
        let cursor = match wire.cursor {
            Some(c) if c.x.is_finite() && c.y.is_finite() => Some(Point::new(c.x, c.y)),
            Some(_) => return Err(InvalidPresence::NonFiniteCursor),
            None => None,
        };
        Ok(Self {
            color,
            cursor,
            is_selecting,
        })
    }
}

/// Which entries changed in one registry update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceChange {
    pub added: BTreeSet<ClientId>,
    pub updated: BTreeSet<ClientId>,
    pub removed: BTreeSet<ClientId>,
}

impl PresenceChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Handle returned by [`PresenceRegistry::on_change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&PresenceChange, &Presences)>;

/// Registry of every connected client's presence, including our own.
pub struct PresenceRegistry {
    local_id: ClientId,
    entries: Presences,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
    /// Whether the local entry changed since the last broadcast.
    local_dirty: bool,
}

impl PresenceRegistry {
    /// Create a registry holding only the local entry.
    pub fn new(local_id: ClientId, color: Color) -> Self {
        let mut entries = Presences::new();
        entries.insert(local_id, PresenceEntry::new(color));
        Self {
            local_id,
            entries,
            listeners: Vec::new(),
            next_listener: 0,
            local_dirty: true,
        }
    }

    pub fn local_id(&self) -> ClientId {
        self.local_id
    }

    /// Our own entry.
    pub fn local(&self) -> &PresenceEntry {
        // The local entry is inserted in `new` and never removed.
        &self.entries[&self.local_id]
    }

    /// Update one field of the local entry and mark it for broadcast.
    ///
    /// Listeners fire even if the value is unchanged.
    pub fn set_local_field(&mut self, field: PresenceField) {
        if let Some(entry) = self.entries.get_mut(&self.local_id) {
            entry.apply(field);
        }
        self.local_dirty = true;

        let mut change = PresenceChange::default();
        change.updated.insert(self.local_id);
        self.notify(&change);
    }

    /// Snapshot of every entry, local one included.
    pub fn get_all(&self) -> &Presences {
        &self.entries
    }

    /// Every entry except our own, in stable order.
    pub fn peers(&self) -> impl Iterator<Item = (ClientId, &PresenceEntry)> {
        let local_id = self.local_id;
        self.entries
            .iter()
            .filter(move |(id, _)| **id != local_id)
            .map(|(id, entry)| (*id, entry))
    }

    /// Register a callback run after every add, update or removal.
    pub fn on_change(
        &mut self,
        callback: impl FnMut(&PresenceChange, &Presences) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(callback)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    /// Store an entry received from a peer.
    ///
    /// Payloads claiming to be the local client are ignored: nobody but us
    /// writes our entry.
    pub fn apply_remote(&mut self, client_id: ClientId, entry: PresenceEntry) -> Option<PresenceChange> {
        if client_id == self.local_id {
            log::warn!("Ignoring remote presence for local client {}", client_id);
            return None;
        }

        let mut change = PresenceChange::default();
        if self.entries.insert(client_id, entry).is_some() {
            change.updated.insert(client_id);
        } else {
            change.added.insert(client_id);
        }
        self.notify(&change);
        Some(change)
    }

    /// Drop a disconnected peer's entry.
    pub fn remove(&mut self, client_id: ClientId) -> Option<PresenceChange> {
        if client_id == self.local_id {
            return None;
        }
        self.entries.remove(&client_id)?;

        let mut change = PresenceChange::default();
        change.removed.insert(client_id);
        self.notify(&change);
        Some(change)
    }

    /// Drop every peer entry, e.g. after losing the connection.
    pub fn clear_remote(&mut self) -> Option<PresenceChange> {
        let local_id = self.local_id;
        let removed: BTreeSet<ClientId> = self
            .entries
            .keys()
            .copied()
            .filter(|id| *id != local_id)
            .collect();
        if removed.is_empty() {
            return None;
        }
        self.entries.retain(|id, _| *id == local_id);

        let change = PresenceChange {
            removed,
            ..PresenceChange::default()
        };
        self.notify(&change);
        Some(change)
    }

    /// Force the local entry to be broadcast again (e.g. for a newcomer).
    pub fn mark_local_dirty(&mut self) {
        self.local_dirty = true;
    }

    /// Take the local entry if it changed since the last call.
    pub fn take_outgoing(&mut self) -> Option<PresenceEntry> {
        if !self.local_dirty {
            return None;
        }
        self.local_dirty = false;
        Some(*self.local())
    }

    fn notify(&mut self, change: &PresenceChange) {
        for (_, listener) in &mut self.listeners {
            listener(change, &self.entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    const RED: Color = Color::rgb(255, 0, 0);
    const BLUE: Color = Color::rgb(0, 0, 255);

    fn registry() -> PresenceRegistry {
        PresenceRegistry::new(ClientId(1), BLUE)
    }

    #[test]
    fn test_new_registry_has_local_entry() {
        let registry = registry();
        assert_eq!(registry.get_all().len(), 1);
        assert_eq!(registry.local(), &PresenceEntry::new(BLUE));
        assert_eq!(registry.peers().count(), 0);
    }

    #[test]
    fn test_set_local_field_notifies_and_queues() {
        let changes = Rc::new(RefCell::new(Vec::new()));
        let mut registry = registry();
        let sink = changes.clone();
        registry.on_change(move |change, _| sink.borrow_mut().push(change.clone()));

        assert!(registry.take_outgoing().is_some());
        assert!(registry.take_outgoing().is_none());

        registry.set_local_field(PresenceField::IsSelecting(true));
        registry.set_local_field(PresenceField::IsSelecting(true));

        assert!(registry.local().is_selecting);
        assert_eq!(changes.borrow().len(), 2);
        assert!(changes.borrow()[0].updated.contains(&ClientId(1)));
        assert!(registry.take_outgoing().unwrap().is_selecting);
    }

    #[test]
    fn test_local_color_fixed_for_session() {
        let mut registry = registry();
        registry.set_local_field(PresenceField::Cursor(Some(Point::new(1.0, 1.0))));
        registry.set_local_field(PresenceField::IsSelecting(true));
        registry.set_local_field(PresenceField::Cursor(None));

        assert_eq!(registry.local().color, BLUE);
        assert_eq!(registry.take_outgoing().unwrap().color, BLUE);
    }

    #[test]
    fn test_remote_add_update_remove() {
        let mut registry = registry();

        let added = registry.apply_remote(ClientId(2), PresenceEntry::new(RED)).unwrap();
        assert!(added.added.contains(&ClientId(2)));

        let mut moved = PresenceEntry::new(RED);
        moved.cursor = Some(Point::new(4.0, 5.0));
        let updated = registry.apply_remote(ClientId(2), moved).unwrap();
        assert!(updated.updated.contains(&ClientId(2)));
        assert_eq!(registry.get_all()[&ClientId(2)].cursor, Some(Point::new(4.0, 5.0)));

        let removed = registry.remove(ClientId(2)).unwrap();
        assert!(removed.removed.contains(&ClientId(2)));
        assert!(registry.remove(ClientId(2)).is_none());
    }

    #[test]
    fn test_remote_cannot_overwrite_local() {
        let mut registry = registry();
        let mut forged = PresenceEntry::new(RED);
        forged.is_selecting = true;

        assert!(registry.apply_remote(ClientId(1), forged).is_none());
        assert_eq!(registry.local().color, BLUE);
        assert!(registry.remove(ClientId(1)).is_none());
    }

    #[test]
    fn test_peers_excludes_local() {
        let mut registry = registry();
        registry.apply_remote(ClientId(0), PresenceEntry::new(RED));
        registry.apply_remote(ClientId(3), PresenceEntry::new(RED));

        let ids: Vec<_> = registry.peers().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![ClientId(0), ClientId(3)]);
        assert!(registry.peers().all(|(_, entry)| entry.color != BLUE));
        assert_eq!(registry.get_all().len(), 3);
    }

    #[test]
    fn test_clear_remote_keeps_local() {
        let mut registry = registry();
        assert!(registry.clear_remote().is_none());

        registry.apply_remote(ClientId(2), PresenceEntry::new(RED));
        registry.apply_remote(ClientId(3), PresenceEntry::new(RED));
        let change = registry.clear_remote().unwrap();

        assert_eq!(change.removed.len(), 2);
        assert_eq!(registry.get_all().len(), 1);
    }

    #[test]
    fn test_wire_validation() {
        let ok: WirePresence =
            serde_json::from_str(r##"{"color":"#ff0000","cursor":{"x":1.0,"y":2.0},"is_selecting":true}"##)
                .unwrap();
        let entry = PresenceEntry::try_from(ok).unwrap();
        assert_eq!(entry.color, RED);
        assert_eq!(entry.cursor, Some(Point::new(1.0, 2.0)));
        assert!(entry.is_selecting);

        let null_cursor: WirePresence =
            serde_json::from_str(r##"{"color":"#ff0000","cursor":null,"is_selecting":false}"##).unwrap();
        assert_eq!(PresenceEntry::try_from(null_cursor).unwrap().cursor, None);

        let no_flag: WirePresence = serde_json::from_str(r##"{"color":"#ff0000"}"##).unwrap();
        assert_eq!(
            PresenceEntry::try_from(no_flag),
            Err(InvalidPresence::MissingField("is_selecting"))
        );

        let bad_color: WirePresence =
            serde_json::from_str(r#"{"color":"red","is_selecting":false}"#).unwrap();
        assert!(matches!(
            PresenceEntry::try_from(bad_color),
            Err(InvalidPresence::BadColor(_))
        ));
    }

    #[test]
    fn test_wire_roundtrip_of_local_entry() {
        let mut entry = PresenceEntry::new(RED);
        entry.cursor = Some(Point::new(-3.0, 8.5));
        let wire = WirePresence::from(&entry);
        assert_eq!(PresenceEntry::try_from(wire).unwrap(), entry);
    }
}
