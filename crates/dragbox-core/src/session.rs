//! One client's collaborative session.
//!
//! A [`Session`] owns the shared document, the presence registry and the drag
//! state machine for a single document id. It is driven entirely from the
//! outside: input events via [`Session::handle_input`], relay traffic via
//! [`Session::handle_event`], and outbound frames are drained with
//! [`Session::take_outgoing`] (or both directions at once with
//! [`Session::pump`]). Nothing blocks on the network.
//!
//! Lifecycle: `Restoring -> Ready -> Closed`. Input is ignored until the
//! durability cache has been read, at which point an empty document is seeded
//! and the ready callbacks run exactly once.

use crate::channel::Transport;
use crate::color::Color;
use crate::config::SessionConfig;
use crate::crdt::{DocumentChange, DocumentError, ObserverId, SharedDocument};
use crate::drag::{DragArbiter, DragState, active_selector};
use crate::identity::{ClientId, Identity};
use crate::input::{EventDisposition, InputEvent};
use crate::presence::{ListenerId, PresenceChange, PresenceEntry, PresenceField, PresenceRegistry, Presences, WirePresence};
use crate::protocol::{ClientMessage, ConnectionState, SyncEvent, base64_encode};
use crate::storage::{AutoSave, DurabilityCache, StorageError};
use kurbo::Point;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by session operations.
///
/// Inbound network problems are never returned; they are logged and dropped.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Readiness of the session's document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Waiting for the durability cache.
    Restoring,
    /// Document restored and seeded; input is live.
    Ready,
    /// Closed; all further input and traffic is ignored.
    Closed,
}

/// A remote peer as the renderer should draw it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerView {
    pub client_id: ClientId,
    pub color: Color,
    pub cursor: Option<Point>,
}

/// Everything the renderer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    /// Box origin; `None` until the session is ready.
    pub origin: Option<Point>,
    /// Border color of the box.
    pub highlight_color: Color,
    /// Our own color, for the identity bar.
    pub local_color: Color,
    /// Other peers, local client excluded.
    pub peers: Vec<PeerView>,
}

type ReadyCallback = Box<dyn FnOnce(&SharedDocument)>;
type StatusCallback = Box<dyn FnMut(ConnectionState)>;

pub struct Session {
    config: SessionConfig,
    identity: Identity,
    document: SharedDocument,
    presence: PresenceRegistry,
    drag: DragArbiter,
    lifecycle: Lifecycle,
    ready_callbacks: Vec<ReadyCallback>,
    status: ConnectionState,
    status_callbacks: Vec<StatusCallback>,
    autosave: AutoSave,
    /// Room we are joined to, if any. Outbound traffic is only queued while joined.
    room: Option<String>,
    /// Active selector, recomputed by a presence listener on every change.
    selector: Rc<Cell<Option<ClientId>>>,
    outgoing: Vec<ClientMessage>,
}

impl Session {
    /// Open a session for `config.document_id`. The session starts in
    /// [`Lifecycle::Restoring`]; call [`Session::restore`] next.
    pub fn open(config: SessionConfig, identity: Identity, cache: Arc<dyn DurabilityCache>) -> SessionResult<Self> {
        let local_id = identity.client_id();
        let document = SharedDocument::new(local_id)?;

        let selector = Rc::new(Cell::new(None));
        let mut presence = PresenceRegistry::new(local_id, identity.color());
        let cell = selector.clone();
        presence.on_change(move |_, entries| cell.set(active_selector(local_id, entries)));

        let mut autosave = AutoSave::new(cache, config.document_id.clone());
        autosave.set_interval(config.autosave_interval);

        log::info!(
            "Opened session for {} as client {} ({})",
            config.document_id,
            local_id,
            identity.color()
        );

        Ok(Self {
            config,
            identity,
            document,
            presence,
            drag: DragArbiter::new(),
            lifecycle: Lifecycle::Restoring,
            ready_callbacks: Vec::new(),
            status: ConnectionState::Disconnected,
            status_callbacks: Vec::new(),
            autosave,
            room: None,
            selector,
            outgoing: Vec::new(),
        })
    }

    /// Merge the cached snapshot (if any), then become ready.
    ///
    /// A missing or unreadable cache entry is not an error: the session starts
    /// from an empty document and seeds it.
    pub async fn restore(&mut self) -> SessionResult<()> {
        if self.lifecycle != Lifecycle::Restoring {
            return Ok(());
        }

        let cache = self.autosave.cache().clone();
        match cache.load(&self.config.document_id).await {
            Ok(bytes) => match self.document.restore(&bytes) {
                Ok(()) => log::info!("Restored {} from cache ({} bytes)", self.config.document_id, bytes.len()),
                Err(e) => log::warn!("Discarding unreadable cached snapshot: {}", e),
            },
            Err(StorageError::NotFound(_)) => log::info!("No cached state for {}", self.config.document_id),
            Err(e) => log::warn!("Failed to read cached state: {}", e),
        }

        self.become_ready()
    }

    fn become_ready(&mut self) -> SessionResult<()> {
        self.lifecycle = Lifecycle::Ready;
        self.document.seed_origin_if_absent()?;
        self.flush_local();

        log::info!("Document {} ready", self.config.document_id);
        for callback in std::mem::take(&mut self.ready_callbacks) {
            callback(&self.document);
        }
        Ok(())
    }

    /// Run `callback` once the document is ready (immediately if it already is).
    pub fn on_ready(&mut self, callback: impl FnOnce(&SharedDocument) + 'static) {
        match self.lifecycle {
            Lifecycle::Ready => callback(&self.document),
            Lifecycle::Restoring => self.ready_callbacks.push(Box::new(callback)),
            Lifecycle::Closed => {}
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle == Lifecycle::Ready
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn drag_state(&self) -> DragState {
        self.drag.state()
    }

    /// Subscribe to document merges (local and remote).
    pub fn observe(&mut self, callback: impl FnMut(&DocumentChange) + 'static) -> ObserverId {
        self.document.observe(callback)
    }

    /// Subscribe to presence changes.
    pub fn on_presence_change(
        &mut self,
        callback: impl FnMut(&PresenceChange, &Presences) + 'static,
    ) -> ListenerId {
        self.presence.on_change(callback)
    }

    /// Subscribe to connection status changes.
    pub fn on_status(&mut self, callback: impl FnMut(ConnectionState) + 'static) {
        self.status_callbacks.push(Box::new(callback));
    }

    pub fn status(&self) -> ConnectionState {
        self.status
    }

    /// The peer whose drag is currently surfaced, if any.
    pub fn active_selector(&self) -> Option<ClientId> {
        self.selector.get()
    }

    // --- Input ---

    /// Process one pointer or touch event.
    pub fn handle_input(&mut self, event: &InputEvent) -> EventDisposition {
        if self.lifecycle == Lifecycle::Closed {
            return EventDisposition::PassThrough;
        }

        match event {
            InputEvent::PointerMove { position, .. } => {
                self.presence.set_local_field(PresenceField::Cursor(Some(*position)));
            }
            InputEvent::PointerLeave => self.presence.set_local_field(PresenceField::Cursor(None)),
            _ => {}
        }

        let disposition = if self.lifecycle == Lifecycle::Ready {
            match self.drag.handle(event, &mut self.document, &mut self.presence) {
                Ok(disposition) => disposition,
                Err(e) => {
                    log::warn!("Dropping drag write: {}", e);
                    EventDisposition::PassThrough
                }
            }
        } else {
            EventDisposition::PassThrough
        };

        self.flush_local();
        disposition
    }

    // --- Network ---

    /// Parse and handle a raw server frame. Unparseable frames are dropped.
    pub fn handle_message(&mut self, json: &str) {
        match SyncEvent::from_json(json) {
            Ok(event) => self.handle_event(event),
            Err(e) => log::warn!("Dropping server message: {}", e),
        }
    }

    /// Handle one event from the replication channel.
    pub fn handle_event(&mut self, event: SyncEvent) {
        if self.lifecycle == Lifecycle::Closed {
            return;
        }

        match event {
            SyncEvent::Connected => {
                self.set_status(ConnectionState::Connected);
                self.outgoing.push(ClientMessage::Join {
                    room: self.config.document_id.clone(),
                    client_id: self.identity.client_id(),
                });
            }
            SyncEvent::Disconnected => {
                self.set_status(ConnectionState::Disconnected);
                self.room = None;
                self.presence.clear_remote();
            }
            SyncEvent::Reconnecting { attempt } => {
                log::debug!("Channel reconnecting (attempt {})", attempt);
                self.set_status(ConnectionState::Connecting);
            }
            SyncEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync,
            } => self.joined(room, peer_count, initial_sync),
            SyncEvent::PeerJoined { client_id } => {
                log::debug!("Peer {} joined", client_id);
                // Newcomers only learn our presence from a fresh broadcast.
                self.presence.mark_local_dirty();
                self.flush_local();
            }
            SyncEvent::PeerLeft { client_id } => {
                log::debug!("Peer {} left", client_id);
                self.presence.remove(client_id);
            }
            SyncEvent::SyncReceived { from, data } => match self.document.import(&data) {
                Ok(()) => self.autosave.mark_dirty(),
                Err(e) => log::warn!("Dropping update from {}: {}", from, e),
            },
            SyncEvent::AwarenessReceived { from, state } => match PresenceEntry::try_from(state) {
                Ok(entry) => {
                    self.presence.apply_remote(from, entry);
                }
                Err(e) => log::warn!("Dropping presence from {}: {}", from, e),
            },
            SyncEvent::Error { message } => log::warn!("Channel error: {}", message),
        }
    }

    fn joined(&mut self, room: String, peer_count: usize, initial_sync: Option<Vec<u8>>) {
        if let Some(bytes) = initial_sync {
            match self.document.import(&bytes) {
                Ok(()) => self.autosave.mark_dirty(),
                Err(e) => log::warn!("Discarding room snapshot: {}", e),
            }
        }
        log::info!("Joined room {} with {} peer(s)", room, peer_count);
        self.room = Some(room);

        // Publish everything we have so edits made offline reach the room.
        // The snapshot supersedes any queued deltas.
        self.document.take_outgoing();
        self.outgoing.push(ClientMessage::Sync {
            data: base64_encode(&self.document.export_snapshot()),
        });
        self.presence.mark_local_dirty();
        self.flush_local();
    }

    fn set_status(&mut self, status: ConnectionState) {
        if self.status == status {
            return;
        }
        log::info!("Client {}: {:?}", self.identity.client_id(), status);
        self.status = status;
        for callback in &mut self.status_callbacks {
            callback(status);
        }
    }

    /// Move local deltas and presence into the outbound queue.
    fn flush_local(&mut self) {
        let deltas = self.document.take_outgoing();
        if !deltas.is_empty() {
            self.autosave.mark_dirty();
        }
        let presence = self.presence.take_outgoing();

        // Not joined: drop them; `joined` republishes full state.
        if self.room.is_none() {
            return;
        }
        for delta in deltas {
            self.outgoing.push(ClientMessage::Sync {
                data: base64_encode(&delta),
            });
        }
        if let Some(entry) = presence {
            self.outgoing.push(ClientMessage::Awareness {
                client_id: self.identity.client_id(),
                state: WirePresence::from(&entry),
            });
        }
    }

    /// Drain queued frames as JSON text.
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
            .into_iter()
            .filter_map(|msg| match serde_json::to_string(&msg) {
                Ok(json) => Some(json),
                Err(e) => {
                    log::error!("Failed to encode {:?}: {}", msg, e);
                    None
                }
            })
            .collect()
    }

    /// Check if there are pending outgoing frames.
    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Handle everything the transport received, then send everything queued.
    pub fn pump<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        for event in transport.poll_events() {
            self.handle_event(event);
        }
        for msg in self.take_outgoing() {
            if let Err(e) = transport.send(&msg) {
                log::debug!("Dropping outgoing frame: {}", e);
            }
        }
    }

    // --- Persistence ---

    /// Save a snapshot to the durability cache now.
    pub async fn persist(&mut self) -> SessionResult<()> {
        self.autosave.save(&self.document).await?;
        Ok(())
    }

    /// Save if the document changed and the autosave interval has elapsed.
    pub async fn maybe_persist(&mut self) -> SessionResult<bool> {
        Ok(self.autosave.maybe_save(&self.document).await?)
    }

    // --- Rendering ---

    /// Derive what the renderer should draw.
    pub fn render_state(&self) -> RenderState {
        let local_color = self.identity.color();
        let highlight_color = self
            .selector
            .get()
            .and_then(|id| self.presence.get_all().get(&id))
            .map(|entry| entry.color)
            .unwrap_or(Color::TRANSPARENT);

        let peers = self
            .presence
            .peers()
            .filter(|(_, entry)| entry.color != local_color)
            .map(|(client_id, entry)| PeerView {
                client_id,
                color: entry.color,
                cursor: entry.cursor,
            })
            .collect();

        RenderState {
            origin: if self.is_ready() { self.document.origin() } else { None },
            highlight_color,
            local_color,
            peers,
        }
    }

    // --- Shutdown ---

    /// Release any drag, leave the room and persist unsaved state.
    ///
    /// Frames queued here (presence release, leave) should still be drained
    /// with [`Session::take_outgoing`].
    pub async fn close(&mut self) -> SessionResult<()> {
        if self.lifecycle == Lifecycle::Closed {
            return Ok(());
        }

        self.drag.cancel(&mut self.presence);
        self.presence.set_local_field(PresenceField::Cursor(None));
        self.flush_local();
        if self.room.take().is_some() {
            self.outgoing.push(ClientMessage::Leave);
        }

        let was_ready = self.is_ready();
        self.lifecycle = Lifecycle::Closed;
        self.ready_callbacks.clear();
        log::info!("Closed session for {}", self.config.document_id);

        if was_ready && self.autosave.is_dirty() {
            self.autosave.save(&self.document).await?;
        }
        Ok(())
    }
}
