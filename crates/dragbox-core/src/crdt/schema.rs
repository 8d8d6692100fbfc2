//! Loro document schema and operations.

use super::convert::{point_from_loro, point_to_loro};
use crate::identity::ClientId;
use kurbo::Point;
use loro::{ExportMode, LoroDoc, LoroError, LoroMap, LoroValue, ValueOrContainer, VersionVector};
use thiserror::Error;

/// Key for the root map holding the box state.
pub const BOX_KEY: &str = "box";
/// Key for the box origin inside [`BOX_KEY`].
pub const ORIGIN_KEY: &str = "origin";

/// Errors raised by the shared document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("CRDT error: {0}")]
    Loro(#[from] LoroError),
    #[error("Malformed value under {0:?}")]
    MalformedValue(String),
}

/// Result type for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Where a merged change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A write made through this document.
    Local,
    /// A delta received from the replication channel.
    Remote,
    /// State restored from the durability cache.
    Restored,
}

/// Notification delivered to observers after every merge.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    /// Origin after the merge (`None` while the document is still unseeded).
    pub origin: Option<Point>,
    pub source: ChangeSource,
}

/// Handle returned by [`SharedDocument::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&DocumentChange)>;

/// The replicated document holding the box state.
///
/// Wraps a `LoroDoc` whose root map `box` is a last-writer-wins map: concurrent
/// writes to the same key are resolved by Lamport timestamp with the peer id
/// as tie-breaker, so every replica that has seen the same updates agrees.
pub struct SharedDocument {
    /// The underlying Loro document.
    doc: LoroDoc,
    /// Version already handed to the outbox.
    exported: VersionVector,
    /// Local deltas not yet taken by the replication channel.
    outbox: Vec<Vec<u8>>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl SharedDocument {
    /// Create an empty document whose CRDT peer id is `client_id`.
    pub fn new(client_id: ClientId) -> DocumentResult<Self> {
        let doc = LoroDoc::new();
        doc.set_peer_id(client_id.0)?;
        Ok(Self {
            exported: doc.oplog_vv(),
            doc,
            outbox: Vec::new(),
            observers: Vec::new(),
            next_observer: 0,
        })
    }

    /// Create a document from a snapshot, writing future ops as `client_id`.
    pub fn from_snapshot(client_id: ClientId, bytes: &[u8]) -> DocumentResult<Self> {
        let mut document = Self::new(client_id)?;
        document.doc.import(bytes)?;
        document.exported = document.doc.oplog_vv();
        Ok(document)
    }

    /// Get the underlying LoroDoc.
    pub fn loro_doc(&self) -> &LoroDoc {
        &self.doc
    }

    pub fn client_id(&self) -> ClientId {
        ClientId(self.doc.peer_id())
    }

    fn box_map(&self) -> LoroMap {
        self.doc.get_map(BOX_KEY)
    }

    /// Most recently merged value for `key`.
    pub fn get(&self, key: &str) -> Option<LoroValue> {
        match self.box_map().get(key)? {
            ValueOrContainer::Value(value) => Some(value),
            ValueOrContainer::Container(_) => None,
        }
    }

    /// Replace the value for `key`, notify observers and queue the delta.
    pub fn set(&mut self, key: &str, value: impl Into<LoroValue>) -> DocumentResult<()> {
        self.box_map().insert(key, value.into())?;
        self.doc.commit();
        self.queue_local_delta();
        self.notify(ChangeSource::Local);
        Ok(())
    }

    /// Current box origin, or `None` if nobody has seeded it yet.
    pub fn origin(&self) -> Option<Point> {
        let value = self.get(ORIGIN_KEY)?;
        let point = point_from_loro(&value);
        if point.is_none() {
            log::warn!("Ignoring malformed origin value: {:?}", value);
        }
        point
    }

    /// Write a new box origin.
    pub fn set_origin(&mut self, origin: Point) -> DocumentResult<()> {
        if !(origin.x.is_finite() && origin.y.is_finite()) {
            return Err(DocumentError::MalformedValue(ORIGIN_KEY.to_string()));
        }
        self.set(ORIGIN_KEY, point_to_loro(origin))
    }

    /// Seed `origin = (0, 0)` if it is absent. Returns true if a write happened.
    ///
    /// Two replicas seeding concurrently both write the same value, so the
    /// merge outcome is `(0, 0)` whichever write wins.
    pub fn seed_origin_if_absent(&mut self) -> DocumentResult<bool> {
        if self.origin().is_some() {
            return Ok(false);
        }
        log::info!("Seeding empty document with origin (0, 0)");
        self.set_origin(Point::ZERO)?;
        Ok(true)
    }

    /// Register a callback run synchronously after every local or remote merge.
    pub fn observe(&mut self, callback: impl FnMut(&DocumentChange) + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(callback)));
        id
    }

    /// Remove an observer. Returns false if it was not registered.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(observer, _)| *observer != id);
        self.observers.len() != before
    }

    /// Merge a remote delta or snapshot.
    ///
    /// Observers are notified even when the import changes nothing.
    pub fn import(&mut self, bytes: &[u8]) -> DocumentResult<()> {
        self.import_from(bytes, ChangeSource::Remote)
    }

    /// Merge state loaded from the durability cache.
    pub fn restore(&mut self, bytes: &[u8]) -> DocumentResult<()> {
        self.import_from(bytes, ChangeSource::Restored)
    }

    fn import_from(&mut self, bytes: &[u8], source: ChangeSource) -> DocumentResult<()> {
        // Local ops are always queued before they can interleave with imports,
        // so the remote ops never need to be re-exported.
        self.doc.import(bytes)?;
        self.exported = self.doc.oplog_vv();
        self.notify(source);
        Ok(())
    }

    /// Take the local deltas produced since the last call.
    pub fn take_outgoing(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }

    /// Export the document as a snapshot (full state).
    pub fn export_snapshot(&self) -> Vec<u8> {
        match self.doc.export(ExportMode::Snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Snapshot export failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Get the current version vector.
    pub fn version(&self) -> VersionVector {
        self.doc.oplog_vv()
    }

    fn queue_local_delta(&mut self) {
        match self.doc.export(ExportMode::updates(&self.exported)) {
            Ok(bytes) if !bytes.is_empty() => self.outbox.push(bytes),
            Ok(_) => {}
            Err(e) => log::error!("Delta export failed: {}", e),
        }
        self.exported = self.doc.oplog_vv();
    }

    fn notify(&mut self, source: ChangeSource) {
        let change = DocumentChange {
            origin: self.origin(),
            source,
        };
        for (_, observer) in &mut self.observers {
            observer(&change);
        }
    }
}
