//! Dragbox Core Library
//!
//! Collaborative state synchronization for a single shared draggable box:
//! a Loro-backed shared document for the box origin, an ephemeral presence
//! registry for cursors and drag flags, and the drag arbitration state machine
//! that turns local input into document writes.

pub mod channel;
pub mod color;
pub mod config;
pub mod crdt;
pub mod drag;
pub mod identity;
pub mod input;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod storage;

pub use channel::{NativeWebSocket, ReconnectPolicy, Transport};
pub use color::Color;
pub use config::SessionConfig;
pub use crdt::{ChangeSource, DocumentChange, SharedDocument};
pub use drag::{DragArbiter, DragState, active_selector, highlight_color};
pub use identity::{ClientId, Identity};
pub use input::{EventDisposition, InputEvent, MouseButton};
pub use presence::{PresenceChange, PresenceEntry, PresenceField, PresenceRegistry};
pub use protocol::{ClientMessage, ConnectionState, ServerMessage, SyncEvent};
pub use session::{Lifecycle, PeerView, RenderState, Session};

pub use kurbo::{Point, Vec2};
