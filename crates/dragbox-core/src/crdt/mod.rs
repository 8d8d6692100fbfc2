//! CRDT integration using Loro for the shared box state.
//!
//! # Schema
//!
//! ```text
//! LoroDoc
//! └── "box": LoroMap
//!     └── "origin": { "x": f64, "y": f64 }  (plain value, replaced atomically)
//! ```
//!
//! `origin` is stored as a single map *value* rather than a nested container,
//! so concurrent drags race on the whole point instead of blending `x` from one
//! client with `y` from another.

mod convert;
mod schema;

pub use convert::{point_from_loro, point_to_loro};
pub use schema::{
    BOX_KEY, ChangeSource, DocumentChange, DocumentError, DocumentResult, ORIGIN_KEY, ObserverId,
    SharedDocument,
};

pub use loro::{LoroValue, VersionVector};
