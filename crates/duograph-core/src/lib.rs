//! DuoGraph Core — Dual-Copy Concurrent Graph Engine
//!
//! A graph mutation engine where many reader threads observe a consistent
//! snapshot while a single writer mutates a second copy, with atomic
//! publication and full undo/redo.
//!
//! # Architecture
//!
//! - **Two store copies**: readers share one, the writer owns the other
//! - **Edit log**: every mutation records a forward/inverse op pair
//! - **Publication**: commit replays the log onto the read copy under its
//!   structural write lock, then swaps the role labels
//! - **Undo/redo**: the same replay-and-swap protocol driven from the undo
//!   history, run on a background thread
//!
//! # No Host Dependencies
//!
//! This crate has no UI types and no rendering assumptions. Host panels and
//! analytics consume the engine through read and write handles only;
//! graph-changed notifications arrive through registered listeners.

pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
pub mod store;
pub mod value;

mod edit;
mod history;

// Re-export key types for convenience
pub use config::EngineConfig;
pub use engine::{CommitOutcome, DualGraphEngine, ReadGuard, WriteGuard};
pub use error::{GraphError, GraphResult};
pub use listener::{EventKind, GraphEvent, GraphListener, ListenerId};
pub use store::{Attribute, GraphStore, OperationMode};
pub use value::{AttributeId, EdgeId, ElementKind, KeyRepr, Value, VertexId};
