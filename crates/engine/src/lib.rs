//! Client-side engine for the stratum layered configuration store.
//!
//! Applications read typed values at hierarchical paths out of a stack of
//! databases: one writable user layer over any number of read-only system
//! layers, with per-key locks that pin a value to the layer that set them.
//! Writes go to a remote writer over a message bus, either synchronously or
//! through an optimistic fast path that shadows the change locally and
//! reconciles with the writer's reply.
//!
//! The crate is transport-agnostic: the host supplies a [`bus::Bus`]
//! implementation and forwards incoming signals to
//! [`engine::handle_bus_signal`]. The engine owns no thread; everything
//! runs on caller and transport threads.
//!
//! # Overview
//!
//! - [`profile`]: which databases are stacked, and in what order.
//! - [`source`]: one layer's lifecycle (lazy open, invalidation, reopen).
//! - [`db`]: the opened table handles served from snapshot files.
//! - [`changeset`]: ordered sets of writes and resets.
//! - [`engine`]: the layered read, the write queue, subscriptions, and
//!   signal fan-out.

pub mod bus;
pub mod changeset;
pub mod db;
pub mod dirs;
pub mod engine;
pub mod error;
pub mod profile;
pub mod shm;
pub mod source;

pub use bus::{Bus, CancelToken, TransportError};
pub use changeset::{Changeset, ChangesetKind, Description};
pub use dirs::Dirs;
pub use engine::{ChangeEvent, Engine, ReadFlags, SourceInfo, WatchHandler, handle_bus_signal};
pub use error::{EngineError, Result};
pub use profile::Profile;
pub use source::Source;
