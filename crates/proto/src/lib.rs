//! Wire types shared between the stratum engine and the writer service.
//!
//! This crate defines the vocabulary both sides of the configuration bus
//! agree on:
//!
//! - **Paths**: validation of keys (`/a/b`), dirs (`/a/b/`) and relative
//!   paths, used by every engine entry point.
//! - **Values**: the tagged variant stored under a key. The engine treats
//!   values as opaque; only the writer and the consumer interpret them.
//! - **Wire payloads**: method calls to the writer (`Change`, `Init`), match
//!   rule management on the bus daemon, and the writer's broadcast signals.
//! - **Table snapshots**: the serialised key/value (+ locks) image the writer
//!   materialises on disk and the engine maps in.

pub mod paths;
pub mod table;
pub mod value;
pub mod wire;

pub use paths::{PathError, is_dir, is_key, is_path, is_rel_path};
pub use table::TableSnapshot;
pub use value::{Value, ValueKind};
