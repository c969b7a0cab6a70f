//! The serialised table snapshot a writer materialises on disk.
//!
//! The engine treats the snapshot as an opaque key→value lookup; this type
//! exists so the writer service and the engine agree on one encoding. Both
//! lists are sorted by key so the bytes are canonical for a given table.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One database layer's contents: values plus an optional locks sub-table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
	/// Key → value entries, sorted by key.
	pub values: Vec<(String, Value)>,
	/// Keys whose writes are forbidden by this layer, sorted.
	pub locks: Vec<String>,
}

impl TableSnapshot {
	/// Encode to the canonical byte form, sorting both lists first.
	pub fn to_bytes(&mut self) -> postcard::Result<Vec<u8>> {
		self.values.sort_by(|a, b| a.0.cmp(&b.0));
		self.locks.sort();
		postcard::to_stdvec(self)
	}

	/// Decode from the canonical byte form.
	pub fn from_bytes(bytes: &[u8]) -> postcard::Result<Self> {
		postcard::from_bytes(bytes)
	}
}
