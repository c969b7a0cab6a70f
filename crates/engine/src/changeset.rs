//! Ordered sets of configuration changes.
//!
//! A changeset maps paths to either a new value or a reset. Two modes exist:
//!
//! - **Delta**: entries may be writes (`path → value`) or resets
//!   (`path → None`), and a reset may target a dir, meaning "reset every key
//!   under it". This is the shape sent to the writer.
//! - **Database**: entries are always `key → value`; resets are resolved on
//!   insertion by deleting. This is the shape of a table snapshot held in
//!   memory.
//!
//! Entries are kept in a sorted map, which gives the one ordering invariant
//! downstream consumers rely on for free: a dir reset is a strict prefix of
//! every key beneath it, so it sorts ahead of them and a writer can apply
//! deletes before inserts.
//!
//! A changeset may be *sealed*, after which mutation fails and the changeset
//! can be shared or serialised. Sealed changesets expose a [`Description`]:
//! the longest common prefix plus parallel relative-path and value arrays.

use std::collections::BTreeMap;

use stratum_proto::paths::{check_key, check_path};
use stratum_proto::Value;

use crate::bus::TransportError;
use crate::error::{EngineError, Result};

/// Which insertion rules a changeset follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetKind {
	/// Writes and resets, dirs allowed as reset targets.
	Delta,
	/// Values only; resets delete on insertion.
	Database,
}

/// The described form of a sealed changeset.
#[derive(Debug, Clone, PartialEq)]
pub struct Description {
	/// Longest common prefix of all paths, trimmed back to a `/` boundary.
	pub prefix: String,
	/// Sorted paths relative to `prefix`. Dir resets precede the keys they
	/// dominate.
	pub paths: Vec<String>,
	/// Parallel to `paths`; `None` marks a reset.
	pub values: Vec<Option<Value>>,
}

/// An ordered map of `path → write-or-reset`.
#[derive(Debug, Clone)]
pub struct Changeset {
	kind: ChangesetKind,
	entries: BTreeMap<String, Option<Value>>,
	sealed: bool,
	description: Option<Description>,
}

impl Changeset {
	/// An empty delta.
	#[must_use]
	pub fn delta() -> Self {
		Self {
			kind: ChangesetKind::Delta,
			entries: BTreeMap::new(),
			sealed: false,
			description: None,
		}
	}

	/// An empty database.
	#[must_use]
	pub fn database() -> Self {
		Self {
			kind: ChangesetKind::Database,
			..Self::delta()
		}
	}

	/// A delta holding one write (or reset, when `value` is `None`).
	pub fn single(path: &str, value: Option<Value>) -> Result<Self> {
		let mut changeset = Self::delta();
		changeset.set(path, value)?;
		Ok(changeset)
	}

	#[must_use]
	pub fn kind(&self) -> ChangesetKind {
		self.kind
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_sealed(&self) -> bool {
		self.sealed
	}

	/// Record a write or reset at `path`.
	///
	/// In a delta, a dir path is only accepted as a reset. In a database,
	/// resets are resolved immediately: a key reset deletes the key and a
	/// dir reset deletes everything under the dir.
	pub fn set(&mut self, path: &str, value: Option<Value>) -> Result<()> {
		if self.sealed {
			return Err(EngineError::Sealed);
		}
		check_path(path)?;

		let is_dir = path.ends_with('/');
		if is_dir && value.is_some() {
			// Only keys hold values; a dir can only be reset.
			check_key(path)?;
		}

		match self.kind {
			ChangesetKind::Delta => {
				self.entries.insert(path.to_string(), value);
			}
			ChangesetKind::Database => match value {
				Some(value) => {
					self.entries.insert(path.to_string(), Some(value));
				}
				None if is_dir => {
					self.entries.retain(|key, _| !key.starts_with(path));
				}
				None => {
					self.entries.remove(path);
				}
			},
		}
		Ok(())
	}

	/// Look up `key`: `None` if absent, `Some(None)` for a reset,
	/// `Some(Some(value))` for a write.
	#[must_use]
	pub fn get(&self, key: &str) -> Option<Option<&Value>> {
		self.entries.get(key).map(Option::as_ref)
	}

	/// Whether every entry satisfies `predicate`.
	pub fn all(&self, mut predicate: impl FnMut(&str, Option<&Value>) -> bool) -> bool {
		self.entries
			.iter()
			.all(|(path, value)| predicate(path, value.as_ref()))
	}

	/// Iterate entries in path order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
		self.entries
			.iter()
			.map(|(path, value)| (path.as_str(), value.as_ref()))
	}

	/// Whether `self` and `other` cover the same path set (values ignored).
	#[must_use]
	pub fn is_similar_to(&self, other: &Changeset) -> bool {
		self.entries.keys().eq(other.entries.keys())
	}

	/// Make the changeset immutable. Idempotent.
	pub fn seal(&mut self) {
		self.sealed = true;
	}

	/// Describe the changeset, sealing it first. Idempotent.
	pub fn describe(&mut self) -> &Description {
		self.sealed = true;
		if self.description.is_none() {
			self.description = Some(self.compute_description());
		}
		self.description.as_ref().expect("description just computed")
	}

	fn compute_description(&self) -> Description {
		let n = self.entries.len();
		if n == 0 {
			return Description {
				prefix: "/".to_string(),
				paths: Vec::new(),
				values: Vec::new(),
			};
		}
		if n == 1 {
			let (path, value) = self.entries.iter().next().expect("one entry");
			return Description {
				prefix: path.clone(),
				paths: vec![String::new()],
				values: vec![value.clone()],
			};
		}

		// In a sorted map the common prefix of all keys is the common
		// prefix of the first and last, trimmed back to the last slash.
		let first = self.entries.keys().next().expect("non-empty");
		let last = self.entries.keys().next_back().expect("non-empty");
		let shared = first
			.bytes()
			.zip(last.bytes())
			.take_while(|(a, b)| a == b)
			.count();
		let boundary = first[..shared].rfind('/').map_or(1, |i| i + 1);
		let prefix = first[..boundary].to_string();

		let (paths, values) = self
			.entries
			.iter()
			.map(|(path, value)| (path[prefix.len()..].to_string(), value.clone()))
			.unzip();

		Description {
			prefix,
			paths,
			values,
		}
	}

	/// Apply the delta `other` to `self`.
	///
	/// Dir resets first remove every entry of `self` under the dir; writes
	/// and key resets are then copied in (or, in a database, resolved).
	pub fn change(&mut self, other: &Changeset) -> Result<()> {
		if self.sealed {
			return Err(EngineError::Sealed);
		}
		for (path, value) in &other.entries {
			if path.ends_with('/') {
				self.entries.retain(|key, _| !key.starts_with(path.as_str()));
				if self.kind == ChangesetKind::Delta {
					self.entries.insert(path.clone(), None);
				}
			} else {
				match (self.kind, value) {
					(ChangesetKind::Database, None) => {
						self.entries.remove(path);
					}
					_ => {
						self.entries.insert(path.clone(), value.clone());
					}
				}
			}
		}
		Ok(())
	}

	/// The delta transforming database `a` into database `b`, or `None`
	/// when they are equal.
	#[must_use]
	pub fn diff(a: &Changeset, b: &Changeset) -> Option<Changeset> {
		let mut delta = Changeset::delta();
		for key in a.entries.keys() {
			if !b.entries.contains_key(key) {
				delta.entries.insert(key.clone(), None);
			}
		}
		for (key, value) in &b.entries {
			if a.entries.get(key) != Some(value) {
				delta.entries.insert(key.clone(), value.clone());
			}
		}
		(!delta.is_empty()).then_some(delta)
	}

	/// The subset of `delta` that would actually alter the database
	/// `base`, or `None` when every entry is already in effect.
	#[must_use]
	pub fn filter_changes(base: &Changeset, delta: &Changeset) -> Option<Changeset> {
		let mut kept = Changeset::delta();
		for (path, value) in &delta.entries {
			let effective = if path.ends_with('/') {
				// A dir reset only matters if something under it exists.
				base.entries
					.range::<str, _>((std::ops::Bound::Included(path.as_str()), std::ops::Bound::Unbounded))
					.next()
					.is_some_and(|(key, _)| key.starts_with(path.as_str()))
			} else {
				match value {
					None => base.entries.contains_key(path),
					Some(value) => base.entries.get(path) != Some(&Some(value.clone())),
				}
			};
			if effective {
				kept.entries.insert(path.clone(), value.clone());
			}
		}
		(!kept.is_empty()).then_some(kept)
	}

	/// Encode to the canonical wire form: a sorted, self-describing
	/// `path → maybe-value` list.
	#[must_use]
	pub fn serialise(&self) -> Vec<u8> {
		let entries: Vec<(&String, &Option<Value>)> = self.entries.iter().collect();
		postcard::to_stdvec(&entries).expect("changeset encoding is infallible")
	}

	/// Decode a delta from the wire form, validating every path.
	pub fn deserialise(bytes: &[u8]) -> Result<Changeset> {
		let entries: Vec<(String, Option<Value>)> = postcard::from_bytes(bytes)
			.map_err(|e| EngineError::Transport(TransportError::Decode(e)))?;
		let mut delta = Changeset::delta();
		for (path, value) in entries {
			delta.set(&path, value)?;
		}
		Ok(delta)
	}
}
