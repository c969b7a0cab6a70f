//! In-memory handles over table snapshot files.
//!
//! A [`Table`] is the engine's view of one database layer: an opaque
//! key→value lookup plus an optional locks sub-table, decoded from the
//! writer's snapshot file at open time. The handle remembers the backing
//! file's identity so a replaced file can be detected on refresh.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use stratum_proto::{TableSnapshot, Value};

/// Identity of a backing file, for replace detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
	dev: u64,
	ino: u64,
}

impl FileIdentity {
	fn of(metadata: &std::fs::Metadata) -> Self {
		Self {
			dev: metadata.dev(),
			ino: metadata.ino(),
		}
	}

	/// Stat `path` and return its identity, if it exists.
	pub fn stat(path: &Path) -> Option<FileIdentity> {
		std::fs::metadata(path).ok().map(|m| Self::of(&m))
	}
}

/// The locks sub-table of one layer.
#[derive(Debug, Default)]
pub struct Locks {
	keys: HashSet<String>,
}

impl Locks {
	/// Whether `key` is locked by this layer.
	#[must_use]
	pub fn has(&self, key: &str) -> bool {
		self.keys.contains(key)
	}

	/// All locked keys under `dir`, unordered.
	pub fn under<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> {
		self.keys
			.iter()
			.filter(move |key| key.starts_with(dir))
			.map(String::as_str)
	}
}

/// One opened database layer.
#[derive(Debug)]
pub struct Table {
	path: PathBuf,
	identity: FileIdentity,
	values: HashMap<String, Value>,
	locks: Option<Locks>,
}

impl Table {
	/// Open and decode the snapshot at `path`.
	pub fn open(path: &Path) -> io::Result<Table> {
		use io::Read;

		let mut file = std::fs::File::open(path)?;
		let identity = FileIdentity::of(&file.metadata()?);
		let mut bytes = Vec::new();
		file.read_to_end(&mut bytes)?;
		let snapshot = TableSnapshot::from_bytes(&bytes)
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

		let values = snapshot.values.into_iter().collect();
		let locks = (!snapshot.locks.is_empty()).then(|| Locks {
			keys: snapshot.locks.into_iter().collect(),
		});

		Ok(Table {
			path: path.to_path_buf(),
			identity,
			values,
			locks,
		})
	}

	/// Whether `key` is present.
	#[must_use]
	pub fn has(&self, key: &str) -> bool {
		self.values.contains_key(key)
	}

	/// The value at `key`, if present.
	#[must_use]
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.values.get(key)
	}

	/// Immediate children of `dir`: plain names for keys, `name/` for
	/// subdirs, sorted.
	#[must_use]
	pub fn list(&self, dir: &str) -> BTreeSet<String> {
		let mut names = BTreeSet::new();
		for key in self.values.keys() {
			if let Some(rest) = key.strip_prefix(dir) {
				match rest.find('/') {
					Some(i) => names.insert(rest[..=i].to_string()),
					None => names.insert(rest.to_string()),
				};
			}
		}
		names
	}

	/// Every key under `dir`, unordered.
	pub fn keys_under<'a>(&'a self, dir: &'a str) -> impl Iterator<Item = &'a str> {
		self.values
			.keys()
			.filter(move |key| key.starts_with(dir))
			.map(String::as_str)
	}

	/// The locks sub-table, when this layer carries one.
	#[must_use]
	pub fn locks(&self) -> Option<&Locks> {
		self.locks.as_ref()
	}

	/// Identity of the backing file at open time.
	#[must_use]
	pub fn identity(&self) -> FileIdentity {
		self.identity
	}

	/// Whether the backing file still has the identity it was opened with.
	#[must_use]
	pub fn is_valid(&self) -> bool {
		FileIdentity::stat(&self.path) == Some(self.identity)
	}
}
