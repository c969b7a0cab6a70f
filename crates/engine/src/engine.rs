//! The configuration engine: layered reads, the write queue, and
//! change-notification fan-out.
//!
//! An engine is constructed against a [`Profile`] and a [`Bus`] transport
//! and is fully thread-safe; it owns no thread and schedules nothing. Reads
//! enter on caller threads; reply callbacks and signal deliveries arrive on
//! whatever thread the transport chooses.
//!
//! Three locks guard the mutable state: the *sources* lock (held across
//! every read while the stack is refreshed), the *queue* lock (pending and
//! in-flight deltas), and the *subscription* lock (watch counts). When the
//! sources and queue locks are both needed, sources is taken first. No lock
//! is ever held across the consumer notification callback, which may
//! re-enter the engine.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};
use stratum_proto::Value;
use stratum_proto::wire::BusKind;

use crate::bus::Bus;
use crate::changeset::Changeset;
use crate::db::Table;
use crate::dirs::Dirs;
use crate::profile::Profile;
use crate::source::Source;

mod queue;
mod signals;
mod watch;

#[cfg(test)]
mod tests;

pub use signals::handle_bus_signal;
use queue::WriteQueue;
use watch::Subscriptions;

/// How a read should treat the writable layer and locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFlags {
	/// The normal layered read.
	#[default]
	None,
	/// The value a reset would leave in effect: skip the writable layer
	/// and its shadow queues.
	DefaultValueOnly,
	/// Only the writable layer and its shadow queues, ignoring locks.
	UserValueOnly,
}

/// One change notification, delivered synchronously on the triggering
/// thread.
#[derive(Debug)]
pub struct ChangeEvent<'a> {
	/// Path or dir under which the changes happened.
	pub prefix: &'a str,
	/// Paths relative to `prefix`; `[""]` when the prefix itself changed.
	pub changes: &'a [String],
	/// The writer's tag for an authoritative notification; `None` for a
	/// local optimistic one, `Some("")` for writability changes.
	pub tag: Option<&'a str>,
	/// Whether this describes a writability change rather than a value
	/// change.
	pub is_writability: bool,
	/// Echo of the tag the local writer passed to `change_fast`, so a
	/// consumer can recognise its own optimistic notifications.
	pub origin_tag: Option<&'a str>,
}

/// Receives change notifications. May re-enter the engine.
pub trait WatchHandler: Send + Sync {
	fn change(&self, engine: &Engine, event: &ChangeEvent<'_>);
}

/// Static description of one layer, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
	pub name: String,
	pub kind: &'static str,
	pub writable: bool,
}

/// A reference-counted, thread-safe configuration engine.
pub struct Engine {
	dirs: Dirs,
	bus: Arc<dyn Bus>,
	handler: Box<dyn WatchHandler>,
	/// Bus coordinates of the writable first source, fixed at construction.
	writer: Option<(BusKind, String)>,
	/// Bus coordinates of every bussed source, fixed at construction.
	bussed: Vec<(BusKind, String)>,
	sources: Mutex<Vec<Source>>,
	/// Bumped once for every source whose database identity changes.
	state: AtomicU64,
	queue: Mutex<WriteQueue>,
	queue_cond: Condvar,
	subs: Mutex<Subscriptions>,
}

impl Engine {
	/// Build an engine over `profile` and register it for signal dispatch.
	#[must_use]
	pub fn new(
		profile: Profile,
		dirs: Dirs,
		bus: Arc<dyn Bus>,
		handler: Box<dyn WatchHandler>,
	) -> Arc<Engine> {
		let mut sources = profile.into_sources();
		for source in &mut sources {
			source.init(&dirs, bus.as_ref());
		}
		let writer = sources
			.first()
			.filter(|s| s.is_writable())
			.and_then(|s| s.bus_coords())
			.map(|(bus, path)| (bus, path.to_string()));
		let bussed = sources
			.iter()
			.filter_map(Source::bus_coords)
			.map(|(bus, path)| (bus, path.to_string()))
			.collect();

		let engine = Arc::new(Engine {
			dirs,
			bus,
			handler,
			writer,
			bussed,
			sources: Mutex::new(sources),
			state: AtomicU64::new(0),
			queue: Mutex::new(WriteQueue::default()),
			queue_cond: Condvar::new(),
			subs: Mutex::new(Subscriptions::default()),
		});
		signals::register(&engine);
		engine
	}

	/// Take the sources lock, refreshing every source and bumping the
	/// state token once per changed identity.
	fn acquire_sources(&self) -> MutexGuard<'_, Vec<Source>> {
		let mut sources = self.sources.lock();
		for source in sources.iter_mut() {
			if source.refresh(&self.dirs, self.bus.as_ref()) {
				self.state.fetch_add(1, Ordering::SeqCst);
			}
		}
		sources
	}

	/// The layered read, with default flags and no read-through.
	#[must_use]
	pub fn read(&self, key: &str) -> Option<Value> {
		self.read_full(key, ReadFlags::None, &[])
	}

	/// The layered read.
	///
	/// `read_through` is an ordered list of uncommitted deltas consulted
	/// newest-last; an entry containing the key wins over the writable
	/// layer, with a reset standing for "no user value".
	#[must_use]
	pub fn read_full(
		&self,
		key: &str,
		flags: ReadFlags,
		read_through: &[Changeset],
	) -> Option<Value> {
		debug_assert!(stratum_proto::is_key(key), "read of invalid key {key:?}");
		let sources = self.acquire_sources();
		let n = sources.len();

		// A lock in layer i pins the result to layer i or deeper.
		let mut lock_level = 0;
		if flags != ReadFlags::UserValueOnly {
			for i in (1..n).rev() {
				if sources[i].locks_key(key) {
					lock_level = i;
				}
			}
		}

		let mut value = None;
		if lock_level == 0 && n > 0 && sources[0].is_writable() {
			let mut found = false;
			if flags != ReadFlags::DefaultValueOnly {
				for delta in read_through.iter().rev() {
					if let Some(entry) = delta.get(key) {
						value = entry.cloned();
						found = true;
						break;
					}
				}
				if !found {
					let queue = self.queue.lock();
					for delta in queue.shadows() {
						if let Some(entry) = delta.get(key) {
							value = entry.cloned();
							found = true;
							break;
						}
					}
				}
				if !found {
					value = sources[0].values().and_then(|t| t.get(key)).cloned();
				}
			}
			lock_level = 1;
		}

		if flags != ReadFlags::UserValueOnly {
			for source in sources.iter().skip(lock_level) {
				if value.is_some() {
					break;
				}
				value = source.values().and_then(|t| t.get(key)).cloned();
			}
		}
		value
	}

	/// Union of the immediate children of `dir` across all layers.
	///
	/// Pending and in-flight changes are deliberately ignored; their effect
	/// on existence is ambiguous until the writer commits them.
	#[must_use]
	pub fn list(&self, dir: &str) -> Vec<String> {
		debug_assert!(stratum_proto::is_dir(dir), "list of invalid dir {dir:?}");
		let sources = self.acquire_sources();
		let mut names = BTreeSet::new();
		for source in sources.iter() {
			if let Some(table) = source.values() {
				names.extend(table.list(dir));
			}
		}
		names.into_iter().collect()
	}

	/// Every locked key under `dir`. When the profile has no writable
	/// first source the entire dir is effectively read-only, and `[dir]`
	/// itself is returned.
	#[must_use]
	pub fn list_locks(&self, dir: &str) -> Vec<String> {
		debug_assert!(stratum_proto::is_dir(dir), "list of invalid dir {dir:?}");
		let sources = self.acquire_sources();
		match sources.first() {
			Some(first) if first.is_writable() => {
				let mut locks = BTreeSet::new();
				for source in sources.iter().skip(1) {
					if let Some(table) = source.values().and_then(Table::locks) {
						locks.extend(table.under(dir).map(str::to_string));
					}
				}
				locks.into_iter().collect()
			}
			_ => vec![dir.to_string()],
		}
	}

	/// Whether a write to `key` could currently succeed.
	#[must_use]
	pub fn is_writable(&self, key: &str) -> bool {
		let sources = self.acquire_sources();
		Self::key_writable(&sources, key)
	}

	fn key_writable(sources: &[Source], key: &str) -> bool {
		sources.first().is_some_and(Source::is_writable)
			&& !sources.iter().skip(1).any(|s| s.locks_key(key))
	}

	/// The current state token, after a refresh.
	#[must_use]
	pub fn state(&self) -> u64 {
		let _sources = self.acquire_sources();
		self.state.load(Ordering::SeqCst)
	}

	/// Static layer descriptions, for tooling.
	#[must_use]
	pub fn sources(&self) -> Vec<SourceInfo> {
		self.sources
			.lock()
			.iter()
			.map(|source| SourceInfo {
				name: source.name().to_string(),
				kind: source.kind_label(),
				writable: source.is_writable(),
			})
			.collect()
	}

	/// Deliver a notification to the consumer. Never called with an engine
	/// lock held.
	fn emit(
		&self,
		prefix: &str,
		changes: &[String],
		tag: Option<&str>,
		is_writability: bool,
		origin_tag: Option<&str>,
	) {
		let event = ChangeEvent {
			prefix,
			changes,
			tag,
			is_writability,
			origin_tag,
		};
		self.handler.change(self, &event);
	}
}

impl Drop for Engine {
	fn drop(&mut self) {
		// Our registry entry is already un-upgradeable; drop it eagerly so
		// dispatch stops scanning it.
		signals::prune();
	}
}

impl std::fmt::Debug for Engine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine")
			.field("writer", &self.writer)
			.field("bussed", &self.bussed)
			.field("state", &self.state.load(Ordering::SeqCst))
			.finish_non_exhaustive()
	}
}
