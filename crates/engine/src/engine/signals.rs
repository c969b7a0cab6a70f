//! Incoming signal dispatch and the process-wide engine registry.
//!
//! The transport owns the bus connections, so signals arrive process-wide
//! rather than per-engine. Every live engine registers itself here; the
//! host forwards each incoming signal to [`handle_bus_signal`], which
//! validates the payload and fans it out to every engine with a matching
//! source.
//!
//! The registry holds weak references: an engine mid-teardown simply fails
//! to upgrade and the signal is silently dropped for it.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use stratum_proto::paths::{is_dir, is_key, is_path, is_rel_path};
use stratum_proto::wire::{Signal, SignalBody};

use super::Engine;

static ENGINES: Mutex<Vec<Weak<Engine>>> = Mutex::new(Vec::new());

pub(super) fn register(engine: &Arc<Engine>) {
	ENGINES.lock().push(Arc::downgrade(engine));
}

/// Drop registry entries whose engines are gone.
pub(super) fn prune() {
	ENGINES.lock().retain(|weak| weak.strong_count() > 0);
}

fn live_engines() -> Vec<Arc<Engine>> {
	ENGINES.lock().iter().filter_map(Weak::upgrade).collect()
}

/// Entry point for every signal the host receives on any bus.
///
/// Malformed payloads and signals matching no engine's sources are silently
/// ignored. For one engine, notifications on a single path are delivered in
/// arrival order; ordering across engines is unspecified.
pub fn handle_bus_signal(signal: &Signal) {
	match &signal.body {
		SignalBody::Notify {
			prefix,
			changes,
			tag,
		} => {
			if !notify_is_well_formed(prefix, changes) {
				tracing::debug!(%prefix, "discarding malformed Notify");
				return;
			}
			for engine in live_engines() {
				engine.deliver_notify(signal, prefix, changes, tag);
			}
		}
		SignalBody::WritabilityNotify { path } => {
			if !is_path(path) {
				tracing::debug!(%path, "discarding malformed WritabilityNotify");
				return;
			}
			for engine in live_engines() {
				engine.deliver_writability(signal, path);
			}
		}
	}
}

/// A key prefix must carry exactly the empty relative path; a dir prefix
/// may carry any list of relative paths.
fn notify_is_well_formed(prefix: &str, changes: &[String]) -> bool {
	if is_key(prefix) {
		changes.len() == 1 && changes[0].is_empty()
	} else if is_dir(prefix) {
		changes.iter().all(|change| is_rel_path(change))
	} else {
		false
	}
}

impl Engine {
	/// Object-path equality decides interest; sender identity is
	/// deliberately ignored, matching the writer's established contract.
	fn matches_signal(&self, signal: &Signal) -> bool {
		self.bussed
			.iter()
			.any(|(bus, path)| *bus == signal.bus && *path == signal.object_path)
	}

	fn deliver_notify(&self, signal: &Signal, prefix: &str, changes: &[String], tag: &str) {
		{
			// This engine's own fast write already notified locally.
			let queue = self.queue.lock();
			if queue.last_handled() == Some(tag) {
				return;
			}
		}
		if !self.matches_signal(signal) {
			return;
		}
		self.emit(prefix, changes, Some(tag), false, None);
	}

	fn deliver_writability(&self, signal: &Signal, path: &str) {
		if !self.matches_signal(signal) {
			return;
		}
		let changes = [String::new()];
		self.emit(path, &changes, Some(""), true, None);
	}
}
