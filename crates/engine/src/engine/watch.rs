//! Subscription book-keeping and match-rule management.
//!
//! Each watched path carries two reference counts: `establishing` while the
//! match rules are still being installed asynchronously, and `active` once
//! every bussed source has confirmed its rule. The fast path installs rules
//! asynchronously and reconciles races against the engine's state token;
//! the sync path installs them inline, so no race is possible.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use stratum_proto::paths::check_path;
use stratum_proto::wire::{BusCall, MethodCall, match_rule};

use crate::error::Result;

use super::Engine;

/// Reference counts per watched path.
///
/// An `establishing` entry exists for exactly as long as its rule install
/// is outstanding; the count may drop to zero in the meantime if every
/// watcher leaves before the install completes. Only the install's
/// completion removes the entry.
#[derive(Debug, Default)]
pub(super) struct Subscriptions {
	establishing: HashMap<String, u32>,
	active: HashMap<String, u32>,
}

impl Subscriptions {
	fn bump(counts: &mut HashMap<String, u32>, path: &str) -> u32 {
		let count = counts.entry(path.to_string()).or_insert(0);
		*count = count
			.checked_add(1)
			.expect("subscription count overflow");
		*count
	}

	#[cfg(test)]
	pub(super) fn active_count(&self, path: &str) -> u32 {
		self.active.get(path).copied().unwrap_or(0)
	}

	#[cfg(test)]
	pub(super) fn establishing_count(&self, path: &str) -> u32 {
		self.establishing.get(path).copied().unwrap_or(0)
	}
}

/// Completion state of one asynchronous rule installation.
struct WatchInstall {
	engine: Arc<Engine>,
	path: String,
	state0: u64,
	remaining: AtomicUsize,
}

impl WatchInstall {
	fn complete_one(&self) {
		if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
			self.engine.finish_watch_install(&self.path, self.state0);
		}
	}
}

impl Engine {
	/// Subscribe to changes under `path` without blocking.
	///
	/// Match rules are installed asynchronously; if any source changes
	/// while they are in transit, one synthetic notification for `path` is
	/// delivered so the consumer re-reads. Installation failures are
	/// silent: the transport contract is at-worst missed notifications.
	pub fn watch_fast(self: &Arc<Self>, path: &str) -> Result<()> {
		check_path(path)?;
		{
			let mut subs = self.subs.lock();
			if subs.active.contains_key(path) {
				Subscriptions::bump(&mut subs.active, path);
				return Ok(());
			}
			if subs.establishing.contains_key(path) {
				// An install for this path is already outstanding; it
				// covers this watcher too, even if every earlier watcher
				// has unwatched in the meantime.
				Subscriptions::bump(&mut subs.establishing, path);
				return Ok(());
			}
			subs.establishing.insert(path.to_string(), 1);
		}

		let state0 = self.state.load(Ordering::SeqCst);
		if self.bussed.is_empty() {
			self.finish_watch_install(path, state0);
			return Ok(());
		}

		let install = Arc::new(WatchInstall {
			engine: Arc::clone(self),
			path: path.to_string(),
			state0,
			remaining: AtomicUsize::new(self.bussed.len()),
		});
		for (bus, object_path) in &self.bussed {
			let call = BusCall::daemon(
				*bus,
				MethodCall::AddMatch {
					rule: match_rule(object_path, path),
				},
			);
			let install = Arc::clone(&install);
			self.bus
				.call_async(call, Box::new(move |_reply| install.complete_one()));
		}
		Ok(())
	}

	/// All match rules for `path` are in place (or there were none to
	/// install): move the establishing counts over to active, or tear the
	/// rules back down if every watcher already left.
	fn finish_watch_install(self: &Arc<Self>, path: &str, state0: u64) {
		let (promoted, active_now) = {
			let mut subs = self.subs.lock();
			let count = subs.establishing.remove(path).unwrap_or(0);
			if count > 0 {
				*subs.active.entry(path.to_string()).or_insert(0) += count;
			}
			(count > 0, subs.active.get(path).copied().unwrap_or(0))
		};

		if !promoted && active_now == 0 {
			self.send_remove_match(path);
		} else if promoted && self.state.load(Ordering::SeqCst) != state0 {
			// A source changed while the rules were being installed; the
			// consumer may have missed a notification for that change.
			let changes = [String::new()];
			self.emit(path, &changes, None, false, None);
		}
	}

	/// Drop one subscription to `path`.
	///
	/// # Panics
	///
	/// Unsubscribing more often than subscribed is a programming error.
	pub fn unwatch_fast(&self, path: &str) -> Result<()> {
		check_path(path)?;
		let remove = {
			let mut subs = self.subs.lock();
			if let Some(count) = subs.active.get_mut(path) {
				*count -= 1;
				if *count == 0 {
					subs.active.remove(path);
					true
				} else {
					false
				}
			} else if let Some(count) = subs.establishing.get_mut(path) {
				assert!(*count > 0, "unwatch of {path:?} without matching watch");
				// The install is still in transit; if the count stays at
				// zero it will send the RemoveMatch when it completes.
				*count -= 1;
				false
			} else {
				panic!("unwatch of {path:?} without matching watch");
			}
		};
		if remove {
			self.send_remove_match(path);
		}
		Ok(())
	}

	/// Subscribe, installing match rules synchronously.
	pub fn watch_sync(&self, path: &str) -> Result<()> {
		check_path(path)?;
		let install = {
			let mut subs = self.subs.lock();
			Subscriptions::bump(&mut subs.active, path) == 1
		};
		if install {
			for (bus, object_path) in &self.bussed {
				let call = BusCall::daemon(
					*bus,
					MethodCall::AddMatch {
						rule: match_rule(object_path, path),
					},
				);
				let _ = self.bus.call_sync(call, None);
			}
		}
		Ok(())
	}

	/// Unsubscribe, removing match rules synchronously.
	///
	/// # Panics
	///
	/// Unsubscribing more often than subscribed is a programming error.
	pub fn unwatch_sync(&self, path: &str) -> Result<()> {
		check_path(path)?;
		let remove = {
			let mut subs = self.subs.lock();
			let count = subs
				.active
				.get_mut(path)
				.unwrap_or_else(|| panic!("unwatch of {path:?} without matching watch"));
			*count -= 1;
			if *count == 0 {
				subs.active.remove(path);
				true
			} else {
				false
			}
		};
		if remove {
			for (bus, object_path) in &self.bussed {
				let call = BusCall::daemon(
					*bus,
					MethodCall::RemoveMatch {
						rule: match_rule(object_path, path),
					},
				);
				let _ = self.bus.call_sync(call, None);
			}
		}
		Ok(())
	}

	/// Whether any subscription is live or being established.
	#[must_use]
	pub fn has_watches(&self) -> bool {
		let subs = self.subs.lock();
		subs.active.values().any(|&c| c > 0) || subs.establishing.values().any(|&c| c > 0)
	}

	fn send_remove_match(&self, path: &str) {
		for (bus, object_path) in &self.bussed {
			let call = BusCall::daemon(
				*bus,
				MethodCall::RemoveMatch {
					rule: match_rule(object_path, path),
				},
			);
			self.bus.call_async(call, Box::new(|_reply| {}));
		}
	}
}
