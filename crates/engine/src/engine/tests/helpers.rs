//! Common test fixtures: a recording transport and an event-capturing
//! handler wired to an engine over temporary database files.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use stratum_proto::wire::{BusCall, MethodCall, Reply};
use stratum_proto::{TableSnapshot, Value};
use tempfile::TempDir;

use crate::bus::{Bus, CancelToken, ReplyCallback, ReplyResult, TransportError};
use crate::dirs::Dirs;
use crate::engine::{ChangeEvent, Engine, WatchHandler};
use crate::profile::Profile;

/// A transport that records every call and lets the test script replies.
///
/// Synchronous calls answer immediately (from a scripted queue, or with a
/// sensible default); asynchronous calls stay pending until the test
/// completes them.
#[derive(Default)]
pub struct RecordingBus {
	state: Mutex<BusState>,
	/// Invoked for each synchronous call before replying, so tests can
	/// play writer (e.g. materialise a service database on `Init`).
	sync_hook: Mutex<Option<Box<dyn Fn(&BusCall) + Send>>>,
}

#[derive(Default)]
struct BusState {
	calls: Vec<BusCall>,
	pending: VecDeque<(BusCall, ReplyCallback)>,
	sync_replies: VecDeque<ReplyResult>,
}

impl RecordingBus {
	pub fn new() -> Arc<RecordingBus> {
		Arc::new(RecordingBus::default())
	}

	pub fn set_sync_hook(&self, hook: impl Fn(&BusCall) + Send + 'static) {
		*self.sync_hook.lock() = Some(Box::new(hook));
	}

	pub fn queue_sync_reply(&self, reply: ReplyResult) {
		self.state.lock().sync_replies.push_back(reply);
	}

	/// Every call seen so far, sync and async, in order.
	pub fn calls(&self) -> Vec<BusCall> {
		self.state.lock().calls.clone()
	}

	pub fn calls_with(&self, member: &str) -> Vec<BusCall> {
		self.calls()
			.into_iter()
			.filter(|call| call.method.member() == member)
			.collect()
	}

	pub fn pending_count(&self) -> usize {
		self.state.lock().pending.len()
	}

	/// Complete the oldest pending asynchronous call.
	pub fn complete_next(&self, result: ReplyResult) {
		let (_, callback) = self
			.state
			.lock()
			.pending
			.pop_front()
			.expect("no pending asynchronous call");
		callback(result);
	}

	/// Complete every pending asynchronous call with `Ok(Unit)`.
	pub fn complete_all_unit(&self) {
		loop {
			let next = self.state.lock().pending.pop_front();
			match next {
				Some((_, callback)) => callback(Ok(Reply::Unit)),
				None => break,
			}
		}
	}

	fn default_reply(call: &BusCall) -> ReplyResult {
		match call.method {
			MethodCall::Change { .. } => Ok(Reply::Tag("tag-sync".to_string())),
			_ => Ok(Reply::Unit),
		}
	}
}

impl Bus for RecordingBus {
	fn call_sync(&self, call: BusCall, cancel: Option<&CancelToken>) -> ReplyResult {
		if cancel.is_some_and(CancelToken::is_cancelled) {
			return Err(TransportError::Cancelled);
		}
		if let Some(hook) = &*self.sync_hook.lock() {
			hook(&call);
		}
		let mut state = self.state.lock();
		let reply = state
			.sync_replies
			.pop_front()
			.unwrap_or_else(|| Self::default_reply(&call));
		state.calls.push(call);
		reply
	}

	fn call_async(&self, call: BusCall, on_reply: ReplyCallback) {
		let mut state = self.state.lock();
		state.calls.push(call.clone());
		state.pending.push_back((call, on_reply));
	}
}

/// An owned copy of one delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
	pub prefix: String,
	pub changes: Vec<String>,
	pub tag: Option<String>,
	pub is_writability: bool,
	pub origin_tag: Option<String>,
}

#[derive(Default)]
pub struct EventLog {
	events: Mutex<Vec<CapturedEvent>>,
}

impl EventLog {
	pub fn take(&self) -> Vec<CapturedEvent> {
		std::mem::take(&mut *self.events.lock())
	}

	pub fn count(&self) -> usize {
		self.events.lock().len()
	}
}

pub struct CapturingHandler(pub Arc<EventLog>);

impl WatchHandler for CapturingHandler {
	fn change(&self, _engine: &Engine, event: &ChangeEvent<'_>) {
		self.0.events.lock().push(CapturedEvent {
			prefix: event.prefix.to_string(),
			changes: event.changes.to_vec(),
			tag: event.tag.map(str::to_string),
			is_writability: event.is_writability,
			origin_tag: event.origin_tag.map(str::to_string),
		});
	}
}

/// Write a table snapshot file the way the writer does: staged next to the
/// target and renamed over it, so the replaced file gets a fresh identity.
pub fn write_table(path: &Path, values: &[(&str, Value)], locks: &[&str]) {
	let mut snapshot = TableSnapshot {
		values: values
			.iter()
			.map(|(key, value)| (key.to_string(), value.clone()))
			.collect(),
		locks: locks.iter().map(|key| key.to_string()).collect(),
	};
	std::fs::create_dir_all(path.parent().expect("table path has a parent")).unwrap();
	let staged = path.with_extension("staged");
	std::fs::write(&staged, snapshot.to_bytes().unwrap()).unwrap();
	std::fs::rename(&staged, path).unwrap();
}

/// Database names unique per test, so engines in concurrently running
/// tests never share writer object paths.
pub fn unique_name(tag: &str) -> String {
	static COUNTER: AtomicU64 = AtomicU64::new(0);
	format!("{tag}-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// One engine over a temporary directory tree.
pub struct TestEngine {
	pub engine: Arc<Engine>,
	pub bus: Arc<RecordingBus>,
	pub events: Arc<EventLog>,
	pub dirs: Dirs,
	pub user_name: String,
	pub system_name: String,
	_tmp: TempDir,
}

impl TestEngine {
	/// A writable user source stacked over one read-only system source.
	pub fn user_over_system(tag: &str) -> TestEngine {
		let user_name = unique_name(tag);
		let system_name = format!("{user_name}-site");
		let profile = format!("user-db:{user_name}\nsystem-db:{system_name}\n");
		Self::from_profile_text(&profile, user_name, system_name)
	}

	/// A single writable user source.
	pub fn user_only(tag: &str) -> TestEngine {
		let user_name = unique_name(tag);
		let profile = format!("user-db:{user_name}\n");
		Self::from_profile_text(&profile, user_name, String::new())
	}

	pub fn from_profile_text(text: &str, user_name: String, system_name: String) -> TestEngine {
		let tmp = TempDir::new().unwrap();
		let dirs = Dirs::rooted_at(tmp.path());
		let bus = RecordingBus::new();
		let events = Arc::new(EventLog::default());
		let engine = Engine::new(
			Profile::parse(text),
			dirs.clone(),
			bus.clone(),
			Box::new(CapturingHandler(events.clone())),
		);
		TestEngine {
			engine,
			bus,
			events,
			dirs,
			user_name,
			system_name,
			_tmp: tmp,
		}
	}

	pub fn write_user_table(&self, values: &[(&str, Value)]) {
		write_table(&self.dirs.user_db(&self.user_name), values, &[]);
	}

	pub fn write_system_table(&self, values: &[(&str, Value)], locks: &[&str]) {
		write_table(&self.dirs.system_db(&self.system_name), values, locks);
	}

	/// Rewrite the user database and raise its invalidation flag, as the
	/// writer does after a commit.
	pub fn invalidate_user(&self, values: &[(&str, Value)]) {
		self.write_user_table(values);
		crate::shm::flag(&self.dirs.shm_dir(), &self.user_name).unwrap();
	}

	/// The session-bus object path of the user writer.
	pub fn user_object_path(&self) -> String {
		stratum_proto::wire::writer_object_path(&self.user_name)
	}
}
