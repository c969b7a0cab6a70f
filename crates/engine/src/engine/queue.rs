//! The write queue: optimistic and synchronous changes.
//!
//! Writes travel through a two-slot queue: a mutable `pending` delta that
//! absorbs every incoming `change_fast`, and an `in_flight` delta that has
//! been sealed and sent to the writer. At most one delta is ever on the
//! wire; the reply either records the committed tag (for later echo
//! suppression) or drops the delta and tells observers to re-read.

use std::sync::Arc;

use stratum_proto::wire::{BusCall, BusKind, MethodCall, Reply};

use crate::bus::{CancelToken, ReplyResult, TransportError};
use crate::changeset::Changeset;
use crate::error::{EngineError, Result};
use crate::source::Source;

use super::Engine;

/// The pending and in-flight slots plus the last committed tag.
#[derive(Debug, Default)]
pub struct WriteQueue {
	pending: Option<Changeset>,
	in_flight: Option<Changeset>,
	last_handled: Option<String>,
}

impl WriteQueue {
	/// The uncommitted deltas shadowing the writable layer, newest first.
	pub(super) fn shadows(&self) -> impl Iterator<Item = &Changeset> {
		[self.pending.as_ref(), self.in_flight.as_ref()]
			.into_iter()
			.flatten()
	}

	pub(super) fn last_handled(&self) -> Option<&str> {
		self.last_handled.as_deref()
	}

	/// Promote `pending` into the empty `in_flight` slot, returning the
	/// call to put on the wire.
	///
	/// Keeps the queue invariant: whenever `in_flight` is empty, `pending`
	/// is too.
	fn promote(&mut self, writer: Option<&(BusKind, String)>) -> Option<BusCall> {
		if self.in_flight.is_some() || self.pending.is_none() {
			return None;
		}
		let mut delta = self.pending.take().expect("pending checked above");
		delta.seal();
		let payload = delta.serialise();
		self.in_flight = Some(delta);
		let (bus, object_path) = writer.expect("queue only fills behind a writable source");
		Some(BusCall::writer(
			*bus,
			object_path,
			MethodCall::Change { payload },
		))
	}
}

impl Engine {
	/// Queue `delta`, returning as soon as its effect is locally visible.
	///
	/// The delta is sealed, merged into `pending`, and sent to the writer
	/// as soon as the wire is free. If the delta changes anything against
	/// the current effective state, one synthetic notification is emitted
	/// carrying `origin_tag` so the caller can recognise its own echo.
	pub fn change_fast(self: &Arc<Self>, mut delta: Changeset, origin_tag: Option<&str>) -> Result<()> {
		delta.seal();
		if delta.is_empty() {
			return Ok(());
		}

		let (filtered, call) = {
			let sources = self.acquire_sources();
			self.check_delta_writable(&sources, &delta)?;

			let mut queue = self.queue.lock();
			let base = Self::effective_base(&sources, &queue, &delta);
			let filtered = Changeset::filter_changes(&base, &delta);

			queue
				.pending
				.get_or_insert_with(Changeset::delta)
				.change(&delta)
				.expect("pending is never sealed");
			let call = queue.promote(self.writer.as_ref());
			(filtered, call)
		};

		if let Some(call) = call {
			self.send_change(call);
		}
		if let Some(mut filtered) = filtered {
			let description = filtered.describe();
			self.emit(
				&description.prefix,
				&description.paths,
				None,
				false,
				origin_tag,
			);
		}
		Ok(())
	}

	/// Send `delta` to the writer and block for the committed tag.
	///
	/// Bypasses the queue entirely and emits no local notification; the
	/// change is observed through the writer's authoritative signal.
	pub fn change_sync(
		&self,
		mut delta: Changeset,
		cancel: Option<&CancelToken>,
	) -> Result<String> {
		delta.seal();
		if delta.is_empty() {
			return Ok(String::new());
		}
		{
			let sources = self.acquire_sources();
			self.check_delta_writable(&sources, &delta)?;
		}
		let (bus, object_path) = self
			.writer
			.as_ref()
			.expect("writability was checked above");
		let call = BusCall::writer(
			*bus,
			object_path,
			MethodCall::Change {
				payload: delta.serialise(),
			},
		);
		match self.bus.call_sync(call, cancel)? {
			Reply::Tag(tag) => Ok(tag),
			Reply::Unit => Err(TransportError::ReplyType { member: "Change" }.into()),
		}
	}

	/// Block until nothing is in flight.
	pub fn sync(&self) {
		let mut queue = self.queue.lock();
		while queue.in_flight.is_some() {
			self.queue_cond.wait(&mut queue);
		}
	}

	/// Reject `delta` unless every write it contains targets a writable
	/// key. Resets only require that a writable source exists at all.
	fn check_delta_writable(&self, sources: &[Source], delta: &Changeset) -> Result<()> {
		if self.writer.is_none() {
			let path = delta
				.iter()
				.next()
				.map(|(path, _)| path.to_string())
				.unwrap_or_default();
			return Err(EngineError::NotWritable(path));
		}
		for (path, value) in delta.iter() {
			if value.is_some() && !Self::key_writable(sources, path) {
				return Err(EngineError::NotWritable(path.to_string()));
			}
		}
		Ok(())
	}

	/// The effective database for the paths `delta` touches: the writable
	/// layer overlaid with in-flight and pending shadows. Deeper layers
	/// and their locks are deliberately not consulted; the delta has
	/// already passed the writability check.
	fn effective_base(sources: &[Source], queue: &WriteQueue, delta: &Changeset) -> Changeset {
		let mut base = Changeset::database();
		if let Some(table) = sources.first().and_then(Source::values) {
			for (path, _) in delta.iter() {
				if path.ends_with('/') {
					for key in table.keys_under(path) {
						let value = table.get(key).cloned();
						base.set(key, value).expect("table keys are valid");
					}
				} else if let Some(value) = table.get(path) {
					base.set(path, Some(value.clone()))
						.expect("table keys are valid");
				}
			}
		}
		for shadow in [queue.in_flight.as_ref(), queue.pending.as_ref()]
			.into_iter()
			.flatten()
		{
			base.change(shadow).expect("base is never sealed");
		}
		base
	}

	fn send_change(self: &Arc<Self>, call: BusCall) {
		let engine = Arc::clone(self);
		self.bus.call_async(
			call,
			Box::new(move |result| engine.handle_change_reply(result)),
		);
	}

	/// Reply to the in-flight `Change`: record the tag on success, or drop
	/// the delta and tell observers to re-read on failure. Either way the
	/// wire is free again, so a waiting `pending` is promoted.
	fn handle_change_reply(self: &Arc<Self>, result: ReplyResult) {
		let mut dropped = None;
		let next_call = {
			let mut queue = self.queue.lock();
			match result {
				Ok(Reply::Tag(tag)) => {
					queue.last_handled = Some(tag);
					queue.in_flight = None;
				}
				Ok(Reply::Unit) => {
					dropped = queue.in_flight.take();
					tracing::warn!("Change reply carried no tag; dropping queued changes");
				}
				Err(err) => {
					dropped = queue.in_flight.take();
					tracing::warn!(%err, "Change call failed; dropping queued changes");
				}
			}
			self.queue_cond.notify_all();
			queue.promote(self.writer.as_ref())
		};

		if let Some(call) = next_call {
			self.send_change(call);
		}
		if let Some(mut delta) = dropped {
			// Observers saw the optimistic values; wake them so they can
			// re-read the authoritative state.
			let description = delta.describe();
			self.emit(&description.prefix, &description.paths, None, false, None);
		}
	}
}
