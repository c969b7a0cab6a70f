//! Tests for the write queue: optimistic writes, coalescing, and replies.

use stratum_proto::Value;
use stratum_proto::wire::{MethodCall, Reply};

use super::helpers::TestEngine;
use crate::bus::{CancelToken, TransportError};
use crate::changeset::Changeset;
use crate::error::EngineError;

fn write(path: &str, n: i32) -> Changeset {
	Changeset::single(path, Some(Value::I32(n))).unwrap()
}

#[test]
fn fast_write_success() {
	let fixture = TestEngine::user_over_system("fast-ok");
	let delta = Changeset::single("/x", Some(Value::from("hi"))).unwrap();
	fixture.engine.change_fast(delta, None).unwrap();

	// Immediately visible through the shadow, and notified once.
	assert_eq!(fixture.engine.read("/x"), Some(Value::from("hi")));
	let events = fixture.events.take();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].prefix, "/x");
	assert_eq!(events[0].changes, vec![""]);
	assert_eq!(events[0].tag, None);
	assert!(!events[0].is_writability);

	assert_eq!(fixture.bus.calls_with("Change").len(), 1);
	fixture
		.bus
		.complete_next(Ok(Reply::Tag("tag-42".to_string())));

	// The shadow is gone; source 0 never actually stored the value.
	assert_eq!(fixture.engine.read("/x"), None);
	assert_eq!(fixture.events.count(), 0);
	fixture.engine.sync();
}

#[test]
fn fast_write_failure_notifies_again() {
	let fixture = TestEngine::user_over_system("fast-err");
	let delta = Changeset::single("/x", Some(Value::from("hi"))).unwrap();
	fixture.engine.change_fast(delta, None).unwrap();
	assert_eq!(fixture.events.take().len(), 1);

	fixture
		.bus
		.complete_next(Err(TransportError::Call("writer is down".to_string())));

	// The optimistic value vanished and observers were told to re-read.
	assert_eq!(fixture.engine.read("/x"), None);
	let events = fixture.events.take();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].prefix, "/x");
	assert_eq!(events[0].changes, vec![""]);
	assert_eq!(events[0].tag, None);
}

#[test]
fn rapid_writes_coalesce_into_two_calls() {
	let fixture = TestEngine::user_only("coalesce");
	for k in 0..100 {
		fixture.engine.change_fast(write("/x", k), None).unwrap();
		assert_eq!(fixture.engine.read("/x"), Some(Value::I32(k)));
	}

	// Only the first delta went out; everything else merged into pending.
	let calls = fixture.bus.calls_with("Change");
	assert_eq!(calls.len(), 1);
	let MethodCall::Change { payload } = &calls[0].method else {
		panic!("expected a Change call");
	};
	let first = Changeset::deserialise(payload).unwrap();
	assert_eq!(first.get("/x"), Some(Some(&Value::I32(0))));

	fixture.bus.complete_next(Ok(Reply::Tag("t0".to_string())));

	// Completion promoted the coalesced pending delta.
	let calls = fixture.bus.calls_with("Change");
	assert_eq!(calls.len(), 2);
	let MethodCall::Change { payload } = &calls[1].method else {
		panic!("expected a Change call");
	};
	let second = Changeset::deserialise(payload).unwrap();
	assert_eq!(second.get("/x"), Some(Some(&Value::I32(99))));

	fixture.bus.complete_next(Ok(Reply::Tag("t1".to_string())));
	assert_eq!(fixture.bus.calls_with("Change").len(), 2);
	fixture.engine.sync();
}

#[test]
fn redundant_write_is_queued_but_not_notified() {
	let fixture = TestEngine::user_only("redundant");
	fixture.write_user_table(&[("/x", Value::I32(5))]);

	fixture.engine.change_fast(write("/x", 5), None).unwrap();
	assert_eq!(fixture.events.count(), 0);
	// Still queued, for idempotence against a concurrent writer.
	assert_eq!(fixture.bus.calls_with("Change").len(), 1);
}

#[test]
fn same_value_twice_notifies_once() {
	let fixture = TestEngine::user_only("idem");
	fixture.engine.change_fast(write("/x", 7), None).unwrap();
	fixture.engine.change_fast(write("/x", 7), None).unwrap();

	assert_eq!(fixture.events.take().len(), 1);

	// Both deltas still travel to the writer.
	fixture.bus.complete_next(Ok(Reply::Tag("t0".to_string())));
	assert_eq!(fixture.bus.calls_with("Change").len(), 2);
}

#[test]
fn change_fast_carries_the_origin_tag() {
	let fixture = TestEngine::user_only("origin");
	fixture
		.engine
		.change_fast(write("/x", 1), Some("caller-7"))
		.unwrap();
	let events = fixture.events.take();
	assert_eq!(events[0].origin_tag.as_deref(), Some("caller-7"));
}

#[test]
fn change_sync_returns_the_writer_tag() {
	let fixture = TestEngine::user_only("sync");
	fixture
		.bus
		.queue_sync_reply(Ok(Reply::Tag("tag-9".to_string())));

	let tag = fixture
		.engine
		.change_sync(write("/x", 1), None)
		.unwrap();
	assert_eq!(tag, "tag-9");

	// No queue involvement and no optimistic notification.
	assert_eq!(fixture.bus.pending_count(), 0);
	assert_eq!(fixture.events.count(), 0);
	assert_eq!(fixture.engine.read("/x"), None);
}

#[test]
fn change_sync_honours_cancellation() {
	let fixture = TestEngine::user_only("cancel");
	let token = CancelToken::new();
	token.cancel();

	let result = fixture.engine.change_sync(write("/x", 1), Some(&token));
	assert!(matches!(result, Err(EngineError::Cancelled)));
	assert!(fixture.bus.calls_with("Change").is_empty());
}

#[test]
fn writes_without_a_writable_source_are_rejected() {
	let fixture = TestEngine::from_profile_text(
		"system-db:frozen\n",
		String::new(),
		"frozen".to_string(),
	);
	let result = fixture.engine.change_fast(write("/x", 1), None);
	assert!(matches!(result, Err(EngineError::NotWritable(_))));

	let reset = Changeset::single("/x", None).unwrap();
	let result = fixture.engine.change_sync(reset, None);
	assert!(matches!(result, Err(EngineError::NotWritable(_))));
}

#[test]
fn sync_blocks_until_the_wire_is_clear() {
	let fixture = TestEngine::user_only("barrier");
	fixture.engine.change_fast(write("/x", 1), None).unwrap();

	let engine = fixture.engine.clone();
	let (done_tx, done_rx) = std::sync::mpsc::channel();
	let waiter = std::thread::spawn(move || {
		engine.sync();
		done_tx.send(()).unwrap();
	});

	// The waiter cannot finish while the call is outstanding.
	assert!(done_rx
		.recv_timeout(std::time::Duration::from_millis(50))
		.is_err());

	fixture.bus.complete_next(Ok(Reply::Tag("t".to_string())));
	done_rx
		.recv_timeout(std::time::Duration::from_secs(5))
		.expect("sync() should return once in-flight clears");
	waiter.join().unwrap();
}

#[test]
fn empty_deltas_are_a_no_op() {
	let fixture = TestEngine::user_only("empty");
	fixture.engine.change_fast(Changeset::delta(), None).unwrap();
	let tag = fixture.engine.change_sync(Changeset::delta(), None).unwrap();
	assert_eq!(tag, "");
	assert!(fixture.bus.calls().is_empty());
	assert_eq!(fixture.events.count(), 0);
}
