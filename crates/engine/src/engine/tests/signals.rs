//! Tests for incoming signal dispatch, validation, and echo suppression.

use stratum_proto::Value;
use stratum_proto::wire::{BusKind, Reply, Signal, SignalBody};

use super::helpers::TestEngine;
use crate::changeset::Changeset;
use crate::engine::handle_bus_signal;

fn notify(
	bus: BusKind,
	object_path: &str,
	prefix: &str,
	changes: &[&str],
	tag: &str,
) -> Signal {
	Signal {
		bus,
		sender: Some(":1.99".to_string()),
		object_path: object_path.to_string(),
		body: SignalBody::Notify {
			prefix: prefix.to_string(),
			changes: changes.iter().map(|c| c.to_string()).collect(),
			tag: tag.to_string(),
		},
	}
}

#[test]
fn notify_reaches_matching_engines() {
	let fixture = TestEngine::user_over_system("sig");
	let path = fixture.user_object_path();

	handle_bus_signal(&notify(BusKind::Session, &path, "/x", &[""], "t1"));

	let events = fixture.events.take();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].prefix, "/x");
	assert_eq!(events[0].changes, vec![""]);
	assert_eq!(events[0].tag.as_deref(), Some("t1"));
	assert!(!events[0].is_writability);
	assert_eq!(events[0].origin_tag, None);
}

#[test]
fn unmatched_signals_are_dropped() {
	let fixture = TestEngine::user_over_system("sigdrop");
	let path = fixture.user_object_path();

	// Wrong object path.
	handle_bus_signal(&notify(
		BusKind::Session,
		"/io/stratum/Writer/someone-else",
		"/x",
		&[""],
		"t1",
	));
	// Right path, wrong bus.
	handle_bus_signal(&notify(BusKind::System, &path, "/x", &[""], "t2"));

	assert_eq!(fixture.events.count(), 0);
}

#[test]
fn malformed_notifications_are_dropped() {
	let fixture = TestEngine::user_over_system("sigbad");
	let path = fixture.user_object_path();

	// A key prefix must carry exactly [""].
	handle_bus_signal(&notify(BusKind::Session, &path, "/x", &["y"], "t"));
	handle_bus_signal(&notify(BusKind::Session, &path, "/x", &["", ""], "t"));
	// Invalid prefix.
	handle_bus_signal(&notify(BusKind::Session, &path, "x", &[""], "t"));
	handle_bus_signal(&notify(BusKind::Session, &path, "/a//b", &[""], "t"));
	// Dir prefix with an invalid relative path.
	handle_bus_signal(&notify(BusKind::Session, &path, "/d/", &["/abs"], "t"));

	assert_eq!(fixture.events.count(), 0);

	// The same dir prefix with valid relative paths goes through.
	handle_bus_signal(&notify(BusKind::Session, &path, "/d/", &["a", "b/c"], "t"));
	assert_eq!(fixture.events.take().len(), 1);
}

#[test]
fn own_committed_tag_is_suppressed() {
	let fixture = TestEngine::user_over_system("echo");
	let path = fixture.user_object_path();

	let delta = Changeset::single("/x", Some(Value::from("hi"))).unwrap();
	fixture.engine.change_fast(delta, None).unwrap();
	fixture
		.bus
		.complete_next(Ok(Reply::Tag("tag-42".to_string())));
	fixture.events.take();

	// The writer's own broadcast for our commit is silent for us.
	handle_bus_signal(&notify(BusKind::Session, &path, "/x", &[""], "tag-42"));
	assert_eq!(fixture.events.count(), 0);

	// A later, unrelated commit is not.
	handle_bus_signal(&notify(BusKind::Session, &path, "/x", &[""], "tag-43"));
	assert_eq!(fixture.events.take().len(), 1);
}

#[test]
fn writability_notify_delivers_with_the_empty_tag() {
	let fixture = TestEngine::user_over_system("sigw");
	let signal = Signal {
		bus: BusKind::Session,
		sender: None,
		object_path: fixture.user_object_path(),
		body: SignalBody::WritabilityNotify {
			path: "/locked/".to_string(),
		},
	};
	handle_bus_signal(&signal);

	let events = fixture.events.take();
	assert_eq!(events.len(), 1);
	assert_eq!(events[0].prefix, "/locked/");
	assert_eq!(events[0].changes, vec![""]);
	assert_eq!(events[0].tag.as_deref(), Some(""));
	assert!(events[0].is_writability);
}

#[test]
fn each_engine_filters_by_its_own_sources() {
	let one = TestEngine::user_over_system("multi-a");
	let two = TestEngine::user_over_system("multi-b");

	handle_bus_signal(&notify(
		BusKind::Session,
		&one.user_object_path(),
		"/x",
		&[""],
		"t",
	));

	assert_eq!(one.events.count(), 1);
	assert_eq!(two.events.count(), 0);
}

#[test]
fn dropped_engines_fall_out_of_dispatch() {
	let kept = TestEngine::user_over_system("drop-kept");
	let doomed = TestEngine::user_over_system("drop-doomed");
	let doomed_path = doomed.user_object_path();
	drop(doomed);

	// Delivery to the dropped engine is a silent no-op.
	handle_bus_signal(&notify(BusKind::Session, &doomed_path, "/x", &[""], "t"));
	handle_bus_signal(&notify(
		BusKind::Session,
		&kept.user_object_path(),
		"/x",
		&[""],
		"t",
	));
	assert_eq!(kept.events.count(), 1);
}
