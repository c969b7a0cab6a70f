//! Bus-facing payloads: writer method calls, replies, and broadcast signals.
//!
//! The engine does not speak to a bus directly; it hands these values to a
//! transport facade. The types here pin down the only surface the two sides
//! share: member names, argument shapes, and the match rule grammar used to
//! subscribe to writer signals.

use serde::{Deserialize, Serialize};

/// Well-known destination owned by the writer service.
pub const WRITER_BUS_NAME: &str = "io.stratum";

/// Interface carrying the writer's methods and signals.
pub const WRITER_INTERFACE: &str = "io.stratum.Writer";

/// Destination of the bus daemon itself, for match-rule management.
pub const DAEMON_BUS_NAME: &str = "io.stratum.Bus";

/// Interface carrying the daemon's match-rule methods.
pub const DAEMON_INTERFACE: &str = "io.stratum.Bus";

/// Object path of the bus daemon.
pub const DAEMON_OBJECT_PATH: &str = "/io/stratum/Bus";

/// Which message bus a source's writer lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusKind {
	/// The per-login session bus.
	Session,
	/// The machine-wide system bus.
	System,
}

/// Object path of the writer for a named database.
#[must_use]
pub fn writer_object_path(name: &str) -> String {
	format!("/io/stratum/Writer/{name}")
}

/// Object path of the per-application proxied writer.
#[must_use]
pub fn proxied_object_path(app_id: &str) -> String {
	format!("/io/stratum/Proxied/{app_id}")
}

/// The match rule selecting `Notify`-family signals from one writer object,
/// restricted to a single watched path and everything beneath it.
#[must_use]
pub fn match_rule(object_path: &str, watched_path: &str) -> String {
	format!(
		"type='signal',interface='{WRITER_INTERFACE}',path='{object_path}',arg0path='{watched_path}'"
	)
}

/// A method invocation, addressed and ready to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusCall {
	pub bus: BusKind,
	pub destination: String,
	pub object_path: String,
	pub interface: String,
	pub method: MethodCall,
}

impl BusCall {
	/// A call to the writer object at `object_path`.
	#[must_use]
	pub fn writer(bus: BusKind, object_path: &str, method: MethodCall) -> Self {
		Self {
			bus,
			destination: WRITER_BUS_NAME.to_string(),
			object_path: object_path.to_string(),
			interface: WRITER_INTERFACE.to_string(),
			method,
		}
	}

	/// A call to the bus daemon (match-rule management).
	#[must_use]
	pub fn daemon(bus: BusKind, method: MethodCall) -> Self {
		Self {
			bus,
			destination: DAEMON_BUS_NAME.to_string(),
			object_path: DAEMON_OBJECT_PATH.to_string(),
			interface: DAEMON_INTERFACE.to_string(),
			method,
		}
	}
}

/// Method payload variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MethodCall {
	/// Apply a serialised, sealed delta. Replies with the committed tag.
	Change {
		/// Canonical postcard encoding of the delta.
		payload: Vec<u8>,
	},
	/// Ask the writer to materialise its backing database file.
	Init,
	/// Install a signal match rule.
	AddMatch { rule: String },
	/// Remove a previously installed match rule.
	RemoveMatch { rule: String },
}

impl MethodCall {
	/// The wire member name for this call.
	#[must_use]
	pub fn member(&self) -> &'static str {
		match self {
			MethodCall::Change { .. } => "Change",
			MethodCall::Init => "Init",
			MethodCall::AddMatch { .. } => "AddMatch",
			MethodCall::RemoveMatch { .. } => "RemoveMatch",
		}
	}
}

/// A successful method reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
	/// The tag string returned by `Change`.
	Tag(String),
	/// An empty reply (`Init`, `AddMatch`, `RemoveMatch`).
	Unit,
}

impl Reply {
	/// Extract the tag, if this reply carries one.
	#[must_use]
	pub fn into_tag(self) -> Option<String> {
		match self {
			Reply::Tag(tag) => Some(tag),
			Reply::Unit => None,
		}
	}
}

/// An incoming broadcast signal, as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
	pub bus: BusKind,
	/// Unique name of the emitting peer, when the transport knows it.
	pub sender: Option<String>,
	pub object_path: String,
	pub body: SignalBody,
}

/// Signal payload variants emitted by the writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalBody {
	/// One or more values under `prefix` changed; `tag` echoes the `Change`
	/// reply that committed them.
	Notify {
		prefix: String,
		changes: Vec<String>,
		tag: String,
	},
	/// The writability of `path` changed (a lock appeared or vanished).
	WritabilityNotify { path: String },
}
