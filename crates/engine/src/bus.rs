//! Transport facade over the message bus.
//!
//! The engine never owns a bus connection; the host hands it an
//! implementation of [`Bus`] and forwards every incoming broadcast signal to
//! [`crate::engine::handle_bus_signal`]. Reply callbacks may arrive on any
//! thread and are invoked at most once per call.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use stratum_proto::wire::{BusCall, Reply};
use thiserror::Error;

/// Why a bus call produced no usable reply.
#[derive(Debug, Error)]
pub enum TransportError {
	/// The call itself failed (no such destination, connection lost, the
	/// peer returned an error, ...).
	#[error("bus call failed: {0}")]
	Call(String),

	/// The peer replied with an unexpected reply shape.
	#[error("unexpected reply to {member}")]
	ReplyType { member: &'static str },

	/// A payload could not be decoded.
	#[error("malformed payload: {0}")]
	Decode(#[from] postcard::Error),

	/// The caller's cancellation token fired.
	#[error("call cancelled")]
	Cancelled,
}

/// Outcome of one method call.
pub type ReplyResult = std::result::Result<Reply, TransportError>;

/// Invoked exactly once with the outcome of an asynchronous call.
pub type ReplyCallback = Box<dyn FnOnce(ReplyResult) + Send + 'static>;

/// The method-call surface of a message bus connection.
pub trait Bus: Send + Sync {
	/// Send `call` and block for its reply.
	fn call_sync(&self, call: BusCall, cancel: Option<&CancelToken>) -> ReplyResult;

	/// Send `call` and return immediately; `on_reply` fires later, on
	/// whatever thread the transport chooses.
	fn call_async(&self, call: BusCall, on_reply: ReplyCallback);
}

/// A shared flag aborting a synchronous call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
	cancelled: Arc<AtomicBool>,
}

impl CancelToken {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Request cancellation. Idempotent.
	pub fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
	}

	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.cancelled.load(Ordering::SeqCst)
	}
}
