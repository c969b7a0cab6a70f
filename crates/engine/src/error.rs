//! Error types for engine operations.

use stratum_proto::PathError;
use thiserror::Error;

use crate::bus::TransportError;

/// Errors returned by engine entry points.
///
/// Layered reads never fail; these surface only from writes, subscriptions,
/// and changeset mutation.
#[derive(Debug, Error)]
pub enum EngineError {
	/// The input was not a well-formed path of the expected flavour.
	#[error("invalid path: {0}")]
	InvalidPath(#[from] PathError),

	/// A write targeted a key that is locked, or the profile has no
	/// writable source.
	#[error("cannot write to {0:?}: key is locked or profile is read-only")]
	NotWritable(String),

	/// A bus call or its reply was unusable.
	#[error("transport failure: {0}")]
	Transport(TransportError),

	/// Mutation was attempted on a sealed changeset.
	#[error("changeset is sealed")]
	Sealed,

	/// A synchronous operation was aborted by its cancellation token.
	#[error("operation cancelled")]
	Cancelled,
}

impl From<TransportError> for EngineError {
	fn from(err: TransportError) -> Self {
		match err {
			TransportError::Cancelled => EngineError::Cancelled,
			other => EngineError::Transport(other),
		}
	}
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
