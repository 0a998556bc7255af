//! Error types for configuration store access.

use arbor_primitives::{Location, Pid};
use thiserror::Error;

/// Errors raised by a configuration store or the filter parser.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Reading or writing the backing store failed.
	///
	/// Transient: callers log and skip, a later event retries naturally.
	#[error("I/O error accessing configuration {target}: {error}")]
	Io {
		/// Pid or filter the operation was about.
		target: String,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A selection filter could not be parsed.
	#[error("invalid configuration filter {filter:?}: {reason}")]
	InvalidFilter { filter: String, reason: String },

	/// The configuration was deleted; deleted identities are terminal.
	#[error("configuration {0} has been deleted")]
	Deleted(Pid),

	/// The configuration does not exist.
	#[error("configuration {0} does not exist")]
	NotFound(Pid),

	/// The configuration is bound to a different owning unit.
	#[error("configuration {pid} is bound to {bound}, not {requested}")]
	BoundElsewhere {
		pid: Pid,
		bound: Location,
		requested: Location,
	},

	/// The store is not available (stopped or never attached).
	#[error("configuration store unavailable")]
	Unavailable,
}

impl ConfigError {
	pub fn io(target: impl Into<String>, error: std::io::Error) -> Self {
		Self::Io {
			target: target.into(),
			error,
		}
	}

	/// Transient failures are logged and skipped; everything else is a
	/// programmer error or a terminal state.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Io { .. } | Self::Unavailable)
	}
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
