//! Errors raised by imports.

use thiserror::Error;

/// Errors an import reports from configure, get, or close.
#[derive(Debug, Error)]
pub enum Error {
	/// The configuration was rejected.
	#[error("invalid configuration: {0}")]
	Config(String),

	/// A requested key does not exist.
	#[error("unknown key: {0}")]
	UnknownKey(String),

	/// A key was called with unusable arguments.
	#[error("invalid arguments for {key}: {message}")]
	InvalidArgument {
		/// The key being called.
		key: String,
		/// What was wrong with the arguments.
		message: String,
	},

	/// Any other failure, e.g. from a backend the import talks to.
	#[error(transparent)]
	Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
	/// Wraps an arbitrary error.
	pub fn other(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Self::Other(err.into())
	}
}

/// Result type for import operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
