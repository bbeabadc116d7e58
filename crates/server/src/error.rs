//! Call failure taxonomy.

use keyhost_proto::{ErrorCode, ErrorResponse, InstanceId};
use keyhost_sdk::encoding::ConversionError;
use thiserror::Error;

/// Reasons a configure or get call fails.
///
/// Any error means nothing in the call took effect beyond registrations that
/// had already completed.
#[derive(Debug, Error)]
pub enum ServerError {
	/// A configuration value or call argument could not be decoded.
	#[error("error converting {context}: {source}")]
	Conversion {
		/// Which value was being converted.
		context: String,
		/// Underlying conversion failure.
		source: ConversionError,
	},

	/// The import rejected its configuration.
	#[error(transparent)]
	Plugin(keyhost_sdk::Error),

	/// A get addressed an id with no live instance.
	#[error("unknown instance ID given: {0}")]
	UnknownInstance(InstanceId),

	/// The import failed to answer its batch.
	#[error("instance {instance}: {source}")]
	Query {
		/// Instance whose query failed.
		instance: InstanceId,
		/// Error reported by the import.
		source: keyhost_sdk::Error,
	},

	/// A value returned by an import could not be encoded.
	#[error("instance {instance}, key {key_id:?}: error converting result: {source}")]
	ResultConversion {
		/// Instance that produced the value.
		instance: InstanceId,
		/// Correlation token of the failing result.
		key_id: String,
		/// Underlying conversion failure.
		source: ConversionError,
	},
}

impl ServerError {
	/// Wire category of this failure.
	#[must_use]
	pub const fn code(&self) -> ErrorCode {
		match self {
			Self::Conversion { .. } | Self::ResultConversion { .. } => ErrorCode::InvalidValue,
			Self::Plugin(_) => ErrorCode::PluginConfig,
			Self::UnknownInstance(_) => ErrorCode::UnknownInstance,
			Self::Query { .. } => ErrorCode::PluginQuery,
		}
	}

	/// Builds the call-level error sent back to the host.
	#[must_use]
	pub fn to_response(&self) -> ErrorResponse {
		ErrorResponse {
			code: self.code(),
			message: self.to_string(),
		}
	}
}

impl From<ServerError> for ErrorResponse {
	fn from(err: ServerError) -> Self {
		err.to_response()
	}
}

/// Result type for server operations.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;
