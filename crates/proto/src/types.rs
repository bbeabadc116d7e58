//! Wire types for the keyhost import protocol.
//!
//! Values crossing the boundary are carried as [`WireValue`]; the server
//! converts them to native values before they reach a plugin.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Identifier of a configured import instance.
///
/// Allocated by the server after a successful configure, strictly increasing
/// and never reused for the lifetime of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Transport-neutral encoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
	/// The absence of any value; has no native counterpart.
	Undefined,
	/// Explicit null.
	Null,
	/// Boolean.
	Bool(bool),
	/// Signed integer.
	Int(i64),
	/// Floating point number.
	Float(f64),
	/// UTF-8 string.
	String(String),
	/// Ordered list.
	List(Vec<WireValue>),
	/// Ordered key/value pairs; keys may be any value on the wire.
	Map(Vec<WireMapEntry>),
}

/// One key/value pair of a [`WireValue::Map`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMapEntry {
	/// Entry key.
	pub key: WireValue,
	/// Entry value.
	pub value: WireValue,
}

impl WireMapEntry {
	/// Creates an entry with a string key.
	pub fn new(key: impl Into<String>, value: WireValue) -> Self {
		Self {
			key: WireValue::String(key.into()),
			value,
		}
	}
}

/// A single key lookup inside a get request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireKey {
	/// Key name.
	pub key: String,
	/// Call arguments; `None` for a plain attribute lookup.
	pub args: Option<Vec<WireValue>>,
}

impl WireKey {
	/// Creates a key lookup without arguments.
	pub fn new(key: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			args: None,
		}
	}
}

/// One get request addressed to a single instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireGetRequest {
	/// Target instance.
	pub instance_id: InstanceId,
	/// Identifier of the policy execution issuing the request.
	pub exec_id: String,
	/// Execution deadline in unix seconds. Advisory only.
	pub exec_deadline: u64,
	/// Correlation token echoed on every result.
	pub key_id: String,
	/// Key path to resolve.
	pub keys: Vec<WireKey>,
}

/// One resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireGetResponse {
	/// Instance that produced the value.
	pub instance_id: InstanceId,
	/// Correlation token copied from the request.
	pub key_id: String,
	/// Resolved key path.
	pub keys: Vec<String>,
	/// Resulting value.
	pub value: WireValue,
}

/// Classification of frames transmitted over the IPC socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IpcFrame {
	/// A request initiated by the host.
	Request(Request),
	/// A response from the server.
	Response(Response),
}

/// A request from the host to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Unique request identifier for correlation.
	pub id: RequestId,
	/// The request payload.
	pub payload: RequestPayload,
}

impl Request {
	/// Wraps a payload in a new request.
	#[must_use]
	pub fn new(id: u64, payload: RequestPayload) -> Self {
		Self {
			id: RequestId(id),
			payload,
		}
	}
}

/// Request payload variants for import operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestPayload {
	/// Connectivity check.
	Ping,
	/// Create and configure a new import instance.
	Configure {
		/// Configuration; must decode to a string-keyed map.
		config: WireValue,
	},
	/// Batched lookup spanning any number of instances.
	Get {
		/// Requests in caller order.
		requests: Vec<WireGetRequest>,
	},
	/// Tear down an instance. Unknown ids are a no-op.
	Close {
		/// Instance to close.
		instance_id: InstanceId,
	},
}

/// A response from the server to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Corresponding request identifier.
	pub request_id: RequestId,
	/// The response payload; absent when the call failed.
	pub payload: Option<ResponsePayload>,
	/// Call-level failure, if any.
	pub error: Option<ErrorResponse>,
}

/// Response payload variants for import operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
	/// Reply to Ping.
	Pong,
	/// A new instance was configured and registered.
	Configured {
		/// Allocated identifier.
		instance_id: InstanceId,
	},
	/// Flattened results of a batched get.
	Got {
		/// One entry per resolved key request.
		responses: Vec<WireGetResponse>,
	},
	/// Close ran.
	Closed,
}

/// Failure category of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
	/// Unspecified internal server error.
	Internal,
	/// A value could not be converted across the boundary.
	InvalidValue,
	/// The plugin rejected its configuration.
	PluginConfig,
	/// A get addressed an instance that is not live.
	UnknownInstance,
	/// The plugin failed to answer a batched get.
	PluginQuery,
}

/// Call-level failure carried in a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Failure category.
	pub code: ErrorCode,
	/// Human readable description.
	pub message: String,
}

impl fmt::Display for ErrorResponse {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}: {}", self.code, self.message)
	}
}
