//! The import capability set.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;

use crate::Result;
use crate::value::{Map, Value};

/// One segment of a key path, optionally called with arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct GetKey {
	/// Key name.
	pub key: String,
	/// Call arguments; `None` for attribute access, `Some(vec![])` for a call without arguments.
	pub args: Option<Vec<Value>>,
}

impl GetKey {
	/// Creates an attribute lookup.
	pub fn new(key: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			args: None,
		}
	}

	/// Creates a call with the given arguments.
	pub fn call(key: impl Into<String>, args: Vec<Value>) -> Self {
		Self {
			key: key.into(),
			args: Some(args),
		}
	}

	/// Returns true when the key is invoked as a function.
	#[must_use]
	pub const fn is_call(&self) -> bool {
		self.args.is_some()
	}
}

/// A single lookup handed to [`Import::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct GetReq {
	/// Identifier of the execution issuing the request.
	pub exec_id: String,
	/// Point in time by which the execution should finish.
	///
	/// Nothing enforces this deadline; imports that talk to slow backends
	/// should honor it themselves.
	pub exec_deadline: SystemTime,
	/// Key path to resolve, outermost first.
	pub keys: Vec<GetKey>,
	/// Correlation token to copy onto every [`GetResult`].
	pub key_id: String,
}

impl GetReq {
	/// Returns the key names without arguments.
	pub fn key_names(&self) -> Vec<String> {
		self.keys.iter().map(|k| k.key.clone()).collect()
	}
}

/// A resolved value returned from [`Import::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct GetResult {
	/// Correlation token of the originating request.
	pub key_id: String,
	/// Key path the value was resolved at.
	pub keys: Vec<String>,
	/// Resulting value.
	pub value: Value,
}

impl GetResult {
	/// Builds the result for `req` carrying `value`.
	pub fn for_request(req: &GetReq, value: Value) -> Self {
		Self {
			key_id: req.key_id.clone(),
			keys: req.key_names(),
			value,
		}
	}
}

/// A data import plugin instance.
///
/// `get` takes `&self` and may run concurrently for the same instance;
/// implementations guard their own mutable state.
#[async_trait]
pub trait Import: Send + Sync {
	/// Applies configuration. Called exactly once, before the instance is reachable.
	async fn configure(&mut self, config: Map) -> Result<()>;

	/// Resolves a batch of requests in one call.
	///
	/// Usually returns one result per request, but an import may return more
	/// (e.g. when expanding wildcards).
	async fn get(&self, reqs: Vec<GetReq>) -> Result<Vec<GetResult>>;

	/// Disposal capability, if the import holds resources that need releasing.
	fn closer(&self) -> Option<&dyn Closer> {
		None
	}
}

/// Optional disposal capability of an [`Import`].
#[async_trait]
pub trait Closer: Send + Sync {
	/// Releases resources. Called at most once, after the instance is unreachable.
	async fn close(&self) -> Result<()>;
}

/// Creates fresh, unconfigured import instances.
pub type ImportFactory = Arc<dyn Fn() -> Box<dyn Import> + Send + Sync>;
