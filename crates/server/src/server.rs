//! Instance lifecycle and batched get dispatch.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use indexmap::IndexMap;
use keyhost_proto::{InstanceId, WireGetRequest, WireGetResponse, WireKey, WireValue};
use keyhost_sdk::encoding::{value_to_wire, wire_to_config, wire_to_value};
use keyhost_sdk::{GetKey, GetReq, Import, ImportFactory};
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::registry::InstanceRegistry;

/// Hosts import instances created by one factory.
pub struct ImportServer {
	factory: ImportFactory,
	registry: InstanceRegistry,
}

impl std::fmt::Debug for ImportServer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ImportServer")
			.field("factory", &"<ImportFactory>")
			.field("registry", &self.registry)
			.finish()
	}
}

impl ImportServer {
	/// Creates a server with an empty registry.
	#[must_use]
	pub fn new(factory: ImportFactory) -> Self {
		Self {
			factory,
			registry: InstanceRegistry::new(),
		}
	}

	/// The live instance registry.
	#[must_use]
	pub fn registry(&self) -> &InstanceRegistry {
		&self.registry
	}

	/// Creates, configures, and registers a new instance.
	///
	/// The instance is registered only after its configuration succeeded.
	///
	/// # Errors
	///
	/// - [`ServerError::Conversion`] if `config` does not decode to a string-keyed map.
	/// - [`ServerError::Plugin`] if the import rejects the configuration.
	pub async fn configure(&self, config: &WireValue) -> Result<InstanceId> {
		let config = wire_to_config(config).map_err(|source| ServerError::Conversion {
			context: "config".to_string(),
			source,
		})?;

		let mut import = (self.factory)();
		import.configure(config).await.map_err(ServerError::Plugin)?;

		let id = self.registry.register(Arc::from(import));
		info!(instance_id = %id, live = self.registry.len(), "import configured");
		Ok(id)
	}

	/// Answers a batch of requests that may span many instances.
	///
	/// Requests are grouped by instance in order of first appearance. Every
	/// group is resolved before any import is called; each import then
	/// receives its whole group in one call. Results are flattened in group
	/// order.
	///
	/// # Errors
	///
	/// Fails the whole call, returning no results, when an argument does not
	/// decode, any addressed instance is unknown, an import fails its query,
	/// or a returned value does not encode.
	pub async fn get(&self, requests: Vec<WireGetRequest>) -> Result<Vec<WireGetResponse>> {
		if requests.is_empty() {
			return Ok(Vec::new());
		}
		let total = requests.len();

		let mut groups: IndexMap<InstanceId, Vec<GetReq>> = IndexMap::new();
		for (idx, req) in requests.into_iter().enumerate() {
			let instance_id = req.instance_id;
			groups.entry(instance_id).or_default().push(decode_request(idx, req)?);
		}

		let resolved = groups
			.into_iter()
			.map(|(id, reqs)| match self.registry.lookup(id) {
				Some(import) => Ok((id, import, reqs)),
				None => Err(ServerError::UnknownInstance(id)),
			})
			.collect::<Result<Vec<_>>>()?;
		debug!(requests = total, groups = resolved.len(), "get batch resolved");

		let mut responses = Vec::with_capacity(total);
		for (instance_id, import, reqs) in resolved {
			let results = import
				.get(reqs)
				.await
				.map_err(|source| ServerError::Query {
					instance: instance_id,
					source,
				})?;

			for result in results {
				let value = value_to_wire(&result.value).map_err(|source| ServerError::ResultConversion {
					instance: instance_id,
					key_id: result.key_id.clone(),
					source,
				})?;
				responses.push(WireGetResponse {
					instance_id,
					key_id: result.key_id,
					keys: result.keys,
					value,
				});
			}
		}

		Ok(responses)
	}

	/// Removes an instance and disposes it if it supports disposal.
	///
	/// Never fails: unknown or already closed ids are a no-op and disposal
	/// errors are only logged.
	pub async fn close(&self, id: InstanceId) {
		match self.registry.remove(id) {
			Some(import) => {
				dispose(id, import).await;
				info!(instance_id = %id, live = self.registry.len(), "import closed");
			}
			None => debug!(instance_id = %id, "close for unknown instance ignored"),
		}
	}

	/// Closes every live instance.
	pub async fn shutdown(&self) {
		let drained = self.registry.drain();
		info!(count = drained.len(), "closing all import instances");
		for (id, import) in drained {
			dispose(id, import).await;
		}
	}
}

async fn dispose(id: InstanceId, import: Arc<dyn Import>) {
	let Some(closer) = import.closer() else {
		return;
	};
	if let Err(e) = closer.close().await {
		warn!(instance_id = %id, error = %e, "import disposal failed");
	}
}

fn decode_request(idx: usize, req: WireGetRequest) -> Result<GetReq> {
	let exec_deadline = deadline_from_unix(req.exec_deadline);

	let keys = req
		.keys
		.into_iter()
		.enumerate()
		.map(|(key_idx, key)| decode_key(idx, key_idx, key))
		.collect::<Result<Vec<_>>>()?;

	Ok(GetReq {
		exec_id: req.exec_id,
		exec_deadline,
		keys,
		key_id: req.key_id,
	})
}

/// Unix seconds as a [`SystemTime`], saturating to a far-future instant
/// when `secs` is beyond what the platform clock represents.
fn deadline_from_unix(secs: u64) -> SystemTime {
	let mut secs = secs;
	loop {
		if let Some(deadline) = SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs)) {
			return deadline;
		}
		secs /= 2;
	}
}

fn decode_key(idx: usize, key_idx: usize, key: WireKey) -> Result<GetKey> {
	let args = match key.args {
		None => None,
		Some(args) => Some(
			args.iter()
				.enumerate()
				.map(|(arg_idx, arg)| {
					wire_to_value(arg).map_err(|source| ServerError::Conversion {
						context: format!("request {idx} key {key_idx} ({}) arg {arg_idx}", key.key),
						source,
					})
				})
				.collect::<Result<Vec<_>>>()?,
		),
	};
	Ok(GetKey { key: key.key, args })
}
