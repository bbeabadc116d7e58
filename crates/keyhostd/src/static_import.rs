//! Built-in import answering lookups from data given in its configuration.
//!
//! ```text
//! { "mode": "static", "data": { "region": "eu", "limits": { "cpu": 4 } } }
//! ```
//!
//! Each key of a request descends one level into `data`; missing paths
//! resolve to null.

use async_trait::async_trait;
use keyhost_sdk::{Closer, Error, GetReq, GetResult, Import, Map, Result, Value};
use tracing::debug;

/// Import serving a fixed tree of values.
#[derive(Debug, Default)]
pub struct StaticImport {
	data: Map,
}

impl StaticImport {
	/// Creates an unconfigured instance.
	pub fn new() -> Self {
		Self::default()
	}

	fn resolve(&self, req: &GetReq) -> Result<Value> {
		if let Some(call) = req.keys.iter().find(|key| key.is_call()) {
			return Err(Error::InvalidArgument {
				key: call.key.clone(),
				message: "static data has no callable keys".into(),
			});
		}

		let mut keys = req.keys.iter();
		let Some(first) = keys.next() else {
			return Ok(Value::Map(self.data.clone()));
		};
		let mut current = self.data.get(&first.key);
		for key in keys {
			current = current.and_then(|value| value.get(&key.key));
		}
		Ok(current.cloned().unwrap_or_default())
	}
}

#[async_trait]
impl Import for StaticImport {
	async fn configure(&mut self, mut config: Map) -> Result<()> {
		match config.remove("mode") {
			Some(Value::String(mode)) if mode == "static" => {}
			Some(other) => {
				return Err(Error::Config(format!(
					"unsupported mode {}",
					other.as_str().map_or_else(|| other.kind().to_string(), |m| format!("{m:?}"))
				)));
			}
			None => return Err(Error::Config("mode is required".into())),
		}

		self.data = match config.remove("data") {
			Some(Value::Map(data)) => data,
			None | Some(Value::Null) => Map::new(),
			Some(other) => return Err(Error::Config(format!("data must be a map, found {}", other.kind()))),
		};

		if let Some(unknown) = config.keys().next() {
			return Err(Error::Config(format!("unknown field {unknown:?}")));
		}
		debug!(entries = self.data.len(), "static import configured");
		Ok(())
	}

	async fn get(&self, reqs: Vec<GetReq>) -> Result<Vec<GetResult>> {
		reqs.iter()
			.map(|req| Ok(GetResult::for_request(req, self.resolve(req)?)))
			.collect()
	}

	fn closer(&self) -> Option<&dyn Closer> {
		Some(self)
	}
}

#[async_trait]
impl Closer for StaticImport {
	async fn close(&self) -> Result<()> {
		debug!(entries = self.data.len(), "static import disposed");
		Ok(())
	}
}
