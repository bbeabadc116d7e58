//! Common test utilities and helpers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keyhost_proto::{InstanceId, WireGetRequest, WireKey, WireMapEntry, WireValue};
use keyhost_sdk::{Closer, Error, GetReq, GetResult, Import, ImportFactory, Map, Value};
use parking_lot::Mutex;

use crate::server::ImportServer;

/// Observations shared by every mock instance a factory creates.
#[derive(Debug, Default)]
pub struct Stats {
	pub created: AtomicUsize,
	pub closed: AtomicUsize,
	/// Batch sizes seen by `get`, tagged with the instance's configured name.
	pub batches: Mutex<Vec<(String, usize)>>,
}

impl Stats {
	pub fn get_calls(&self) -> usize {
		self.batches.lock().len()
	}

	pub fn closed(&self) -> usize {
		self.closed.load(Ordering::SeqCst)
	}
}

/// Configurable mock import.
///
/// Config keys: `name` (echoed in values), `reject` (fail configure),
/// `closable` (expose disposal), `close_fails` (disposal errors).
/// Key names: `boom` fails the query, `nan` returns NaN, `slow` sleeps,
/// `expand` yields two results.
pub struct MockImport {
	stats: Arc<Stats>,
	name: String,
	closable: bool,
	close_fails: bool,
}

#[async_trait]
impl Import for MockImport {
	async fn configure(&mut self, config: Map) -> keyhost_sdk::Result<()> {
		if config.get("reject").and_then(Value::as_bool) == Some(true) {
			return Err(Error::Config("rejected by mock".into()));
		}
		self.name = config.get("name").and_then(Value::as_str).unwrap_or("mock").to_string();
		self.closable = config.get("closable").and_then(Value::as_bool).unwrap_or(false);
		self.close_fails = config.get("close_fails").and_then(Value::as_bool).unwrap_or(false);
		Ok(())
	}

	async fn get(&self, reqs: Vec<GetReq>) -> keyhost_sdk::Result<Vec<GetResult>> {
		self.stats.batches.lock().push((self.name.clone(), reqs.len()));

		let mut results = Vec::with_capacity(reqs.len());
		for req in &reqs {
			let path = req.key_names().join(".");
			match path.as_str() {
				"boom" => return Err(Error::UnknownKey(path)),
				"nan" => results.push(GetResult::for_request(req, Value::Float(f64::NAN))),
				"slow" => {
					tokio::time::sleep(Duration::from_millis(200)).await;
					results.push(GetResult::for_request(req, Value::from("slow")));
				}
				"expand" => {
					for part in ["a", "b"] {
						results.push(GetResult {
							key_id: req.key_id.clone(),
							keys: vec![path.clone(), part.to_string()],
							value: Value::from(part),
						});
					}
				}
				_ => {
					let args = req
						.keys
						.iter()
						.filter_map(|k| k.args.as_ref())
						.map(Vec::len)
						.sum::<usize>();
					let value = if args > 0 {
						Value::from(format!("{}:{path}({args})", self.name))
					} else {
						Value::from(format!("{}:{path}", self.name))
					};
					results.push(GetResult::for_request(req, value));
				}
			}
		}
		Ok(results)
	}

	fn closer(&self) -> Option<&dyn Closer> {
		self.closable.then_some(self as &dyn Closer)
	}
}

#[async_trait]
impl Closer for MockImport {
	async fn close(&self) -> keyhost_sdk::Result<()> {
		self.stats.closed.fetch_add(1, Ordering::SeqCst);
		if self.close_fails {
			return Err(Error::other("backend already gone"));
		}
		Ok(())
	}
}

pub fn mock_factory(stats: Arc<Stats>) -> ImportFactory {
	Arc::new(move || {
		stats.created.fetch_add(1, Ordering::SeqCst);
		Box::new(MockImport {
			stats: stats.clone(),
			name: String::new(),
			closable: false,
			close_fails: false,
		}) as Box<dyn Import>
	})
}

pub fn test_server() -> (Arc<ImportServer>, Arc<Stats>) {
	let stats = Arc::new(Stats::default());
	(Arc::new(ImportServer::new(mock_factory(stats.clone()))), stats)
}

pub fn config(pairs: &[(&str, WireValue)]) -> WireValue {
	WireValue::Map(pairs.iter().map(|(k, v)| WireMapEntry::new(*k, v.clone())).collect())
}

pub fn named(name: &str) -> WireValue {
	config(&[("name", WireValue::String(name.into()))])
}

pub fn request(instance: u64, key_id: &str, keys: &[&str]) -> WireGetRequest {
	WireGetRequest {
		instance_id: InstanceId(instance),
		exec_id: "exec".into(),
		exec_deadline: 1_700_000_000,
		key_id: key_id.into(),
		keys: keys.iter().map(|k| WireKey::new(*k)).collect(),
	}
}
