//! Instance registry.
//!
//! Maps [`InstanceId`]s to live imports. Lookups share a read lock, inserts and
//! removals take the write lock, and the lock is only ever held for the map
//! operation itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use keyhost_proto::InstanceId;
use keyhost_sdk::Import;
use parking_lot::RwLock;

/// Live import instances keyed by id.
#[derive(Default)]
pub struct InstanceRegistry {
	instances: RwLock<HashMap<InstanceId, Arc<dyn Import>>>,
	/// Last allocated id; ids start at 1.
	next_id: AtomicU64,
}

impl std::fmt::Debug for InstanceRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("InstanceRegistry")
			.field("instances", &self.ids())
			.field("next_id", &self.next_id.load(Ordering::Acquire))
			.finish()
	}
}

impl InstanceRegistry {
	/// Creates an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores a configured instance under a freshly allocated id.
	pub fn register(&self, instance: Arc<dyn Import>) -> InstanceId {
		let id = InstanceId(self.next_id.fetch_add(1, Ordering::AcqRel).wrapping_add(1));
		self.instances.write().insert(id, instance);
		id
	}

	/// Returns the instance registered under `id`.
	pub fn lookup(&self, id: InstanceId) -> Option<Arc<dyn Import>> {
		self.instances.read().get(&id).cloned()
	}

	/// Removes and returns the instance registered under `id`.
	///
	/// Absent ids return `None`; the id stays retired either way.
	pub fn remove(&self, id: InstanceId) -> Option<Arc<dyn Import>> {
		self.instances.write().remove(&id)
	}

	/// Removes every instance, returning them in id order.
	pub fn drain(&self) -> Vec<(InstanceId, Arc<dyn Import>)> {
		let mut drained: Vec<_> = self.instances.write().drain().collect();
		drained.sort_by_key(|(id, _)| *id);
		drained
	}

	/// Number of live instances.
	pub fn len(&self) -> usize {
		self.instances.read().len()
	}

	/// Returns true when no instance is live.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Live ids, sorted.
	pub fn ids(&self) -> Vec<InstanceId> {
		let mut ids: Vec<_> = self.instances.read().keys().copied().collect();
		ids.sort_unstable();
		ids
	}
}

#[cfg(test)]
mod tests {
	use std::thread;

	use async_trait::async_trait;
	use keyhost_sdk::{GetReq, GetResult, Map};

	use super::*;

	struct Nop;

	#[async_trait]
	impl Import for Nop {
		async fn configure(&mut self, _config: Map) -> keyhost_sdk::Result<()> {
			Ok(())
		}

		async fn get(&self, _reqs: Vec<GetReq>) -> keyhost_sdk::Result<Vec<GetResult>> {
			Ok(Vec::new())
		}
	}

	#[test]
	fn ids_increase_and_are_not_reused() {
		let registry = InstanceRegistry::new();
		let a = registry.register(Arc::new(Nop));
		let b = registry.register(Arc::new(Nop));
		assert_eq!((a, b), (InstanceId(1), InstanceId(2)));

		assert!(registry.remove(a).is_some());
		let c = registry.register(Arc::new(Nop));
		assert_eq!(c, InstanceId(3));
		assert!(registry.lookup(a).is_none());
		assert_eq!(registry.ids(), vec![b, c]);
	}

	#[test]
	fn remove_absent_reports_not_found() {
		let registry = InstanceRegistry::new();
		let id = registry.register(Arc::new(Nop));
		assert!(registry.remove(id).is_some());
		assert!(registry.remove(id).is_none());
		assert!(registry.remove(InstanceId(99)).is_none());
		assert!(registry.is_empty());
	}

	#[test]
	fn drain_empties_in_id_order() {
		let registry = InstanceRegistry::new();
		for _ in 0..5 {
			registry.register(Arc::new(Nop));
		}
		let drained: Vec<_> = registry.drain().into_iter().map(|(id, _)| id.0).collect();
		assert_eq!(drained, vec![1, 2, 3, 4, 5]);
		assert_eq!(registry.len(), 0);
	}

	#[test]
	fn concurrent_registration_yields_unique_ids() {
		let registry = Arc::new(InstanceRegistry::new());
		let handles: Vec<_> = (0..8)
			.map(|_| {
				let registry = registry.clone();
				thread::spawn(move || {
					let ids: Vec<_> = (0..100).map(|_| registry.register(Arc::new(Nop))).collect();
					assert!(ids.windows(2).all(|w| w[0] < w[1]));
					ids
				})
			})
			.collect();

		let mut all: Vec<_> = handles
			.into_iter()
			.flat_map(|h| h.join().expect("registering thread panicked"))
			.collect();
		all.sort_unstable();
		all.dedup();
		assert_eq!(all.len(), 800);
		assert_eq!(registry.len(), 800);
		assert_eq!(all.last(), Some(&InstanceId(800)));
	}
}
