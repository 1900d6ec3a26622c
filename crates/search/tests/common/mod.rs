#![allow(dead_code)]

use lens_collections::{Collection, EventBus, Lifecycle, Store, Subset};
use lens_search::{RateBudget, Scheduler, SearchTimeouts};
use lens_test_utils::{sample_bundle, MemoryEngine, MemorySource, MemoryTransport};

use std::{sync::Arc, time::Duration};

pub const TIMEOUTS: SearchTimeouts = SearchTimeouts {
	local: Duration::from_secs(10),
	remote: Duration::from_secs(15),
};

pub struct Harness {
	pub engine: Arc<MemoryEngine>,
	pub source: Arc<MemorySource>,
	pub transport: Arc<MemoryTransport>,
	pub lifecycle: Lifecycle,
	pub scheduler: Scheduler,
}

impl Harness {
	pub fn new(budget: RateBudget) -> Self {
		let source = MemorySource::new();
		let engine = MemoryEngine::new();
		let transport = MemoryTransport::new();

		let store = Store::new(source.clone(), EventBus::default(), Duration::from_secs(5));
		let lifecycle = Lifecycle::new(store, engine.clone(), Duration::from_secs(5));
		let scheduler = Scheduler::new(lifecycle.clone(), transport.clone(), budget, TIMEOUTS)
			.unwrap();

		Self {
			engine,
			source,
			transport,
			lifecycle,
			scheduler,
		}
	}

	/// Add a collection with `items` items and load it, activating it if asked to
	pub async fn loaded(&self, token: &str, items: usize, make_active: bool) -> Arc<Collection> {
		self.source.publish(sample_bundle(token, items));

		let collection = self
			.lifecycle
			.store()
			.add_from_remote(token, Subset::Default)
			.await
			.unwrap();

		self.lifecycle
			.load(collection.key(), make_active)
			.await
			.unwrap()
	}
}

pub fn millis(durations: Vec<Duration>) -> Vec<u128> {
	durations.into_iter().map(|d| d.as_millis()).collect()
}
