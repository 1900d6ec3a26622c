use lens_collections::{Collection, CollectionKey, EventBus, Lifecycle, Store, Subset};
use lens_test_utils::{sample_bundle, MemoryEngine, MemorySource};

use std::{sync::Arc, time::Duration};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub struct Harness {
	pub source: Arc<MemorySource>,
	pub engine: Arc<MemoryEngine>,
	pub store: Store,
	pub lifecycle: Lifecycle,
}

impl Harness {
	pub fn new() -> Self {
		let source = MemorySource::new();
		let engine = MemoryEngine::new();

		let store = Store::new(source.clone(), EventBus::default(), TIMEOUT);
		let lifecycle = Lifecycle::new(store.clone(), engine.clone(), TIMEOUT);

		Self {
			source,
			engine,
			store,
			lifecycle,
		}
	}

	/// Publish a bundle under `token` and add it to the store
	pub async fn add(&self, token: &str, items: usize) -> Arc<Collection> {
		self.source.publish(sample_bundle(token, items));
		self.store
			.add_from_remote(token, Subset::Default)
			.await
			.unwrap()
	}
}

pub fn key(token: &str) -> CollectionKey {
	CollectionKey::new(token, Subset::Default)
}
