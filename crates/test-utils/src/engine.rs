use lens_collections::{
	BoxedError, Collection, EngineHandle, ProgressFn, QueryImage, RankedMatch, RecognitionEngine,
};

use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::trace;

/// How many matches a search returns at most
pub const MATCHES_PER_SEARCH: usize = 3;

/// In memory [`RecognitionEngine`].
///
/// Searches "match" the first items of the ingested collection with decreasing scores. A search whose
/// handle gets evicted while it runs fails, so tests can catch any use after unload.
#[derive(Debug, Default)]
pub struct MemoryEngine {
	next_handle: AtomicU64,
	ingested: Mutex<HashMap<EngineHandle, Arc<Collection>>>,
	evicted: Mutex<Vec<EngineHandle>>,
	ingest_delay: Mutex<Duration>,
	search_delay: Mutex<Duration>,
	reject_ingest: AtomicBool,
	ingests: AtomicUsize,
	searches: AtomicUsize,
}

impl MemoryEngine {
	#[must_use]
	pub fn new() -> Arc<Self> {
		Arc::default()
	}

	pub fn set_ingest_delay(&self, delay: Duration) {
		*self.ingest_delay.lock().unwrap() = delay;
	}

	pub fn set_search_delay(&self, delay: Duration) {
		*self.search_delay.lock().unwrap() = delay;
	}

	pub fn reject_ingest(&self, reject: bool) {
		self.reject_ingest.store(reject, Ordering::SeqCst);
	}

	#[must_use]
	pub fn ingests(&self) -> usize {
		self.ingests.load(Ordering::SeqCst)
	}

	#[must_use]
	pub fn searches(&self) -> usize {
		self.searches.load(Ordering::SeqCst)
	}

	/// Handles ingested and not yet evicted
	#[must_use]
	pub fn live_handles(&self) -> usize {
		self.ingested.lock().unwrap().len()
	}

	#[must_use]
	pub fn evicted(&self) -> Vec<EngineHandle> {
		self.evicted.lock().unwrap().clone()
	}

	#[must_use]
	pub fn is_live(&self, handle: EngineHandle) -> bool {
		self.ingested.lock().unwrap().contains_key(&handle)
	}
}

#[async_trait]
impl RecognitionEngine for MemoryEngine {
	async fn ingest(
		&self,
		collection: &Collection,
		progress: ProgressFn<'_>,
	) -> Result<EngineHandle, BoxedError> {
		self.ingests.fetch_add(1, Ordering::SeqCst);

		let delay = *self.ingest_delay.lock().unwrap();
		for step in [0.0, 25.0, 50.0, 75.0] {
			progress(step);
			sleep(delay / 4).await;
		}

		if self.reject_ingest.load(Ordering::SeqCst) {
			return Err(format!("collection '{}' rejected", collection.name()).into());
		}

		let handle = EngineHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
		self.ingested
			.lock()
			.unwrap()
			.insert(handle, Arc::new(collection.clone()));

		progress(100.0);
		trace!(%handle, collection_id = %collection.id(), "Ingested");

		Ok(handle)
	}

	async fn evict(&self, handle: EngineHandle) {
		self.ingested.lock().unwrap().remove(&handle);
		self.evicted.lock().unwrap().push(handle);
	}

	#[allow(clippy::cast_precision_loss)]
	async fn search(
		&self,
		handle: EngineHandle,
		_image: &QueryImage,
	) -> Result<Vec<RankedMatch>, BoxedError> {
		self.searches.fetch_add(1, Ordering::SeqCst);

		let delay = *self.search_delay.lock().unwrap();
		sleep(delay).await;

		let collection = self
			.ingested
			.lock()
			.unwrap()
			.get(&handle)
			.cloned()
			.ok_or_else(|| format!("{handle} is not ingested"))?;

		Ok(collection
			.list_items()
			.into_iter()
			.take(MATCHES_PER_SEARCH)
			.enumerate()
			.map(|(rank, item_id)| RankedMatch {
				item_id,
				score: 1.0 - rank as f32 * 0.1,
			})
			.collect())
	}
}
