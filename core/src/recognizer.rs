use lens_collections::{
	BundleSource, Collection, CollectionEvent, CollectionId, CollectionKey, EventBus, Lifecycle,
	LifecycleState, QueryImage, RecognitionEngine, Store, Subset, SyncReport,
};
use lens_operation::OperationHandle;
use lens_search::{
	LocalSearch, RateBudget, RemoteSearch, RemoteSearchTransport, RequestId, Scheduler,
	SearchHandle, SearchRequest,
};

use std::{fmt, path::Path, sync::Arc};

use tokio::sync::broadcast;
use tokio_stream::{
	wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
	Stream, StreamExt,
};
use tracing::{info, instrument, warn};

use super::{config::RecognizerConfig, error::Error};

/// Everything a host needs to manage collections and search them.
///
/// Instances are independent of each other: each one owns its store, lifecycle and scheduler. Must be
/// created from within a tokio runtime.
pub struct Recognizer {
	config: RecognizerConfig,
	lifecycle: Lifecycle,
	scheduler: Scheduler,
}

impl fmt::Debug for Recognizer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Recognizer")
			.field("config", &self.config())
			.field("store", self.lifecycle.store())
			.field("scheduler", &self.scheduler)
			.finish_non_exhaustive()
	}
}

impl Recognizer {
	pub fn new(
		config: RecognizerConfig,
		source: Arc<dyn BundleSource>,
		engine: Arc<dyn RecognitionEngine>,
		transport: Arc<dyn RemoteSearchTransport>,
	) -> Result<Self, Error> {
		let store = Store::new(
			source,
			EventBus::new(config.events_capacity),
			config.timeouts.transfer(),
		);
		let lifecycle = Lifecycle::new(store, engine, config.timeouts.ingest());
		let scheduler = Scheduler::new(
			lifecycle.clone(),
			transport,
			config.remote,
			config.timeouts.search(),
		)?;

		info!(?config, "Recognizer started");

		Ok(Self {
			config,
			lifecycle,
			scheduler,
		})
	}

	/// Current settings, including any change made to the remote budget since creation
	#[must_use]
	pub fn config(&self) -> RecognizerConfig {
		RecognizerConfig {
			remote: self.scheduler.remote_budget(),
			..self.config.clone()
		}
	}

	#[must_use]
	pub fn collections(&self) -> Vec<Arc<Collection>> {
		self.lifecycle.store().list()
	}

	pub fn collection(&self, token: &str, subset: &Subset) -> Result<Arc<Collection>, Error> {
		self.lifecycle
			.store()
			.get(token, subset)
			.map_err(Into::into)
	}

	pub fn collection_by_id(&self, id: CollectionId) -> Result<Arc<Collection>, Error> {
		self.lifecycle.store().get_by_id(id).map_err(Into::into)
	}

	#[must_use]
	pub fn state(&self, id: CollectionId) -> LifecycleState {
		self.lifecycle.state(id)
	}

	/// The collection local searches currently run against
	#[must_use]
	pub fn active(&self) -> Option<Arc<Collection>> {
		self.lifecycle
			.active()
			.map(|resident| Arc::clone(resident.collection()))
	}

	/// Download a collection, or sync it when it's already on the device
	pub fn add_collection(
		&self,
		token: impl AsRef<str>,
		subset: Subset,
	) -> OperationHandle<Arc<Collection>, lens_collections::Error> {
		self.lifecycle.add_from_remote(token, subset)
	}

	pub fn add_collection_from_bundle(
		&self,
		path: impl AsRef<Path>,
	) -> OperationHandle<Arc<Collection>, lens_collections::Error> {
		self.lifecycle.add_from_bundle(path)
	}

	/// Sync with `token` when given, which must be one of the collection's own tokens
	pub fn sync_collection(
		&self,
		key: &CollectionKey,
		token: Option<String>,
	) -> OperationHandle<SyncReport, lens_collections::Error> {
		self.lifecycle.sync(key, token)
	}

	/// Unload the collection if needed, then delete it
	pub async fn delete_collection(&self, key: &CollectionKey) -> Result<CollectionId, Error> {
		self.lifecycle.delete(key).await.map_err(Into::into)
	}

	/// Load a collection into the engine, making it the active one if `make_active` is set
	pub fn set_collection(
		&self,
		key: &CollectionKey,
		make_active: bool,
	) -> OperationHandle<Arc<Collection>, lens_collections::Error> {
		self.lifecycle.load(key, make_active)
	}

	pub fn activate(&self, id: CollectionId) -> Result<(), Error> {
		self.lifecycle.activate(id).map_err(Into::into)
	}

	pub async fn unload(&self, id: CollectionId) -> Result<(), Error> {
		self.lifecycle.unload(id).await.map_err(Into::into)
	}

	pub fn search(&self, request: SearchRequest) -> SearchHandle {
		self.scheduler.search(request)
	}

	pub fn search_local(&self, image: QueryImage, request_id: Option<RequestId>) -> LocalSearch {
		self.scheduler.search_local(image, request_id)
	}

	/// Resolves to `None` when the request was dropped to stay within the remote budget
	pub fn search_remote(&self, image: QueryImage) -> RemoteSearch {
		self.scheduler.search_remote(image)
	}

	pub fn configure_remote(&self, budget: RateBudget) -> Result<(), Error> {
		self.scheduler.configure_remote(budget).map_err(Into::into)
	}

	#[must_use]
	pub fn events(&self) -> broadcast::Receiver<CollectionEvent> {
		self.lifecycle.store().events().subscribe()
	}

	/// Same as [`Recognizer::events`], skipping over the events missed by a lagging consumer
	pub fn event_stream(&self) -> impl Stream<Item = CollectionEvent> + Send + Unpin + 'static {
		BroadcastStream::new(self.events()).filter_map(|res| match res {
			Ok(event) => Some(event),
			Err(BroadcastStreamRecvError::Lagged(missed)) => {
				warn!(missed, "Collection events consumer lagged behind");
				None
			}
		})
	}

	/// Stop remote dispatching and unload every collection, waiting for in-flight local searches
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.scheduler.shutdown();
		self.lifecycle.unload_all().await;

		info!("Recognizer shut down");
	}
}
