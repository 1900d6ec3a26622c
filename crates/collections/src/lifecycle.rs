use lens_operation::{Notifier, OperationHandle, OperationId, Reporter};
use lens_utils::scale_percent;

use std::{
	collections::HashMap,
	fmt,
	path::Path,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex, RwLock,
	},
	time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
	spawn,
	sync::{watch, OwnedRwLockReadGuard, RwLock as AsyncRwLock},
	time::timeout,
};
use tracing::{debug, info, instrument, warn, Instrument};

use super::{
	collection::{Collection, CollectionId, CollectionKey, Subset},
	engine::{EngineHandle, RecognitionEngine},
	error::Error,
	events::CollectionEvent,
	lock, read,
	store::{spawn_operation, Store, SyncReport, TRANSFER_SHARE},
	write, ProgressFn,
};

/// Where the reload of a resident collection starts, once an add or sync brought in a new revision
const RELOAD_START: f32 = 90.0;

/// Fit store progress in front of a reload: the transfer keeps 0 to 50, downloads shrink to 50 to 90
fn before_reload(p: f32) -> f32 {
	if p <= TRANSFER_SHARE {
		p
	} else {
		scale_percent(
			(p - TRANSFER_SHARE) * 100.0 / (100.0 - TRANSFER_SHARE),
			TRANSFER_SHARE,
			RELOAD_START,
		)
	}
}

/// Where a collection stands with respect to the recognition engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
	/// On the device only
	Cold,
	Loading,
	/// Ingested by the engine
	Resident,
	/// Resident and target of local searches
	Active,
}

impl fmt::Display for LifecycleState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Cold => "cold",
			Self::Loading => "loading",
			Self::Resident => "resident",
			Self::Active => "active",
		})
	}
}

/// A collection snapshot ingested by the engine.
///
/// Searches hold a [`ResidentGuard`] for as long as they use the engine handle. Evicting the handle
/// first waits for every outstanding guard, and guards can't be acquired anymore afterwards.
pub struct Resident {
	collection: Arc<Collection>,
	handle: EngineHandle,
	gate: Arc<AsyncRwLock<()>>,
	evicted: AtomicBool,
}

impl fmt::Debug for Resident {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Resident")
			.field("collection_id", &self.collection.id())
			.field("revision", &self.collection.revision())
			.field("handle", &self.handle)
			.field("evicted", &self.evicted.load(Ordering::Acquire))
			.finish()
	}
}

impl Resident {
	fn new(collection: Arc<Collection>, handle: EngineHandle) -> Self {
		Self {
			collection,
			handle,
			gate: Arc::new(AsyncRwLock::new(())),
			evicted: AtomicBool::new(false),
		}
	}

	#[must_use]
	pub const fn collection(&self) -> &Arc<Collection> {
		&self.collection
	}

	#[must_use]
	pub const fn handle(&self) -> EngineHandle {
		self.handle
	}

	/// Keep the engine handle alive while the guard lives, `None` if it was already evicted
	pub async fn acquire(&self) -> Option<ResidentGuard> {
		let permit = Arc::clone(&self.gate).read_owned().await;

		(!self.evicted.load(Ordering::Acquire)).then(|| ResidentGuard {
			collection: Arc::clone(&self.collection),
			handle: self.handle,
			_permit: permit,
		})
	}

	async fn evict(&self, engine: &dyn RecognitionEngine) {
		let _drained = self.gate.write().await;
		self.evicted.store(true, Ordering::Release);
		engine.evict(self.handle).await;
	}
}

#[derive(Debug)]
pub struct ResidentGuard {
	collection: Arc<Collection>,
	handle: EngineHandle,
	_permit: OwnedRwLockReadGuard<()>,
}

impl ResidentGuard {
	#[must_use]
	pub const fn collection(&self) -> &Arc<Collection> {
		&self.collection
	}

	#[must_use]
	pub const fn handle(&self) -> EngineHandle {
		self.handle
	}
}

struct InFlightLoad {
	notifier: Notifier<Arc<Collection>, Error>,
	make_active: bool,
}

struct Inner {
	store: Store,
	engine: Arc<dyn RecognitionEngine>,
	ingest_timeout: Duration,
	resident: RwLock<HashMap<CollectionId, Arc<Resident>>>,
	active_tx: watch::Sender<Option<Arc<Resident>>>,
	loading: Mutex<HashMap<CollectionId, InFlightLoad>>,
}

/// Loads collections into the recognition engine and owns the active slot.
///
/// Every transition of a collection goes through the same per key lock as the [`Store`] operations, so a
/// sync queued behind a load waits for the load to finish.
#[derive(Clone)]
pub struct Lifecycle {
	inner: Arc<Inner>,
}

impl fmt::Debug for Lifecycle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Lifecycle")
			.field("resident", &read(&self.inner.resident).len())
			.field("active", &self.active().map(|active| active.collection.id()))
			.finish_non_exhaustive()
	}
}

impl Lifecycle {
	pub fn new(store: Store, engine: Arc<dyn RecognitionEngine>, ingest_timeout: Duration) -> Self {
		let (active_tx, _) = watch::channel(None);

		Self {
			inner: Arc::new(Inner {
				store,
				engine,
				ingest_timeout,
				resident: RwLock::default(),
				active_tx,
				loading: Mutex::default(),
			}),
		}
	}

	#[must_use]
	pub fn store(&self) -> &Store {
		&self.inner.store
	}

	#[must_use]
	pub fn engine(&self) -> &Arc<dyn RecognitionEngine> {
		&self.inner.engine
	}

	#[must_use]
	pub fn state(&self, id: CollectionId) -> LifecycleState {
		if lock(&self.inner.loading).contains_key(&id) {
			return LifecycleState::Loading;
		}

		if self
			.active()
			.is_some_and(|active| active.collection.id() == id)
		{
			LifecycleState::Active
		} else if read(&self.inner.resident).contains_key(&id) {
			LifecycleState::Resident
		} else {
			LifecycleState::Cold
		}
	}

	/// Snapshot of the active slot
	#[must_use]
	pub fn active(&self) -> Option<Arc<Resident>> {
		self.inner.active_tx.borrow().clone()
	}

	#[must_use]
	pub fn subscribe_active(&self) -> watch::Receiver<Option<Arc<Resident>>> {
		self.inner.active_tx.subscribe()
	}

	/// Every collection currently ingested by the engine
	#[must_use]
	pub fn resident(&self) -> Vec<Arc<Collection>> {
		read(&self.inner.resident)
			.values()
			.map(|resident| Arc::clone(&resident.collection))
			.collect()
	}

	/// Load a collection into the engine, activating it once loaded if `make_active` is set.
	///
	/// Concurrent loads of the same collection share one operation; the collection is activated if any
	/// of the callers asked for it.
	#[instrument(skip_all, fields(%key, make_active))]
	pub fn load(
		&self,
		key: &CollectionKey,
		make_active: bool,
	) -> OperationHandle<Arc<Collection>, Error> {
		match self.inner.store.get_by_key(key) {
			Ok(collection) => self.load_collection(&collection, make_active),
			Err(e) => OperationHandle::ready(Err(e)),
		}
	}

	#[instrument(skip(self))]
	pub fn load_by_id(
		&self,
		id: CollectionId,
		make_active: bool,
	) -> OperationHandle<Arc<Collection>, Error> {
		match self.inner.store.get_by_id(id) {
			Ok(collection) => self.load_collection(&collection, make_active),
			Err(e) => OperationHandle::ready(Err(e)),
		}
	}

	/// Move a resident collection into the active slot. The previously active collection stays resident.
	#[instrument(skip(self), err)]
	pub fn activate(&self, id: CollectionId) -> Result<(), Error> {
		let resident = read(&self.inner.resident);

		let Some(target) = resident.get(&id) else {
			return Err(match self.inner.store.get_by_id(id) {
				Ok(_) => Error::InvalidState {
					collection_id: id,
					state: if lock(&self.inner.loading).contains_key(&id) {
						LifecycleState::Loading
					} else {
						LifecycleState::Cold
					},
					operation: "activate",
				},
				Err(e) => e,
			});
		};

		let previous = self.inner.active_tx.send_replace(Some(Arc::clone(target)));

		let store = &self.inner.store;
		if let Some(previous) = previous
			.as_ref()
			.filter(|previous| previous.collection.id() != id)
		{
			if resident.contains_key(&previous.collection.id()) {
				store.set_state(previous.collection.key(), LifecycleState::Resident);
			}
		}
		store.set_state(target.collection.key(), LifecycleState::Active);
		drop(resident);

		let previous_id = previous.map(|previous| previous.collection.id());
		if previous_id != Some(id) {
			info!(collection_id = %id, ?previous_id, "Active collection changed");
			self.inner
				.store
				.events()
				.emit(CollectionEvent::ActiveChanged(Some(id)));
		}

		Ok(())
	}

	/// Evict a collection from the engine once the searches using it are done
	#[instrument(skip(self), err)]
	pub async fn unload(&self, id: CollectionId) -> Result<(), Error> {
		let key = self.inner.store.get_by_id(id)?.key().clone();
		let _guard = self.inner.store.lock_key(&key).await;

		self.unload_locked(id).await
	}

	pub async fn unload_all(&self) {
		let ids = read(&self.inner.resident).keys().copied().collect::<Vec<_>>();

		for id in ids {
			if let Err(e) = self.unload(id).await {
				warn!(collection_id = %id, ?e, "Failed to unload collection");
			}
		}
	}

	/// Add a collection, syncing and reloading it instead when it's already on the device
	#[instrument(skip_all, fields(token = %token.as_ref(), %subset))]
	pub fn add_from_remote(
		&self,
		token: impl AsRef<str>,
		subset: Subset,
	) -> OperationHandle<Arc<Collection>, Error> {
		let key = CollectionKey::new(token.as_ref(), subset);
		let lifecycle = self.clone();

		spawn_operation(move |progress| {
			Box::pin(async move {
				let _guard = lifecycle.inner.store.lock_key(&key).await;

				match lifecycle.inner.store.get_by_key(&key) {
					Ok(current) => lifecycle
						.sync_locked(current, None, progress)
						.await
						.map(|report| report.collection),
					Err(_) => lifecycle.inner.store.add_or_sync_locked(&key, progress).await,
				}
			})
		})
	}

	#[instrument(skip_all, fields(path = %path.as_ref().display()))]
	pub fn add_from_bundle(
		&self,
		path: impl AsRef<Path>,
	) -> OperationHandle<Arc<Collection>, Error> {
		let path = path.as_ref().to_path_buf();
		let lifecycle = self.clone();

		spawn_operation(move |progress| {
			Box::pin(async move {
				let added = lifecycle
					.inner
					.store
					.add_from_bundle_with(&path, &|p| progress(before_reload(p)))
					.await?;

				let _guard = lifecycle.inner.store.lock_key(added.key()).await;
				let current = lifecycle.inner.store.get_by_key(added.key())?;

				let resident = read(&lifecycle.inner.resident).contains_key(&current.id());
				if resident {
					lifecycle
						.load_locked(Arc::clone(&current), &|p| {
							progress(scale_percent(p, RELOAD_START, 100.0));
						})
						.await?;
				}

				progress(100.0);

				Ok(current)
			})
		})
	}

	/// Sync a collection and, when it's resident, swap in a freshly ingested handle. Searches already
	/// running keep the previous handle until they finish.
	#[instrument(skip_all, fields(%key))]
	pub fn sync(
		&self,
		key: &CollectionKey,
		token: Option<String>,
	) -> OperationHandle<SyncReport, Error> {
		let key = key.clone();
		let lifecycle = self.clone();

		spawn_operation(move |progress| {
			Box::pin(async move {
				let _guard = lifecycle.inner.store.lock_key(&key).await;
				let current = lifecycle.inner.store.get_by_key(&key)?;

				lifecycle
					.sync_locked(current, token.as_deref(), progress)
					.await
			})
		})
	}

	/// Unload the collection if needed, then delete it from the device
	#[instrument(skip_all, fields(%key), err)]
	pub async fn delete(&self, key: &CollectionKey) -> Result<CollectionId, Error> {
		let _guard = self.inner.store.lock_key(key).await;
		let collection = self.inner.store.get_by_key(key)?;

		let resident = read(&self.inner.resident).contains_key(&collection.id());
		if resident {
			debug!(collection_id = %collection.id(), "Unloading collection before deleting it");
			self.unload_locked(collection.id()).await?;
		}

		self.inner.store.delete_locked(key)
	}

	fn load_collection(
		&self,
		collection: &Collection,
		make_active: bool,
	) -> OperationHandle<Arc<Collection>, Error> {
		let id = collection.id();
		let mut loading = lock(&self.inner.loading);

		if let Some(in_flight) = loading.get_mut(&id) {
			debug!(collection_id = %id, "Joining the load already in flight");
			in_flight.make_active |= make_active;
			return in_flight.notifier.subscribe();
		}

		let reporter = Reporter::new();
		let handle = reporter.subscribe();

		loading.insert(
			id,
			InFlightLoad {
				notifier: reporter.notifier(),
				make_active,
			},
		);
		drop(loading);

		let lifecycle = self.clone();
		let key = collection.key().clone();

		spawn(
			async move {
				let operation_id = reporter.id();
				let res = lifecycle
					.run_load(&key, id, operation_id, &|p| reporter.progress(p))
					.await;
				// No-op when the load got far enough to hand over its slot itself
				lifecycle.take_in_flight(id, operation_id);
				reporter.finish(res);
			}
			.in_current_span(),
		);

		handle
	}

	async fn run_load(
		&self,
		key: &CollectionKey,
		id: CollectionId,
		operation_id: OperationId,
		progress: ProgressFn<'_>,
	) -> Result<Arc<Collection>, Error> {
		let _guard = self.inner.store.lock_key(key).await;

		let loaded = match self.inner.store.get_by_key(key) {
			Ok(collection) if collection.id() == id => self.load_locked(collection, progress).await,
			Ok(_) | Err(_) => Err(Error::CollectionIdNotFound(id)),
		};

		let make_active = self.take_in_flight(id, operation_id);
		let collection = loaded?;

		if make_active {
			self.activate(id)?;
		}

		Ok(collection)
	}

	/// Remove the in flight entry of this load, returning whether any caller asked for activation
	fn take_in_flight(&self, id: CollectionId, operation_id: OperationId) -> bool {
		let mut loading = lock(&self.inner.loading);

		match loading.get(&id) {
			Some(in_flight) if in_flight.notifier.id() == operation_id => {
				loading.remove(&id).is_some_and(|in_flight| in_flight.make_active)
			}
			_ => false,
		}
	}

	async fn sync_locked(
		&self,
		current: Arc<Collection>,
		token: Option<&str>,
		progress: ProgressFn<'_>,
	) -> Result<SyncReport, Error> {
		let was_resident = read(&self.inner.resident).contains_key(&current.id());

		if !was_resident {
			return self.inner.store.sync_locked(current, token, progress).await;
		}

		let report = self
			.inner
			.store
			.sync_locked(current, token, &|p| progress(before_reload(p)))
			.await?;

		self.load_locked(Arc::clone(&report.collection), &|p| {
			progress(scale_percent(p, RELOAD_START, 100.0));
		})
		.await?;

		progress(100.0);

		Ok(report)
	}

	/// Ingest `collection`, replacing the handle of an older resident revision if there is one.
	///
	/// Must be called with the collection key lock held.
	async fn load_locked(
		&self,
		collection: Arc<Collection>,
		progress: ProgressFn<'_>,
	) -> Result<Arc<Collection>, Error> {
		let id = collection.id();
		let previous = read(&self.inner.resident).get(&id).cloned();

		if let Some(previous) = &previous {
			if previous.collection.revision() == collection.revision() {
				debug!(collection_id = %id, "Collection already resident, skipping ingestion");
				progress(100.0);
				return Ok(collection);
			}
		}

		progress(0.0);

		let ingested = timeout(
			self.inner.ingest_timeout,
			self.inner.engine.ingest(&collection, progress),
		)
		.await;

		let handle = match ingested {
			Ok(Ok(handle)) => handle,
			Ok(Err(e)) => {
				return self
					.fail_load(
						id,
						previous.is_some(),
						Error::IngestionFailed {
							collection_id: id,
							source: Arc::from(e),
						},
					)
					.await;
			}
			Err(_) => {
				return self
					.fail_load(
						id,
						previous.is_some(),
						Error::Timeout {
							operation: "collection ingestion",
							after: self.inner.ingest_timeout,
						},
					)
					.await;
			}
		};

		let resident = Arc::new(Resident::new(Arc::clone(&collection), handle));

		let (replaced, active) = {
			let mut residents = write(&self.inner.resident);
			let replaced = residents.insert(id, Arc::clone(&resident));

			let active = self.inner.active_tx.send_if_modified(|active| match active {
				Some(current) if current.collection.id() == id => {
					*active = Some(Arc::clone(&resident));
					true
				}
				_ => false,
			});

			self.inner.store.set_state(
				collection.key(),
				if active {
					LifecycleState::Active
				} else {
					LifecycleState::Resident
				},
			);

			(replaced, active)
		};

		if let Some(replaced) = replaced {
			debug!(
				collection_id = %id,
				old_revision = replaced.collection.revision(),
				"Evicting previous revision once its searches are done"
			);
			replaced.evict(self.inner.engine.as_ref()).await;
		}

		info!(collection_id = %id, %handle, revision = collection.revision(), "Collection loaded");

		self.inner
			.store
			.events()
			.emit(CollectionEvent::Loaded { id, active });

		progress(100.0);

		Ok(collection)
	}

	async fn fail_load(
		&self,
		id: CollectionId,
		was_resident: bool,
		e: Error,
	) -> Result<Arc<Collection>, Error> {
		warn!(collection_id = %id, ?e, "Failed to load collection");

		if was_resident {
			// The resident revision no longer matches the one on the device
			if let Err(e) = self.unload_locked(id).await {
				warn!(collection_id = %id, ?e, "Failed to unload stale revision");
			}
		}

		Err(e)
	}

	/// Must be called with the collection key lock held
	async fn unload_locked(&self, id: CollectionId) -> Result<(), Error> {
		let (removed, was_active) = {
			let mut residents = write(&self.inner.resident);

			let Some(removed) = residents.remove(&id) else {
				return Err(Error::InvalidState {
					collection_id: id,
					state: LifecycleState::Cold,
					operation: "unload",
				});
			};

			let was_active = self.inner.active_tx.send_if_modified(|active| {
				if active
					.as_ref()
					.is_some_and(|active| active.collection.id() == id)
				{
					*active = None;
					true
				} else {
					false
				}
			});

			self.inner
				.store
				.set_state(removed.collection.key(), LifecycleState::Cold);

			(removed, was_active)
		};

		removed.evict(self.inner.engine.as_ref()).await;

		info!(collection_id = %id, was_active, "Collection unloaded");

		let events = self.inner.store.events();
		events.emit(CollectionEvent::Unloaded(id));
		if was_active {
			events.emit(CollectionEvent::ActiveChanged(None));
		}

		Ok(())
	}
}
