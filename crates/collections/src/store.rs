use lens_operation::{OperationHandle, Reporter};
use lens_utils::{error::FileIOError, scale_percent};

use std::{
	collections::{BTreeMap, HashMap},
	path::Path,
	sync::{Arc, Mutex, RwLock},
	time::Duration,
};

use chrono::Utc;
use futures::{future::BoxFuture, stream, StreamExt};
use tokio::{
	fs, spawn,
	sync::{Mutex as AsyncMutex, OwnedMutexGuard},
	time::timeout,
};
use tracing::{debug, info, instrument, trace, warn, Instrument};

use super::{
	bundle::{Bundle, BundleSource},
	collection::{Collection, CollectionId, CollectionKey, Subset},
	error::Error,
	events::{CollectionEvent, EventBus},
	lifecycle::LifecycleState,
	lock, read, write, ProgressFn,
};

/// Upper bound of item resource downloads running at the same time for one add or sync
pub const MAX_CONCURRENT_RESOURCE_DOWNLOADS: usize = 4;

/// Share of the progress range covered by the bundle transfer, resource downloads cover the rest
pub(crate) const TRANSFER_SHARE: f32 = 50.0;

/// Outcome of a successful sync. Failed resource downloads don't fail the sync, they are counted here.
#[derive(Debug, Clone)]
pub struct SyncReport {
	pub collection: Arc<Collection>,
	pub item_downloads: usize,
	pub download_errors: usize,
}

#[derive(Debug)]
struct Entry {
	collection: Arc<Collection>,
	/// Kept up to date by the [`Lifecycle`](crate::Lifecycle), never `Loading`
	state: LifecycleState,
}

struct Inner {
	source: Arc<dyn BundleSource>,
	events: EventBus,
	transfer_timeout: Duration,
	entries: RwLock<BTreeMap<CollectionKey, Entry>>,
	op_locks: Mutex<HashMap<CollectionKey, Arc<AsyncMutex<()>>>>,
}

/// The collections present on the device.
///
/// Add, sync and delete of the same [`CollectionKey`] are serialised in arrival order; operations on
/// different keys run concurrently.
#[derive(Clone)]
pub struct Store {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for Store {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Store")
			.field("collections", &read(&self.inner.entries).len())
			.field("transfer_timeout", &self.inner.transfer_timeout)
			.finish_non_exhaustive()
	}
}

impl Store {
	pub fn new(
		source: Arc<dyn BundleSource>,
		events: EventBus,
		transfer_timeout: Duration,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				source,
				events,
				transfer_timeout,
				entries: RwLock::default(),
				op_locks: Mutex::default(),
			}),
		}
	}

	#[must_use]
	pub fn events(&self) -> &EventBus {
		&self.inner.events
	}

	/// Every collection on the device, ordered by key
	#[must_use]
	pub fn list(&self) -> Vec<Arc<Collection>> {
		read(&self.inner.entries)
			.values()
			.map(|entry| Arc::clone(&entry.collection))
			.collect()
	}

	pub fn get(&self, token: &str, subset: &Subset) -> Result<Arc<Collection>, Error> {
		self.get_by_key(&CollectionKey::new(token, subset.clone()))
	}

	pub fn get_by_key(&self, key: &CollectionKey) -> Result<Arc<Collection>, Error> {
		read(&self.inner.entries)
			.get(key)
			.map(|entry| Arc::clone(&entry.collection))
			.ok_or_else(|| Error::CollectionNotFound(key.clone()))
	}

	pub fn get_by_id(&self, id: CollectionId) -> Result<Arc<Collection>, Error> {
		read(&self.inner.entries)
			.values()
			.find(|entry| entry.collection.id() == id)
			.map(|entry| Arc::clone(&entry.collection))
			.ok_or(Error::CollectionIdNotFound(id))
	}

	/// Add the collection published under `token`, or sync it if it's already on the device.
	///
	/// Progress from 0 to 50 covers the bundle transfer and from 50 to 100 the local ingestion.
	#[instrument(skip_all, fields(token = %token.as_ref(), %subset))]
	pub fn add_from_remote(
		&self,
		token: impl AsRef<str>,
		subset: Subset,
	) -> OperationHandle<Arc<Collection>, Error> {
		let key = CollectionKey::new(token.as_ref(), subset);
		let store = self.clone();

		spawn_operation(move |progress| {
			Box::pin(async move {
				let _guard = store.lock_key(&key).await;
				store.add_or_sync_locked(&key, progress).await
			})
		})
	}

	/// Add the collection contained in a bundle file shipped with the application
	#[instrument(skip_all, fields(path = %path.as_ref().display()))]
	pub fn add_from_bundle(
		&self,
		path: impl AsRef<Path>,
	) -> OperationHandle<Arc<Collection>, Error> {
		let path = path.as_ref().to_path_buf();
		let store = self.clone();

		spawn_operation(move |progress| {
			Box::pin(async move { store.add_from_bundle_with(&path, progress).await })
		})
	}

	/// Sync a collection with its remote counterpart, optionally through one of its subset tokens
	#[instrument(skip_all, fields(%key))]
	pub fn sync(
		&self,
		key: &CollectionKey,
		token: Option<String>,
	) -> OperationHandle<SyncReport, Error> {
		let key = key.clone();
		let store = self.clone();

		spawn_operation(move |progress| {
			Box::pin(async move {
				let _guard = store.lock_key(&key).await;
				let current = store.get_by_key(&key)?;
				store.sync_locked(current, token.as_deref(), progress).await
			})
		})
	}

	/// Remove a collection from the device.
	///
	/// Fails with [`Error::InvalidState`] carrying the current state while the collection is loaded in the
	/// recognition engine, use
	/// [`Lifecycle::delete`](crate::Lifecycle::delete) to unload and delete in one go.
	#[instrument(skip_all, fields(%key), err)]
	pub async fn delete(&self, key: &CollectionKey) -> Result<CollectionId, Error> {
		let _guard = self.lock_key(key).await;
		self.delete_locked(key)
	}

	/// Serialises every operation touching `key`, waiters are served in arrival order
	pub(crate) async fn lock_key(&self, key: &CollectionKey) -> OwnedMutexGuard<()> {
		let key_lock = Arc::clone(lock(&self.inner.op_locks).entry(key.clone()).or_default());

		key_lock.lock_owned().await
	}

	pub(crate) fn set_state(&self, key: &CollectionKey, state: LifecycleState) {
		if let Some(entry) = write(&self.inner.entries).get_mut(key) {
			entry.state = state;
		}
	}

	pub(crate) async fn add_or_sync_locked(
		&self,
		key: &CollectionKey,
		progress: ProgressFn<'_>,
	) -> Result<Arc<Collection>, Error> {
		if let Ok(current) = self.get_by_key(key) {
			debug!("Collection already on the device, syncing it instead");
			return self
				.sync_locked(current, None, progress)
				.await
				.map(|report| report.collection);
		}

		let bundle = self.fetch(&key.token, &key.subset, progress).await?;

		let (collection, item_downloads, download_errors) =
			self.assemble(key.clone(), bundle, None, progress).await;

		info!(
			collection_id = %collection.id(),
			items = collection.item_count(),
			item_downloads,
			download_errors,
			"Collection added"
		);

		self.publish(collection, None)
	}

	pub(crate) async fn add_from_bundle_with(
		&self,
		path: &Path,
		progress: ProgressFn<'_>,
	) -> Result<Arc<Collection>, Error> {
		fs::metadata(path).await.map_err(|e| {
			FileIOError::from_std_io_err(path, e).with_context("Failed to read bundle metadata")
		})?;

		progress(0.0);

		let bundle = timeout(
			self.inner.transfer_timeout,
			self.inner.source.open(path, &|p| {
				progress(scale_percent(p, 0.0, TRANSFER_SHARE));
			}),
		)
		.await
		.map_err(|_| Error::Timeout {
			operation: "bundle open",
			after: self.inner.transfer_timeout,
		})?
		.map_err(|e| Error::transfer(path.display().to_string(), e))?;

		progress(TRANSFER_SHARE);

		let key = CollectionKey::new(bundle.token.clone(), Subset::Default);
		let _guard = self.lock_key(&key).await;
		let current = self.get_by_key(&key).ok();

		let (collection, item_downloads, download_errors) = self
			.assemble(key, bundle, current.as_deref(), progress)
			.await;

		info!(
			collection_id = %collection.id(),
			revision = collection.revision(),
			item_downloads,
			download_errors,
			"Collection added from bundle"
		);

		self.publish(
			collection,
			current.map(|_| (item_downloads, download_errors)),
		)
	}

	pub(crate) async fn sync_locked(
		&self,
		current: Arc<Collection>,
		token: Option<&str>,
		progress: ProgressFn<'_>,
	) -> Result<SyncReport, Error> {
		let token = match token {
			Some(token) if !current.accepts_token(token) => {
				return Err(Error::TokenNotFound {
					collection_id: current.id(),
					token: token.to_string(),
				});
			}
			Some(token) => token,
			None => current.key().token.as_str(),
		};

		let bundle = self.fetch(token, &current.key().subset, progress).await?;

		if bundle.collection_id != current.remote_id() {
			warn!(
				collection_id = %current.id(),
				remote_id = %current.remote_id(),
				bundle_collection_id = %bundle.collection_id,
				"Synced bundle carries a different collection id, keeping the one we have"
			);
		}

		let (collection, item_downloads, download_errors) = self
			.assemble(current.key().clone(), bundle, Some(&current), progress)
			.await;

		info!(
			collection_id = %collection.id(),
			revision = collection.revision(),
			item_downloads,
			download_errors,
			"Collection synced"
		);

		self.publish(Arc::clone(&collection), Some((item_downloads, download_errors)))?;

		Ok(SyncReport {
			collection,
			item_downloads,
			download_errors,
		})
	}

	pub(crate) fn delete_locked(&self, key: &CollectionKey) -> Result<CollectionId, Error> {
		let mut entries = write(&self.inner.entries);

		let Some(entry) = entries.get(key) else {
			return Err(Error::CollectionNotFound(key.clone()));
		};

		let id = entry.collection.id();

		if entry.state != LifecycleState::Cold {
			return Err(Error::InvalidState {
				collection_id: id,
				state: entry.state,
				operation: "delete",
			});
		}

		entries.remove(key);
		drop(entries);

		info!(collection_id = %id, "Collection deleted");

		self.inner.events.emit(CollectionEvent::Deleted {
			id,
			key: key.clone(),
		});

		Ok(id)
	}

	async fn fetch(
		&self,
		token: &str,
		subset: &Subset,
		progress: ProgressFn<'_>,
	) -> Result<Bundle, Error> {
		progress(0.0);

		let bundle = timeout(
			self.inner.transfer_timeout,
			self.inner.source.fetch(token, subset, &|p| {
				progress(scale_percent(p, 0.0, TRANSFER_SHARE));
			}),
		)
		.await
		.map_err(|_| Error::Timeout {
			operation: "bundle transfer",
			after: self.inner.transfer_timeout,
		})?
		.map_err(|e| Error::transfer(format!("{token}#{subset}"), e))?;

		progress(TRANSFER_SHARE);

		Ok(bundle)
	}

	/// Download item resources and build the new snapshot, returning it with the download counters
	#[allow(clippy::cast_precision_loss)]
	async fn assemble(
		&self,
		key: CollectionKey,
		bundle: Bundle,
		previous: Option<&Collection>,
		progress: ProgressFn<'_>,
	) -> (Arc<Collection>, usize, usize) {
		let item_downloads = bundle.items.len();
		let mut download_errors = 0;

		{
			let after = self.inner.transfer_timeout;

			let mut downloads = stream::iter(bundle.items.clone())
				.map(|item| {
					let source = Arc::clone(&self.inner.source);
					async move {
						let res = match timeout(after, source.download_resources(&item)).await {
							Ok(res) => res,
							Err(_) => Err(format!("timed out after {after:?}").into()),
						};
						(item, res)
					}
				})
				.buffer_unordered(MAX_CONCURRENT_RESOURCE_DOWNLOADS);

			let mut done = 0;
			while let Some((item, res)) = downloads.next().await {
				done += 1;

				if let Err(e) = res {
					download_errors += 1;
					warn!(item_id = %item.id, ?e, "Failed to download item resources");
				} else {
					trace!(item_id = %item.id, "Item resources downloaded");
				}

				progress(scale_percent(
					done as f32 * 100.0 / item_downloads as f32,
					TRANSFER_SHARE,
					100.0,
				));
			}
		}

		let Bundle {
			collection_id,
			name,
			tokens,
			items,
			payload,
			..
		} = bundle;

		let collection = Arc::new(Collection {
			id: previous.map_or_else(|| key.local_id(collection_id), Collection::id),
			remote_id: previous.map_or(collection_id, Collection::remote_id),
			key,
			name,
			items: items.into_iter().map(|item| (item.id, item)).collect(),
			tokens,
			revision: previous.map_or(1, |previous| previous.revision() + 1),
			synced_at: Utc::now(),
			payload,
		});

		progress(100.0);

		(collection, item_downloads, download_errors)
	}

	/// Swap the snapshot stored under the collection key. `sync_counters` is `Some` when replacing an
	/// existing collection.
	fn publish(
		&self,
		collection: Arc<Collection>,
		sync_counters: Option<(usize, usize)>,
	) -> Result<Arc<Collection>, Error> {
		{
			let mut entries = write(&self.inner.entries);

			match (entries.get_mut(collection.key()), sync_counters) {
				(Some(entry), Some(_)) => entry.collection = Arc::clone(&collection),
				(None, None) => {
					entries.insert(
						collection.key().clone(),
						Entry {
							collection: Arc::clone(&collection),
							state: LifecycleState::Cold,
						},
					);
				}
				// The key lock is held by our caller, so the entry can't appear or vanish under us
				(Some(_), None) | (None, Some(_)) => {
					return Err(Error::CollectionNotFound(collection.key().clone()));
				}
			}
		}

		self.inner.events.emit(match sync_counters {
			Some((item_downloads, download_errors)) => CollectionEvent::Synced {
				collection: Arc::clone(&collection),
				item_downloads,
				download_errors,
			},
			None => CollectionEvent::Added(Arc::clone(&collection)),
		});

		Ok(collection)
	}
}

/// Run `operation` in the background, reporting its progress and outcome through the returned handle
pub(crate) fn spawn_operation<T>(
	operation: impl for<'a> FnOnce(ProgressFn<'a>) -> BoxFuture<'a, Result<T, Error>> + Send + 'static,
) -> OperationHandle<T, Error>
where
	T: Clone + Send + 'static,
{
	let reporter = Reporter::<T, Error>::new();
	let handle = reporter.subscribe();

	spawn(
		async move {
			let res = operation(&|p| reporter.progress(p)).await;
			reporter.finish(res);
		}
		.in_current_span(),
	);

	handle
}
