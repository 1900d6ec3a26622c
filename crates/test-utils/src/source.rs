use lens_collections::{BoxedError, Bundle, BundleSource, Item, ItemId, ProgressFn, Subset};

use std::{
	collections::{BTreeSet, HashMap, HashSet},
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;
use uuid::Uuid;

/// A bundle with `items` items, each one carrying a single resource.
///
/// The resulting collection can also be synced with the `"{token}-extra"` token.
#[must_use]
pub fn sample_bundle(token: &str, items: usize) -> Bundle {
	Bundle {
		collection_id: Uuid::new_v4(),
		token: token.to_string(),
		name: format!("{token} collection"),
		tokens: BTreeSet::from([format!("{token}-extra")]),
		items: (0..items)
			.map(|i| Item {
				id: Uuid::new_v4(),
				name: format!("item {i}"),
				url: Some(format!("https://items.example/{token}/{i}")),
				custom: None,
				resources: vec![format!("{i}.jpg")],
			})
			.collect(),
		payload: Arc::from(token.as_bytes()),
	}
}

/// In memory [`BundleSource`], publishing bundles by token and by path
#[derive(Debug, Default)]
pub struct MemorySource {
	published: Mutex<HashMap<String, Bundle>>,
	files: Mutex<HashMap<PathBuf, Bundle>>,
	failing_items: Mutex<HashSet<ItemId>>,
	transfer_delay: Mutex<Duration>,
	refuse_transfers: AtomicBool,
	fetches: AtomicUsize,
	resource_downloads: AtomicUsize,
}

impl MemorySource {
	#[must_use]
	pub fn new() -> Arc<Self> {
		Arc::default()
	}

	/// Make `bundle` available under its token and every extra token it declares
	pub fn publish(&self, bundle: Bundle) {
		let mut published = self.published.lock().unwrap();

		for token in &bundle.tokens {
			published.insert(token.clone(), bundle.clone());
		}
		published.insert(bundle.token.clone(), bundle);
	}

	pub fn register_file(&self, path: impl Into<PathBuf>, bundle: Bundle) {
		self.files.lock().unwrap().insert(path.into(), bundle);
	}

	/// Resource downloads of these items will fail
	pub fn fail_resources(&self, items: impl IntoIterator<Item = ItemId>) {
		self.failing_items.lock().unwrap().extend(items);
	}

	pub fn set_transfer_delay(&self, delay: Duration) {
		*self.transfer_delay.lock().unwrap() = delay;
	}

	pub fn refuse_transfers(&self, refuse: bool) {
		self.refuse_transfers.store(refuse, Ordering::SeqCst);
	}

	#[must_use]
	pub fn fetches(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}

	#[must_use]
	pub fn resource_downloads(&self) -> usize {
		self.resource_downloads.load(Ordering::SeqCst)
	}

	async fn transfer(&self, progress: ProgressFn<'_>) -> Result<(), BoxedError> {
		let delay = *self.transfer_delay.lock().unwrap();

		progress(0.0);
		sleep(delay / 2).await;
		progress(50.0);
		sleep(delay / 2).await;

		if self.refuse_transfers.load(Ordering::SeqCst) {
			return Err("transfer refused".into());
		}

		progress(100.0);

		Ok(())
	}
}

#[async_trait]
impl BundleSource for MemorySource {
	async fn fetch(
		&self,
		token: &str,
		_subset: &Subset,
		progress: ProgressFn<'_>,
	) -> Result<Bundle, BoxedError> {
		self.fetches.fetch_add(1, Ordering::SeqCst);

		self.transfer(progress).await?;

		self.published
			.lock()
			.unwrap()
			.get(token)
			.cloned()
			.ok_or_else(|| format!("nothing published under '{token}'").into())
	}

	async fn open(&self, path: &Path, progress: ProgressFn<'_>) -> Result<Bundle, BoxedError> {
		self.transfer(progress).await?;

		self.files
			.lock()
			.unwrap()
			.get(path)
			.cloned()
			.ok_or_else(|| format!("'{}' is not a bundle", path.display()).into())
	}

	async fn download_resources(&self, item: &Item) -> Result<(), BoxedError> {
		self.resource_downloads.fetch_add(1, Ordering::SeqCst);

		if self.failing_items.lock().unwrap().contains(&item.id) {
			return Err(format!("resources of '{}' are unavailable", item.name).into());
		}

		Ok(())
	}
}
