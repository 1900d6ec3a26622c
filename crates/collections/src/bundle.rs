use std::{collections::BTreeSet, path::Path, sync::Arc};

use async_trait::async_trait;
use uuid::Uuid;

use super::{
	collection::{Item, Subset},
	error::BoxedError,
	ProgressFn,
};

/// A collection as delivered by a [`BundleSource`], before it gets a place in the [`Store`](crate::Store).
#[derive(Debug, Clone)]
pub struct Bundle {
	/// Id of the remote collection, the same for every subset of it
	pub collection_id: Uuid,
	/// Token the bundle was published under
	pub token: String,
	pub name: String,
	/// Additional tokens the resulting collection can be synced with
	pub tokens: BTreeSet<String>,
	pub items: Vec<Item>,
	pub payload: Arc<[u8]>,
}

/// Where bundles come from.
///
/// Implementations report transfer progress through the `progress` callback as percentages in
/// `[0, 100]`, the store rescales them into its own progress range.
#[async_trait]
pub trait BundleSource: Send + Sync + 'static {
	/// Download the bundle published under `token`, restricted to `subset`
	async fn fetch(
		&self,
		token: &str,
		subset: &Subset,
		progress: ProgressFn<'_>,
	) -> Result<Bundle, BoxedError>;

	/// Read a bundle shipped with the application
	async fn open(&self, path: &Path, progress: ProgressFn<'_>) -> Result<Bundle, BoxedError>;

	/// Download the extra resources attached to `item`
	async fn download_resources(&self, item: &Item) -> Result<(), BoxedError>;
}
