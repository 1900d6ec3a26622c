use std::{fmt, sync::Arc};

use async_trait::async_trait;

use super::{
	collection::{Collection, ItemId},
	error::BoxedError,
	ProgressFn,
};

/// Opaque reference to a collection ingested by a [`RecognitionEngine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineHandle(u64);

impl EngineHandle {
	#[must_use]
	pub const fn new(raw: u64) -> Self {
		Self(raw)
	}

	#[must_use]
	pub const fn raw(self) -> u64 {
		self.0
	}
}

impl fmt::Display for EngineHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "engine#{}", self.0)
	}
}

/// A camera frame or picture to be matched against a collection
#[derive(Debug, Clone)]
pub struct QueryImage {
	pub width: u32,
	pub height: u32,
	pub pixels: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedMatch {
	pub item_id: ItemId,
	pub score: f32,
}

/// The on-device image recognition engine.
///
/// The engine is opaque: it turns a collection into something searchable and answers queries against
/// it. Implementations must tolerate concurrent `search` calls on the same handle, but will never see a
/// `search` racing with an `evict` of that handle.
#[async_trait]
pub trait RecognitionEngine: Send + Sync + 'static {
	async fn ingest(
		&self,
		collection: &Collection,
		progress: ProgressFn<'_>,
	) -> Result<EngineHandle, BoxedError>;

	async fn evict(&self, handle: EngineHandle);

	/// Matches ordered from best to worst
	async fn search(
		&self,
		handle: EngineHandle,
		image: &QueryImage,
	) -> Result<Vec<RankedMatch>, BoxedError>;
}
