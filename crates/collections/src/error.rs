use lens_utils::error::FileIOError;

use std::{sync::Arc, time::Duration};

use thiserror::Error;

use super::{
	collection::{CollectionId, CollectionKey, ItemId},
	lifecycle::LifecycleState,
};

/// Error type returned by external collaborators
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Shareable form of [`BoxedError`], as outcomes fan out to every subscriber of an operation
pub type SharedError = Arc<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Error)]
pub enum Error {
	#[error("collection not found: <key='{0}'>")]
	CollectionNotFound(CollectionKey),
	#[error("collection not found: <id='{0}'>")]
	CollectionIdNotFound(CollectionId),
	#[error("item <id='{item_id}'> not found in collection <id='{collection_id}'>")]
	ItemNotFound {
		collection_id: CollectionId,
		item_id: ItemId,
	},
	#[error("token '{token}' does not belong to collection <id='{collection_id}'>")]
	TokenNotFound {
		collection_id: CollectionId,
		token: String,
	},
	#[error("can't {operation} collection <id='{collection_id}'> while it is {state}")]
	InvalidState {
		collection_id: CollectionId,
		state: LifecycleState,
		operation: &'static str,
	},
	#[error("failed to transfer bundle <{target}>")]
	TransferFailed {
		target: String,
		#[source]
		source: SharedError,
	},
	#[error("recognition engine failed to ingest collection <id='{collection_id}'>")]
	IngestionFailed {
		collection_id: CollectionId,
		#[source]
		source: SharedError,
	},
	#[error("{operation} timed out after {after:?}")]
	Timeout {
		operation: &'static str,
		after: Duration,
	},
	#[error(transparent)]
	FileIO(Arc<FileIOError>),
	#[error(transparent)]
	Interrupted(#[from] lens_operation::Error),
}

impl Error {
	/// Whether this error means an unknown token, uuid or item
	#[must_use]
	pub const fn is_not_found(&self) -> bool {
		matches!(
			self,
			Self::CollectionNotFound(_)
				| Self::CollectionIdNotFound(_)
				| Self::ItemNotFound { .. }
				| Self::TokenNotFound { .. }
		)
	}

	pub(crate) fn transfer(target: impl Into<String>, source: BoxedError) -> Self {
		Self::TransferFailed {
			target: target.into(),
			source: Arc::from(source),
		}
	}
}

impl From<FileIOError> for Error {
	fn from(e: FileIOError) -> Self {
		Self::FileIO(Arc::new(e))
	}
}
