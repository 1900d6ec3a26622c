use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use super::collection::{Collection, CollectionId, CollectionKey};

const DEFAULT_CAPACITY: usize = 1024;

/// Changes to the set of collections on the device and to their lifecycle
#[derive(Debug, Clone)]
pub enum CollectionEvent {
	/// A collection finished being added and all its resources were downloaded
	Added(Arc<Collection>),

	/// A collection was replaced by a newer snapshot
	Synced {
		collection: Arc<Collection>,
		item_downloads: usize,
		download_errors: usize,
	},

	Deleted {
		id: CollectionId,
		key: CollectionKey,
	},

	/// A collection is now resident in the recognition engine
	Loaded { id: CollectionId, active: bool },

	Unloaded(CollectionId),

	/// The active slot changed, `None` means no collection is active anymore
	ActiveChanged(Option<CollectionId>),
}

/// Broadcast channel for [`CollectionEvent`]s. Slow subscribers lag and miss events, they never block
/// the emitter.
#[derive(Debug, Clone)]
pub struct EventBus {
	sender: broadcast::Sender<CollectionEvent>,
}

impl EventBus {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self { sender }
	}

	pub fn emit(&self, event: CollectionEvent) {
		if self.sender.send(event).is_err() {
			trace!("Collection event emitted without subscribers");
		}
	}

	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<CollectionEvent> {
		self.sender.subscribe()
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}
