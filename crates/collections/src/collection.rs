use std::{
	collections::{BTreeMap, BTreeSet},
	fmt,
	sync::Arc,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::Error;

pub type CollectionId = Uuid;
pub type ItemId = Uuid;

const DEFAULT_SUBSET: &str = "default";

/// Tag naming a subset of a collection. A missing tag and the literal `"default"` tag are the same subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subset {
	#[default]
	Default,
	Tag(String),
}

impl Subset {
	#[must_use]
	pub fn from_tag(tag: Option<&str>) -> Self {
		match tag {
			None | Some(DEFAULT_SUBSET) => Self::Default,
			Some(tag) => Self::Tag(tag.to_string()),
		}
	}

	#[must_use]
	pub fn tag(&self) -> &str {
		match self {
			Self::Default => DEFAULT_SUBSET,
			Self::Tag(tag) => tag,
		}
	}
}

impl fmt::Display for Subset {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.tag())
	}
}

/// Identity of a collection on the device: the token it was added with plus the subset tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionKey {
	pub token: String,
	pub subset: Subset,
}

impl CollectionKey {
	pub fn new(token: impl Into<String>, subset: Subset) -> Self {
		Self {
			token: token.into(),
			subset,
		}
	}

	/// Device side id of this key. Subsets of one remote collection share `remote_id` but never an id.
	#[must_use]
	pub fn local_id(&self, remote_id: Uuid) -> CollectionId {
		Uuid::new_v5(&remote_id, self.to_string().as_bytes())
	}
}

impl fmt::Display for CollectionKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}#{}", self.token, self.subset)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
	pub id: ItemId,
	pub name: String,
	pub url: Option<String>,
	pub custom: Option<String>,
	/// Names of the extra resources attached to this item, downloaded alongside the bundle
	#[serde(default)]
	pub resources: Vec<String>,
}

/// An immutable snapshot of a collection.
///
/// Syncing never mutates a snapshot in place, it publishes a new one with a higher `revision`. Readers
/// holding an `Arc<Collection>` keep a consistent view for as long as they need it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
	pub(crate) id: CollectionId,
	pub(crate) remote_id: Uuid,
	pub(crate) key: CollectionKey,
	pub(crate) name: String,
	pub(crate) items: BTreeMap<ItemId, Item>,
	pub(crate) tokens: BTreeSet<String>,
	pub(crate) revision: u64,
	pub(crate) synced_at: DateTime<Utc>,
	#[serde(skip)]
	pub(crate) payload: Arc<[u8]>,
}

impl Collection {
	#[must_use]
	pub const fn id(&self) -> CollectionId {
		self.id
	}

	/// Id of the remote collection this one was fetched from, shared by all of its subsets
	#[must_use]
	pub const fn remote_id(&self) -> Uuid {
		self.remote_id
	}

	#[must_use]
	pub const fn key(&self) -> &CollectionKey {
		&self.key
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Uuids of every item in this collection
	#[must_use]
	pub fn list_items(&self) -> Vec<ItemId> {
		self.items.keys().copied().collect()
	}

	pub fn items(&self) -> impl Iterator<Item = &Item> + '_ {
		self.items.values()
	}

	#[must_use]
	pub fn item_count(&self) -> usize {
		self.items.len()
	}

	pub fn get_item(&self, item_id: ItemId) -> Result<&Item, Error> {
		self.items.get(&item_id).ok_or(Error::ItemNotFound {
			collection_id: self.id,
			item_id,
		})
	}

	#[must_use]
	pub fn contains_item(&self, item_id: ItemId) -> bool {
		self.items.contains_key(&item_id)
	}

	/// Every token this collection can be synced with
	#[must_use]
	pub const fn tokens(&self) -> &BTreeSet<String> {
		&self.tokens
	}

	/// Starts at 1 and grows by one on every sync
	#[must_use]
	pub const fn revision(&self) -> u64 {
		self.revision
	}

	#[must_use]
	pub const fn synced_at(&self) -> DateTime<Utc> {
		self.synced_at
	}

	/// Opaque bytes handed to the recognition engine on ingest
	#[must_use]
	pub fn payload(&self) -> &[u8] {
		&self.payload
	}

	pub(crate) fn accepts_token(&self, token: &str) -> bool {
		self.key.token == token || self.tokens.contains(token)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_and_default_tags_are_the_same_subset() {
		assert_eq!(Subset::from_tag(None), Subset::Default);
		assert_eq!(Subset::from_tag(Some("default")), Subset::Default);
		assert_eq!(
			Subset::from_tag(Some("spring")),
			Subset::Tag("spring".to_string())
		);

		assert_eq!(
			CollectionKey::new("tok", Subset::from_tag(None)).to_string(),
			"tok#default"
		);
	}

	#[test]
	fn items_are_looked_up_by_id() {
		let item = Item {
			id: Uuid::new_v4(),
			name: "poster".to_string(),
			url: None,
			custom: Some("{\"price\":3}".to_string()),
			resources: vec![],
		};

		let remote_id = Uuid::new_v4();
		let key = CollectionKey::new("tok", Subset::Default);
		let collection = Collection {
			id: key.local_id(remote_id),
			remote_id,
			key,
			name: "posters".to_string(),
			items: BTreeMap::from([(item.id, item.clone())]),
			tokens: BTreeSet::from(["tok-2".to_string()]),
			revision: 1,
			synced_at: Utc::now(),
			payload: Arc::from(Vec::new()),
		};

		assert_eq!(collection.list_items(), vec![item.id]);
		assert_eq!(collection.get_item(item.id).unwrap(), &item);
		assert!(collection.get_item(Uuid::new_v4()).unwrap_err().is_not_found());
		assert!(collection.accepts_token("tok"));
		assert!(collection.accepts_token("tok-2"));
		assert!(!collection.accepts_token("other"));
	}

	#[test]
	fn subsets_of_one_remote_collection_get_their_own_ids() {
		let remote_id = Uuid::new_v4();
		let default = CollectionKey::new("posters", Subset::Default);
		let spring = CollectionKey::new("posters", Subset::Tag("spring".to_string()));

		assert_ne!(default.local_id(remote_id), spring.local_id(remote_id));
		assert_eq!(default.local_id(remote_id), default.local_id(remote_id));
	}
}
