use lens_collections::{CollectionId, Item, QueryImage};
use lens_operation::OperationHandle;

use std::{
	future::Future,
	pin::Pin,
	task::{Context, Poll},
};

use serde::{Deserialize, Serialize};

use super::{
	error::{Error, SearchError},
	RequestId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMode {
	/// Against the active collection, in the on-device engine
	Local,
	/// Through the remote search service, under the rate budget
	Remote,
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
	pub image: QueryImage,
	/// Echoed back with the outcome, uniqueness is up to the caller
	pub request_id: Option<RequestId>,
	pub mode: SearchMode,
}

impl SearchRequest {
	#[must_use]
	pub const fn local(image: QueryImage, request_id: RequestId) -> Self {
		Self {
			image,
			request_id: Some(request_id),
			mode: SearchMode::Local,
		}
	}

	#[must_use]
	pub const fn remote(image: QueryImage) -> Self {
		Self {
			image,
			request_id: None,
			mode: SearchMode::Remote,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
	pub item: Item,
	pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
	pub request_id: Option<RequestId>,
	/// Collection the local search ran against, `None` for remote searches
	pub collection_id: Option<CollectionId>,
	/// Best match first
	pub matches: Vec<SearchMatch>,
}

/// Outcome of a local search, always delivered
pub type LocalSearch = OperationHandle<SearchResults, SearchError>;

/// Outcome of a remote search.
///
/// Resolves to `None` when the request was dropped, either in favour of the one in flight or because it
/// arrived before its slot.
/// Dropped requests are fire and forget: they never show up as errors.
#[derive(Debug)]
pub struct RemoteSearch(pub(crate) OperationHandle<SearchResults, SearchError>);

impl RemoteSearch {
	/// Access to the underlying operation, where a superseded request finishes with
	/// [`Error::Superseded`]
	#[must_use]
	pub fn into_handle(self) -> OperationHandle<SearchResults, SearchError> {
		self.0
	}
}

impl Future for RemoteSearch {
	type Output = Option<Result<SearchResults, SearchError>>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.get_mut().0).poll(cx).map(|res| match res {
			Err(SearchError {
				source: Error::Superseded,
				..
			}) => None,
			res => Some(res),
		})
	}
}

#[derive(Debug)]
pub enum SearchHandle {
	Local(LocalSearch),
	Remote(RemoteSearch),
}

impl Future for SearchHandle {
	type Output = Option<Result<SearchResults, SearchError>>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match self.get_mut() {
			Self::Local(handle) => Pin::new(handle).poll(cx).map(Some),
			Self::Remote(handle) => Pin::new(handle).poll(cx),
		}
	}
}
