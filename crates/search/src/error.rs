use lens_collections::{CollectionId, SharedError};

use std::time::Duration;

use thiserror::Error;

use super::{budget::RateBudget, RequestId};

#[derive(Debug, Clone, Error)]
pub enum Error {
	#[error("no collection is active for local searches")]
	NoActiveCollection,
	#[error("collection <id='{0}'> was unloaded before the search could start")]
	CollectionUnloaded(CollectionId),
	#[error(
		"searches per second must be in (0, {}], got {value}",
		RateBudget::MAX_SEARCHES_PER_SECOND
	)]
	RateConfigInvalid { value: f32 },
	#[error("recognition engine failed to search")]
	Engine(#[source] SharedError),
	#[error("remote search transport failed")]
	Transport(#[source] SharedError),
	#[error("{operation} timed out after {after:?}")]
	Timeout {
		operation: &'static str,
		after: Duration,
	},
	/// A newer remote request took this one's place, never surfaced as a failure
	#[error("remote search superseded by a newer request")]
	Superseded,
	#[error("search scheduler was shut down")]
	ShutDown,
	#[error(transparent)]
	Interrupted(#[from] lens_operation::Error),
}

/// A failed search, tagged with the identifier the caller gave to the request
#[derive(Debug, Clone, Error)]
#[error("search request{} failed", .request_id.map(|id| format!(" {id}")).unwrap_or_default())]
pub struct SearchError {
	pub request_id: Option<RequestId>,
	#[source]
	pub source: Error,
}

impl SearchError {
	pub(crate) const fn new(request_id: Option<RequestId>, source: Error) -> Self {
		Self { request_id, source }
	}
}

impl From<lens_operation::Error> for SearchError {
	fn from(e: lens_operation::Error) -> Self {
		Self::new(None, e.into())
	}
}
