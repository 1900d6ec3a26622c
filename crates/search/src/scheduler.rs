use lens_collections::{Lifecycle, QueryImage, RecognitionEngine, Resident};
use lens_operation::{OperationHandle, Reporter};

use std::{fmt, sync::Arc, time::Duration};

use async_channel as chan;
use tokio::{spawn, sync::watch, time::timeout};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn, Instrument};

use super::{
	budget::RateBudget,
	error::{Error, SearchError},
	remote::{Dispatcher, RemoteRequest},
	request::{
		LocalSearch, RemoteSearch, SearchHandle, SearchMatch, SearchMode, SearchRequest,
		SearchResults,
	},
	transport::RemoteSearchTransport,
	RequestId,
};

/// Bounds applied to every search
#[derive(Debug, Clone, Copy)]
pub struct SearchTimeouts {
	pub local: Duration,
	pub remote: Duration,
}

/// Admits search requests and dispatches them to the on-device engine or to the remote service.
///
/// Local searches run concurrently against the collection that was active when they were admitted.
/// Remote searches go through a single dispatcher task enforcing the [`RateBudget`]. Dropping the
/// scheduler stops the dispatcher.
pub struct Scheduler {
	lifecycle: Lifecycle,
	local_timeout: Duration,
	requests_tx: chan::Sender<RemoteRequest>,
	budget_tx: watch::Sender<RateBudget>,
	cancel_token: CancellationToken,
	_cancel_loop: DropGuard,
}

impl fmt::Debug for Scheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Scheduler")
			.field("budget", &*self.budget_tx.borrow())
			.field("local_timeout", &self.local_timeout)
			.field("shut_down", &self.cancel_token.is_cancelled())
			.finish_non_exhaustive()
	}
}

impl Scheduler {
	pub fn new(
		lifecycle: Lifecycle,
		transport: Arc<dyn RemoteSearchTransport>,
		budget: RateBudget,
		timeouts: SearchTimeouts,
	) -> Result<Self, Error> {
		budget.validate()?;

		let (requests_tx, requests_rx) = chan::unbounded();
		let (budget_tx, budget_rx) = watch::channel(budget);
		let cancel_token = CancellationToken::new();

		spawn(
			Dispatcher {
				transport,
				requests_rx,
				budget_rx,
				remote_timeout: timeouts.remote,
				cancel_token: cancel_token.child_token(),
			}
			.run()
			.in_current_span(),
		);

		Ok(Self {
			lifecycle,
			local_timeout: timeouts.local,
			requests_tx,
			budget_tx,
			cancel_token: cancel_token.clone(),
			_cancel_loop: cancel_token.drop_guard(),
		})
	}

	pub fn search(&self, request: SearchRequest) -> SearchHandle {
		match request.mode {
			SearchMode::Local => {
				SearchHandle::Local(self.search_local(request.image, request.request_id))
			}
			SearchMode::Remote => {
				SearchHandle::Remote(self.submit_remote(request.image, request.request_id))
			}
		}
	}

	/// Search the active collection.
	///
	/// The active collection is captured right away: swapping or unloading it afterwards doesn't affect
	/// this search, which keeps the engine handle alive until it completes.
	#[instrument(skip(self, image))]
	pub fn search_local(&self, image: QueryImage, request_id: Option<RequestId>) -> LocalSearch {
		if self.cancel_token.is_cancelled() {
			return OperationHandle::ready(Err(SearchError::new(request_id, Error::ShutDown)));
		}

		let Some(active) = self.lifecycle.active() else {
			return OperationHandle::ready(Err(SearchError::new(
				request_id,
				Error::NoActiveCollection,
			)));
		};

		let reporter = Reporter::new();
		let handle = reporter.subscribe();
		let engine = Arc::clone(self.lifecycle.engine());
		let local_timeout = self.local_timeout;

		spawn(
			async move {
				let res = search_resident(engine.as_ref(), &active, &image, local_timeout)
					.await
					.map(|matches| SearchResults {
						request_id,
						collection_id: Some(active.collection().id()),
						matches,
					})
					.map_err(|source| SearchError::new(request_id, source));

				reporter.finish(res);
			}
			.in_current_span(),
		);

		handle
	}

	/// Search through the remote service, under the current [`RateBudget`]
	pub fn search_remote(&self, image: QueryImage) -> RemoteSearch {
		self.submit_remote(image, None)
	}

	/// Validate and apply a new budget. An invalid one leaves the current budget in place.
	#[instrument(skip(self), err)]
	pub fn configure_remote(&self, budget: RateBudget) -> Result<(), Error> {
		budget.validate()?;

		let previous = self.budget_tx.send_replace(budget);
		info!(?previous, ?budget, "Remote search budget configured");

		Ok(())
	}

	pub fn set_max_searches_per_second(&self, searches_per_second: f32) -> Result<(), Error> {
		self.configure_remote(RateBudget {
			searches_per_second,
			..self.remote_budget()
		})
	}

	pub fn set_accumulate_searches(&self, accumulate_searches: bool) -> Result<(), Error> {
		self.configure_remote(RateBudget {
			accumulate_searches,
			..self.remote_budget()
		})
	}

	#[must_use]
	pub fn remote_budget(&self) -> RateBudget {
		*self.budget_tx.borrow()
	}

	/// Stop the remote dispatcher. Queued remote searches finish with [`Error::ShutDown`], so does any
	/// search submitted afterwards.
	pub fn shutdown(&self) {
		debug!("Shutting down search scheduler");
		self.cancel_token.cancel();
	}

	fn submit_remote(&self, image: QueryImage, request_id: Option<RequestId>) -> RemoteSearch {
		let reporter = Reporter::new();
		let handle = reporter.subscribe();

		let request = RemoteRequest {
			image,
			request_id,
			reporter,
		};

		if self.cancel_token.is_cancelled() {
			request.finish_with(Error::ShutDown);
		} else if let Err(e) = self.requests_tx.try_send(request) {
			e.into_inner().finish_with(Error::ShutDown);
		}

		RemoteSearch(handle)
	}
}

async fn search_resident(
	engine: &dyn RecognitionEngine,
	resident: &Resident,
	image: &QueryImage,
	local_timeout: Duration,
) -> Result<Vec<SearchMatch>, Error> {
	let guard = resident
		.acquire()
		.await
		.ok_or_else(|| Error::CollectionUnloaded(resident.collection().id()))?;

	let ranked = timeout(local_timeout, engine.search(guard.handle(), image))
		.await
		.map_err(|_| Error::Timeout {
			operation: "local search",
			after: local_timeout,
		})?
		.map_err(|e| Error::Engine(Arc::from(e)))?;

	let collection = guard.collection();

	Ok(ranked
		.into_iter()
		.filter_map(|ranked| match collection.get_item(ranked.item_id) {
			Ok(item) => Some(SearchMatch {
				item: item.clone(),
				score: ranked.score,
			}),
			Err(e) => {
				warn!(?e, "Engine matched an item unknown to the collection, skipping it");
				None
			}
		})
		.collect())
}
