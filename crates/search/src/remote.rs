use lens_collections::QueryImage;
use lens_operation::Reporter;

use std::{collections::VecDeque, future::pending, sync::Arc, time::Duration};

use async_channel as chan;
use futures_concurrency::future::Race;
use tokio::{
	spawn,
	sync::watch,
	task::JoinHandle,
	time::{sleep_until, timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, Instrument};

use super::{
	budget::RateBudget,
	error::{Error, SearchError},
	request::SearchResults,
	transport::RemoteSearchTransport,
	RequestId,
};

pub(crate) struct RemoteRequest {
	pub(crate) image: QueryImage,
	pub(crate) request_id: Option<RequestId>,
	pub(crate) reporter: Reporter<SearchResults, SearchError>,
}

impl RemoteRequest {
	pub(crate) fn finish_with(self, source: Error) {
		self.reporter
			.finish(Err(SearchError::new(self.request_id, source)));
	}
}

/// The only owner of the dispatch timer: every admission, coalescing and dispatch decision happens on this
/// task, one message at a time.
pub(crate) struct Dispatcher {
	pub(crate) transport: Arc<dyn RemoteSearchTransport>,
	pub(crate) requests_rx: chan::Receiver<RemoteRequest>,
	pub(crate) budget_rx: watch::Receiver<RateBudget>,
	pub(crate) remote_timeout: Duration,
	pub(crate) cancel_token: CancellationToken,
}

enum RaceOutput {
	Request(RemoteRequest),
	Dispatched,
	SlotOpen,
	BudgetChanged,
	Stop,
}

impl Dispatcher {
	pub(crate) async fn run(self) {
		let Self {
			transport,
			requests_rx,
			mut budget_rx,
			remote_timeout,
			cancel_token,
		} = self;

		let mut budget = *budget_rx.borrow_and_update();
		let mut pending_requests = VecDeque::new();
		let mut in_flight: Option<JoinHandle<()>> = None;
		let mut last_dispatch: Option<Instant> = None;

		loop {
			let next_slot = next_slot(last_dispatch, budget);

			if in_flight.is_none() && next_slot.is_some_and(|slot| slot <= Instant::now()) {
				if let Some(request) = pending_requests.pop_front() {
					last_dispatch = Some(Instant::now());
					in_flight = Some(dispatch(
						Arc::clone(&transport),
						cancel_token.clone(),
						remote_timeout,
						request,
					));
					continue;
				}
			}

			// Only worth waking up for the next slot if something can be sent then
			let wake_at = next_slot.filter(|_| in_flight.is_none() && !pending_requests.is_empty());

			let output = (
				async {
					requests_rx
						.recv()
						.await
						.map_or(RaceOutput::Stop, RaceOutput::Request)
				},
				async {
					match in_flight.as_mut() {
						Some(handle) => {
							if let Err(e) = handle.await {
								error!(?e, "Remote search task failed");
							}
							RaceOutput::Dispatched
						}
						None => pending().await,
					}
				},
				async {
					match wake_at {
						Some(at) => {
							sleep_until(at).await;
							RaceOutput::SlotOpen
						}
						None => pending().await,
					}
				},
				async {
					budget_rx
						.changed()
						.await
						.map_or(RaceOutput::Stop, |()| RaceOutput::BudgetChanged)
				},
				async {
					cancel_token.cancelled().await;
					RaceOutput::Stop
				},
			)
				.race()
				.await;

			match output {
				RaceOutput::Request(request) => {
					let slot_open = self::next_slot(last_dispatch, budget)
						.is_some_and(|slot| slot <= Instant::now());

					admit(
						request,
						budget,
						in_flight.is_some(),
						slot_open,
						&mut pending_requests,
					);
				}

				RaceOutput::Dispatched => in_flight = None,

				RaceOutput::SlotOpen => {}

				RaceOutput::BudgetChanged => {
					budget = *budget_rx.borrow_and_update();
					debug!(?budget, "Remote search budget changed");

					if !budget.accumulate_searches {
						keep_newest(&mut pending_requests);
					}
				}

				RaceOutput::Stop => break,
			}
		}

		requests_rx.close();
		while let Ok(request) = requests_rx.try_recv() {
			pending_requests.push_back(request);
		}

		debug!(
			pending = pending_requests.len(),
			"Remote search dispatcher stopped"
		);

		for request in pending_requests {
			request.finish_with(Error::ShutDown);
		}
	}
}

/// `None` when the interval overflows the clock, nothing can be sent anymore then
fn next_slot(last_dispatch: Option<Instant>, budget: RateBudget) -> Option<Instant> {
	last_dispatch.map_or_else(
		|| Some(Instant::now()),
		|last| last.checked_add(budget.min_interval()),
	)
}

fn dispatch(
	transport: Arc<dyn RemoteSearchTransport>,
	cancel_token: CancellationToken,
	after: Duration,
	request: RemoteRequest,
) -> JoinHandle<()> {
	trace!(request_id = ?request.request_id, "Dispatching remote search");

	spawn(
		async move {
			let RemoteRequest {
				image,
				request_id,
				reporter,
			} = request;

			let submitted = (
				async { Some(timeout(after, transport.submit(&image)).await) },
				async {
					cancel_token.cancelled().await;
					None
				},
			)
				.race()
				.await;

			let res = match submitted {
				Some(Ok(Ok(matches))) => Ok(SearchResults {
					request_id,
					collection_id: None,
					matches,
				}),
				Some(Ok(Err(e))) => Err(Error::Transport(Arc::from(e))),
				Some(Err(_)) => Err(Error::Timeout {
					operation: "remote search",
					after,
				}),
				None => Err(Error::ShutDown),
			};

			reporter.finish(res.map_err(|source| SearchError::new(request_id, source)));
		}
		.in_current_span(),
	)
}

/// Admission policy for a request arriving at the dispatcher.
///
/// Accumulating budgets queue everything. Otherwise only a request arriving while idle with its slot open
/// is kept, and it is sent right away. Anything arriving in flight or before the slot is dropped.
fn admit(
	request: RemoteRequest,
	budget: RateBudget,
	busy: bool,
	slot_open: bool,
	pending_requests: &mut VecDeque<RemoteRequest>,
) {
	if budget.accumulate_searches {
		pending_requests.push_back(request);
	} else if busy {
		trace!(request_id = ?request.request_id, "Dropping remote search, another one is in flight");
		request.finish_with(Error::Superseded);
	} else if !slot_open {
		trace!(request_id = ?request.request_id, "Dropping remote search, its slot isn't open yet");
		request.finish_with(Error::Superseded);
	} else {
		// Left over from an accumulating budget at most, the new request wins
		pending_requests.push_back(request);
		keep_newest(pending_requests);
	}
}

fn keep_newest(pending_requests: &mut VecDeque<RemoteRequest>) {
	while pending_requests.len() > 1 {
		if let Some(superseded) = pending_requests.pop_front() {
			trace!(request_id = ?superseded.request_id, "Remote search superseded by a newer one");
			superseded.finish_with(Error::Superseded);
		}
	}
}
