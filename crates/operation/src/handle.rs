use std::{
	fmt,
	future::{poll_fn, Future},
	pin::Pin,
	task::{Context, Poll},
};

use futures::Stream;
use tokio::{spawn, sync::mpsc, task::JoinHandle};
use tracing::{trace, Instrument};

use super::{error::Error, OperationEvent, OperationId};

/// A handle to a running or finished operation.
///
/// Awaiting the handle skips progress events and resolves to the terminal outcome. To observe progress use
/// [`OperationHandle::next_event`] or turn it into a [`Stream`] with [`OperationHandle::into_events`].
pub struct OperationHandle<T, E> {
	id: OperationId,
	events_rx: mpsc::UnboundedReceiver<OperationEvent<T, E>>,
	delivered: bool,
}

impl<T, E> fmt::Debug for OperationHandle<T, E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OperationHandle")
			.field("id", &self.id)
			.field("delivered", &self.delivered)
			.finish_non_exhaustive()
	}
}

impl<T, E: From<Error>> OperationHandle<T, E> {
	pub(crate) fn new(
		id: OperationId,
		events_rx: mpsc::UnboundedReceiver<OperationEvent<T, E>>,
	) -> Self {
		Self {
			id,
			events_rx,
			delivered: false,
		}
	}

	/// An already finished operation, used when a request fails at admission time
	#[must_use]
	pub fn ready(result: Result<T, E>) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		tx.send(OperationEvent::Done(result)).ok();

		Self::new(OperationId::new_v4(), rx)
	}

	#[must_use]
	pub const fn id(&self) -> OperationId {
		self.id
	}

	fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<OperationEvent<T, E>>> {
		if self.delivered {
			return Poll::Ready(None);
		}

		match self.events_rx.poll_recv(cx) {
			Poll::Ready(Some(event)) => {
				self.delivered = event.is_terminal();
				Poll::Ready(Some(event))
			}
			Poll::Ready(None) => {
				// Reporters always send a terminal event before closing, so we only get here if the
				// channel was closed from our side
				self.delivered = true;
				Poll::Ready(Some(OperationEvent::Done(Err(
					Error::Abandoned(self.id).into()
				))))
			}
			Poll::Pending => Poll::Pending,
		}
	}

	/// Wait for the next event, returning `None` once the terminal event was already delivered
	pub async fn next_event(&mut self) -> Option<OperationEvent<T, E>> {
		poll_fn(|cx| self.poll_event(cx)).await
	}

	/// Stop receiving events from this operation.
	///
	/// This is advisory only: the work behind the operation keeps running and other subscribers still
	/// receive their events.
	pub fn unsubscribe(mut self) {
		trace!(operation_id = %self.id, "Unsubscribing from operation");
		self.events_rx.close();
	}

	#[must_use]
	pub fn into_events(self) -> OperationEvents<T, E> {
		OperationEvents(self)
	}
}

impl<T, E> OperationHandle<T, E>
where
	T: Send + 'static,
	E: From<Error> + Send + 'static,
{
	/// Bridge for hosts that prefer callbacks, `on_progress` is called for each progress event and
	/// `on_done` exactly once with the terminal outcome
	pub fn forward(
		mut self,
		mut on_progress: impl FnMut(f32) + Send + 'static,
		on_done: impl FnOnce(Result<T, E>) + Send + 'static,
	) -> JoinHandle<()> {
		spawn(
			async move {
				while let Some(event) = self.next_event().await {
					match event {
						OperationEvent::Progress(progress) => on_progress(progress),
						OperationEvent::Done(result) => {
							on_done(result);
							break;
						}
					}
				}
			}
			.in_current_span(),
		)
	}
}

impl<T, E: From<Error>> Future for OperationHandle<T, E> {
	type Output = Result<T, E>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();

		loop {
			match this.poll_event(cx) {
				Poll::Ready(Some(OperationEvent::Progress(_))) => {}
				Poll::Ready(Some(OperationEvent::Done(result))) => return Poll::Ready(result),
				Poll::Ready(None) => {
					return Poll::Ready(Err(Error::AlreadyDelivered(this.id).into()))
				}
				Poll::Pending => return Poll::Pending,
			}
		}
	}
}

/// Stream of every event of an operation, ending right after the terminal event.
pub struct OperationEvents<T, E>(OperationHandle<T, E>);

impl<T, E> fmt::Debug for OperationEvents<T, E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("OperationEvents").field(&self.0).finish()
	}
}

impl<T, E: From<Error>> Stream for OperationEvents<T, E> {
	type Item = OperationEvent<T, E>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.get_mut().0.poll_event(cx)
	}
}
