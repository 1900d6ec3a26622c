use std::{
	fmt,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use lens_utils::clamp_percent;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::{error::Error, handle::OperationHandle, OperationEvent, OperationId};

struct Shared<T, E> {
	last_progress: Option<f32>,
	subscribers: Vec<mpsc::UnboundedSender<OperationEvent<T, E>>>,
	outcome: Option<Result<T, E>>,
}

fn lock<T, E>(shared: &Mutex<Shared<T, E>>) -> MutexGuard<'_, Shared<T, E>> {
	// No multi step updates happen under this lock, a poisoned guard is still consistent
	shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side of an operation.
///
/// There is exactly one reporter per operation and it is not [`Clone`], so only the code doing the work
/// can report progress. [`Reporter::finish`] consumes it, which makes the terminal outcome at most once by
/// construction; dropping it without finishing resolves all subscribers with [`Error::Abandoned`].
pub struct Reporter<T, E>
where
	T: Clone + Send + 'static,
	E: Clone + From<Error> + Send + 'static,
{
	id: OperationId,
	shared: Arc<Mutex<Shared<T, E>>>,
	finished: bool,
}

impl<T, E> fmt::Debug for Reporter<T, E>
where
	T: Clone + Send + 'static,
	E: Clone + From<Error> + Send + 'static,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Reporter")
			.field("id", &self.id)
			.field("finished", &self.finished)
			.finish_non_exhaustive()
	}
}

impl<T, E> Default for Reporter<T, E>
where
	T: Clone + Send + 'static,
	E: Clone + From<Error> + Send + 'static,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<T, E> Reporter<T, E>
where
	T: Clone + Send + 'static,
	E: Clone + From<Error> + Send + 'static,
{
	#[must_use]
	pub fn new() -> Self {
		Self::with_id(OperationId::new_v4())
	}

	#[must_use]
	pub fn with_id(id: OperationId) -> Self {
		Self {
			id,
			shared: Arc::new(Mutex::new(Shared {
				last_progress: None,
				subscribers: Vec::new(),
				outcome: None,
			})),
			finished: false,
		}
	}

	#[must_use]
	pub const fn id(&self) -> OperationId {
		self.id
	}

	/// A cloneable subscription point for this operation
	#[must_use]
	pub fn notifier(&self) -> Notifier<T, E> {
		Notifier {
			id: self.id,
			shared: Arc::clone(&self.shared),
		}
	}

	/// Shortcut for `self.notifier().subscribe()`
	#[must_use]
	pub fn subscribe(&self) -> OperationHandle<T, E> {
		self.notifier().subscribe()
	}

	/// Report a completion percentage.
	///
	/// Values are clamped to `[0, 100]`; non finite values and values lower than the last reported one
	/// are discarded so subscribers always observe a non decreasing sequence.
	pub fn progress(&self, value: f32) {
		let Some(value) = clamp_percent(value) else {
			trace!(operation_id = %self.id, "Discarding non finite progress value");
			return;
		};

		let mut shared = lock(&self.shared);

		if shared.last_progress.is_some_and(|last| value < last) {
			trace!(
				operation_id = %self.id,
				%value,
				"Discarding progress value lower than the last one reported"
			);
			return;
		}

		if shared.last_progress == Some(value) {
			return;
		}

		shared.last_progress = Some(value);
		shared
			.subscribers
			.retain(|tx| tx.send(OperationEvent::Progress(value)).is_ok());
	}

	/// Whether anyone is still listening to this operation
	#[must_use]
	pub fn has_subscribers(&self) -> bool {
		lock(&self.shared)
			.subscribers
			.iter()
			.any(|tx| !tx.is_closed())
	}

	/// Deliver the terminal outcome to every subscriber, consuming the reporter
	pub fn finish(mut self, result: Result<T, E>) {
		self.deliver(result);
	}

	fn deliver(&mut self, result: Result<T, E>) {
		self.finished = true;

		let mut shared = lock(&self.shared);

		for tx in shared.subscribers.drain(..) {
			if tx.send(OperationEvent::Done(result.clone())).is_err() {
				trace!(operation_id = %self.id, "Subscriber left before the outcome was delivered");
			}
		}

		shared.outcome = Some(result);
	}
}

impl<T, E> Drop for Reporter<T, E>
where
	T: Clone + Send + 'static,
	E: Clone + From<Error> + Send + 'static,
{
	fn drop(&mut self) {
		if !self.finished {
			warn!(operation_id = %self.id, "Operation reporter dropped without an outcome");
			self.deliver(Err(Error::Abandoned(self.id).into()));
		}
	}
}

/// Subscription point of an operation, cheap to clone and safe to keep after the operation finished.
pub struct Notifier<T, E> {
	id: OperationId,
	shared: Arc<Mutex<Shared<T, E>>>,
}

impl<T, E> Clone for Notifier<T, E> {
	fn clone(&self) -> Self {
		Self {
			id: self.id,
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<T, E> fmt::Debug for Notifier<T, E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Notifier")
			.field("id", &self.id)
			.finish_non_exhaustive()
	}
}

impl<T, E> Notifier<T, E>
where
	T: Clone + Send + 'static,
	E: Clone + From<Error> + Send + 'static,
{
	#[must_use]
	pub const fn id(&self) -> OperationId {
		self.id
	}

	/// Create a new handle for this operation.
	///
	/// A late subscriber first receives the latest progress value, and a subscriber arriving after the
	/// operation finished receives the cached outcome right away.
	#[must_use]
	pub fn subscribe(&self) -> OperationHandle<T, E> {
		let (tx, rx) = mpsc::unbounded_channel();

		let mut shared = lock(&self.shared);

		if let Some(outcome) = &shared.outcome {
			tx.send(OperationEvent::Done(outcome.clone())).ok();
		} else {
			if let Some(progress) = shared.last_progress {
				tx.send(OperationEvent::Progress(progress)).ok();
			}
			shared.subscribers.push(tx);
		}

		OperationHandle::new(self.id, rx)
	}

	#[must_use]
	pub fn is_finished(&self) -> bool {
		lock(&self.shared).outcome.is_some()
	}

	#[must_use]
	pub fn last_progress(&self) -> Option<f32> {
		lock(&self.shared).last_progress
	}
}
