//!
//! # Operations
//!
//! Long running work in Lens (adding, syncing and loading collections, searching) is modelled as a single
//! asynchronous operation that yields zero or more progress updates followed by exactly one terminal outcome.
//!
//! The producer side owns a [`Reporter`], which is the only thing able to push progress or to finish the
//! operation. Any number of consumers hold an [`OperationHandle`], obtained through a [`Notifier`], and can
//! either await it as a future or read its events one by one.
//!
//! Delivery guarantees:
//! - progress values are clamped to `[0, 100]` and delivered in non decreasing order;
//! - the terminal event is delivered after every progress event of the same operation;
//! - nothing is delivered after the terminal event;
//! - dropping a handle only stops deliveries to that handle, the work behind it keeps running;
//! - a reporter dropped without finishing resolves every handle with [`Error::Abandoned`].
//!
//! ## Basic example
//!
//! ```
//! use lens_operation::{OperationEvent, Reporter};
//!
//! #[derive(Debug, Clone, thiserror::Error)]
//! enum SampleError {
//!     #[error(transparent)]
//!     Operation(#[from] lens_operation::Error),
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let reporter = Reporter::<u32, SampleError>::new();
//!     let mut handle = reporter.subscribe();
//!
//!     tokio::spawn(async move {
//!         reporter.progress(50.0);
//!         reporter.finish(Ok(7));
//!     });
//!
//!     assert!(matches!(handle.next_event().await, Some(OperationEvent::Progress(p)) if p == 50.0));
//!     assert_eq!(handle.await.unwrap(), 7);
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod handle;
mod reporter;

pub use error::Error;
pub use handle::{OperationEvents, OperationHandle};
pub use reporter::{Notifier, Reporter};

use uuid::Uuid;

/// A unique identifier for an operation using the [`uuid`](https://docs.rs/uuid) crate.
pub type OperationId = Uuid;

/// Events delivered to an [`OperationHandle`].
#[derive(Debug, Clone)]
pub enum OperationEvent<T, E> {
	/// Completion percentage in `[0, 100]`, never lower than the previous one.
	Progress(f32),
	/// The terminal outcome, always the last event of an operation.
	Done(Result<T, E>),
}

impl<T, E> OperationEvent<T, E> {
	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		matches!(self, Self::Done(_))
	}
}
