//!
//! # Search
//!
//! Dispatches image searches either to the on-device recognition engine, against the active collection
//! of a [`Lifecycle`](lens_collections::Lifecycle), or to a remote recognition service.
//!
//! ## Remote rate budget
//!
//! Remote searches are sent at most `searches_per_second` times per second. With
//! `accumulate_searches` set, early requests wait in arrival order and all of them are eventually sent.
//! Otherwise, which is the default:
//!
//! - a request arriving while another one is in flight is dropped;
//! - a request arriving before `1 / searches_per_second` has elapsed since the last dispatch is dropped;
//! - any other request is sent right away.
//!
//! Dropped requests are fire and forget: their [`RemoteSearch`] resolves to `None` and no error is
//! reported.

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

mod budget;
mod error;
mod remote;
mod request;
mod scheduler;
mod transport;

pub use budget::RateBudget;
pub use error::{Error, SearchError};
pub use request::{
	LocalSearch, RemoteSearch, SearchHandle, SearchMatch, SearchMode, SearchRequest,
	SearchResults,
};
pub use scheduler::{Scheduler, SearchTimeouts};
pub use transport::RemoteSearchTransport;

/// Caller supplied identifier echoed back with a search outcome
pub type RequestId = i64;
