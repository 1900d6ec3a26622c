//! On-device image recognition against downloadable collections.
//!
//! [`Recognizer`] ties together the collection store, the engine lifecycle and the search scheduler,
//! built around three collaborators supplied by the host: a [`BundleSource`], a [`RecognitionEngine`]
//! and a [`RemoteSearchTransport`].

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

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

mod config;
mod error;
mod recognizer;

pub use config::{RecognizerConfig, Timeouts};
pub use error::Error;
pub use recognizer::Recognizer;

pub use lens_collections::{
	Bundle, BundleSource, Collection, CollectionEvent, CollectionId, CollectionKey, EngineHandle,
	Item, ItemId, LifecycleState, QueryImage, RankedMatch, RecognitionEngine, Subset, SyncReport,
};
pub use lens_operation::{OperationEvent, OperationHandle};
pub use lens_search::{
	RateBudget, RemoteSearch, RemoteSearchTransport, RequestId, SearchError, SearchHandle,
	SearchMatch, SearchMode, SearchRequest, SearchResults,
};

#[cfg(debug_assertions)]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::DEBUG;

#[cfg(not(debug_assertions))]
const CONSOLE_LOG_FILTER: LevelFilter = LevelFilter::INFO;

/// Install the global tracing subscriber for hosts that don't bring their own.
///
/// `RUST_LOG` takes precedence over `default_directive` (e.g. `"warn,lens_core=debug"`).
pub fn init_tracing(default_directive: &str) -> Result<(), Error> {
	let filter = match EnvFilter::try_from_default_env() {
		Ok(filter) => filter,
		Err(_) => EnvFilter::try_new(default_directive)?,
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(fmt::layer().with_filter(CONSOLE_LOG_FILTER))
		.try_init()?;

	Ok(())
}
