//!
//! # Collections
//!
//! Owns the collections resident on the device and their lifecycle inside the recognition engine.
//!
//! - [`Store`] adds collections from a remote service or from a local bundle, keeps them in sync and
//!   deletes them. Collections are immutable snapshots: a sync publishes a brand new [`Collection`], so a
//!   reader never observes a half written one.
//! - [`Lifecycle`] loads collections into the [`RecognitionEngine`], keeps track of which ones are resident
//!   and owns the single active slot used by local searches.
//!
//! Bundle transfer and the recognition engine itself are external collaborators, reached through the
//! [`BundleSource`] and [`RecognitionEngine`] traits.

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

mod bundle;
mod collection;
mod engine;
mod error;
mod events;
mod lifecycle;
mod store;

pub use bundle::{Bundle, BundleSource};
pub use collection::{Collection, CollectionId, CollectionKey, Item, ItemId, Subset};
pub use engine::{EngineHandle, QueryImage, RankedMatch, RecognitionEngine};
pub use error::{BoxedError, Error, SharedError};
pub use events::{CollectionEvent, EventBus};
pub use lifecycle::{Lifecycle, LifecycleState, Resident, ResidentGuard};
pub use store::{Store, SyncReport, MAX_CONCURRENT_RESOURCE_DOWNLOADS};

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Progress callback handed to external collaborators, receives completion percentages in `[0, 100]`
pub type ProgressFn<'a> = &'a (dyn Fn(f32) + Send + Sync);

// Critical sections below never leave their data half updated, a poisoned lock is still consistent
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
	lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
	lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
	lock.lock().unwrap_or_else(PoisonError::into_inner)
}
