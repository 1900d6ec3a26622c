use lens_search::{RateBudget, SearchTimeouts};
use lens_utils::error::{report_error, FileIOError};

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use super::error::Error;

/// Recognizer settings, stored on disk as JSON. Missing fields take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
	pub remote: RateBudget,
	pub timeouts: Timeouts,
	/// Buffer size of the collection event bus, slow subscribers lag past it
	pub events_capacity: usize,
}

impl Default for RecognizerConfig {
	fn default() -> Self {
		Self {
			remote: RateBudget::default(),
			timeouts: Timeouts::default(),
			events_capacity: 1024,
		}
	}
}

/// Bounds on every call into an external collaborator, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
	/// Bundle transfer, and each item resource download
	pub transfer_secs: u64,
	pub ingest_secs: u64,
	pub local_search_secs: u64,
	pub remote_search_secs: u64,
}

impl Default for Timeouts {
	fn default() -> Self {
		Self {
			transfer_secs: 120,
			ingest_secs: 120,
			local_search_secs: 10,
			remote_search_secs: 15,
		}
	}
}

impl Timeouts {
	#[must_use]
	pub const fn transfer(&self) -> Duration {
		Duration::from_secs(self.transfer_secs)
	}

	#[must_use]
	pub const fn ingest(&self) -> Duration {
		Duration::from_secs(self.ingest_secs)
	}

	#[must_use]
	pub const fn search(&self) -> SearchTimeouts {
		SearchTimeouts {
			local: Duration::from_secs(self.local_search_secs),
			remote: Duration::from_secs(self.remote_search_secs),
		}
	}
}

impl RecognizerConfig {
	/// Read the configuration at `path`.
	///
	/// A missing file yields the defaults, which are written back for the next run. The remote rate budget
	/// is validated like any runtime change to it.
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
		let path = path.as_ref();

		let config = match fs::read(path).await {
			Ok(bytes) => serde_json::from_slice::<Self>(&bytes).map_err(|source| Error::Config {
				path: path.into(),
				source,
			})?,

			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				warn!(path = %path.display(), "No configuration found, using defaults");

				let config = Self::default();
				report_error(&config.save(path).await);
				config
			}

			Err(e) => {
				return Err(FileIOError::from_std_io_err(path, e)
					.with_context("reading recognizer configuration")
					.into())
			}
		};

		config.remote.validate()?;

		info!(path = %path.display(), "Loaded recognizer configuration");

		Ok(config)
	}

	pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
		let path = path.as_ref();

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).await.map_err(|e| {
				FileIOError::from_std_io_err(parent, e)
					.with_context("creating configuration directory")
			})?;
		}

		let json = serde_json::to_vec_pretty(self).map_err(|source| Error::Config {
			path: path.into(),
			source,
		})?;

		fs::write(path, json).await.map_err(|e| {
			FileIOError::from_std_io_err(path, e).with_context("writing recognizer configuration")
		})?;

		Ok(())
	}
}
