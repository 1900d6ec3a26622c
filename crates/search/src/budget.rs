use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Error;

/// How often remote searches may be sent, and what happens to the ones arriving too early
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateBudget {
	pub searches_per_second: f32,
	/// Queue requests arriving too early instead of keeping only the newest one
	pub accumulate_searches: bool,
}

impl Default for RateBudget {
	fn default() -> Self {
		Self {
			searches_per_second: Self::MAX_SEARCHES_PER_SECOND,
			accumulate_searches: false,
		}
	}
}

impl RateBudget {
	pub const MAX_SEARCHES_PER_SECOND: f32 = 2.0;

	pub fn new(searches_per_second: f32, accumulate_searches: bool) -> Result<Self, Error> {
		let budget = Self {
			searches_per_second,
			accumulate_searches,
		};

		budget.validate()?;

		Ok(budget)
	}

	/// Out of range rates are rejected, never clamped
	pub fn validate(&self) -> Result<(), Error> {
		let value = self.searches_per_second;

		if value.is_finite() && value > 0.0 && value <= Self::MAX_SEARCHES_PER_SECOND {
			Ok(())
		} else {
			Err(Error::RateConfigInvalid { value })
		}
	}

	/// Minimum time between two remote dispatches
	#[must_use]
	pub fn min_interval(&self) -> Duration {
		Duration::try_from_secs_f32(self.searches_per_second.recip()).unwrap_or(Duration::MAX)
	}
}
