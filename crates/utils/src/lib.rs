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

pub mod error;

/// Clamps a progress value to the `[0, 100]` percentage range, mapping non finite values to `None`.
#[must_use]
pub fn clamp_percent(value: f32) -> Option<f32> {
	value.is_finite().then(|| value.clamp(0.0, 100.0))
}

/// Maps a `[0, 100]` percentage into the `[start, end]` sub range of a multi phase operation.
#[must_use]
pub fn scale_percent(value: f32, start: f32, end: f32) -> f32 {
	(end - start).mul_add(value.clamp(0.0, 100.0) / 100.0, start)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn clamps_and_rejects_non_finite() {
		assert_eq!(clamp_percent(-3.0), Some(0.0));
		assert_eq!(clamp_percent(42.5), Some(42.5));
		assert_eq!(clamp_percent(180.0), Some(100.0));
		assert_eq!(clamp_percent(f32::NAN), None);
		assert_eq!(clamp_percent(f32::INFINITY), None);
	}

	#[test]
	fn scales_into_phase() {
		assert!((scale_percent(0.0, 0.0, 50.0) - 0.0).abs() < f32::EPSILON);
		assert!((scale_percent(100.0, 0.0, 50.0) - 50.0).abs() < f32::EPSILON);
		assert!((scale_percent(50.0, 50.0, 100.0) - 75.0).abs() < f32::EPSILON);
		assert!((scale_percent(150.0, 50.0, 100.0) - 100.0).abs() < f32::EPSILON);
	}
}
