use std::{fmt::Display, path::Path};

use thiserror::Error;
use tracing::error;

/// Report an error with tracing
pub fn report_error(res: &Result<(), impl Display>) {
	if let Err(e) = res {
		error!("{e:#}");
	}
}

/// I/O failure on a filesystem path, keeping the path and an optional note on what was being done.
#[derive(Error, Debug)]
#[error(
	"file I/O error{}: {source}; path: '{}'",
	.maybe_context.as_ref().map(|ctx| format!(" ({ctx})")).unwrap_or_default(),
	.path.display()
)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: std::io::Error,
	pub maybe_context: Option<String>,
}

impl FileIOError {
	pub fn from_std_io_err(path: impl AsRef<Path>, source: std::io::Error) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}

	#[must_use]
	pub fn with_context(mut self, msg: impl Into<String>) -> Self {
		self.maybe_context = Some(msg.into());
		self
	}

	/// Whether the underlying error means the path does not exist
	#[must_use]
	pub fn is_not_found(&self) -> bool {
		self.source.kind() == std::io::ErrorKind::NotFound
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::io;

	use tracing_test::traced_test;

	#[test]
	fn display_includes_context_and_path() {
		let e = FileIOError::from_std_io_err(
			"/tmp/missing.bundle",
			io::Error::new(io::ErrorKind::NotFound, "gone"),
		)
		.with_context("opening collection bundle");

		let msg = e.to_string();
		assert!(msg.contains("(opening collection bundle)"));
		assert!(msg.contains("/tmp/missing.bundle"));
		assert!(e.is_not_found());
	}

	#[test]
	#[traced_test]
	fn report_error_logs_failures() {
		report_error(&Err::<(), _>("bundle vanished"));
		assert!(logs_contain("bundle vanished"));
	}
}
