use lens_utils::error::FileIOError;

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Collections(#[from] lens_collections::Error),
	#[error(transparent)]
	Search(#[from] lens_search::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("invalid configuration file '{}': {source}", .path.display())]
	Config {
		path: Box<Path>,
		#[source]
		source: serde_json::Error,
	},
	#[error("invalid tracing directive: {0}")]
	TracingDirective(#[from] tracing_subscriber::filter::ParseError),
	#[error("failed to install the tracing subscriber: {0}")]
	TracingInit(#[from] tracing_subscriber::util::TryInitError),
}
