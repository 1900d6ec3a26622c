//! In memory collaborators for the Lens test suites: a bundle source, a recognition engine and a remote
//! search transport, each with knobs to inject latency and failures.

mod engine;
mod source;
mod transport;

pub use engine::{MemoryEngine, MATCHES_PER_SEARCH};
pub use source::{sample_bundle, MemorySource};
pub use transport::MemoryTransport;

use lens_collections::QueryImage;

use std::sync::Arc;

/// A tiny grey frame, the in memory collaborators never look at the pixels
#[must_use]
pub fn query_image() -> QueryImage {
	QueryImage {
		width: 2,
		height: 2,
		pixels: Arc::from(vec![128; 4]),
	}
}
