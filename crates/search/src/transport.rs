use lens_collections::{BoxedError, QueryImage};

use async_trait::async_trait;

use super::request::SearchMatch;

/// Sends a query image to the remote recognition service.
///
/// Retrying is up to the implementation, the scheduler only decides when requests are sent.
#[async_trait]
pub trait RemoteSearchTransport: Send + Sync + 'static {
	async fn submit(&self, image: &QueryImage) -> Result<Vec<SearchMatch>, BoxedError>;
}
