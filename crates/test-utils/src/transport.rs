use lens_collections::{BoxedError, Item, QueryImage};
use lens_search::{RemoteSearchTransport, SearchMatch};

use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

/// In memory [`RemoteSearchTransport`] recording when each request reached it
#[derive(Debug)]
pub struct MemoryTransport {
	epoch: Instant,
	latency: Mutex<Duration>,
	failing: AtomicBool,
	submissions: Mutex<Vec<Duration>>,
}

impl MemoryTransport {
	/// Submission times are measured from now
	#[must_use]
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			epoch: Instant::now(),
			latency: Mutex::default(),
			failing: AtomicBool::new(false),
			submissions: Mutex::default(),
		})
	}

	pub fn set_latency(&self, latency: Duration) {
		*self.latency.lock().unwrap() = latency;
	}

	pub fn fail(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	/// Elapsed time since creation at each submission, in order
	#[must_use]
	pub fn submissions(&self) -> Vec<Duration> {
		self.submissions.lock().unwrap().clone()
	}
}

#[async_trait]
impl RemoteSearchTransport for MemoryTransport {
	async fn submit(&self, image: &QueryImage) -> Result<Vec<SearchMatch>, BoxedError> {
		self.submissions
			.lock()
			.unwrap()
			.push(self.epoch.elapsed());

		let latency = *self.latency.lock().unwrap();
		sleep(latency).await;

		if self.failing.load(Ordering::SeqCst) {
			return Err("remote service unavailable".into());
		}

		Ok(vec![SearchMatch {
			item: Item {
				id: Uuid::new_v4(),
				name: format!("remote match for {}x{}", image.width, image.height),
				url: None,
				custom: None,
				resources: vec![],
			},
			score: 0.9,
		}])
	}
}
