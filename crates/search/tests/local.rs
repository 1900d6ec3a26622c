use lens_collections::CollectionId;
use lens_search::{Error, RateBudget, SearchError, SearchRequest, SearchResults};
use lens_test_utils::{query_image, sample_bundle, MATCHES_PER_SEARCH};

use std::time::Duration;

use tokio::{spawn, time::sleep};
use tracing_test::traced_test;

mod common;

use common::Harness;

#[tokio::test]
#[traced_test]
async fn searching_without_an_active_collection_fails_right_away() {
	let harness = Harness::new(RateBudget::default());
	harness.loaded("posters", 2, false).await;

	let err = harness
		.scheduler
		.search_local(query_image(), Some(3))
		.await
		.unwrap_err();

	assert_eq!(err.request_id, Some(3));
	assert!(matches!(err.source, Error::NoActiveCollection));
	assert_eq!(harness.engine.searches(), 0);
}

#[tokio::test]
#[traced_test]
async fn matches_are_resolved_against_the_active_collection() {
	let harness = Harness::new(RateBudget::default());
	let collection = harness.loaded("menus", 5, true).await;

	let results = harness
		.scheduler
		.search(SearchRequest::local(query_image(), 42))
		.await
		.unwrap()
		.unwrap();

	assert_eq!(results.request_id, Some(42));
	assert_eq!(results.collection_id, Some(collection.id()));
	assert_eq!(results.matches.len(), MATCHES_PER_SEARCH);

	for pair in results.matches.windows(2) {
		assert!(pair[0].score >= pair[1].score);
	}
	for found in &results.matches {
		assert_eq!(collection.get_item(found.item.id).unwrap(), &found.item);
	}
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn searches_keep_the_collection_active_at_admission() {
	let harness = Harness::new(RateBudget::default());
	let a = harness.loaded("a", 3, true).await;
	let b = harness.loaded("b", 3, false).await;
	harness.engine.set_search_delay(Duration::from_millis(200));

	let before_swap = harness.scheduler.search_local(query_image(), Some(1));
	harness.lifecycle.activate(b.id()).unwrap();
	let after_swap = harness.scheduler.search_local(query_image(), Some(2));

	let collection_of = |res: Result<SearchResults, SearchError>| -> Option<CollectionId> {
		res.unwrap().collection_id
	};

	assert_eq!(collection_of(before_swap.await), Some(a.id()));
	assert_eq!(collection_of(after_swap.await), Some(b.id()));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn unload_waits_for_the_search_using_the_collection() {
	let harness = Harness::new(RateBudget::default());
	let collection = harness.loaded("catalog", 3, true).await;
	let handle = harness.lifecycle.active().unwrap().handle();
	harness.engine.set_search_delay(Duration::from_millis(500));

	let search = harness.scheduler.search_local(query_image(), None);
	// Let the search get hold of the engine handle
	sleep(Duration::from_millis(10)).await;

	let unloading = spawn({
		let lifecycle = harness.lifecycle.clone();
		async move { lifecycle.unload(collection.id()).await }
	});

	let results = search.await.unwrap();
	assert_eq!(results.matches.len(), MATCHES_PER_SEARCH);

	unloading.await.unwrap().unwrap();
	assert!(!harness.engine.is_live(handle));

	assert!(matches!(
		harness.scheduler.search_local(query_image(), None).await,
		Err(SearchError {
			source: Error::NoActiveCollection,
			..
		})
	));
}

#[tokio::test]
#[traced_test]
async fn a_search_admitted_before_an_unload_fails_cleanly() {
	let harness = Harness::new(RateBudget::default());
	let collection = harness.loaded("flyers", 2, true).await;

	// Admitted while active, but unloaded before it gets to run
	let search = harness.scheduler.search_local(query_image(), Some(9));
	harness.lifecycle.unload(collection.id()).await.unwrap();

	let err = search.await.unwrap_err();
	assert_eq!(err.request_id, Some(9));
	assert!(matches!(err.source, Error::CollectionUnloaded(id) if id == collection.id()));
	assert_eq!(harness.engine.searches(), 0);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn syncing_never_exposes_a_half_written_collection() {
	let harness = Harness::new(RateBudget::default());
	let collection = harness.loaded("wines", 2, true).await;
	harness.engine.set_search_delay(Duration::from_millis(300));

	let during_sync = harness.scheduler.search_local(query_image(), Some(1));
	sleep(Duration::from_millis(10)).await;

	let mut bundle = sample_bundle("wines", 4);
	bundle.collection_id = collection.remote_id();
	harness.source.publish(bundle);

	let sync = harness.lifecycle.sync(collection.key(), None);

	// Still answered by the old revision, with its own items
	let results = during_sync.await.unwrap();
	for found in &results.matches {
		assert!(collection.contains_item(found.item.id));
	}

	let report = sync.await.unwrap();
	assert_eq!(report.collection.revision(), 2);

	let results = harness
		.scheduler
		.search_local(query_image(), Some(2))
		.await
		.unwrap();
	for found in &results.matches {
		assert!(report.collection.contains_item(found.item.id));
	}
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn stalled_engine_searches_time_out() {
	let harness = Harness::new(RateBudget::default());
	harness.loaded("slow", 1, true).await;
	harness.engine.set_search_delay(Duration::from_secs(60));

	let err = harness
		.scheduler
		.search_local(query_image(), None)
		.await
		.unwrap_err();

	assert!(matches!(
		err.source,
		Error::Timeout { after, .. } if after == common::TIMEOUTS.local
	));
}
