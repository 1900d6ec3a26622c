use lens_core::{
	CollectionEvent, CollectionKey, LifecycleState, RateBudget, Recognizer, RecognizerConfig,
	SearchError, SearchRequest, Subset,
};
use lens_test_utils::{
	query_image, sample_bundle, MemoryEngine, MemorySource, MemoryTransport, MATCHES_PER_SEARCH,
};

use std::sync::Arc;

use futures_concurrency::future::Join;
use tempfile::NamedTempFile;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_stream::StreamExt;
use tracing_test::traced_test;

struct Fixture {
	source: Arc<MemorySource>,
	engine: Arc<MemoryEngine>,
	transport: Arc<MemoryTransport>,
	recognizer: Recognizer,
}

fn fixture(config: RecognizerConfig) -> Fixture {
	let source = MemorySource::new();
	let engine = MemoryEngine::new();
	let transport = MemoryTransport::new();

	let recognizer = Recognizer::new(
		config,
		source.clone(),
		engine.clone(),
		transport.clone(),
	)
	.unwrap();

	Fixture {
		source,
		engine,
		transport,
		recognizer,
	}
}

#[tokio::test]
#[traced_test]
async fn add_activate_and_search() {
	let Fixture {
		source, recognizer, ..
	} = fixture(RecognizerConfig::default());
	let mut events = recognizer.events();

	source.publish(sample_bundle("museum", 6));

	let collection = recognizer
		.add_collection("museum", Subset::Default)
		.await
		.unwrap();
	assert_eq!(collection.item_count(), 6);
	assert_eq!(recognizer.state(collection.id()), LifecycleState::Cold);

	let key = collection.key().clone();
	let (first, second) = (
		recognizer.set_collection(&key, false),
		recognizer.set_collection(&key, true),
	)
		.join()
		.await;
	assert_eq!(first.unwrap().id(), second.unwrap().id());

	assert_eq!(recognizer.state(collection.id()), LifecycleState::Active);
	assert_eq!(
		recognizer.active().map(|active| active.id()),
		Some(collection.id())
	);

	let results = recognizer
		.search(SearchRequest::local(query_image(), 1))
		.await
		.unwrap()
		.unwrap();
	assert_eq!(results.request_id, Some(1));
	assert_eq!(results.matches.len(), MATCHES_PER_SEARCH);

	assert!(matches!(events.try_recv(), Ok(CollectionEvent::Added(added)) if added.id() == collection.id()));
	assert!(matches!(
		events.try_recv(),
		Ok(CollectionEvent::Loaded { id, active: false }) if id == collection.id()
	));
	assert!(matches!(
		events.try_recv(),
		Ok(CollectionEvent::ActiveChanged(Some(id))) if id == collection.id()
	));
	assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
#[traced_test]
async fn adding_from_a_bundle_file() {
	let Fixture {
		source, recognizer, ..
	} = fixture(RecognizerConfig::default());

	let file = NamedTempFile::new().unwrap();
	source.register_file(file.path(), sample_bundle("offline", 2));

	let collection = recognizer
		.add_collection_from_bundle(file.path())
		.await
		.unwrap();

	assert_eq!(
		recognizer
			.collection("offline", &Subset::Default)
			.unwrap()
			.id(),
		collection.id()
	);
	assert_eq!(recognizer.collections().len(), 1);
}

#[tokio::test]
#[traced_test]
async fn deleting_the_active_collection_unloads_it_first() {
	let Fixture {
		source,
		engine,
		recognizer,
		..
	} = fixture(RecognizerConfig::default());

	source.publish(sample_bundle("zoo", 3));
	let collection = recognizer
		.add_collection("zoo", Subset::Default)
		.await
		.unwrap();
	recognizer
		.set_collection(collection.key(), true)
		.await
		.unwrap();
	assert_eq!(engine.live_handles(), 1);

	assert_eq!(
		recognizer
			.delete_collection(collection.key())
			.await
			.unwrap(),
		collection.id()
	);

	assert_eq!(engine.live_handles(), 0);
	assert!(recognizer.active().is_none());
	assert!(recognizer.collections().is_empty());
	assert!(matches!(
		recognizer.collection_by_id(collection.id()),
		Err(lens_core::Error::Collections(e)) if e.is_not_found()
	));
	assert!(matches!(
		recognizer.search_local(query_image(), None).await,
		Err(SearchError {
			source: lens_search::Error::NoActiveCollection,
			..
		})
	));
}

#[tokio::test]
#[traced_test]
async fn syncing_with_a_subset_token() {
	let Fixture {
		source, recognizer, ..
	} = fixture(RecognizerConfig::default());

	source.publish(sample_bundle("shop", 2));
	let collection = recognizer
		.add_collection("shop", Subset::Default)
		.await
		.unwrap();

	let report = recognizer
		.sync_collection(collection.key(), Some("shop-extra".to_string()))
		.await
		.unwrap();
	assert_eq!(report.collection.id(), collection.id());
	assert_eq!(report.collection.revision(), 2);
	assert_eq!(report.download_errors, 0);

	assert!(recognizer
		.sync_collection(collection.key(), Some("elsewhere".to_string()))
		.await
		.unwrap_err()
		.is_not_found());

	assert!(recognizer
		.sync_collection(&CollectionKey::new("unknown", Subset::Default), None)
		.await
		.unwrap_err()
		.is_not_found());
}

#[tokio::test]
#[traced_test]
async fn remote_budget_changes_show_up_in_the_config() {
	let Fixture { recognizer, .. } = fixture(RecognizerConfig::default());

	assert!(recognizer
		.configure_remote(RateBudget {
			searches_per_second: 0.0,
			accumulate_searches: true,
		})
		.is_err());
	assert_eq!(recognizer.config(), RecognizerConfig::default());

	let budget = RateBudget::new(1.5, true).unwrap();
	recognizer.configure_remote(budget).unwrap();
	assert_eq!(recognizer.config().remote, budget);
}

#[tokio::test]
async fn invalid_initial_budget_is_refused() {
	let config = RecognizerConfig {
		remote: RateBudget {
			searches_per_second: 2.5,
			accumulate_searches: false,
		},
		..Default::default()
	};

	assert!(matches!(
		Recognizer::new(
			config,
			MemorySource::new(),
			MemoryEngine::new(),
			MemoryTransport::new(),
		),
		Err(lens_core::Error::Search(
			lens_search::Error::RateConfigInvalid { .. }
		))
	));
}

#[tokio::test]
#[traced_test]
async fn instances_do_not_share_state() {
	let one = fixture(RecognizerConfig::default());
	let two = fixture(RecognizerConfig::default());

	one.source.publish(sample_bundle("left", 1));
	let collection = one
		.recognizer
		.add_collection("left", Subset::Default)
		.await
		.unwrap();
	one.recognizer
		.set_collection(collection.key(), true)
		.await
		.unwrap();

	assert!(two.recognizer.collections().is_empty());
	assert!(two.recognizer.active().is_none());
	assert_eq!(two.engine.ingests(), 0);
}

#[tokio::test]
#[traced_test]
async fn shutdown_unloads_everything_and_stops_remote_searches() {
	let Fixture {
		source,
		engine,
		transport,
		recognizer,
	} = fixture(RecognizerConfig::default());

	for token in ["north", "south"] {
		source.publish(sample_bundle(token, 2));
		let collection = recognizer
			.add_collection(token, Subset::Default)
			.await
			.unwrap();
		recognizer
			.set_collection(collection.key(), true)
			.await
			.unwrap();
	}
	assert_eq!(engine.live_handles(), 2);

	recognizer.shutdown().await;

	assert_eq!(engine.live_handles(), 0);
	assert!(recognizer.active().is_none());
	assert!(matches!(
		recognizer.search_remote(query_image()).await,
		Some(Err(SearchError {
			source: lens_search::Error::ShutDown,
			..
		}))
	));
	assert!(transport.submissions().is_empty());
	assert!(logs_contain("Recognizer shut down"));
}

#[tokio::test]
#[traced_test]
async fn lagging_event_consumers_skip_what_they_missed() {
	let Fixture {
		source, recognizer, ..
	} = fixture(RecognizerConfig {
		events_capacity: 1,
		..Default::default()
	});
	let mut events = recognizer.event_stream();

	for token in ["first", "second"] {
		source.publish(sample_bundle(token, 1));
		recognizer
			.add_collection(token, Subset::Default)
			.await
			.unwrap();
	}

	assert!(matches!(
		events.next().await,
		Some(CollectionEvent::Added(added)) if added.key().token == "second"
	));
	assert!(logs_contain("Collection events consumer lagged behind"));
}
