use lens_collections::{CollectionEvent, Error, Subset};
use lens_operation::OperationEvent;
use lens_test_utils::sample_bundle;

use std::{io::Write, time::Duration};

use futures::StreamExt;
use tempfile::NamedTempFile;
use tracing_test::traced_test;

mod common;

use common::{key, Harness};

#[tokio::test]
#[traced_test]
async fn adding_twice_syncs_instead_of_duplicating() {
	let harness = Harness::new();
	let mut events = harness.store.events().subscribe();

	let first = harness.add("posters", 3).await;
	assert_eq!(first.revision(), 1);

	// The service republished the collection with more items
	let mut bundle = sample_bundle("posters", 5);
	bundle.collection_id = first.remote_id();
	harness.source.publish(bundle);

	let second = harness
		.store
		.add_from_remote("posters", Subset::from_tag(Some("default")))
		.await
		.unwrap();

	assert_eq!(second.id(), first.id());
	assert_eq!(second.revision(), 2);
	assert_eq!(second.item_count(), 5);

	let listed = harness.store.list();
	assert_eq!(listed.len(), 1);
	assert_eq!(listed[0].item_count(), 5);
	assert_eq!(harness.source.fetches(), 2);

	assert!(matches!(events.recv().await.unwrap(), CollectionEvent::Added(c) if c.id() == first.id()));
	assert!(matches!(
		events.recv().await.unwrap(),
		CollectionEvent::Synced { collection, item_downloads: 5, download_errors: 0 }
			if collection.revision() == 2
	));
}

#[tokio::test]
#[traced_test]
async fn remote_add_splits_progress_between_transfer_and_ingestion() {
	let harness = Harness::new();
	harness.source.publish(sample_bundle("menus", 4));

	let events = harness
		.store
		.add_from_remote("menus", Subset::Default)
		.into_events()
		.collect::<Vec<_>>()
		.await;

	let (progress, terminal) = events.split_at(events.len() - 1);

	let progress = progress
		.iter()
		.map(|event| match event {
			OperationEvent::Progress(p) => *p,
			OperationEvent::Done(_) => panic!("terminal event delivered before progress"),
		})
		.collect::<Vec<_>>();

	// 0 to 50 while transferring, then one step per item downloaded
	assert_eq!(progress, vec![0.0, 25.0, 50.0, 62.5, 75.0, 87.5, 100.0]);
	assert!(matches!(&terminal[0], OperationEvent::Done(Ok(c)) if c.item_count() == 4));
}

#[tokio::test]
#[traced_test]
async fn partial_sync_reports_failures_as_data() {
	let harness = Harness::new();
	let collection = harness.add("catalog", 10).await;

	harness
		.source
		.fail_resources(collection.list_items().into_iter().take(3));

	let report = harness
		.store
		.sync(collection.key(), None)
		.await
		.unwrap();

	assert_eq!(report.item_downloads, 10);
	assert_eq!(report.download_errors, 3);
	assert_eq!(report.collection.revision(), 2);
	assert!(logs_contain("Failed to download item resources"));
}

#[tokio::test]
#[traced_test]
async fn sync_only_accepts_tokens_of_the_collection() {
	let harness = Harness::new();
	let collection = harness.add("wines", 2).await;

	let report = harness
		.store
		.sync(collection.key(), Some("wines-extra".to_string()))
		.await
		.unwrap();
	assert_eq!(report.collection.id(), collection.id());

	let err = harness
		.store
		.sync(collection.key(), Some("beers".to_string()))
		.await
		.unwrap_err();
	assert!(matches!(err, Error::TokenNotFound { ref token, .. } if token == "beers"));
	assert!(err.is_not_found());

	let err = harness.store.sync(&key("unknown"), None).await.unwrap_err();
	assert!(matches!(err, Error::CollectionNotFound(_)));
}

#[tokio::test]
#[traced_test]
async fn failed_transfer_leaves_nothing_behind() {
	let harness = Harness::new();
	harness.source.publish(sample_bundle("flyers", 2));
	harness.source.refuse_transfers(true);

	let err = harness
		.store
		.add_from_remote("flyers", Subset::Default)
		.await
		.unwrap_err();

	assert!(matches!(err, Error::TransferFailed { .. }));
	assert!(harness.store.list().is_empty());

	let err = harness
		.store
		.add_from_remote("nobody", Subset::Default)
		.await
		.unwrap_err();
	assert!(matches!(err, Error::TransferFailed { .. }));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn stalled_transfer_times_out() {
	let harness = Harness::new();
	harness.source.publish(sample_bundle("slow", 1));
	harness.source.set_transfer_delay(Duration::from_secs(60));

	let err = harness
		.store
		.add_from_remote("slow", Subset::Default)
		.await
		.unwrap_err();

	assert!(matches!(err, Error::Timeout { after, .. } if after == common::TIMEOUT));
}

#[tokio::test]
#[traced_test]
async fn bundles_are_added_from_disk() {
	let harness = Harness::new();

	let mut file = NamedTempFile::new().unwrap();
	file.write_all(b"bundle").unwrap();
	harness
		.source
		.register_file(file.path(), sample_bundle("shipped", 3));

	let collection = harness.store.add_from_bundle(file.path()).await.unwrap();
	assert_eq!(collection.key(), &key("shipped"));
	assert_eq!(
		harness
			.store
			.get("shipped", &Subset::Default)
			.unwrap()
			.id(),
		collection.id()
	);

	let missing = file.path().with_extension("missing");
	let err = harness.store.add_from_bundle(&missing).await.unwrap_err();
	assert!(matches!(err, Error::FileIO(ref e) if e.is_not_found()));
}

#[tokio::test]
#[traced_test]
async fn delete_requires_a_known_key() {
	let harness = Harness::new();
	let collection = harness.add("coupons", 1).await;
	let mut events = harness.store.events().subscribe();

	let err = harness.store.delete(&key("ghost")).await.unwrap_err();
	assert!(err.is_not_found());

	assert_eq!(
		harness.store.delete(collection.key()).await.unwrap(),
		collection.id()
	);
	assert!(harness.store.list().is_empty());
	assert!(harness.store.get_by_id(collection.id()).is_err());
	assert!(matches!(
		events.recv().await.unwrap(),
		CollectionEvent::Deleted { id, .. } if id == collection.id()
	));
}

#[tokio::test]
#[traced_test]
async fn items_are_looked_up_through_their_collection() {
	let harness = Harness::new();
	let collection = harness.add("toys", 2).await;

	let ids = collection.list_items();
	assert_eq!(ids.len(), 2);

	let item = collection.get_item(ids[0]).unwrap();
	assert_eq!(item.id, ids[0]);
	assert!(collection.tokens().contains("toys-extra"));
}
