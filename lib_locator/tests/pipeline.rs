mod common;

use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{at, sample, FakeGeocoder};
use lib_locator::enrichment::EnrichmentWorker;
use lib_locator::ingestors::handle_publish;
use lib_locator::locations::{InMemoryLocationRepository, LocationRepository};
use lib_locator::{Doorbell, LocationStore, ShutdownCoordinator};

fn pipeline(capacity: usize) -> (Arc<InMemoryLocationRepository>, LocationStore, Doorbell, lib_locator::DoorbellReceiver) {
    let repo = Arc::new(InMemoryLocationRepository::new());
    let (doorbell, rx) = Doorbell::new(capacity);
    let store = LocationStore::new(repo.clone(), doorbell.clone());
    (repo, store, doorbell, rx)
}

#[tokio::test]
async fn bursts_never_wait_for_enrichment() {
    let (repo, store, _doorbell, _rx) = pipeline(100);

    tokio::time::timeout(Duration::from_secs(5), async {
        for i in 0..1000 {
            store.insert(&sample(50.0, 0.0, at(i))).await.unwrap();
        }
    })
    .await
    .expect("inserts blocked on a full enrichment queue");

    assert_eq!(repo.len(), 1000);
}

#[tokio::test]
async fn burst_beyond_queue_capacity_is_fully_geocoded() {
    let (repo, store, doorbell, rx) = pipeline(100);
    for i in 0..1000 {
        store.insert(&sample(50.0, 0.0, at(i))).await.unwrap();
    }

    let geocoder = Arc::new(FakeGeocoder::default());
    let coordinator = ShutdownCoordinator::new(doorbell);
    let worker = tokio::spawn(
        EnrichmentWorker::new(store.clone(), geocoder.clone()).run(rx, coordinator.enrichment_token()),
    );

    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        while repo.latest_ungeocoded().await.unwrap().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(settled.is_ok(), "samples left without a place name");

    assert_eq!(geocoder.reverse_calls.load(Ordering::SeqCst), 1000);
    assert!(repo.get(lib_locator::SampleRef(1)).unwrap().geocoding.is_some());

    coordinator.shutdown();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker outlived shutdown")
        .unwrap();
}

#[tokio::test]
async fn shutdown_bounds_the_drain() {
    let (repo, store, doorbell, rx) = pipeline(100);
    for i in 0..1000 {
        store.insert(&sample(50.0, 0.0, at(i))).await.unwrap();
    }

    let geocoder = Arc::new(FakeGeocoder::default());
    let coordinator = ShutdownCoordinator::new(doorbell);
    let worker = EnrichmentWorker::new(store.clone(), geocoder.clone());
    coordinator.shutdown();

    tokio::time::timeout(Duration::from_secs(5), worker.run(rx, coordinator.enrichment_token()))
        .await
        .expect("worker did not finish draining");

    // One lookup per queued signal once shutdown has begun; the newest
    // samples go first and the rest wait for the next start.
    assert_eq!(geocoder.reverse_calls.load(Ordering::SeqCst), 100);
    assert!(repo.get(lib_locator::SampleRef(1000)).unwrap().geocoding.is_some());
}

#[tokio::test]
async fn samples_after_shutdown_are_still_stored() {
    let (repo, store, doorbell, _rx) = pipeline(8);
    let coordinator = ShutdownCoordinator::new(doorbell);
    coordinator.shutdown();

    store.insert(&sample(50.0, 0.0, at(1))).await.unwrap();

    assert_eq!(repo.len(), 1);
    assert!(repo.latest_ungeocoded().await.unwrap().is_some());
}

#[tokio::test]
async fn published_report_ends_up_geocoded() {
    let (repo, store, doorbell, rx) = pipeline(16);
    let geocoder = Arc::new(FakeGeocoder::default());
    let coordinator = ShutdownCoordinator::new(doorbell);
    let worker = tokio::spawn(
        EnrichmentWorker::new(store.clone(), geocoder.clone()).run(rx, coordinator.enrichment_token()),
    );

    let payload = json!({
        "_type": "location", "tid": "ph", "acc": 12.0, "batt": 80, "conn": "w",
        "doze": false, "lat": 53.79, "lon": -1.54, "tst": 1_700_000_000
    });
    let id = handle_publish(&store, "owntracks/user/ph", payload.to_string().as_bytes())
        .await
        .expect("valid report was not stored");

    let enriched = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if repo.get(id).and_then(|s| s.geocoding).is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(enriched.is_ok(), "sample was never geocoded");

    let last = store.get_last().await.unwrap();
    assert_eq!(last.device_id, "ph");
    assert_eq!(last.geocoding.unwrap().display_address(), "Near 53.79,-1.54");

    coordinator.shutdown();
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker outlived shutdown")
        .unwrap();
}

#[tokio::test]
async fn shutdown_cancels_in_order() {
    let (_repo, _store, doorbell, _rx) = pipeline(8);
    let coordinator = Arc::new(ShutdownCoordinator::new(doorbell.clone()));
    let ingest = coordinator.ingest_token();
    let server = coordinator.server_token();

    // By the time the server token fires, ingest is already stopped and the
    // doorbell closed.
    let observer = {
        let ingest = ingest.clone();
        let doorbell = doorbell.clone();
        tokio::spawn(async move {
            server.cancelled().await;
            (ingest.is_cancelled(), doorbell.is_closed())
        })
    };

    assert!(!coordinator.is_shutting_down());
    assert!(coordinator.shutdown());
    assert!(coordinator.is_shutting_down());

    let (ingest_stopped, doorbell_closed) = observer.await.unwrap();
    assert!(ingest_stopped);
    assert!(doorbell_closed);
}
