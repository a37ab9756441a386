//! # Geocoding Enrichment Worker
//!
//! The single consumer of the doorbell. Each signal means "look again": the
//! worker keeps taking the newest sample without a place name and reverse
//! geocoding it until none is left, so signals dropped on a full queue only
//! delay work. The first failure ends the pass and leaves the sample for the
//! next signal; there is no retry or backoff here.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::locations::{LocationStore, SampleRef};
use crate::pipeline::DoorbellReceiver;
use crate::retrieve::GeocodingProvider;

/// What one signal led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Enriched(SampleRef),
    NothingPending,
    Failed,
}

pub struct EnrichmentWorker {
    store: LocationStore,
    geocoder: Arc<dyn GeocodingProvider>,
}

impl EnrichmentWorker {
    pub fn new(store: LocationStore, geocoder: Arc<dyn GeocodingProvider>) -> Self {
        Self { store, geocoder }
    }

    /// Consumes signals until the doorbell is closed and drained. Queued
    /// signals are preferred over `cancel`, which only matters for a doorbell
    /// that is never closed.
    pub async fn run(self, mut doorbell: DoorbellReceiver, cancel: CancellationToken) {
        info!("Enrichment worker started.");
        loop {
            let idle = doorbell.pending() == 0;
            tokio::select! {
                biased;
                signal = doorbell.recv() => match signal {
                    Some(_) => {
                        self.drain_pending(&cancel).await;
                    }
                    None => {
                        debug!("Doorbell closed and drained.");
                        break;
                    }
                },
                _ = cancel.cancelled(), if idle => {
                    debug!("Enrichment cancelled.");
                    break;
                }
            }
        }
        info!("Enrichment worker stopped.");
    }

    /// Geocodes pending samples, newest first, until none is left, one fails,
    /// or `cancel` fires. At least one sample is attempted, so queued signals
    /// still make progress during shutdown. Returns how many were enriched.
    pub async fn drain_pending(&self, cancel: &CancellationToken) -> usize {
        let mut enriched = 0;
        loop {
            match self.process_one().await {
                Outcome::Enriched(_) => enriched += 1,
                Outcome::NothingPending | Outcome::Failed => break,
            }
            if cancel.is_cancelled() {
                debug!(enriched, "Stopping enrichment pass for shutdown.");
                break;
            }
        }
        if enriched > 0 {
            debug!(enriched, "Enrichment pass finished.");
        }
        enriched
    }

    /// Geocodes the newest pending sample, if any.
    pub async fn process_one(&self) -> Outcome {
        let pending = match self.store.next_ungeocoded().await {
            Ok(Some(pending)) => pending,
            Ok(None) => return Outcome::NothingPending,
            Err(e) => {
                error!(error = %e, "Could not look up samples awaiting geocoding.");
                return Outcome::Failed;
            }
        };

        let geocoding = match self.geocoder.reverse(pending.point).await {
            Ok(geocoding) => geocoding,
            Err(e) => {
                warn!(sample_id = %pending.id, error = %e, "Reverse geocoding failed.");
                return Outcome::Failed;
            }
        };

        match self.store.mark_geocoded(pending.id, &geocoding).await {
            Ok(()) => {
                debug!(sample_id = %pending.id, address = %geocoding.display_address(), "Sample geocoded.");
                Outcome::Enriched(pending.id)
            }
            Err(e) => {
                error!(sample_id = %pending.id, error = %e, "Could not store geocoding.");
                Outcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locations::{GeoPoint, Geocoding, InMemoryLocationRepository, LocationRepository, LocationSample};
    use crate::pipeline::Doorbell;
    use crate::retrieve::{GeocodeError, GeocodeFeature};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeGeocoder {
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GeocodingProvider for FakeGeocoder {
        async fn reverse(&self, point: GeoPoint) -> Result<Geocoding, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(GeocodeError::Status { status: 503, body: "down".into() });
            }
            Ok(Geocoding::from_address(&format!("{:.3},{:.3}", point.lat, point.lon)))
        }

        async fn search(&self, _place: &str) -> Result<Vec<GeocodeFeature>, GeocodeError> {
            Ok(Vec::new())
        }
    }

    fn sample(i: i64) -> LocationSample {
        let at = Utc.timestamp_opt(1_000 + i * 60, 0).unwrap();
        LocationSample {
            device_id: "ph".into(),
            point: GeoPoint::new(53.0 + i as f64 * 0.001, -1.0).unwrap(),
            device_timestamp: at,
            server_timestamp: at,
            accuracy: 5.0,
            vertical_accuracy: None,
            altitude: None,
            speed: None,
            geocoding: None,
        }
    }

    #[tokio::test]
    async fn every_sample_is_eventually_geocoded() {
        let repo = Arc::new(InMemoryLocationRepository::new());
        let (doorbell, rx) = Doorbell::new(100);
        let store = LocationStore::new(repo.clone(), doorbell.clone());
        let geocoder = Arc::new(FakeGeocoder::default());
        let worker = EnrichmentWorker::new(store.clone(), geocoder.clone());
        let handle = tokio::spawn(worker.run(rx, CancellationToken::new()));

        let mut ids = Vec::new();
        for i in 0..10 {
            ids.push(store.insert(&sample(i)).await.unwrap());
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while repo.latest_ungeocoded().await.unwrap().is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("samples were not all geocoded");

        for id in ids {
            assert!(repo.get(id).unwrap().geocoding.is_some());
        }

        doorbell.close();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn failure_leaves_the_sample_for_a_later_signal() {
        let repo = Arc::new(InMemoryLocationRepository::new());
        let (doorbell, _rx) = Doorbell::new(8);
        let store = LocationStore::new(repo.clone(), doorbell);
        let geocoder = Arc::new(FakeGeocoder::default());
        let worker = EnrichmentWorker::new(store.clone(), geocoder.clone());

        let id = store.insert(&sample(0)).await.unwrap();
        geocoder.failing.store(true, Ordering::SeqCst);
        assert_eq!(worker.process_one().await, Outcome::Failed);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
        assert!(repo.get(id).unwrap().geocoding.is_none());

        geocoder.failing.store(false, Ordering::SeqCst);
        assert_eq!(worker.process_one().await, Outcome::Enriched(id));
        assert_eq!(worker.process_one().await, Outcome::NothingPending);
    }

    #[tokio::test]
    async fn one_pass_clears_the_backlog() {
        let repo = Arc::new(InMemoryLocationRepository::new());
        let (doorbell, _rx) = Doorbell::new(1);
        let store = LocationStore::new(repo.clone(), doorbell);
        let geocoder = Arc::new(FakeGeocoder::default());
        let worker = EnrichmentWorker::new(store.clone(), geocoder.clone());
        for i in 0..25 {
            store.insert(&sample(i)).await.unwrap();
        }

        assert_eq!(worker.drain_pending(&CancellationToken::new()).await, 25);

        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 25);
        assert!(repo.latest_ungeocoded().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pass_stops_at_the_first_failure() {
        let repo = Arc::new(InMemoryLocationRepository::new());
        let (doorbell, _rx) = Doorbell::new(8);
        let store = LocationStore::new(repo.clone(), doorbell);
        let geocoder = Arc::new(FakeGeocoder::default());
        let worker = EnrichmentWorker::new(store.clone(), geocoder.clone());
        for i in 0..5 {
            store.insert(&sample(i)).await.unwrap();
        }
        geocoder.failing.store(true, Ordering::SeqCst);

        assert_eq!(worker.drain_pending(&CancellationToken::new()).await, 0);
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_pass_takes_one_sample() {
        let repo = Arc::new(InMemoryLocationRepository::new());
        let (doorbell, _rx) = Doorbell::new(8);
        let store = LocationStore::new(repo.clone(), doorbell);
        let worker = EnrichmentWorker::new(store.clone(), Arc::new(FakeGeocoder::default()));
        for i in 0..5 {
            store.insert(&sample(i)).await.unwrap();
        }
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(worker.drain_pending(&cancel).await, 1);
    }

    #[tokio::test]
    async fn store_outage_is_survived() {
        let repo = Arc::new(InMemoryLocationRepository::new());
        let (doorbell, _rx) = Doorbell::new(8);
        let store = LocationStore::new(repo.clone(), doorbell);
        let worker = EnrichmentWorker::new(store, Arc::new(FakeGeocoder::default()));

        repo.set_offline(true);
        assert_eq!(worker.process_one().await, Outcome::Failed);
    }

    #[tokio::test]
    async fn drains_queued_signals_before_exiting() {
        let repo = Arc::new(InMemoryLocationRepository::new());
        let (doorbell, rx) = Doorbell::new(8);
        let store = LocationStore::new(repo.clone(), doorbell.clone());
        let geocoder = Arc::new(FakeGeocoder::default());

        store.insert(&sample(0)).await.unwrap();
        store.insert(&sample(1)).await.unwrap();
        doorbell.close();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let worker = EnrichmentWorker::new(store, geocoder.clone());
        tokio::time::timeout(Duration::from_secs(1), worker.run(rx, cancel))
            .await
            .expect("worker did not exit");

        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 2);
        assert!(repo.latest_ungeocoded().await.unwrap().is_none());
    }
}
