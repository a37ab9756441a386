#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lib_locator::api::{serve, AppState, LogAlerter};
use lib_locator::locations::InMemoryLocationRepository;
use lib_locator::retrieve::{GeocodeError, GeocodeFeature, GeocodingProvider};
use lib_locator::{Doorbell, GeoPoint, Geocoding, LocationSample, LocationStore};

/// Answers reverse lookups with a fixed address and searches with whatever
/// features it was given.
#[derive(Default)]
pub struct FakeGeocoder {
    pub features: Vec<GeocodeFeature>,
    pub reverse_calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn with_features(features: serde_json::Value) -> Self {
        Self {
            features: serde_json::from_value(features).unwrap(),
            reverse_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GeocodingProvider for FakeGeocoder {
    async fn reverse(&self, point: GeoPoint) -> Result<Geocoding, GeocodeError> {
        self.reverse_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Geocoding::from_address(&format!("Near {:.2},{:.2}", point.lat, point.lon)))
    }

    async fn search(&self, _place: &str) -> Result<Vec<GeocodeFeature>, GeocodeError> {
        Ok(self.features.clone())
    }
}

pub struct TestApp {
    pub addr: SocketAddr,
    pub repo: Arc<InMemoryLocationRepository>,
    pub store: LocationStore,
    pub shutdown: CancellationToken,
    pub server: JoinHandle<std::io::Result<()>>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

pub async fn spawn_app(geocoder: Arc<dyn GeocodingProvider>) -> TestApp {
    let repo = Arc::new(InMemoryLocationRepository::new());
    let (doorbell, _rx) = Doorbell::new(100);
    let store = LocationStore::new(repo.clone(), doorbell);
    let shutdown = CancellationToken::new();

    let state = AppState {
        store: store.clone(),
        geocoder,
        alerter: Arc::new(LogAlerter::default()),
        device_ids: Arc::new(vec!["owntracks".to_string()]),
        shutdown: shutdown.clone(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve(listener, state, shutdown.clone()));

    TestApp {
        addr,
        repo,
        store,
        shutdown,
        server,
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn sample(lat: f64, lon: f64, when: DateTime<Utc>) -> LocationSample {
    LocationSample {
        device_id: "ph".into(),
        point: GeoPoint::new(lat, lon).unwrap(),
        device_timestamp: when,
        server_timestamp: when,
        accuracy: 10.0,
        vertical_accuracy: None,
        altitude: None,
        speed: None,
        geocoding: None,
    }
}
