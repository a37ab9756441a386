use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::model::{DayCount, Geocoding, LocationSample, PendingGeocode, SampleRef, SearchArea, TrackPoint};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Location store unavailable: {0}")]
    Unavailable(String),
    #[error("No matching location sample")]
    NotFound,
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(e: tokio_postgres::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Where samples live. Implementations must give each reader a consistent
/// view ordered by device timestamp, ties broken by insertion order.
#[async_trait]
pub trait LocationRepository: Send + Sync {
    async fn insert(&self, sample: &LocationSample) -> Result<SampleRef, StoreError>;

    /// Newest sample that already has a place name.
    async fn last_geocoded(&self) -> Result<LocationSample, StoreError>;

    /// Newest sample without a place name, if any.
    async fn latest_ungeocoded(&self) -> Result<Option<PendingGeocode>, StoreError>;

    /// Sets the place name once; a sample that already has one is left as is.
    async fn mark_geocoded(&self, id: SampleRef, geocoding: &Geocoding) -> Result<(), StoreError>;

    /// Samples with `from <= device_timestamp < to`, newest first.
    async fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TrackPoint>, StoreError>;

    /// Sum of distances between consecutive samples in `[from, to)`, in metres.
    async fn distance_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<f64, StoreError>;

    /// Busiest days inside `area`, most samples first.
    async fn visits_within(&self, area: &SearchArea, limit: usize) -> Result<Vec<DayCount>, StoreError>;
}
