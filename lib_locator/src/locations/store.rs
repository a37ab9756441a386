use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::sync::Arc;
use tracing::debug;

use super::geo::meters_to_miles;
use super::model::{DayCount, Geocoding, LocationSample, PendingGeocode, SampleRef, SearchArea, TrackPoint};
use super::repository::{LocationRepository, StoreError};
use crate::pipeline::{Doorbell, Ring};

/// # Location Store
///
/// The facade every component talks to. Inserts go to the repository and then
/// ring the enrichment doorbell; a full or closed doorbell never fails the
/// insert, since the worker always looks for the newest un-geocoded sample
/// rather than a specific one.
#[derive(Clone)]
pub struct LocationStore {
    repository: Arc<dyn LocationRepository>,
    doorbell: Doorbell,
}

impl LocationStore {
    pub fn new(repository: Arc<dyn LocationRepository>, doorbell: Doorbell) -> Self {
        Self { repository, doorbell }
    }

    /// Persists a validated sample and signals the enrichment worker.
    pub async fn insert(&self, sample: &LocationSample) -> Result<SampleRef, StoreError> {
        let id = self.repository.insert(sample).await?;
        match self.doorbell.ring() {
            Ring::Queued => {}
            Ring::Dropped => debug!(sample_id = %id, "Enrichment queue full, doorbell ring dropped."),
            Ring::Closed => debug!(sample_id = %id, "Enrichment queue closed, sample left for a later run."),
        }
        Ok(id)
    }

    /// Most recent sample that has a place name.
    pub async fn get_last(&self) -> Result<LocationSample, StoreError> {
        self.repository.last_geocoded().await
    }

    /// Miles travelled since January 1st (UTC) of the current year.
    pub async fn get_total_distance_this_year(&self) -> Result<f64, StoreError> {
        self.get_total_distance_in_year(Utc::now().year()).await
    }

    pub async fn get_total_distance_in_year(&self, year: i32) -> Result<f64, StoreError> {
        let (from, to) = year_bounds(year)?;
        let meters = self.repository.distance_between(from, to).await?;
        Ok(meters_to_miles(meters))
    }

    /// Samples in `[from, to)`, newest first.
    pub async fn get_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TrackPoint>, StoreError> {
        self.repository.range(from, to).await
    }

    pub async fn next_ungeocoded(&self) -> Result<Option<PendingGeocode>, StoreError> {
        self.repository.latest_ungeocoded().await
    }

    pub async fn mark_geocoded(&self, id: SampleRef, geocoding: &Geocoding) -> Result<(), StoreError> {
        self.repository.mark_geocoded(id, geocoding).await
    }

    pub async fn visits_within(&self, area: &SearchArea, limit: usize) -> Result<Vec<DayCount>, StoreError> {
        self.repository.visits_within(area, limit).await
    }
}

fn year_bounds(year: i32) -> Result<(DateTime<Utc>, DateTime<Utc>), StoreError> {
    let start = |y: i32| {
        Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0)
            .single()
            .ok_or_else(|| StoreError::Unavailable(format!("year {y} is out of range")))
    };
    Ok((start(year)?, start(year + 1)?))
}
