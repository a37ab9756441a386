use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::geo::{haversine_meters, speed_kmh};
use super::model::{DayCount, Geocoding, LocationSample, PendingGeocode, SampleRef, SearchArea, TrackPoint};
use super::repository::{LocationRepository, StoreError};

#[derive(Debug, Default)]
struct Inner {
    rows: Vec<(SampleRef, LocationSample)>,
    next_id: i64,
}

impl Inner {
    /// Rows in `[from, to)`, ascending by device timestamp then id.
    fn window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<&(SampleRef, LocationSample)> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .filter(|(_, s)| s.device_timestamp >= from && s.device_timestamp < to)
            .collect();
        rows.sort_by_key(|(id, s)| (s.device_timestamp, *id));
        rows
    }

    fn newest<'a>(
        &'a self,
        keep: impl Fn(&LocationSample) -> bool,
    ) -> Option<&'a (SampleRef, LocationSample)> {
        self.rows
            .iter()
            .filter(|(_, s)| keep(s))
            .max_by_key(|(id, s)| (s.device_timestamp, *id))
    }
}

/// Process-local repository with the same query semantics as the Postgres
/// one. Used by tests and for running without a database.
#[derive(Debug, Default)]
pub struct InMemoryLocationRepository {
    inner: RwLock<Inner>,
    offline: AtomicBool,
}

impl InMemoryLocationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.read().map(|inner| inner.rows.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of a stored sample, for assertions.
    pub fn get(&self, id: SampleRef) -> Option<LocationSample> {
        let inner = self.read().ok()?;
        inner.rows.iter().find(|(row_id, _)| *row_id == id).map(|(_, s)| s.clone())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory repository is offline".into()));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.check_online()?;
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("repository lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.check_online()?;
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("repository lock poisoned".into()))
    }
}

#[async_trait]
impl LocationRepository for InMemoryLocationRepository {
    async fn insert(&self, sample: &LocationSample) -> Result<SampleRef, StoreError> {
        let mut inner = self.write()?;
        inner.next_id += 1;
        let id = SampleRef(inner.next_id);
        inner.rows.push((id, sample.clone()));
        Ok(id)
    }

    async fn last_geocoded(&self) -> Result<LocationSample, StoreError> {
        let inner = self.read()?;
        inner
            .newest(|s| s.geocoding.is_some())
            .map(|(_, s)| s.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn latest_ungeocoded(&self) -> Result<Option<PendingGeocode>, StoreError> {
        let inner = self.read()?;
        Ok(inner
            .newest(|s| s.geocoding.is_none())
            .map(|(id, s)| PendingGeocode { id: *id, point: s.point }))
    }

    async fn mark_geocoded(&self, id: SampleRef, geocoding: &Geocoding) -> Result<(), StoreError> {
        let mut inner = self.write()?;
        let (_, sample) = inner
            .rows
            .iter_mut()
            .find(|(row_id, _)| *row_id == id)
            .ok_or(StoreError::NotFound)?;
        if sample.geocoding.is_none() {
            sample.geocoding = Some(geocoding.clone());
        }
        Ok(())
    }

    async fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TrackPoint>, StoreError> {
        let inner = self.read()?;
        let rows = inner.window(from, to);

        let mut points = Vec::with_capacity(rows.len());
        let mut previous: Option<&LocationSample> = None;
        for (_, sample) in rows {
            let speed = match (sample.speed, previous) {
                (Some(reported), _) => reported,
                (None, Some(prev)) => {
                    let seconds = (sample.device_timestamp - prev.device_timestamp).num_milliseconds() as f64 / 1000.0;
                    speed_kmh(haversine_meters(&prev.point, &sample.point), seconds)
                }
                (None, None) => 0.0,
            };
            points.push(TrackPoint {
                device_timestamp: sample.device_timestamp,
                point: sample.point,
                accuracy: sample.accuracy,
                altitude: sample.altitude.unwrap_or(0.0),
                vertical_accuracy: sample.vertical_accuracy.unwrap_or(0.0),
                speed,
                address: sample.geocoding.as_ref().map(Geocoding::display_address).unwrap_or_default(),
            });
            previous = Some(sample);
        }

        points.reverse();
        Ok(points)
    }

    async fn distance_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<f64, StoreError> {
        let inner = self.read()?;
        let rows = inner.window(from, to);
        Ok(rows
            .windows(2)
            .map(|pair| haversine_meters(&pair[0].1.point, &pair[1].1.point))
            .sum())
    }

    async fn visits_within(&self, area: &SearchArea, limit: usize) -> Result<Vec<DayCount>, StoreError> {
        let inner = self.read()?;
        let mut per_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
        for (_, sample) in inner.rows.iter().filter(|(_, s)| area.contains(&s.point)) {
            *per_day.entry(sample.device_timestamp.date_naive()).or_default() += 1;
        }

        let mut days: Vec<DayCount> = per_day.into_iter().map(|(date, count)| DayCount { date, count }).collect();
        days.sort_by(|a, b| b.count.cmp(&a.count).then(b.date.cmp(&a.date)));
        days.truncate(limit);
        Ok(days)
    }
}
