//! # PostGIS Location Repository
//!
//! Reads and writes the externally owned `locations` table. Points are stored
//! as `geometry(Point, 4326)`; distances are measured on the geography type so
//! they come back in metres. Derived speed and the travelled distance are
//! computed inside Postgres with `lag()` window functions.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tokio_postgres::Row;
use tracing::debug;

use super::model::{DayCount, GeoPoint, Geocoding, LocationSample, PendingGeocode, SampleRef, SearchArea, TrackPoint};
use super::repository::{LocationRepository, StoreError};
use crate::connections::Database;

const INSERT_SQL: &str = "
    INSERT INTO locations (timestamp, devicetimestamp, point, accuracy, altitude, verticalaccuracy, speed, deviceid, geocoding)
    VALUES ($1::timestamptz, $2::timestamptz, ST_SetSRID(ST_MakePoint($3::float8, $4::float8), 4326),
            $5::float8, $6::float8, $7::float8, $8::float8, $9::text, $10::jsonb)
    RETURNING id::bigint";

const LAST_GEOCODED_SQL: &str = "
    SELECT deviceid, ST_Y(point::geometry) AS lat, ST_X(point::geometry) AS lon,
           devicetimestamp, timestamp, accuracy::float8 AS accuracy,
           verticalaccuracy::float8 AS verticalaccuracy, altitude::float8 AS altitude,
           speed::float8 AS speed, geocoding
    FROM locations
    WHERE geocoding IS NOT NULL
    ORDER BY devicetimestamp DESC, id DESC
    LIMIT 1";

const LATEST_UNGEOCODED_SQL: &str = "
    SELECT id::bigint AS id, ST_Y(point::geometry) AS lat, ST_X(point::geometry) AS lon
    FROM locations
    WHERE geocoding IS NULL
    ORDER BY devicetimestamp DESC, id DESC
    LIMIT 1";

const MARK_GEOCODED_SQL: &str = "
    UPDATE locations SET geocoding = $2::jsonb
    WHERE id = $1::bigint AND geocoding IS NULL";

const EXISTS_SQL: &str = "SELECT 1 FROM locations WHERE id = $1::bigint";

const RANGE_SQL: &str = "
    SELECT devicetimestamp,
           ST_Y(point::geometry) AS lat, ST_X(point::geometry) AS lon,
           accuracy::float8 AS accuracy,
           coalesce(altitude::float8, 0) AS altitude,
           coalesce(verticalaccuracy::float8, 0) AS verticalaccuracy,
           coalesce(
               speed::float8,
               3.6 * ST_Distance(point::geography, lag(point::geography, 1, point::geography) OVER w)
                   / nullif(extract(epoch FROM devicetimestamp - lag(devicetimestamp, 1, devicetimestamp) OVER w), 0)::float8,
               0
           )::float8 AS speed,
           coalesce(geocoding->'results'->0->>'formatted_address', '') AS address
    FROM locations
    WHERE devicetimestamp >= $1::timestamptz AND devicetimestamp < $2::timestamptz
    WINDOW w AS (ORDER BY devicetimestamp, id)
    ORDER BY devicetimestamp DESC, id DESC";

const DISTANCE_SQL: &str = "
    SELECT coalesce(sum(step), 0)::float8 AS meters FROM (
        SELECT ST_Distance(point::geography, lag(point::geography, 1, point::geography) OVER (ORDER BY devicetimestamp, id)) AS step
        FROM locations
        WHERE devicetimestamp >= $1::timestamptz AND devicetimestamp < $2::timestamptz
    ) AS steps";

const VISITS_IN_BOX_SQL: &str = "
    SELECT (devicetimestamp AT TIME ZONE 'UTC')::date AS day, count(*)::bigint AS visits
    FROM locations
    WHERE point::geometry && ST_SetSRID(ST_MakeBox2D(ST_Point($1::float8, $2::float8), ST_Point($3::float8, $4::float8)), 4326)
    GROUP BY day
    ORDER BY visits DESC, day DESC
    LIMIT $5::bigint";

const VISITS_NEAR_SQL: &str = "
    SELECT (devicetimestamp AT TIME ZONE 'UTC')::date AS day, count(*)::bigint AS visits
    FROM locations
    WHERE ST_DWithin(point::geography, ST_SetSRID(ST_Point($1::float8, $2::float8), 4326)::geography, $3::float8)
    GROUP BY day
    ORDER BY visits DESC, day DESC
    LIMIT $4::bigint";

/// [`LocationRepository`] backed by Postgres with PostGIS.
#[derive(Clone)]
pub struct PostgresLocationRepository {
    db: Database,
}

impl PostgresLocationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn point_from_row(row: &Row) -> Result<GeoPoint, StoreError> {
    let lat: f64 = row.try_get("lat")?;
    let lon: f64 = row.try_get("lon")?;
    GeoPoint::new(lat, lon).map_err(|e| StoreError::Unavailable(format!("stored point is invalid: {e}")))
}

#[async_trait]
impl LocationRepository for PostgresLocationRepository {
    async fn insert(&self, sample: &LocationSample) -> Result<SampleRef, StoreError> {
        let client = self.db.pool.get().await?;
        let geocoding: Option<&Value> = sample.geocoding.as_ref().map(|g| &g.0);
        let row = client
            .query_one(
                INSERT_SQL,
                &[
                    &sample.server_timestamp,
                    &sample.device_timestamp,
                    &sample.point.lon,
                    &sample.point.lat,
                    &sample.accuracy,
                    &sample.altitude,
                    &sample.vertical_accuracy,
                    &sample.speed,
                    &sample.device_id,
                    &geocoding,
                ],
            )
            .await?;
        let id = SampleRef(row.try_get(0)?);
        debug!(sample_id = %id, device_id = %sample.device_id, "Location sample stored.");
        Ok(id)
    }

    async fn last_geocoded(&self) -> Result<LocationSample, StoreError> {
        let client = self.db.pool.get().await?;
        let row = client.query_opt(LAST_GEOCODED_SQL, &[]).await?.ok_or(StoreError::NotFound)?;
        Ok(LocationSample {
            device_id: row.try_get("deviceid")?,
            point: point_from_row(&row)?,
            device_timestamp: row.try_get("devicetimestamp")?,
            server_timestamp: row.try_get("timestamp")?,
            accuracy: row.try_get::<_, Option<f64>>("accuracy")?.unwrap_or_default(),
            vertical_accuracy: row.try_get("verticalaccuracy")?,
            altitude: row.try_get("altitude")?,
            speed: row.try_get("speed")?,
            geocoding: row.try_get::<_, Option<Value>>("geocoding")?.map(Geocoding),
        })
    }

    async fn latest_ungeocoded(&self) -> Result<Option<PendingGeocode>, StoreError> {
        let client = self.db.pool.get().await?;
        let Some(row) = client.query_opt(LATEST_UNGEOCODED_SQL, &[]).await? else {
            return Ok(None);
        };
        Ok(Some(PendingGeocode {
            id: SampleRef(row.try_get("id")?),
            point: point_from_row(&row)?,
        }))
    }

    async fn mark_geocoded(&self, id: SampleRef, geocoding: &Geocoding) -> Result<(), StoreError> {
        let client = self.db.pool.get().await?;
        let updated = client.execute(MARK_GEOCODED_SQL, &[&id.0, &geocoding.0]).await?;
        if updated == 0 && client.query_opt(EXISTS_SQL, &[&id.0]).await?.is_none() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<TrackPoint>, StoreError> {
        let client = self.db.pool.get().await?;
        let rows = client.query(RANGE_SQL, &[&from, &to]).await?;
        rows.iter()
            .map(|row| {
                Ok(TrackPoint {
                    device_timestamp: row.try_get("devicetimestamp")?,
                    point: point_from_row(row)?,
                    accuracy: row.try_get::<_, Option<f64>>("accuracy")?.unwrap_or_default(),
                    altitude: row.try_get("altitude")?,
                    vertical_accuracy: row.try_get("verticalaccuracy")?,
                    speed: row.try_get("speed")?,
                    address: row.try_get("address")?,
                })
            })
            .collect()
    }

    async fn distance_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<f64, StoreError> {
        let client = self.db.pool.get().await?;
        let row = client.query_one(DISTANCE_SQL, &[&from, &to]).await?;
        Ok(row.try_get("meters")?)
    }

    async fn visits_within(&self, area: &SearchArea, limit: usize) -> Result<Vec<DayCount>, StoreError> {
        let client = self.db.pool.get().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match area {
            SearchArea::BoundingBox { north_east, south_west } => {
                client
                    .query(
                        VISITS_IN_BOX_SQL,
                        &[&south_west.lon, &south_west.lat, &north_east.lon, &north_east.lat, &limit],
                    )
                    .await?
            }
            SearchArea::Radius { center, meters } => {
                client
                    .query(VISITS_NEAR_SQL, &[&center.lon, &center.lat, meters, &limit])
                    .await?
            }
        };
        rows.iter()
            .map(|row| {
                Ok(DayCount {
                    date: row.try_get::<_, NaiveDate>("day")?,
                    count: row.try_get("visits")?,
                })
            })
            .collect()
    }
}
