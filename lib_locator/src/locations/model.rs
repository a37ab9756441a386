use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Rejected coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PointError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
}

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Validates ranges; NaN and infinities are rejected as out of range.
    pub fn new(lat: f64, lon: f64) -> Result<Self, PointError> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(PointError::Latitude(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(PointError::Longitude(lon));
        }
        Ok(Self { lat, lon })
    }
}

/// Insertion-order identity of a persisted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleRef(pub i64);

impl fmt::Display for SampleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reverse geocoding result, kept exactly as the provider returned it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geocoding(pub Value);

impl Geocoding {
    /// Wraps a single formatted address in the provider's result shape.
    pub fn from_address(address: &str) -> Self {
        Self(serde_json::json!({ "results": [{ "formatted_address": address }] }))
    }

    /// First result's formatted address, or an empty string.
    pub fn display_address(&self) -> String {
        self.0
            .pointer("/results/0/formatted_address")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

/// # Location Sample
///
/// One reported position. Everything but `geocoding` is fixed once ingested;
/// `geocoding` goes from `None` to `Some` at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub device_id: String,
    pub point: GeoPoint,
    /// When the device took the fix. Samples are ordered by this.
    pub device_timestamp: DateTime<Utc>,
    /// When the sample reached us. Diagnostic only.
    pub server_timestamp: DateTime<Utc>,
    pub accuracy: f64,
    pub vertical_accuracy: Option<f64>,
    pub altitude: Option<f64>,
    /// Sensor-reported speed in km/h.
    pub speed: Option<f64>,
    pub geocoding: Option<Geocoding>,
}

/// The newest sample still waiting for a place name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingGeocode {
    pub id: SampleRef,
    pub point: GeoPoint,
}

/// A sample as returned by range queries: optional metrics resolved, speed
/// derived when the device did not report one, address flattened.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackPoint {
    pub device_timestamp: DateTime<Utc>,
    pub point: GeoPoint,
    pub accuracy: f64,
    pub altitude: f64,
    pub vertical_accuracy: f64,
    /// km/h
    pub speed: f64,
    pub address: String,
}

/// Region used by place searches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchArea {
    BoundingBox { north_east: GeoPoint, south_west: GeoPoint },
    Radius { center: GeoPoint, meters: f64 },
}

/// Number of samples recorded on one day inside a [`SearchArea`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ranges_are_enforced() {
        assert!(GeoPoint::new(90.0, 180.0).is_ok());
        assert!(GeoPoint::new(-90.0, -180.0).is_ok());
        assert_eq!(GeoPoint::new(90.5, 0.0), Err(PointError::Latitude(90.5)));
        assert_eq!(GeoPoint::new(0.0, -180.1), Err(PointError::Longitude(-180.1)));
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn display_address_uses_first_result() {
        let geocoding = Geocoding(serde_json::json!({
            "results": [
                { "formatted_address": "1 Market St, Leeds" },
                { "formatted_address": "Leeds, UK" }
            ]
        }));
        assert_eq!(geocoding.display_address(), "1 Market St, Leeds");
    }

    #[test]
    fn display_address_is_empty_without_results() {
        assert_eq!(Geocoding(serde_json::json!({ "results": [] })).display_address(), "");
        assert_eq!(Geocoding(serde_json::json!({ "status": "ZERO_RESULTS" })).display_address(), "");
        assert_eq!(Geocoding::from_address("Otley").display_address(), "Otley");
    }
}
