//! The older HTTP reporter: a form POST with millisecond timestamps.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use super::owntracks::DecodeError;
use crate::locations::{GeoPoint, LocationSample};

const DEFAULT_DEVICE_ID: &str = "legacy";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LegacyReport {
    pub lat: f64,
    pub long: f64,
    pub acc: f64,
    /// Unix milliseconds.
    pub time: i64,
    #[serde(default)]
    pub deviceid: Option<String>,
}

impl LegacyReport {
    pub fn to_sample(&self, received_at: DateTime<Utc>) -> Result<LocationSample, DecodeError> {
        let point = GeoPoint::new(self.lat, self.long)?;
        if !self.acc.is_finite() || self.acc < 0.0 {
            return Err(DecodeError::Accuracy(self.acc));
        }
        let device_timestamp = Utc
            .timestamp_millis_opt(self.time)
            .single()
            .ok_or(DecodeError::Timestamp(self.time))?;

        Ok(LocationSample {
            device_id: self
                .deviceid
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string()),
            point,
            device_timestamp,
            server_timestamp: received_at,
            accuracy: self.acc,
            vertical_accuracy: None,
            altitude: None,
            speed: None,
            geocoding: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millisecond_time_and_default_device() {
        let report = LegacyReport {
            lat: 51.5,
            long: -0.12,
            acc: 30.0,
            time: 1_700_000_000_250,
            deviceid: None,
        };
        let sample = report.to_sample(Utc::now()).unwrap();

        assert_eq!(sample.device_id, "legacy");
        assert_eq!(sample.device_timestamp.timestamp_millis(), 1_700_000_000_250);
        assert_eq!(sample.point.lon, -0.12);
    }

    #[test]
    fn rejects_negative_accuracy() {
        let report = LegacyReport {
            lat: 51.5,
            long: -0.12,
            acc: -1.0,
            time: 0,
            deviceid: Some("n5".into()),
        };
        assert!(matches!(report.to_sample(Utc::now()), Err(DecodeError::Accuracy(_))));
    }
}
