//! OwnTracks JSON payloads as published on `owntracks/<user>/<device>`.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::locations::{GeoPoint, LocationSample, PointError};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Ignoring message of type '{0}'")]
    NotALocation(String),
    #[error("Invalid coordinates: {0}")]
    Point(#[from] PointError),
    #[error("Invalid accuracy: {0}")]
    Accuracy(f64),
    #[error("Timestamp {0} is out of range")]
    Timestamp(i64),
}

/// A location report. Every field without a default is mandatory; a payload
/// missing any of them is rejected whole.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OwnTracksMessage {
    #[serde(rename = "_type")]
    pub kind: String,
    /// Two-character tracker id; used as the device id.
    pub tid: String,
    pub acc: f64,
    pub batt: i64,
    pub conn: String,
    pub doze: bool,
    pub lat: f64,
    pub lon: f64,
    /// Fix time, Unix seconds.
    pub tst: i64,
    #[serde(default)]
    pub alt: Option<f64>,
    /// km/h
    #[serde(default)]
    pub vel: Option<f64>,
    #[serde(default)]
    pub vac: Option<f64>,
}

impl OwnTracksMessage {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Validates the report and turns it into a sample received at `received_at`.
    pub fn to_sample(&self, received_at: DateTime<Utc>) -> Result<LocationSample, DecodeError> {
        if self.kind != "location" {
            return Err(DecodeError::NotALocation(self.kind.clone()));
        }
        let point = GeoPoint::new(self.lat, self.lon)?;
        if !self.acc.is_finite() || self.acc < 0.0 {
            return Err(DecodeError::Accuracy(self.acc));
        }
        let device_timestamp = Utc
            .timestamp_opt(self.tst, 0)
            .single()
            .ok_or(DecodeError::Timestamp(self.tst))?;

        Ok(LocationSample {
            device_id: self.tid.clone(),
            point,
            device_timestamp,
            server_timestamp: received_at,
            accuracy: self.acc,
            vertical_accuracy: self.vac,
            altitude: self.alt,
            speed: self.vel,
            geocoding: None,
        })
    }
}

/// Decodes and validates in one step.
pub fn decode_sample(payload: &[u8], received_at: DateTime<Utc>) -> Result<LocationSample, DecodeError> {
    OwnTracksMessage::decode(payload)?.to_sample(received_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{"_type":"location","tid":"ph","acc":12,"batt":87,"conn":"w","doze":false,"lat":53.8,"lon":-1.55,"tst":1700000000}"#;

    #[test]
    fn decodes_a_full_report() {
        let now = Utc::now();
        let sample = decode_sample(REPORT.as_bytes(), now).unwrap();

        assert_eq!(sample.device_id, "ph");
        assert_eq!(sample.point, GeoPoint { lat: 53.8, lon: -1.55 });
        assert_eq!(sample.device_timestamp.timestamp(), 1_700_000_000);
        assert_eq!(sample.server_timestamp, now);
        assert_eq!(sample.accuracy, 12.0);
        assert!(sample.speed.is_none());
        assert!(sample.geocoding.is_none());
    }

    #[test]
    fn optional_metrics_are_carried() {
        let payload = r#"{"_type":"location","tid":"ph","acc":5,"batt":50,"conn":"m","doze":true,"lat":1,"lon":2,"tst":10,"alt":120,"vel":33,"vac":4}"#;
        let sample = decode_sample(payload.as_bytes(), Utc::now()).unwrap();

        assert_eq!(sample.altitude, Some(120.0));
        assert_eq!(sample.speed, Some(33.0));
        assert_eq!(sample.vertical_accuracy, Some(4.0));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        for field in ["_type", "tid", "acc", "batt", "conn", "doze", "lat", "lon", "tst"] {
            let mut value: serde_json::Value = serde_json::from_str(REPORT).unwrap();
            value.as_object_mut().unwrap().remove(field);
            let payload = serde_json::to_vec(&value).unwrap();
            assert!(
                matches!(decode_sample(&payload, Utc::now()), Err(DecodeError::Json(_))),
                "accepted payload without {field}"
            );
        }
    }

    #[test]
    fn non_location_and_bad_points_are_rejected() {
        let transition = REPORT.replace(r#""_type":"location""#, r#""_type":"transition""#);
        assert!(matches!(
            decode_sample(transition.as_bytes(), Utc::now()),
            Err(DecodeError::NotALocation(kind)) if kind == "transition"
        ));

        let off_planet = REPORT.replace(r#""lat":53.8"#, r#""lat":91.0"#);
        assert!(matches!(
            decode_sample(off_planet.as_bytes(), Utc::now()),
            Err(DecodeError::Point(PointError::Latitude(_)))
        ));

        assert!(matches!(decode_sample(b"not json", Utc::now()), Err(DecodeError::Json(_))));
    }
}
