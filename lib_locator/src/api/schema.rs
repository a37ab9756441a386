//! Wire shapes of the query API. Field names follow what OwnTracks-compatible
//! recorder clients expect.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::locations::{DayCount, LocationSample, TrackPoint};

pub const POSITION_TYPE: &str = "location";

/// One position in the recorder schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnTracksPosition {
    /// Device timestamp, Unix seconds.
    pub tst: i64,
    pub acc: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub alt: f64,
    pub lon: f64,
    pub vac: f64,
    /// km/h
    pub vel: f64,
    pub lat: f64,
    pub addr: String,
}

impl From<&LocationSample> for OwnTracksPosition {
    fn from(sample: &LocationSample) -> Self {
        Self {
            tst: sample.device_timestamp.timestamp(),
            acc: sample.accuracy,
            kind: POSITION_TYPE.to_string(),
            alt: sample.altitude.unwrap_or(0.0),
            lon: sample.point.lon,
            vac: sample.vertical_accuracy.unwrap_or(0.0),
            vel: sample.speed.unwrap_or(0.0),
            lat: sample.point.lat,
            addr: sample.geocoding.as_ref().map(|g| g.display_address()).unwrap_or_default(),
        }
    }
}

impl From<&TrackPoint> for OwnTracksPosition {
    fn from(point: &TrackPoint) -> Self {
        Self {
            tst: point.device_timestamp.timestamp(),
            acc: point.accuracy,
            kind: POSITION_TYPE.to_string(),
            alt: point.altitude,
            lon: point.point.lon,
            vac: point.vertical_accuracy,
            vel: point.speed,
            lat: point.point.lat,
            addr: point.address.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceList {
    pub results: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Track {
    pub data: Vec<OwnTracksPosition>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Version {
    pub version: String,
}

/// Public "where am I" summary.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSummary {
    pub name: String,
    pub latitude: String,
    pub longitude: String,
    pub total_distance: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaceQuery {
    pub place: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceVisit {
    pub date: NaiveDate,
    pub count: i64,
}

impl From<DayCount> for PlaceVisit {
    fn from(day: DayCount) -> Self {
        Self {
            date: day.date,
            count: day.count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlaceVisits {
    pub place: String,
    pub formatted: String,
    pub results: Vec<PlaceVisit>,
}
