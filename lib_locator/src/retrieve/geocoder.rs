//! # Geocoding Collaborator
//!
//! Reverse geocoding for the enrichment worker and forward place search for
//! the place-visits endpoint. [`HttpGeocoder`] talks to a Google-style
//! reverse endpoint (`?latlng=`) and an OpenCage-style GeoJSON search
//! (`?q=&format=geojson`) on the same base URL.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::api_client::ApiClient;
use crate::locations::{GeoPoint, Geocoding, SearchArea};

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Geocoding request failed: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("Geocoding provider answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Geocoding provider rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait GeocodingProvider: Send + Sync {
    /// Place description for a point, as returned by the provider.
    async fn reverse(&self, point: GeoPoint) -> Result<Geocoding, GeocodeError>;

    /// Candidate features for free text, best match first.
    async fn search(&self, place: &str) -> Result<Vec<GeocodeFeature>, GeocodeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bounds {
    pub northeast: LatLng,
    pub southwest: LatLng,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeatureProperties {
    #[serde(default)]
    pub bounds: Option<Bounds>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub formatted: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeatureGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Value,
}

/// One GeoJSON feature from a place search.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeocodeFeature {
    #[serde(default)]
    pub properties: FeatureProperties,
    #[serde(default)]
    pub geometry: Option<FeatureGeometry>,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<GeocodeFeature>,
}

/// Search radius for a provider confidence score: higher confidence means a
/// tighter match.
pub fn radius_for_confidence(confidence: u8) -> f64 {
    match confidence {
        10 => 250.0,
        9 => 500.0,
        8 => 1_000.0,
        7 => 5_000.0,
        6 => 7_500.0,
        5 => 10_000.0,
        4 => 15_000.0,
        3 => 20_000.0,
        _ => 25_000.0,
    }
}

impl GeocodeFeature {
    /// `[lon, lat]` of a Point geometry.
    pub fn point(&self) -> Option<GeoPoint> {
        let geometry = self.geometry.as_ref().filter(|g| g.kind == "Point")?;
        let coordinates = geometry.coordinates.as_array()?;
        let lon = coordinates.first()?.as_f64()?;
        let lat = coordinates.get(1)?.as_f64()?;
        GeoPoint::new(lat, lon).ok()
    }

    /// The area to count visits in: the bounds when the provider gave them,
    /// otherwise a radius around the point sized by confidence. `None` when
    /// the feature has neither.
    pub fn search_area(&self) -> Option<SearchArea> {
        if let Some(bounds) = &self.properties.bounds {
            return Some(SearchArea::BoundingBox {
                north_east: GeoPoint::new(bounds.northeast.lat, bounds.northeast.lng).ok()?,
                south_west: GeoPoint::new(bounds.southwest.lat, bounds.southwest.lng).ok()?,
            });
        }
        let confidence = self.properties.confidence.filter(|c| (1.0..=10.0).contains(c))?;
        let center = self.point()?;
        Some(SearchArea::Radius {
            center,
            meters: radius_for_confidence(confidence.round() as u8),
        })
    }

    pub fn formatted(&self) -> &str {
        self.properties.formatted.as_deref().unwrap_or_default()
    }
}

/// Geocoder over HTTP. The API key, if any, is sent as the `key` parameter.
#[derive(Clone)]
pub struct HttpGeocoder {
    client: ApiClient,
    api_key: Option<String>,
}

impl HttpGeocoder {
    pub fn new(base_url: &str, api_key: Option<String>, max_retries: u32) -> Result<Self, GeocodeError> {
        Ok(Self {
            client: ApiClient::new(base_url, max_retries)?,
            api_key,
        })
    }

    fn with_key<'a>(&self, mut query: Vec<(&'a str, String)>) -> Vec<(&'a str, String)> {
        if let Some(key) = &self.api_key {
            query.push(("key", key.clone()));
        }
        query
    }

    async fn get(&self, query: Vec<(&str, String)>) -> Result<Value, GeocodeError> {
        let response = self.client.get_json::<Value>("", &self.with_key(query)).await?;
        match response.data {
            Some(body) if response.success => Ok(body),
            _ => Err(GeocodeError::Status {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl GeocodingProvider for HttpGeocoder {
    async fn reverse(&self, point: GeoPoint) -> Result<Geocoding, GeocodeError> {
        let body = self
            .get(vec![("latlng", format!("{},{}", point.lat, point.lon))])
            .await?;
        match body.get("status").and_then(Value::as_str) {
            Some(status) if status != "OK" => Err(GeocodeError::Rejected(status.to_string())),
            _ => Ok(Geocoding(body)),
        }
    }

    async fn search(&self, place: &str) -> Result<Vec<GeocodeFeature>, GeocodeError> {
        let body = self
            .get(vec![("q", place.to_string()), ("format", "geojson".to_string())])
            .await?;
        let collection: FeatureCollection =
            serde_json::from_value(body).map_err(|e| GeocodeError::Transport(e.into()))?;
        Ok(collection.features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(value: Value) -> GeocodeFeature {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn confidence_table() {
        let table = [(10, 250.0), (9, 500.0), (8, 1000.0), (7, 5000.0), (6, 7500.0), (5, 10000.0), (4, 15000.0), (3, 20000.0), (2, 25000.0), (1, 25000.0)];
        for (confidence, meters) in table {
            assert_eq!(radius_for_confidence(confidence), meters);
        }
    }

    #[test]
    fn bounds_take_precedence() {
        let f = feature(json!({
            "properties": {
                "bounds": { "northeast": { "lat": 53.9, "lng": -1.4 }, "southwest": { "lat": 53.7, "lng": -1.7 } },
                "confidence": 9,
                "formatted": "Leeds, UK"
            },
            "geometry": { "type": "Point", "coordinates": [-1.55, 53.8] }
        }));

        assert_eq!(
            f.search_area(),
            Some(SearchArea::BoundingBox {
                north_east: GeoPoint { lat: 53.9, lon: -1.4 },
                south_west: GeoPoint { lat: 53.7, lon: -1.7 },
            })
        );
        assert_eq!(f.formatted(), "Leeds, UK");
    }

    #[test]
    fn point_and_confidence_give_a_radius() {
        let f = feature(json!({
            "properties": { "confidence": 8 },
            "geometry": { "type": "Point", "coordinates": [-1.55, 53.8] }
        }));

        assert_eq!(
            f.search_area(),
            Some(SearchArea::Radius {
                center: GeoPoint { lat: 53.8, lon: -1.55 },
                meters: 1000.0,
            })
        );
    }

    #[test]
    fn no_usable_geometry() {
        let no_confidence = feature(json!({
            "properties": {},
            "geometry": { "type": "Point", "coordinates": [-1.55, 53.8] }
        }));
        let out_of_range = feature(json!({
            "properties": { "confidence": 0 },
            "geometry": { "type": "Point", "coordinates": [-1.55, 53.8] }
        }));
        let polygon = feature(json!({
            "properties": { "confidence": 5 },
            "geometry": { "type": "Polygon", "coordinates": [] }
        }));

        assert!(no_confidence.search_area().is_none());
        assert!(out_of_range.search_area().is_none());
        assert!(polygon.search_area().is_none());
    }
}
