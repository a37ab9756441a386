//! # Retrieve
//!
//! Outbound HTTP: a retrying JSON client and the geocoding provider built on it.

pub mod api_client;
pub mod geocoder;

pub use api_client::{ApiClient, ApiResponse};
pub use geocoder::{GeocodeError, GeocodeFeature, GeocodingProvider, HttpGeocoder};
