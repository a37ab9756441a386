//! # Locations
//!
//! The location data model, great-circle helpers and the store. The store is
//! split into a [`LocationRepository`] (where samples live: Postgres/PostGIS or
//! memory) and the [`LocationStore`] facade that every component talks to,
//! which also rings the enrichment doorbell after each insert.

pub mod geo;
pub mod memory_repository;
pub mod model;
pub mod postgres_repository;
pub mod repository;
pub mod store;

pub use memory_repository::InMemoryLocationRepository;
pub use model::{
    DayCount, GeoPoint, Geocoding, LocationSample, PendingGeocode, PointError, SampleRef, SearchArea, TrackPoint,
};
pub use postgres_repository::PostgresLocationRepository;
pub use repository::{LocationRepository, StoreError};
pub use store::LocationStore;
