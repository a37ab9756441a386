//! # lib_locator
//!
//! Device location pipeline: an MQTT ingest listener feeding a location store,
//! a single reverse-geocoding worker woken by a bounded doorbell queue, and an
//! HTTP/WebSocket query facade. Each folder is gated behind a cargo feature of
//! the same name so binaries only pull in what they use.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "locations")]
pub mod pipeline;

#[cfg(feature = "locations")]
pub mod locations;

#[cfg(feature = "ingestors")]
pub mod ingestors;

#[cfg(feature = "retrieve")]
pub mod retrieve;

#[cfg(feature = "enrichment")]
pub mod enrichment;

#[cfg(feature = "api")]
pub mod api;

#[cfg(feature = "configs")]
pub use configs::config_locator::{ConfigError, LocatorConfig};
#[cfg(feature = "locations")]
pub use pipeline::{Doorbell, DoorbellReceiver, ShutdownCoordinator};
#[cfg(feature = "locations")]
pub use locations::{GeoPoint, Geocoding, LocationSample, LocationStore, SampleRef, StoreError};
