//! Background enrichment of stored samples.

pub mod worker;

pub use worker::{EnrichmentWorker, Outcome};
