//! # Loggers
//!
//! Process-wide `tracing` setup: console output plus an optional log file.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, LoggerError};
