//! # Connections Module
//!
//! Persistent connections to external services.

/// Module for PostgreSQL database connection pooling and management.
pub mod db_postgres;

pub use db_postgres::{Database, DbError};
