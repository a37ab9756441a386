//! # Configuration Modules
//!
//! Layered configuration for the locator: built-in defaults, then an optional
//! JSON file, then environment variables and command-line flags.

/// Locator settings, their loading order and validation.
pub mod config_locator;
