//! # API
//!
//! The HTTP query facade and the WebSocket live responder, plus the error and
//! alerting plumbing they share.

pub mod alerts;
pub mod error;
pub mod live;
pub mod routes;
pub mod schema;

pub use alerts::{Alerter, LogAlerter};
pub use error::ApiError;
pub use routes::{router, serve, AppState, VERSION};
