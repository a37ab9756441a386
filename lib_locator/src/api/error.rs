use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::locations::StoreError;
use crate::retrieve::GeocodeError;

/// # API Error
///
/// Every failure a handler can return. Rendered as
/// `{"error_type", "message", "detail"}` with the matching status code.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request parameters; raised before the store is touched.
    #[error("Validation error: {0}")]
    Validation(String),
    /// No sample matched. There is no dedicated "no data yet" status, so
    /// this is a server error like the others.
    #[error("No location data available")]
    NotFound,
    #[error("Location store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Geocoding failed: {0}")]
    Geocoding(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether operators should hear about it.
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            ApiError::StoreUnavailable(_) | ApiError::Geocoding(_) | ApiError::Internal(_)
        )
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "ValidationError",
            ApiError::NotFound => "NotFound",
            ApiError::StoreUnavailable(_) => "StoreUnavailable",
            ApiError::Geocoding(_) => "GeocodingError",
            ApiError::Internal(_) => "InternalError",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Unavailable(detail) => ApiError::StoreUnavailable(detail),
        }
    }
}

impl From<GeocodeError> for ApiError {
    fn from(e: GeocodeError) -> Self {
        ApiError::Geocoding(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, detail) = match &self {
            ApiError::Validation(detail) => {
                warn!("Rejected request: {}", detail);
                ("Invalid request parameters.", detail.clone())
            }
            ApiError::NotFound => ("No location data available.", String::new()),
            ApiError::StoreUnavailable(detail) => {
                error!("Location store error: {}", detail);
                ("The location store is unavailable.", detail.clone())
            }
            ApiError::Geocoding(detail) => {
                error!("Geocoding error: {}", detail);
                ("The geocoding provider failed.", detail.clone())
            }
            ApiError::Internal(detail) => {
                error!("Internal error: {}", detail);
                ("Internal server error.", detail.clone())
            }
        };
        let body = json!({
            "error_type": self.error_type(),
            "message": message,
            "detail": detail,
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::Validation("bad".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::from(StoreError::Unavailable("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(matches!(ApiError::from(StoreError::NotFound), ApiError::NotFound));
    }

    #[test]
    fn only_failures_of_our_own_are_alerted() {
        assert!(!ApiError::Validation("bad".into()).is_unexpected());
        assert!(!ApiError::NotFound.is_unexpected());
        assert!(ApiError::StoreUnavailable("down".into()).is_unexpected());
        assert!(ApiError::Internal("boom".into()).is_unexpected());
    }
}
