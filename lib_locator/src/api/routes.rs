//! # Query Facade
//!
//! HTTP routes over the [`LocationStore`]:
//!
//! | Route                              | Purpose                                   |
//! |------------------------------------|-------------------------------------------|
//! | `GET  /where/data/api/0/list`      | configured device ids                     |
//! | `GET  /where/data/api/0/last`      | newest geocoded position                  |
//! | `GET  /where/data/api/0/locations` | positions in `[from, to)`, newest first   |
//! | `GET  /where/data/api/0/version`   | static version string                     |
//! | `GET  /where/data/ws/last`         | WebSocket `LAST` responder                |
//! | `POST /where/place`                | days spent near a searched place          |
//! | `GET  /location/`                  | public summary with yearly distance       |
//! | `HEAD /location/`                  | `Last-Modified` of the summary only       |
//! | `POST /locator`                    | legacy form ingest                        |

use axum::{
    extract::{rejection::FormRejection, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use super::alerts::{raise, Alerter};
use super::error::ApiError;
use super::live::ws_last;
use super::schema::{
    DeviceList, LocationSummary, OwnTracksPosition, PlaceQuery, PlaceVisits, Track, Version,
};
use crate::ingestors::LegacyReport;
use crate::locations::{LocationSample, LocationStore};
use crate::retrieve::GeocodingProvider;

pub const VERSION: &str = "1.0-locator";
/// `from`/`to` query format, read as UTC.
pub const RANGE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const PLACE_VISIT_LIMIT: usize = 20;
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Shared, cheaply cloneable handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: LocationStore,
    pub geocoder: Arc<dyn GeocodingProvider>,
    pub alerter: Arc<dyn Alerter>,
    pub device_ids: Arc<Vec<String>>,
    /// Cancelled when the server begins shutting down; live sockets watch it.
    pub shutdown: CancellationToken,
}

impl AppState {
    fn fail(&self, context: &'static str, err: impl Into<ApiError>) -> ApiError {
        let err = err.into();
        raise(&self.alerter, context, &err);
        err
    }
}

pub fn router(state: AppState) -> Router {
    let recorder_api = Router::new()
        .route("/list", get(list_devices))
        .route("/last", get(last_position))
        .route("/locations", get(locations_between))
        .route("/version", get(version));

    Router::new()
        .nest("/where/data/api/0", recorder_api)
        .route("/where/data/ws/last", get(ws_last))
        .route("/where/place", post(place_visits))
        .route("/location/", get(location_summary).head(location_head))
        .route("/locator", post(legacy_locator))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until `shutdown` is cancelled, then lets in-flight requests finish.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Query API listening on {}", addr);
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Query API shutting down, draining in-flight requests.");
        })
        .await
}

async fn list_devices(State(state): State<AppState>) -> Json<DeviceList> {
    Json(DeviceList {
        results: state.device_ids.as_ref().clone(),
    })
}

async fn last_position(State(state): State<AppState>) -> Result<Json<Vec<OwnTracksPosition>>, ApiError> {
    let last = state.store.get_last().await.map_err(|e| state.fail("last", e))?;
    Ok(Json(vec![OwnTracksPosition::from(&last)]))
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Parses one bound; absent values fall back to `default`.
pub fn parse_range_bound(name: &str, raw: Option<&str>, default: DateTime<Utc>) -> Result<DateTime<Utc>, ApiError> {
    match raw {
        None => Ok(default),
        Some(value) => NaiveDateTime::parse_from_str(value, RANGE_TIME_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(|e| ApiError::Validation(format!("Invalid {name} time {value}: {e}"))),
    }
}

async fn locations_between(
    State(state): State<AppState>,
    Query(params): Query<RangeParams>,
) -> Result<Json<Track>, ApiError> {
    let now = Utc::now();
    let from = parse_range_bound("from", params.from.as_deref(), now - ChronoDuration::hours(24))?;
    let to = parse_range_bound("to", params.to.as_deref(), now)?;

    let points = state.store.get_range(from, to).await.map_err(|e| state.fail("locations", e))?;
    debug!(from = %from, to = %to, count = points.len(), "Range query served.");
    Ok(Json(Track {
        data: points.iter().map(OwnTracksPosition::from).collect(),
    }))
}

async fn version() -> Json<Version> {
    Json(Version {
        version: VERSION.to_string(),
    })
}

/// `1234567.891` -> `1,234,567.89`
pub fn format_distance(miles: f64) -> String {
    let fixed = format!("{:.2}", miles.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if miles < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{fraction}")
}

fn last_modified(sample: &LocationSample) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let stamp = sample.server_timestamp.format(HTTP_DATE_FORMAT).to_string();
    if let Ok(value) = HeaderValue::from_str(&stamp) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    headers
}

async fn location_summary(State(state): State<AppState>) -> Result<(HeaderMap, Json<LocationSummary>), ApiError> {
    let last = state.store.get_last().await.map_err(|e| state.fail("location", e))?;
    let miles = state
        .store
        .get_total_distance_this_year()
        .await
        .map_err(|e| state.fail("location", e))?;

    let summary = LocationSummary {
        name: last.geocoding.as_ref().map(|g| g.display_address()).unwrap_or_default(),
        latitude: format!("{:.2}", last.point.lat),
        longitude: format!("{:.2}", last.point.lon),
        total_distance: format_distance(miles),
    };
    Ok((last_modified(&last), Json(summary)))
}

async fn location_head(State(state): State<AppState>) -> Result<(StatusCode, HeaderMap), ApiError> {
    let last = state.store.get_last().await.map_err(|e| state.fail("location", e))?;
    Ok((StatusCode::OK, last_modified(&last)))
}

async fn place_visits(
    State(state): State<AppState>,
    form: Result<Form<PlaceQuery>, FormRejection>,
) -> Result<Json<PlaceVisits>, ApiError> {
    let Form(query) = form.map_err(|e| ApiError::Validation(e.body_text()))?;
    let place = query.place.trim().to_string();
    if place.is_empty() {
        return Err(ApiError::Validation("place must not be empty".into()));
    }

    let features = state.geocoder.search(&place).await.map_err(|e| state.fail("place", e))?;
    let Some(feature) = features.first() else {
        return Ok(Json(PlaceVisits {
            place,
            formatted: String::new(),
            results: Vec::new(),
        }));
    };
    let area = feature.search_area().ok_or_else(|| {
        state.fail(
            "place",
            ApiError::Internal("No valid geometries found in geocoding response".into()),
        )
    })?;

    let days = state
        .store
        .visits_within(&area, PLACE_VISIT_LIMIT)
        .await
        .map_err(|e| state.fail("place", e))?;

    Ok(Json(PlaceVisits {
        formatted: feature.formatted().to_string(),
        place,
        results: days.into_iter().map(Into::into).collect(),
    }))
}

async fn legacy_locator(
    State(state): State<AppState>,
    form: Result<Form<LegacyReport>, FormRejection>,
) -> Result<StatusCode, ApiError> {
    let Form(report) = form.map_err(|e| ApiError::Validation(e.body_text()))?;
    let sample = report
        .to_sample(Utc::now())
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    let id = state.store.insert(&sample).await.map_err(|e| state.fail("locator", e))?;
    debug!(sample_id = %id, device_id = %sample.device_id, "Legacy location received.");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_grouped_with_two_decimals() {
        assert_eq!(format_distance(0.0), "0.00");
        assert_eq!(format_distance(12.345), "12.35");
        assert_eq!(format_distance(999.999), "1,000.00");
        assert_eq!(format_distance(1234567.891), "1,234,567.89");
        assert_eq!(format_distance(123456.0), "123,456.00");
    }

    #[test]
    fn range_bounds_parse_as_utc() {
        let fallback = Utc::now();
        let parsed = parse_range_bound("from", Some("2024-03-01T12:30:00"), fallback).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-03-01T12:30:00+00:00");
        assert_eq!(parse_range_bound("to", None, fallback).unwrap(), fallback);
        assert!(matches!(
            parse_range_bound("from", Some("yesterday"), fallback),
            Err(ApiError::Validation(_))
        ));
    }
}
