//! Great-circle helpers used for derived speed and travelled distance.

use super::model::{GeoPoint, SearchArea};

/// Mean Earth radius.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;
pub const METERS_PER_MILE: f64 = 1_609.344;

fn deg_to_rad(deg: f64) -> f64 {
    deg * std::f64::consts::PI / 180.0
}

/// Calculate the great circle distance between two WGS84 points using the Haversine formula.
pub fn haversine_meters(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let lat1_rad = deg_to_rad(p1.lat);
    let lat2_rad = deg_to_rad(p2.lat);
    let delta_lat = deg_to_rad(p2.lat - p1.lat);
    let delta_lon = deg_to_rad(p2.lon - p1.lon);

    let a = (delta_lat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

pub fn meters_to_miles(meters: f64) -> f64 {
    meters / METERS_PER_MILE
}

/// km/h from metres covered in `seconds`; 0 when no time has passed.
pub fn speed_kmh(distance_meters: f64, seconds: f64) -> f64 {
    if seconds <= 0.0 {
        return 0.0;
    }
    3.6 * distance_meters / seconds
}

impl SearchArea {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        match self {
            SearchArea::BoundingBox { north_east, south_west } => {
                let lat_ok = point.lat >= south_west.lat && point.lat <= north_east.lat;
                // A box crossing the antimeridian has its west edge east of its east edge.
                let lon_ok = if south_west.lon <= north_east.lon {
                    point.lon >= south_west.lon && point.lon <= north_east.lon
                } else {
                    point.lon >= south_west.lon || point.lon <= north_east.lon
                };
                lat_ok && lon_ok
            }
            SearchArea::Radius { center, meters } => haversine_meters(center, point) <= *meters,
        }
    }
}
