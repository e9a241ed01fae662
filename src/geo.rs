//! Geospatial helpers: great-circle distance, initial bearing and circular
//! containment.
//!
//! All functions are pure. Coordinates are WGS84 degrees.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;
const RAD_TO_DEG: f64 = 180.0 / std::f64::consts::PI;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both components are finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

impl std::str::FromStr for Coordinate {
    type Err = String;

    /// Parses `"lat,lng"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s
            .split_once(',')
            .ok_or_else(|| format!("expected 'lat,lng', got '{s}'"))?;
        let latitude: f64 = lat
            .trim()
            .parse()
            .map_err(|e| format!("bad latitude '{lat}': {e}"))?;
        let longitude: f64 = lng
            .trim()
            .parse()
            .map_err(|e| format!("bad longitude '{lng}': {e}"))?;
        let c = Coordinate::new(latitude, longitude);
        if !c.is_valid() {
            return Err(format!("coordinate out of range: {s}"));
        }
        Ok(c)
    }
}

/// Great-circle distance between two points using the haversine formula.
///
/// # Returns
///
/// Distance in meters, always `>= 0`.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude * DEG_TO_RAD;
    let lat2 = b.latitude * DEG_TO_RAD;
    let delta_lat = (b.latitude - a.latitude) * DEG_TO_RAD;
    let delta_lon = (b.longitude - a.longitude) * DEG_TO_RAD;

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push h marginally above 1 for antipodal points.
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Initial compass bearing from `a` towards `b`, normalized to `[0, 360)`.
pub fn bearing_degrees(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude * DEG_TO_RAD;
    let lat2 = b.latitude * DEG_TO_RAD;
    let delta_lon = (b.longitude - a.longitude) * DEG_TO_RAD;

    let y = delta_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta_lon.cos();

    let bearing = (y.atan2(x) * RAD_TO_DEG).rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs
    if bearing >= 360.0 { 0.0 } else { bearing }
}

/// True iff `point` lies within `radius_m` of `center`.
pub fn is_inside_geofence(point: Coordinate, center: Coordinate, radius_m: f64) -> bool {
    distance_meters(point, center) <= radius_m
}

/// Point reached by travelling `distance_m` from `origin` along `bearing`
/// degrees. Used to synthesize movement in demos and tests.
pub fn destination_point(origin: Coordinate, bearing: f64, distance_m: f64) -> Coordinate {
    let angular = distance_m / EARTH_RADIUS_M;
    let theta = bearing * DEG_TO_RAD;
    let lat1 = origin.latitude * DEG_TO_RAD;
    let lon1 = origin.longitude * DEG_TO_RAD;

    let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * angular.sin() * lat1.cos()).atan2(angular.cos() - lat1.sin() * lat2.sin());

    let longitude = (lon2 * RAD_TO_DEG + 540.0).rem_euclid(360.0) - 180.0;
    Coordinate::new(lat2 * RAD_TO_DEG, longitude)
}
