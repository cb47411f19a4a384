//! Spherical-earth geodesy helpers.
//!
//! Everything here is a pure function taking and returning degrees; radians
//! only appear internally. The earth is modelled as a sphere of radius
//! 6,371 km, which is well inside GPS error at geofence scales.

use serde::{Deserialize, Serialize};

/// Mean earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters (haversine).
pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1 for antipodal points.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from point 1 to point 2, degrees in [0, 360).
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    normalize_bearing(y.atan2(x).to_degrees())
}

/// Point reached by travelling `distance_m` from (lat, lon) along `bearing_deg`.
///
/// Returns (lat, lon) in degrees, longitude wrapped to [-180, 180].
pub fn destination_point(lat: f64, lon: f64, bearing_deg: f64, distance_m: f64) -> (f64, f64) {
    let delta = distance_m / EARTH_RADIUS_M;
    let theta = bearing_deg.to_radians();
    let phi1 = lat.to_radians();
    let lambda1 = lon.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * theta.cos()).asin();
    let lambda2 = lambda1
        + (theta.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    (phi2.to_degrees(), wrap_longitude(lambda2.to_degrees()))
}

/// True when the user is at or inside `radius_m` of the destination.
pub fn is_within_radius(user_lat: f64, user_lon: f64, dest_lat: f64, dest_lon: f64, radius_m: f64) -> bool {
    distance(user_lat, user_lon, dest_lat, dest_lon) <= radius_m
}

/// Linear interpolation between two coordinates. Fine for the short spans
/// between consecutive fixes; not a great-circle interpolation.
pub fn interpolate(a: (f64, f64), b: (f64, f64), fraction: f64) -> (f64, f64) {
    (a.0 + (b.0 - a.0) * fraction, a.1 + (b.1 - a.1) * fraction)
}

/// Human-readable distance: "420m" below a kilometre, "3.2km" above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{}m", meters.round() as i64)
    } else {
        format!("{:.1}km", meters / 1000.0)
    }
}

/// Maps any angle in degrees onto [0, 360).
pub fn normalize_bearing(deg: f64) -> f64 {
    let b = deg.rem_euclid(360.0);
    // rem_euclid can return exactly 360.0 for tiny negative inputs.
    if b >= 360.0 {
        0.0
    } else {
        b
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    let wrapped = (lon + 540.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// Eight-way compass sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompassDirection {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl CompassDirection {
    const ALL: [CompassDirection; 8] = [
        CompassDirection::N,
        CompassDirection::NE,
        CompassDirection::E,
        CompassDirection::SE,
        CompassDirection::S,
        CompassDirection::SW,
        CompassDirection::W,
        CompassDirection::NW,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CompassDirection::N => "N",
            CompassDirection::NE => "NE",
            CompassDirection::E => "E",
            CompassDirection::SE => "SE",
            CompassDirection::S => "S",
            CompassDirection::SW => "SW",
            CompassDirection::W => "W",
            CompassDirection::NW => "NW",
        }
    }
}

/// Buckets a bearing into one of 8 sectors: `round(bearing / 45) mod 8`.
pub fn compass_sector(bearing_deg: f64) -> CompassDirection {
    let index = (normalize_bearing(bearing_deg) / 45.0).round() as usize % 8;
    CompassDirection::ALL[index]
}

/// Where the destination lies relative to the direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionIndicator {
    /// Absolute bearing to the destination, [0, 360).
    pub bearing_deg: f64,
    /// Bearing relative to current heading, (-180, 180].
    pub relative_deg: f64,
    /// Destination is in the forward half-plane.
    pub toward_destination: bool,
}

pub fn direction_indicator(
    lat: f64,
    lon: f64,
    dest_lat: f64,
    dest_lon: f64,
    heading_deg: Option<f64>,
) -> DirectionIndicator {
    let to_dest = bearing(lat, lon, dest_lat, dest_lon);
    let mut diff = to_dest - heading_deg.unwrap_or(0.0);
    while diff > 180.0 {
        diff -= 360.0;
    }
    while diff <= -180.0 {
        diff += 360.0;
    }

    DirectionIndicator {
        bearing_deg: to_dest,
        relative_deg: diff,
        toward_destination: diff.abs() < 90.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LONDON: (f64, f64) = (51.5074, -0.1278);
    const PARIS: (f64, f64) = (48.8566, 2.3522);

    #[test]
    fn test_london_paris_distance() {
        let d = distance(LONDON.0, LONDON.1, PARIS.0, PARIS.1);
        assert!((d - 343_000.0).abs() < 3_430.0, "London→Paris should be ~343km, got {}", d);
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(distance(LONDON.0, LONDON.1, LONDON.0, LONDON.1), 0.0);
    }

    #[test]
    fn test_cardinal_bearings() {
        assert!((bearing(0.0, 0.0, 1.0, 0.0) - 0.0).abs() < 1e-9);
        assert!((bearing(0.0, 0.0, 0.0, 1.0) - 90.0).abs() < 1e-9);
        assert!((bearing(0.0, 0.0, -1.0, 0.0) - 180.0).abs() < 1e-9);
        assert!((bearing(0.0, 0.0, 0.0, -1.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_destination_point_east() {
        let (lat, lon) = destination_point(0.0, 0.0, 90.0, 50.0);
        assert!(lat.abs() < 1e-9);
        assert!((distance(0.0, 0.0, lat, lon) - 50.0).abs() < 1e-6);
        assert!(lon > 0.0);
    }

    #[test]
    fn test_destination_point_wraps_dateline() {
        let (_, lon) = destination_point(0.0, 179.9999, 90.0, 1000.0);
        assert!((-180.0..=180.0).contains(&lon), "longitude {} not wrapped", lon);
        assert!(lon < 0.0);
    }

    #[test]
    fn test_compass_sectors() {
        assert_eq!(compass_sector(0.0), CompassDirection::N);
        assert_eq!(compass_sector(22.4), CompassDirection::N);
        assert_eq!(compass_sector(22.6), CompassDirection::NE);
        assert_eq!(compass_sector(90.0), CompassDirection::E);
        assert_eq!(compass_sector(350.0), CompassDirection::N);
        assert_eq!(compass_sector(225.0), CompassDirection::SW);
        assert_eq!(compass_sector(315.0).label(), "NW");
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(420.4), "420m");
        assert_eq!(format_distance(999.4), "999m");
        assert_eq!(format_distance(3240.0), "3.2km");
    }

    #[test]
    fn test_direction_indicator() {
        // Destination due east, travelling north: 90° to the right.
        let ind = direction_indicator(0.0, 0.0, 0.0, 1.0, Some(0.0));
        assert!((ind.relative_deg - 90.0).abs() < 1e-9);
        assert!(!ind.toward_destination);

        // Travelling east toward it.
        let ind = direction_indicator(0.0, 0.0, 0.0, 1.0, Some(80.0));
        assert!(ind.toward_destination);

        // Heading 350, destination at 10: relative +20, not -340.
        let ind = direction_indicator(0.0, 0.0, 1.0, 0.176, Some(350.0));
        assert!(ind.relative_deg > 0.0 && ind.relative_deg < 30.0);
    }

    #[test]
    fn test_within_radius_boundary() {
        let (lat, lon) = destination_point(0.0, 0.0, 0.0, 499.0);
        assert!(is_within_radius(lat, lon, 0.0, 0.0, 500.0));
        let (lat, lon) = destination_point(0.0, 0.0, 0.0, 501.0);
        assert!(!is_within_radius(lat, lon, 0.0, 0.0, 500.0));
    }

    #[test]
    fn test_interpolate_midpoint() {
        let mid = interpolate((0.0, 0.0), (2.0, 4.0), 0.5);
        assert_eq!(mid, (1.0, 2.0));
    }

    proptest! {
        #[test]
        fn prop_distance_symmetric(
            lat1 in -90.0f64..90.0, lon1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0, lon2 in -180.0f64..180.0,
        ) {
            let ab = distance(lat1, lon1, lat2, lon2);
            let ba = distance(lat2, lon2, lat1, lon1);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!(ab >= 0.0);
        }

        #[test]
        fn prop_bearing_in_range(
            lat1 in -89.0f64..89.0, lon1 in -180.0f64..180.0,
            lat2 in -89.0f64..89.0, lon2 in -180.0f64..180.0,
        ) {
            let b = bearing(lat1, lon1, lat2, lon2);
            prop_assert!((0.0..360.0).contains(&b), "bearing {} out of range", b);
        }

        #[test]
        fn prop_projection_inverts_distance(
            lat in -60.0f64..60.0, lon in -170.0f64..170.0,
            brg in 0.0f64..360.0, dist in 1.0f64..20_000.0,
        ) {
            let (lat2, lon2) = destination_point(lat, lon, brg, dist);
            let back = distance(lat, lon, lat2, lon2);
            prop_assert!((back - dist).abs() < 1e-3, "projected {} got {}", dist, back);
        }
    }
}
