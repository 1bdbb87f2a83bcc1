//! Great-circle distance between coordinate pairs.

use grant_scout_geo_models::CoordinatePair;

/// Mean Earth radius in miles.
pub const EARTH_RADIUS_MILES: f64 = 3959.0;

/// Haversine distance in miles between two coordinates.
///
/// Symmetric in its arguments and exactly `0.0` for identical points. The
/// haversine term is clamped into `[0, 1]` so floating-point overshoot near
/// antipodal points cannot push `sqrt(1 - h)` out of its domain.
#[must_use]
pub fn haversine_miles(a: CoordinatePair, b: CoordinatePair) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);

    let central_angle = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_MILES * central_angle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> CoordinatePair {
        CoordinatePair::new(lat, lon).unwrap()
    }

    #[test]
    fn beverly_hills_to_manhattan() {
        let d = haversine_miles(point(34.0901, -118.4065), point(40.7500, -73.9967));
        assert!((2400.0..=2500.0).contains(&d), "got {d}");
    }

    #[test]
    fn is_symmetric() {
        let a = point(30.2672, -97.7431);
        let b = point(42.3601, -71.0589);
        assert!((haversine_miles(a, b) - haversine_miles(b, a)).abs() < 1e-9);
    }

    #[test]
    fn identical_points_are_zero() {
        let a = point(42.3601, -71.0589);
        assert!(haversine_miles(a, a).abs() < 1e-9);
    }

    #[test]
    fn antipodal_points_are_half_circumference() {
        let d = haversine_miles(point(0.0, 0.0), point(0.0, 180.0));
        assert!(d.is_finite());
        assert!((d - EARTH_RADIUS_MILES * std::f64::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn pole_to_pole_is_finite() {
        let d = haversine_miles(point(90.0, 0.0), point(-90.0, 0.0));
        assert!((d - EARTH_RADIUS_MILES * std::f64::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn tiny_separation_is_small_and_positive() {
        let d = haversine_miles(point(40.0, -75.0), point(40.000_001, -75.0));
        assert!(d > 0.0 && d < 0.001);
    }
}
