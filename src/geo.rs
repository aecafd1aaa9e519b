//! Straight-line spherical geometry used by shared-ride matching.
//!
//! Everything here works on raw coordinates; road-network distances are
//! deliberately not used so candidate scoring never touches an external
//! directions service.

use crate::entities::Coordinates;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
pub fn haversine_m(a: Coordinates, b: Coordinates) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Initial great-circle bearing from `from` to `to`, in degrees 0..360.
pub fn bearing_deg(from: Coordinates, to: Coordinates) -> f64 {
    let lat_a = from.latitude.to_radians();
    let lat_b = to.latitude.to_radians();
    let d_lng = (to.longitude - from.longitude).to_radians();

    let y = d_lng.sin() * lat_b.cos();
    let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * d_lng.cos();

    y.atan2(x).to_degrees().rem_euclid(360.0)
}

/// Smallest absolute angle between two bearings, in degrees 0..=180.
pub fn bearing_diff_deg(a: f64, b: f64) -> f64 {
    let diff = (a - b).rem_euclid(360.0);
    diff.min(360.0 - diff)
}

/// Distance in meters from `point` to the straight segment `start`-`end`.
///
/// Coordinates are projected onto a local equirectangular plane centred on
/// `start`; accurate enough at the few-kilometer scale matching operates
/// on.
pub fn point_to_segment_m(point: Coordinates, start: Coordinates, end: Coordinates) -> f64 {
    let (px, py) = project(point, start);
    let (ex, ey) = project(end, start);

    let segment_len_sq = ex * ex + ey * ey;
    if segment_len_sq == 0.0 {
        return (px * px + py * py).sqrt();
    }

    let t = ((px * ex + py * ey) / segment_len_sq).clamp(0.0, 1.0);
    let dx = px - t * ex;
    let dy = py - t * ey;

    (dx * dx + dy * dy).sqrt()
}

fn project(point: Coordinates, origin: Coordinates) -> (f64, f64) {
    let x = (point.longitude - origin.longitude).to_radians()
        * origin.latitude.to_radians().cos()
        * EARTH_RADIUS_M;
    let y = (point.latitude - origin.latitude).to_radians() * EARTH_RADIUS_M;

    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_DEGREE_LAT_M: f64 = 111_194.9;

    #[test]
    fn haversine_one_degree_of_latitude() {
        let d = haversine_m(Coordinates::new(0.0, 0.0), Coordinates::new(0.0, 1.0));
        assert!((d - ONE_DEGREE_LAT_M).abs() < 10.0);
    }

    #[test]
    fn haversine_zero_for_same_point() {
        let p = Coordinates::new(90.4, 23.8);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn bearing_cardinal_directions() {
        let origin = Coordinates::new(0.0, 0.0);

        assert!(bearing_deg(origin, Coordinates::new(0.0, 1.0)).abs() < 1e-6);
        assert!((bearing_deg(origin, Coordinates::new(1.0, 0.0)) - 90.0).abs() < 1e-6);
        assert!((bearing_deg(origin, Coordinates::new(0.0, -1.0)) - 180.0).abs() < 1e-6);
        assert!((bearing_deg(origin, Coordinates::new(-1.0, 0.0)) - 270.0).abs() < 1e-6);
    }

    #[test]
    fn bearing_diff_wraps_around_north() {
        assert!((bearing_diff_deg(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((bearing_diff_deg(10.0, 350.0) - 20.0).abs() < 1e-9);
        assert_eq!(bearing_diff_deg(90.0, 90.0), 0.0);
    }

    #[test]
    fn point_beside_segment_uses_perpendicular_distance() {
        // segment running north along the prime meridian, point 0.01 deg east
        let d = point_to_segment_m(
            Coordinates::new(0.01, 0.5),
            Coordinates::new(0.0, 0.0),
            Coordinates::new(0.0, 1.0),
        );
        assert!((d - ONE_DEGREE_LAT_M * 0.01).abs() < 20.0);
    }

    #[test]
    fn point_past_segment_end_uses_endpoint_distance() {
        let d = point_to_segment_m(
            Coordinates::new(0.0, 1.5),
            Coordinates::new(0.0, 0.0),
            Coordinates::new(0.0, 1.0),
        );
        assert!((d - ONE_DEGREE_LAT_M * 0.5).abs() < 50.0);
    }

    #[test]
    fn degenerate_segment_falls_back_to_point_distance() {
        let p = Coordinates::new(0.0, 0.0);
        let d = point_to_segment_m(Coordinates::new(0.0, 0.01), p, p);
        assert!((d - ONE_DEGREE_LAT_M * 0.01).abs() < 5.0);
    }
}
