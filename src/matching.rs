//! Shared-ride compatibility scoring.
//!
//! Selection is pure: candidates are fetched by the engine's proximity
//! query and scored here against the new request. Pairing (the state
//! mutation) stays with the dispatch side so this module can be tested in
//! isolation.

use crate::entities::RideRequest;
use crate::geo;

/// Radius of the pending-request proximity search around the new pickup.
pub const CANDIDATE_RADIUS_M: f64 = 2000.0;
/// Deterministic cap on the scored candidate set.
pub const CANDIDATE_LIMIT: i64 = 15;

/// Candidates whose pickup->dropoff bearings diverge more than this score 0.
pub const MAX_BEARING_DIFF_DEG: f64 = 35.0;
/// Each dropoff within this distance of the other ride's segment earns 0.5.
pub const PATH_THRESHOLD_M: f64 = 2000.0;
/// Dropoffs this close together earn a flat clustering bonus.
pub const DROPOFF_CLUSTER_M: f64 = 3000.0;
/// Minimum score a candidate must reach to be paired at all.
pub const MIN_MATCH_SCORE: f64 = 0.5;

const BEARING_WEIGHT: f64 = 0.6;
const PATH_WEIGHT: f64 = 0.4;
const CLUSTER_BONUS: f64 = 0.3;

/// Scores how well two shared requests can ride together, in 0.0..=1.0.
pub fn compatibility(ride: &RideRequest, candidate: &RideRequest) -> f64 {
    let ride_bearing = geo::bearing_deg(ride.pickup, ride.dropoff);
    let candidate_bearing = geo::bearing_deg(candidate.pickup, candidate.dropoff);

    let diff = geo::bearing_diff_deg(ride_bearing, candidate_bearing);
    if diff > MAX_BEARING_DIFF_DEG {
        return 0.0;
    }

    let mut path_score = 0.0;
    if geo::point_to_segment_m(ride.dropoff, candidate.pickup, candidate.dropoff)
        <= PATH_THRESHOLD_M
    {
        path_score += 0.5;
    }
    if geo::point_to_segment_m(candidate.dropoff, ride.pickup, ride.dropoff) <= PATH_THRESHOLD_M {
        path_score += 0.5;
    }

    let bonus = if geo::haversine_m(ride.dropoff, candidate.dropoff) <= DROPOFF_CLUSTER_M {
        CLUSTER_BONUS
    } else {
        0.0
    };

    let score = BEARING_WEIGHT * (1.0 - diff / MAX_BEARING_DIFF_DEG)
        + PATH_WEIGHT * path_score
        + bonus;

    score.clamp(0.0, 1.0)
}

/// Picks the strictly best-scoring candidate, or none if nothing reaches
/// the acceptance threshold.
pub fn select_partner<'a>(
    ride: &RideRequest,
    candidates: &'a [RideRequest],
) -> Option<&'a RideRequest> {
    let mut best: Option<(&RideRequest, f64)> = None;

    for candidate in candidates {
        let score = compatibility(ride, candidate);
        if score < MIN_MATCH_SCORE {
            continue;
        }

        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((candidate, score)),
        }
    }

    best.map(|(candidate, _)| candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Coordinates, RideMode, RideSpec, VehicleType};
    use uuid::Uuid;

    fn ride(pickup: (f64, f64), dropoff: (f64, f64)) -> RideRequest {
        RideRequest::new(
            Uuid::new_v4(),
            &RideSpec {
                pickup: Coordinates::new(pickup.0, pickup.1),
                dropoff: Coordinates::new(dropoff.0, dropoff.1),
                ride_type: VehicleType::Car,
                ride_mode: RideMode::Shared,
                fare: 300.0,
            },
        )
    }

    /// A ride heading away from (0, 0) at the given bearing, roughly one
    /// degree of arc long.
    fn ride_at_bearing(pickup: (f64, f64), bearing_deg: f64) -> RideRequest {
        let rad = bearing_deg.to_radians();
        ride(
            pickup,
            (pickup.0 + rad.sin(), pickup.1 + rad.cos()),
        )
    }

    #[test]
    fn bearing_divergence_beyond_cutoff_scores_zero() {
        let northbound = ride((0.0, 0.0), (0.0, 1.0));
        let diverging = ride_at_bearing((0.0, 0.0), 36.0);

        assert_eq!(compatibility(&northbound, &diverging), 0.0);
    }

    #[test]
    fn bearing_divergence_inside_cutoff_scores_positive() {
        let northbound = ride((0.0, 0.0), (0.0, 1.0));
        let aligned_enough = ride_at_bearing((0.0, 0.0), 34.0);

        assert!(compatibility(&northbound, &aligned_enough) > 0.0);
    }

    #[test]
    fn parallel_nearby_routes_score_full_marks() {
        let a = ride((0.0, 0.0), (0.0, 1.0));
        let b = ride((0.0, 0.01), (0.0, 1.01));

        // aligned bearings, both dropoffs on the other's path, clustered
        // dropoffs: 0.6 + 0.4 + 0.3 clamped to 1.0
        assert_eq!(compatibility(&a, &b), 1.0);
    }

    #[test]
    fn select_picks_highest_scoring_candidate() {
        let new_ride = ride((0.0, 0.0), (0.0, 1.0));

        // near-identical route, close to 1.0
        let strong = ride((0.001, 0.0), (0.001, 1.0));
        // mildly diverging, still above threshold
        let moderate = ride_at_bearing((0.0, 0.0), 5.0);
        // rejected outright on bearing
        let rejected = ride_at_bearing((0.0, 0.0), 50.0);

        let strong_score = compatibility(&new_ride, &strong);
        let moderate_score = compatibility(&new_ride, &moderate);
        assert!(strong_score > moderate_score);
        assert!(moderate_score >= MIN_MATCH_SCORE);
        assert_eq!(compatibility(&new_ride, &rejected), 0.0);

        let candidates = vec![moderate, strong.clone(), rejected];
        let selected = select_partner(&new_ride, &candidates).unwrap();
        assert_eq!(selected.id, strong.id);
    }

    #[test]
    fn select_reports_no_match_below_threshold() {
        let new_ride = ride((0.0, 0.0), (0.0, 1.0));

        // barely inside the bearing cutoff but far off to the side: no
        // path contribution, no cluster bonus, score well under 0.5
        let weak = ride_at_bearing((2.0, 0.0), 34.0);
        assert!(compatibility(&new_ride, &weak) < MIN_MATCH_SCORE);

        assert!(select_partner(&new_ride, &[weak]).is_none());
    }

    #[test]
    fn select_handles_empty_candidate_set() {
        let new_ride = ride((0.0, 0.0), (0.0, 1.0));
        assert!(select_partner(&new_ride, &[]).is_none());
    }

    #[test]
    fn scenario_parallel_shared_requests_pair() {
        let a = ride((0.0, 0.0), (0.0, 1.0));
        let b = ride((0.0, 0.01), (0.0, 1.01));

        let selected = select_partner(&a, std::slice::from_ref(&b)).unwrap();
        assert_eq!(selected.id, b.id);
    }
}
