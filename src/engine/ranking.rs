use crate::geo::great_circle_km;
use crate::models::driver::{Driver, GeoPoint};

#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub driver: Driver,
    pub distance_km: f64,
}

/// Orders candidates nearest-first. Equal distances are broken by longest
/// time since the driver last took an assignment, with never-assigned
/// drivers winning outright, so work spreads instead of pinning to whoever
/// happens to sort first.
pub fn rank_candidates(drivers: Vec<Driver>, dropoff: &GeoPoint) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = drivers
        .into_iter()
        .filter_map(|driver| {
            let position = driver.position?;
            let distance_km = great_circle_km(&position.point, dropoff);
            Some(RankedCandidate {
                driver,
                distance_km,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| match (a.driver.last_assigned_at, b.driver.last_assigned_at) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(a_at), Some(b_at)) => a_at.cmp(&b_at),
            })
    });

    ranked
}

/// Search rings for the matcher: the preferred radius, doubling until the
/// configured maximum caps the sequence.
pub fn widening_radii(preferred_km: f64, max_km: f64) -> Vec<f64> {
    let mut radii = Vec::new();
    let mut radius = preferred_km.min(max_km);
    loop {
        radii.push(radius);
        if radius >= max_km {
            break;
        }
        radius = (radius * 2.0).min(max_km);
    }
    radii
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{rank_candidates, widening_radii};
    use crate::models::driver::{Driver, DriverStatus, GeoPoint, Position};

    fn available_at(name: &str, lat: f64, lng: f64) -> Driver {
        let mut driver = Driver::new(name.to_string(), true);
        driver.status = DriverStatus::Available;
        driver.position = Some(Position {
            point: GeoPoint { lat, lng },
            accuracy_m: 10.0,
            captured_at: Utc::now(),
            stale: false,
        });
        driver
    }

    #[test]
    fn nearest_driver_ranks_first() {
        let dropoff = GeoPoint {
            lat: 30.28,
            lng: -97.75,
        };
        let near = available_at("near", 30.27, -97.74);
        let far = available_at("far", 30.50, -97.90);

        let ranked = rank_candidates(vec![far.clone(), near.clone()], &dropoff);
        assert_eq!(ranked[0].driver.id, near.id);
        assert_eq!(ranked[1].driver.id, far.id);
        assert!(ranked[0].distance_km < ranked[1].distance_km);
    }

    #[test]
    fn distance_tie_goes_to_longest_idle_driver() {
        let dropoff = GeoPoint {
            lat: 30.28,
            lng: -97.75,
        };
        let mut recently_used = available_at("recent", 30.27, -97.74);
        recently_used.last_assigned_at = Some(Utc::now());
        let mut long_idle = available_at("idle", 30.27, -97.74);
        long_idle.last_assigned_at = Some(Utc::now() - Duration::hours(2));

        let ranked = rank_candidates(vec![recently_used.clone(), long_idle.clone()], &dropoff);
        assert_eq!(ranked[0].driver.id, long_idle.id);
    }

    #[test]
    fn never_assigned_driver_wins_the_tie() {
        let dropoff = GeoPoint {
            lat: 30.28,
            lng: -97.75,
        };
        let mut veteran = available_at("veteran", 30.27, -97.74);
        veteran.last_assigned_at = Some(Utc::now() - Duration::days(30));
        let fresh = available_at("fresh", 30.27, -97.74);

        let ranked = rank_candidates(vec![veteran.clone(), fresh.clone()], &dropoff);
        assert_eq!(ranked[0].driver.id, fresh.id);
    }

    #[test]
    fn driver_without_position_is_not_ranked() {
        let dropoff = GeoPoint { lat: 0.0, lng: 0.0 };
        let mut no_fix = available_at("silent", 0.0, 0.0);
        no_fix.position = None;

        let ranked = rank_candidates(vec![no_fix], &dropoff);
        assert!(ranked.is_empty());
    }

    #[test]
    fn radii_double_up_to_the_cap() {
        assert_eq!(widening_radii(5.0, 25.0), vec![5.0, 10.0, 20.0, 25.0]);
        assert_eq!(widening_radii(10.0, 10.0), vec![10.0]);
        assert_eq!(widening_radii(30.0, 25.0), vec![25.0]);
    }
}
