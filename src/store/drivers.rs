use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::within_km;
use crate::models::driver::{Driver, DriverStatus, GeoPoint, Position};
use crate::models::fix::LocationFix;

/// Outcome of applying a fix to a driver's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Replay of the already-stored fix; no state change.
    Unchanged,
    /// Older than the stored fix; dropped.
    Stale,
}

/// Correction made by a staleness sweep, for the caller to publish.
#[derive(Debug, Clone)]
pub enum StaleAction {
    WentOffline(Driver),
    PositionFlagged(Driver),
}

/// Owns every driver's availability state machine and position snapshot.
/// All writes are single-entry compare-and-swap on the driver's version; the
/// store never holds more than one record lock at a time.
pub struct DriverStateStore {
    drivers: DashMap<Uuid, Driver>,
}

impl DriverStateStore {
    pub fn new() -> Self {
        Self {
            drivers: DashMap::new(),
        }
    }

    pub fn restore(drivers: Vec<Driver>) -> Self {
        let store = Self::new();
        for driver in drivers {
            store.drivers.insert(driver.id, driver);
        }
        store
    }

    pub fn insert(&self, driver: Driver) {
        self.drivers.insert(driver.id, driver);
    }

    pub fn snapshot(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        self.drivers
            .get(&driver_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))
    }

    pub fn count(&self) -> usize {
        self.drivers.len()
    }

    pub fn list(&self) -> Vec<Driver> {
        self.drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Drivers eligible for dispatch, optionally bounded to a radius around
    /// `center`. A driver with no position yet cannot be ranked and is only
    /// returned when no radius bound is requested.
    pub fn list_available(&self, center: &GeoPoint, radius_km: Option<f64>) -> Vec<Driver> {
        self.drivers
            .iter()
            .filter_map(|entry| {
                let driver = entry.value();
                if !driver.dispatchable() {
                    return None;
                }
                match (&driver.position, radius_km) {
                    (Some(pos), Some(radius)) if !within_km(&pos.point, center, radius) => None,
                    (None, Some(_)) => None,
                    _ => Some(driver.clone()),
                }
            })
            .collect()
    }

    /// Requested status change from a driver app or the admin console. Both
    /// surfaces go through this one version-gated entry point, so a racing
    /// pair cannot silently overwrite each other. OnDelivery can never be
    /// requested here; it is entered only through `begin_delivery`.
    pub fn set_status(
        &self,
        driver_id: Uuid,
        requested: DriverStatus,
        expected_version: u64,
    ) -> Result<Driver, AppError> {
        let mut entry = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
        let driver = entry.value_mut();

        if driver.version != expected_version {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} is at version {}, expected {expected_version}",
                driver.version
            )));
        }

        if !status_reachable(driver.status, requested) {
            return Err(AppError::InvalidTransition(format!(
                "driver {driver_id} cannot go {:?} -> {requested:?}",
                driver.status
            )));
        }

        driver.status = requested;
        driver.version += 1;
        driver.updated_at = Utc::now();
        Ok(driver.clone())
    }

    /// Dispatch-only transition Available -> OnDelivery. Fails with Conflict
    /// when the candidate raced another assignment or a status change since
    /// the matcher's snapshot was taken.
    pub fn begin_delivery(&self, driver_id: Uuid, expected_version: u64) -> Result<Driver, AppError> {
        let mut entry = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
        let driver = entry.value_mut();

        if driver.version != expected_version {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} is at version {}, expected {expected_version}",
                driver.version
            )));
        }
        if !driver.dispatchable() {
            return Err(AppError::Conflict(format!(
                "driver {driver_id} is no longer dispatchable"
            )));
        }

        driver.status = DriverStatus::OnDelivery;
        driver.last_assigned_at = Some(Utc::now());
        driver.version += 1;
        driver.updated_at = Utc::now();
        Ok(driver.clone())
    }

    /// Dispatch-only counterpart: delivery completed, cancelled, or the
    /// assignment aborted. A driver who already signed off stays Offline.
    pub fn end_delivery(&self, driver_id: Uuid) -> Result<Driver, AppError> {
        let mut entry = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
        let driver = entry.value_mut();

        if driver.status == DriverStatus::OnDelivery {
            driver.status = DriverStatus::Available;
            driver.version += 1;
            driver.updated_at = Utc::now();
        }
        Ok(driver.clone())
    }

    /// Applies an accepted fix. Per-driver ordering is enforced here as well
    /// as at the ingest boundary, so a fix can never move a position
    /// backwards in captured_at regardless of how it arrived.
    pub fn apply_location(
        &self,
        driver_id: Uuid,
        fix: &LocationFix,
    ) -> Result<(ApplyOutcome, Driver), AppError> {
        let mut entry = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
        let driver = entry.value_mut();

        let next = Position {
            point: GeoPoint {
                lat: fix.lat,
                lng: fix.lng,
            },
            accuracy_m: fix.accuracy_m,
            captured_at: fix.captured_at,
            stale: false,
        };

        if let Some(current) = &driver.position {
            if fix.captured_at < current.captured_at {
                return Ok((ApplyOutcome::Stale, driver.clone()));
            }
            if fix.captured_at == current.captured_at
                && next.point == current.point
                && next.accuracy_m == current.accuracy_m
            {
                return Ok((ApplyOutcome::Unchanged, driver.clone()));
            }
        }

        driver.position = Some(next);
        driver.version += 1;
        driver.updated_at = Utc::now();
        Ok((ApplyOutcome::Applied, driver.clone()))
    }

    pub fn set_active(&self, driver_id: Uuid, active: bool) -> Result<Driver, AppError> {
        let mut entry = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;
        let driver = entry.value_mut();
        if driver.active != active {
            driver.active = active;
            driver.version += 1;
            driver.updated_at = Utc::now();
        }
        Ok(driver.clone())
    }

    /// Background correction for drivers that stopped reporting. Online and
    /// Available drivers whose last accepted fix (or last mutation, if they
    /// never sent one) predates `cutoff` are signed off; an OnDelivery driver
    /// is never auto-demoted mid-delivery, its position is flagged stale
    /// instead.
    pub fn sweep_stale(&self, cutoff: DateTime<Utc>) -> Vec<StaleAction> {
        let mut actions = Vec::new();

        for mut entry in self.drivers.iter_mut() {
            let driver = entry.value_mut();
            let last_seen = driver
                .position
                .as_ref()
                .map(|p| p.captured_at)
                .unwrap_or(driver.updated_at);
            if last_seen >= cutoff {
                continue;
            }

            match driver.status {
                DriverStatus::Online | DriverStatus::Available => {
                    driver.status = DriverStatus::Offline;
                    driver.version += 1;
                    driver.updated_at = Utc::now();
                    actions.push(StaleAction::WentOffline(driver.clone()));
                }
                DriverStatus::OnDelivery => {
                    if let Some(position) = driver.position.as_mut() {
                        if !position.stale {
                            position.stale = true;
                            driver.version += 1;
                            driver.updated_at = Utc::now();
                            actions.push(StaleAction::PositionFlagged(driver.clone()));
                        }
                    }
                }
                DriverStatus::Offline => {}
            }
        }

        actions
    }
}

/// Status graph: Offline <-> Online <-> Available, Offline reachable from
/// anywhere. OnDelivery is entered and left only through the dispatch paths.
fn status_reachable(from: DriverStatus, to: DriverStatus) -> bool {
    use DriverStatus::*;
    match (from, to) {
        (_, OnDelivery) => false,
        (_, Offline) => from != Offline,
        (Offline, Online) => true,
        (Online, Available) => true,
        (Available, Online) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::{ApplyOutcome, DriverStateStore, StaleAction};
    use crate::error::AppError;
    use crate::models::driver::{Driver, DriverStatus, GeoPoint};
    use crate::models::fix::LocationFix;

    fn store_with_driver() -> (DriverStateStore, Uuid) {
        let store = DriverStateStore::new();
        let driver = Driver::new("test-driver".to_string(), true);
        let id = driver.id;
        store.insert(driver);
        (store, id)
    }

    fn fix(driver_id: Uuid, lat: f64, lng: f64, at_secs: i64) -> LocationFix {
        LocationFix {
            driver_id,
            lat,
            lng,
            accuracy_m: 10.0,
            captured_at: Utc.timestamp_opt(at_secs, 0).unwrap(),
        }
    }

    #[test]
    fn status_walks_the_graph() {
        let (store, id) = store_with_driver();

        let d = store.set_status(id, DriverStatus::Online, 0).unwrap();
        let d = store.set_status(id, DriverStatus::Available, d.version).unwrap();
        let d = store.set_status(id, DriverStatus::Online, d.version).unwrap();
        let d = store.set_status(id, DriverStatus::Offline, d.version).unwrap();
        assert_eq!(d.status, DriverStatus::Offline);
    }

    #[test]
    fn offline_to_available_is_rejected() {
        let (store, id) = store_with_driver();
        let err = store.set_status(id, DriverStatus::Available, 0).unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[test]
    fn on_delivery_cannot_be_requested_directly() {
        let (store, id) = store_with_driver();
        store.set_status(id, DriverStatus::Online, 0).unwrap();
        let err = store
            .set_status(id, DriverStatus::OnDelivery, 1)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let (store, id) = store_with_driver();
        store.set_status(id, DriverStatus::Online, 0).unwrap();

        // A second writer still holding version 0 must not clobber.
        let err = store.set_status(id, DriverStatus::Offline, 0).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn begin_delivery_requires_available_and_fresh_version() {
        let (store, id) = store_with_driver();
        store.set_status(id, DriverStatus::Online, 0).unwrap();

        let err = store.begin_delivery(id, 1).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let d = store.set_status(id, DriverStatus::Available, 1).unwrap();
        let d = store.begin_delivery(id, d.version).unwrap();
        assert_eq!(d.status, DriverStatus::OnDelivery);
        assert!(d.last_assigned_at.is_some());

        let d = store.end_delivery(id).unwrap();
        assert_eq!(d.status, DriverStatus::Available);
    }

    #[test]
    fn out_of_order_fix_is_dropped() {
        let (store, id) = store_with_driver();

        let (outcome, _) = store.apply_location(id, &fix(id, 30.0, -97.0, 10)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let (outcome, driver) = store.apply_location(id, &fix(id, 31.0, -98.0, 5)).unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale);
        let position = driver.position.unwrap();
        assert_eq!(position.captured_at.timestamp(), 10);
        assert_eq!(position.point, GeoPoint { lat: 30.0, lng: -97.0 });
    }

    #[test]
    fn replayed_fix_is_a_no_op() {
        let (store, id) = store_with_driver();
        let sample = fix(id, 30.0, -97.0, 10);

        let (_, before) = store.apply_location(id, &sample).unwrap();
        let (outcome, after) = store.apply_location(id, &sample).unwrap();

        assert_eq!(outcome, ApplyOutcome::Unchanged);
        assert_eq!(after.version, before.version);
    }

    #[test]
    fn sweep_signs_off_silent_drivers_but_not_on_delivery() {
        let (store, idle_id) = store_with_driver();
        store.set_status(idle_id, DriverStatus::Online, 0).unwrap();
        store
            .set_status(idle_id, DriverStatus::Available, 1)
            .unwrap();
        store
            .apply_location(idle_id, &fix(idle_id, 30.0, -97.0, 100))
            .unwrap();

        let busy = Driver::new("busy".to_string(), true);
        let busy_id = busy.id;
        store.insert(busy);
        store.set_status(busy_id, DriverStatus::Online, 0).unwrap();
        store
            .set_status(busy_id, DriverStatus::Available, 1)
            .unwrap();
        store
            .apply_location(busy_id, &fix(busy_id, 30.0, -97.0, 100))
            .unwrap();
        let d = store.snapshot(busy_id).unwrap();
        store.begin_delivery(busy_id, d.version).unwrap();

        let cutoff = Utc.timestamp_opt(100, 0).unwrap() + Duration::seconds(1);
        let actions = store.sweep_stale(cutoff);
        assert_eq!(actions.len(), 2);

        assert_eq!(
            store.snapshot(idle_id).unwrap().status,
            DriverStatus::Offline
        );
        let busy_after = store.snapshot(busy_id).unwrap();
        assert_eq!(busy_after.status, DriverStatus::OnDelivery);
        assert!(busy_after.position.unwrap().stale);

        let offline_count = actions
            .iter()
            .filter(|a| matches!(a, StaleAction::WentOffline(_)))
            .count();
        assert_eq!(offline_count, 1);
    }

    #[test]
    fn unapproved_driver_is_not_listed_available() {
        let store = DriverStateStore::new();
        let driver = Driver::new("pending-approval".to_string(), false);
        let id = driver.id;
        store.insert(driver);
        store.set_status(id, DriverStatus::Online, 0).unwrap();
        store.set_status(id, DriverStatus::Available, 1).unwrap();

        let center = GeoPoint { lat: 0.0, lng: 0.0 };
        assert!(store.list_available(&center, None).is_empty());
    }
}
