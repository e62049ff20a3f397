use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::AppError;
use crate::models::driver::Driver;
use crate::models::event::{Entity, EventPayload};
use crate::models::fix::LocationFix;
use crate::state::AppState;
use crate::store::drivers::ApplyOutcome;

/// Why a fix was turned away. Rejections are an answer to the reporting
/// client, never a fault; one driver's bad fix cannot affect another's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidCoordinates,
    TooCoarse,
    FutureTimestamp,
    OutOfOrder,
    UnknownDriver,
}

impl RejectReason {
    fn as_str(self) -> &'static str {
        match self {
            RejectReason::InvalidCoordinates => "invalid_coordinates",
            RejectReason::TooCoarse => "too_coarse",
            RejectReason::FutureTimestamp => "future_timestamp",
            RejectReason::OutOfOrder => "out_of_order",
            RejectReason::UnknownDriver => "unknown_driver",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Replay of an already-accepted fix; acknowledged without effect.
    Unchanged,
    Rejected(RejectReason),
}

/// Validates and records one position report. Accepted fixes move the
/// driver's position and are fanned out to observers.
pub fn record(state: &AppState, fix: &LocationFix) -> Result<IngestOutcome, AppError> {
    if let Some(reason) = validate(state, fix) {
        state
            .metrics
            .location_fixes_total
            .with_label_values(&[reason.as_str()])
            .inc();
        debug!(driver_id = %fix.driver_id, reason = reason.as_str(), "fix rejected");
        return Ok(IngestOutcome::Rejected(reason));
    }

    let (outcome, driver) = match state.drivers.apply_location(fix.driver_id, fix) {
        Ok(applied) => applied,
        Err(AppError::NotFound(_)) => {
            state
                .metrics
                .location_fixes_total
                .with_label_values(&[RejectReason::UnknownDriver.as_str()])
                .inc();
            return Ok(IngestOutcome::Rejected(RejectReason::UnknownDriver));
        }
        Err(err) => return Err(err),
    };

    match outcome {
        ApplyOutcome::Applied => {
            state
                .metrics
                .location_fixes_total
                .with_label_values(&["accepted"])
                .inc();
            publish_position(state, &driver);
            Ok(IngestOutcome::Accepted)
        }
        ApplyOutcome::Unchanged => Ok(IngestOutcome::Unchanged),
        ApplyOutcome::Stale => {
            state
                .metrics
                .location_fixes_total
                .with_label_values(&[RejectReason::OutOfOrder.as_str()])
                .inc();
            debug!(driver_id = %fix.driver_id, "out-of-order fix dropped");
            Ok(IngestOutcome::Rejected(RejectReason::OutOfOrder))
        }
    }
}

fn validate(state: &AppState, fix: &LocationFix) -> Option<RejectReason> {
    if !(-90.0..=90.0).contains(&fix.lat) || !(-180.0..=180.0).contains(&fix.lng) {
        return Some(RejectReason::InvalidCoordinates);
    }
    if !fix.accuracy_m.is_finite()
        || fix.accuracy_m < 0.0
        || fix.accuracy_m > state.config.max_fix_accuracy_m
    {
        return Some(RejectReason::TooCoarse);
    }
    let skew = Duration::seconds(state.config.clock_skew_secs);
    if fix.captured_at > Utc::now() + skew {
        return Some(RejectReason::FutureTimestamp);
    }
    None
}

fn publish_position(state: &AppState, driver: &Driver) {
    if let Some(position) = driver.position {
        state.broadcaster.publish(
            Entity::Driver(driver.id),
            EventPayload::DriverPosition {
                position,
                version: driver.version,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{IngestOutcome, RejectReason, record};
    use crate::config::Config;
    use crate::models::driver::Driver;
    use crate::models::fix::LocationFix;
    use crate::state::AppState;

    fn setup() -> (AppState, Uuid) {
        let (state, _rx) = AppState::new(Config::default());
        let driver = Driver::new("reporter".to_string(), true);
        let id = driver.id;
        state.drivers.insert(driver);
        (state, id)
    }

    fn fix(driver_id: Uuid) -> LocationFix {
        LocationFix {
            driver_id,
            lat: 30.27,
            lng: -97.74,
            accuracy_m: 12.0,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn accepts_a_clean_fix() {
        let (state, id) = setup();
        let outcome = record(&state, &fix(id)).unwrap();
        assert_eq!(outcome, IngestOutcome::Accepted);
        assert!(state.drivers.snapshot(id).unwrap().position.is_some());
    }

    #[test]
    fn rejects_coordinates_off_the_globe() {
        let (state, id) = setup();
        let mut bad = fix(id);
        bad.lat = 91.0;
        assert_eq!(
            record(&state, &bad).unwrap(),
            IngestOutcome::Rejected(RejectReason::InvalidCoordinates)
        );

        let mut bad = fix(id);
        bad.lng = -180.5;
        assert_eq!(
            record(&state, &bad).unwrap(),
            IngestOutcome::Rejected(RejectReason::InvalidCoordinates)
        );
    }

    #[test]
    fn rejects_coarse_accuracy() {
        let (state, id) = setup();
        let mut coarse = fix(id);
        coarse.accuracy_m = state.config.max_fix_accuracy_m + 1.0;
        assert_eq!(
            record(&state, &coarse).unwrap(),
            IngestOutcome::Rejected(RejectReason::TooCoarse)
        );
    }

    #[test]
    fn rejects_timestamps_from_the_future() {
        let (state, id) = setup();
        let mut future = fix(id);
        future.captured_at = Utc::now() + Duration::seconds(state.config.clock_skew_secs + 60);
        assert_eq!(
            record(&state, &future).unwrap(),
            IngestOutcome::Rejected(RejectReason::FutureTimestamp)
        );
    }

    #[test]
    fn small_skew_is_tolerated() {
        let (state, id) = setup();
        let mut slightly_ahead = fix(id);
        slightly_ahead.captured_at = Utc::now() + Duration::seconds(5);
        assert_eq!(record(&state, &slightly_ahead).unwrap(), IngestOutcome::Accepted);
    }

    #[test]
    fn rejects_out_of_order_and_keeps_newer_position() {
        let (state, id) = setup();
        let now = Utc::now();

        let mut newer = fix(id);
        newer.captured_at = now;
        assert_eq!(record(&state, &newer).unwrap(), IngestOutcome::Accepted);

        let mut older = fix(id);
        older.lat = 31.0;
        older.captured_at = now - Duration::seconds(5);
        assert_eq!(
            record(&state, &older).unwrap(),
            IngestOutcome::Rejected(RejectReason::OutOfOrder)
        );

        let position = state.drivers.snapshot(id).unwrap().position.unwrap();
        assert_eq!(position.captured_at, now);
        assert_eq!(position.point.lat, 30.27);
    }

    #[test]
    fn replayed_fix_is_acknowledged_without_effect() {
        let (state, id) = setup();
        let sample = fix(id);

        assert_eq!(record(&state, &sample).unwrap(), IngestOutcome::Accepted);
        let version = state.drivers.snapshot(id).unwrap().version;

        assert_eq!(record(&state, &sample).unwrap(), IngestOutcome::Unchanged);
        assert_eq!(state.drivers.snapshot(id).unwrap().version, version);
    }

    #[test]
    fn unknown_driver_is_rejected_not_an_error() {
        let (state, _id) = setup();
        let outcome = record(&state, &fix(Uuid::new_v4())).unwrap();
        assert_eq!(outcome, IngestOutcome::Rejected(RejectReason::UnknownDriver));
    }
}
