use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub dispatch_queue_size: usize,
    pub event_buffer_size: usize,
    /// Fixes with a reported accuracy radius above this are rejected.
    pub max_fix_accuracy_m: f64,
    /// Tolerated forward clock skew on captured_at.
    pub clock_skew_secs: i64,
    /// Online/Available drivers with no accepted fix for this long go Offline.
    pub stale_after_secs: i64,
    pub sweep_interval_secs: u64,
    pub preferred_radius_km: f64,
    pub max_radius_km: f64,
    /// Ranked candidates tried per assignment before giving up.
    pub dispatch_max_attempts: usize,
    /// Unset disables persistence.
    pub snapshot_path: Option<String>,
    pub checkpoint_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            dispatch_queue_size: parse_or_default("DISPATCH_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            max_fix_accuracy_m: parse_or_default("MAX_FIX_ACCURACY_M", 150.0)?,
            clock_skew_secs: parse_or_default("CLOCK_SKEW_SECS", 30)?,
            stale_after_secs: parse_or_default("STALE_AFTER_SECS", 120)?,
            sweep_interval_secs: parse_or_default("SWEEP_INTERVAL_SECS", 30)?,
            preferred_radius_km: parse_or_default("PREFERRED_RADIUS_KM", 5.0)?,
            max_radius_km: parse_or_default("MAX_RADIUS_KM", 25.0)?,
            dispatch_max_attempts: parse_or_default("DISPATCH_MAX_ATTEMPTS", 4)?,
            snapshot_path: env::var("SNAPSHOT_PATH").ok(),
            checkpoint_interval_secs: parse_or_default("CHECKPOINT_INTERVAL_SECS", 60)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            dispatch_queue_size: 1024,
            event_buffer_size: 1024,
            max_fix_accuracy_m: 150.0,
            clock_skew_secs: 30,
            stale_after_secs: 120,
            sweep_interval_secs: 30,
            preferred_radius_km: 5.0,
            max_radius_km: 25.0,
            dispatch_max_attempts: 4,
            snapshot_path: None,
            checkpoint_interval_secs: 60,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
