//! Core types and numeric helpers shared by the scoring code.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix epoch milliseconds.
pub type TimestampMs = u64;

pub const MS_PER_DAY: u64 = 86_400_000;

/// Current wall clock time in Unix milliseconds.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Fractional days elapsed from `earlier` to `later`; zero if `later` is earlier.
pub fn days_between(earlier: TimestampMs, later: TimestampMs) -> f64 {
    later.saturating_sub(earlier) as f64 / MS_PER_DAY as f64
}

pub fn days_to_ms(days: f64) -> TimestampMs {
    (days.max(0.0) * MS_PER_DAY as f64) as u64
}

/// Clamp into [0, 1]. NaN collapses to 0.
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance.
pub fn variance(values: &[f64]) -> Option<f64> {
    let avg = mean(values)?;
    Some(values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64)
}

/// `max(0.1, 1 - days/365)`, shared by validator weight and agent trust.
pub fn recency_factor(days_since_latest: f64) -> f64 {
    (1.0 - days_since_latest / 365.0).max(0.1)
}
