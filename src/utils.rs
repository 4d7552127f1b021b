//! Utility functions for the matchmaking service

use crate::types::MatchId;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static MATCH_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generate a match id unique for the lifetime of the process
pub fn generate_match_id() -> MatchId {
    let sequence = MATCH_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("match_{}_{}", Utc::now().timestamp_millis(), sequence)
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Wall-clock deadline `after` from now
pub fn deadline_after(after: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::milliseconds(after.as_millis() as i64)
}

/// Time left until `deadline`, zero once it has passed
pub fn remaining_until(deadline: DateTime<Utc>) -> Duration {
    (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// Calculate the absolute difference between two ratings
pub fn rating_difference(rating1: f64, rating2: f64) -> f64 {
    (rating1 - rating2).abs()
}
