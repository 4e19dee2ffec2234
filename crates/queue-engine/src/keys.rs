use chrono::{DateTime, Utc};

use crate::item::MAX_WEIGHT;

pub const SCHEDULED_PREFIX: &str = "scheduled";
pub const COMPLETED_PREFIX: &str = "completed";

/// Builds the scheduled key for `bucket`/`weight`/`created_at`, per
/// `SPEC_FULL.md` §3: `scheduled/<bucket>/<WWWWW><NNN...>`.
///
/// The weight component is stored inverted (`MAX_WEIGHT - weight`) so that
/// an ascending lexicographic scan — the only kind RocksDB's iterator
/// gives us — yields the *highest*-weight item first, satisfying the
/// spec's "higher weight sorts before lower" invariant without a separate
/// in-memory priority structure.
pub fn scheduled_key(bucket: &str, weight: u32, created_at: DateTime<Utc>) -> String {
    let weight = weight.min(MAX_WEIGHT);
    let inverted = MAX_WEIGHT - weight;
    let nanos = created_at.timestamp_nanos_opt().unwrap_or(0) as u128;
    format!("{SCHEDULED_PREFIX}/{bucket}/{inverted:05}{nanos:035x}")
}

/// The prefix under which every scheduled item of `bucket` lives.
pub fn scheduled_prefix(bucket: &str) -> String {
    format!("{SCHEDULED_PREFIX}/{bucket}/")
}

/// Rewrites a scheduled key into its archived counterpart under
/// `completed/`, preserving the bucket and sort suffix.
pub fn completed_key_for(scheduled_key: &str) -> String {
    match scheduled_key.strip_prefix(SCHEDULED_PREFIX) {
        Some(rest) => format!("{COMPLETED_PREFIX}{rest}"),
        None => format!("{COMPLETED_PREFIX}/{scheduled_key}"),
    }
}
