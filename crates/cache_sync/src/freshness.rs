//! Freshness policy.
//!
//! A place is fresh when the store holds at least `count` records and each of
//! the first `count` (in store order, i.e. ascending date) was fetched at or
//! after the cutoff. `count <= 0` is always fresh.

use common::ForecastRecord;

/// Oldest acceptable `fetched_at` for a timeout window ending at `now`.
pub fn cutoff_for(now: i64, timeout_secs: i64) -> i64 {
    now.saturating_sub(timeout_secs)
}

pub fn is_fresh(records: &[ForecastRecord], count: i64, cutoff: i64) -> bool {
    if count <= 0 {
        return true;
    }
    let Ok(needed) = usize::try_from(count) else {
        return false;
    };
    if records.len() < needed {
        return false;
    }
    records[..needed].iter().all(|r| r.fetched_at >= cutoff)
}
