//! Timestamp helpers shared by the store, controllers and feed client.
//!
//! All engine ordering is done on [`TimePoint`] (epoch milliseconds); the
//! RFC 3339 strings carried by the feeds are converted here and nowhere else.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{Error, Result};

/// Epoch-millisecond instant identifying one frame.
pub type TimePoint = i64;

/// Width of one feed chunk and of one backfill step.
pub const CHUNK_WIDTH_MS: i64 = 10_000;

/// Game-state labels that mean the event has concluded.
const TERMINAL_STATES: [&str; 4] = ["finished", "completed", "postgame", "post_game"];

/// Largest multiple of `width_ms` (counted from the epoch) that is `<= t`.
///
/// Non-positive widths leave `t` unchanged.
#[must_use]
pub fn round_down(t: TimePoint, width_ms: i64) -> TimePoint {
    if width_ms <= 0 {
        return t;
    }
    t - t.rem_euclid(width_ms)
}

/// Format a time point as a feed `startingTime`.
///
/// The fractional part is always written as `.000`, matching what the feed
/// accepts; callers pass chunk-aligned values so nothing is lost.
pub fn to_wire(t: TimePoint) -> Result<String> {
    let dt = DateTime::<Utc>::from_timestamp_millis(t).ok_or_else(|| Error::Timestamp {
        value: t.to_string(),
        reason: "out of range for a calendar date".to_string(),
    })?;
    Ok(format!("{}.000Z", dt.format("%Y-%m-%dT%H:%M:%S")))
}

/// Parse a feed timestamp (RFC 3339) into epoch milliseconds.
pub fn parse_wire(value: &str) -> Result<TimePoint> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .map_err(|err| Error::Timestamp {
            value: value.to_string(),
            reason: err.to_string(),
        })
}

/// Format a time point for humans (millisecond precision, `Z` suffix).
#[must_use]
pub fn display(t: TimePoint) -> String {
    DateTime::<Utc>::from_timestamp_millis(t).map_or_else(
        || t.to_string(),
        |dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> TimePoint {
    Utc::now().timestamp_millis()
}

/// Starting time of the chunk that holds the live edge.
///
/// The feed lags real time, so the live chunk starts `offset_ms` before `now`,
/// aligned down to the chunk width.
pub fn live_starting_time(now: TimePoint, offset_ms: i64) -> Result<String> {
    to_wire(round_down(now - offset_ms, CHUNK_WIDTH_MS))
}

/// Index of the value in `sorted` closest to `target`.
///
/// Returns `None` for an empty slice. Targets before the first value map to
/// index 0 and targets after the last value map to the last index. Otherwise a
/// binary search runs; an exact hit returns its index, and a miss returns the
/// closer of the two neighbouring values, the earlier one winning exact ties.
#[must_use]
pub fn nearest_index(sorted: &[TimePoint], target: TimePoint) -> Option<usize> {
    let last = sorted.len().checked_sub(1)?;
    if target <= sorted[0] {
        return Some(0);
    }
    if target >= sorted[last] {
        return Some(last);
    }

    let mut lo = 0usize;
    let mut hi = last;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let value = sorted[mid];
        if value == target {
            return Some(mid);
        }
        if value < target {
            lo = mid + 1;
        } else {
            // sorted[0] < target, so mid > 0 here
            hi = mid - 1;
        }
    }

    // hi < lo; target lies strictly between sorted[hi] and sorted[lo]
    let later_gap = (sorted[lo] - target).abs();
    let earlier_gap = (sorted[hi] - target).abs();
    Some(if later_gap < earlier_gap { lo } else { hi })
}

/// Case-insensitive check against the terminal game-state labels.
#[must_use]
pub fn is_terminal_state(label: &str) -> bool {
    !label.is_empty()
        && TERMINAL_STATES
            .iter()
            .any(|terminal| label.eq_ignore_ascii_case(terminal))
}
