//! Timestamps as 100-nanosecond ticks since 0001-01-01T00:00:00 UTC.
//!
//! Every instant in a stored record uses this representation, so all
//! timestamps handled by this crate are truncated to tick precision.

use chrono::{DateTime, TimeDelta, Utc};

/// Ticks in one second.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks at 1970-01-01T00:00:00 UTC.
pub const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

/// Ticks at 9999-12-31T23:59:59.9999999 UTC, the largest representable instant.
pub const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

const NANOS_PER_TICK: i64 = 100;

/// Convert an instant to ticks, or `None` if it falls outside
/// 0001-01-01 ..= 9999-12-31.
pub fn to_ticks(instant: &DateTime<Utc>) -> Option<i64> {
    let subsec = i64::from(instant.timestamp_subsec_nanos()) / NANOS_PER_TICK;
    let ticks = instant
        .timestamp()
        .checked_mul(TICKS_PER_SECOND)?
        .checked_add(UNIX_EPOCH_TICKS)?
        .checked_add(subsec)?;
    (0..=MAX_TICKS).contains(&ticks).then_some(ticks)
}

/// Convert ticks to an instant, or `None` if out of range.
pub fn from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    if !(0..=MAX_TICKS).contains(&ticks) {
        return None;
    }
    let since_epoch = ticks - UNIX_EPOCH_TICKS;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) * NANOS_PER_TICK;
    DateTime::from_timestamp(secs, nanos as u32)
}

/// The tick origin, used as the lock date of an unlocked record.
pub fn min_value() -> DateTime<Utc> {
    DateTime::from_timestamp(-UNIX_EPOCH_TICKS / TICKS_PER_SECOND, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Drop precision below one tick.
pub fn truncate(instant: DateTime<Utc>) -> DateTime<Utc> {
    to_ticks(&instant).and_then(from_ticks).unwrap_or(instant)
}

/// The current time at tick precision.
pub fn now() -> DateTime<Utc> {
    truncate(Utc::now())
}

/// Convert a duration to ticks, or `None` on overflow.
pub fn span_to_ticks(span: &TimeDelta) -> Option<i64> {
    let secs = span.num_seconds().checked_mul(TICKS_PER_SECOND)?;
    secs.checked_add(i64::from(span.subsec_nanos()) / NANOS_PER_TICK)
}

/// Convert ticks to a duration.
pub fn span_from_ticks(ticks: i64) -> TimeDelta {
    TimeDelta::seconds(ticks / TICKS_PER_SECOND)
        + TimeDelta::nanoseconds((ticks % TICKS_PER_SECOND) * NANOS_PER_TICK)
}
