//! Calendar helpers: local-midnight normalization and per-day query windows.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};

/// Calendar day of `instant` in the local time zone.
pub fn local_day<Tz: TimeZone>(instant: &DateTime<Tz>) -> NaiveDate {
    instant.with_timezone(&Local).date_naive()
}

/// Instant of local midnight starting `day`.
pub fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    start_of_day_in(&Local, day)
}

/// Instant of midnight starting `day` in `tz`.
///
/// When midnight falls in a DST gap the earliest valid instant of the day is used.
pub fn start_of_day_in<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    if let Some(dt) = tz.from_local_datetime(&midnight).earliest() {
        return dt.with_timezone(&Utc);
    }
    // Skip forward through the gap in quarter hours, up to three hours.
    (1..=12)
        .filter_map(|q| {
            tz.from_local_datetime(&(midnight + chrono::Duration::minutes(15 * q)))
                .earliest()
        })
        .next()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Half-open `[day, next day)` window in UTC.
pub fn day_window(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = day.succ_opt().unwrap_or(day);
    (start_of_day(day), start_of_day(next))
}

/// Parse a `YYYY-MM-DD` day.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}
