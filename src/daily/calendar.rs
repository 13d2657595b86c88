//! User-local calendar days.
//!
//! A user's timezone is a fixed offset from UTC in minutes. Offsets outside
//! +/-24h fall back to UTC.

use chrono::{DateTime, Days, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

/// Offset for a user, UTC when the stored value is out of range.
pub fn user_offset(offset_minutes: i32) -> FixedOffset {
    match FixedOffset::east_opt(offset_minutes.saturating_mul(60)) {
        Some(offset) => offset,
        None => {
            tracing::warn!(offset_minutes, "Invalid UTC offset, falling back to UTC");
            Utc.fix()
        }
    }
}

/// The user's calendar date at `now`.
pub fn local_today(offset_minutes: i32, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&user_offset(offset_minutes)).date_naive()
}

/// UTC instant of local midnight starting `date`.
pub fn local_midnight_utc(offset_minutes: i32, date: NaiveDate) -> DateTime<Utc> {
    let offset = user_offset(offset_minutes);
    let local = date.and_time(NaiveTime::default());
    local
        .checked_sub_signed(Duration::seconds(offset.local_minus_utc() as i64))
        .unwrap_or(local)
        .and_utc()
}

/// UTC range covering the last `days` local days up to and including today:
/// start is local midnight `days - 1` days ago, end is local midnight tomorrow.
pub fn user_local_day_range(offset_minutes: i32, days: i64, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = local_today(offset_minutes, now);
    let back = Days::new((days.max(1) - 1) as u64);
    let start = today.checked_sub_days(back).unwrap_or(NaiveDate::MIN);
    let end = today.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX);
    (
        local_midnight_utc(offset_minutes, start),
        local_midnight_utc(offset_minutes, end),
    )
}
