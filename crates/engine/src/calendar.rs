//! Calendar helpers: inclusive day counts, Monday-anchored weeks, "today" in a zone

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Utc};

/// Days in `[start, end]`, both ends included. 0 if `end < start`.
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> u32 {
    let span = (end - start).num_days() + 1;
    u32::try_from(span).unwrap_or(0)
}

/// The Monday-to-Sunday week containing `day`
pub fn week_window_monday(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}

/// Current calendar day at the given UTC offset
pub fn today_at(offset: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&offset).date_naive()
}
