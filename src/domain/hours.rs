//! NSE/BSE session-clock helpers. All gates are pure functions of an
//! injected UTC instant so the orchestrator and the tests share one code
//! path. IST has no DST, a fixed +05:30 offset is exact.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

pub fn ist_offset() -> FixedOffset {
    // 5:30 east of UTC is always in range.
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

pub fn to_ist(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    now.with_timezone(&ist_offset())
}

fn is_weekday(now: DateTime<Utc>) -> bool {
    !matches!(to_ist(now).weekday(), Weekday::Sat | Weekday::Sun)
}

fn minute_of_day(now: DateTime<Utc>) -> u32 {
    let ist = to_ist(now);
    ist.hour() * 60 + ist.minute()
}

/// Exchange session: 09:15-15:30 IST, weekdays. `bypass` forces open for
/// off-hours paper runs.
pub fn is_market_open(now: DateTime<Utc>, bypass: bool) -> bool {
    if bypass {
        return true;
    }
    if !is_weekday(now) {
        return false;
    }
    let m = minute_of_day(now);
    (9 * 60 + 15..=15 * 60 + 30).contains(&m)
}

/// Entry window: skip the opening churn and stop initiating near the close.
/// 09:25-15:10 IST, weekdays.
pub fn in_entry_window(now: DateTime<Utc>, bypass: bool) -> bool {
    if bypass {
        return true;
    }
    if !is_weekday(now) {
        return false;
    }
    let m = minute_of_day(now);
    (9 * 60 + 25..15 * 60 + 10).contains(&m)
}

/// Hard cutoff for initiating trades: before 15:10 IST on a weekday.
pub fn can_take_new_trade(now: DateTime<Utc>, bypass: bool) -> bool {
    if bypass {
        return true;
    }
    is_weekday(now) && minute_of_day(now) < 15 * 60 + 10
}

/// Any open position must be flattened from 15:25 IST on a weekday.
pub fn should_force_squareoff(now: DateTime<Utc>, bypass: bool) -> bool {
    if bypass {
        return false;
    }
    is_weekday(now) && minute_of_day(now) >= 15 * 60 + 25
}

/// Daily counters roll over at the session open, 09:15 IST. Returns the
/// IST calendar date of the current session for reset bookkeeping.
pub fn session_date(now: DateTime<Utc>) -> chrono::NaiveDate {
    to_ist(now).date_naive()
}

pub fn is_session_reset_due(now: DateTime<Utc>, last_reset: Option<chrono::NaiveDate>) -> bool {
    let today = session_date(now);
    let past_open = minute_of_day(now) >= 9 * 60 + 15;
    past_open && last_reset != Some(today)
}

/// Human label for a bar timeframe in seconds, e.g. 300 -> "5m".
pub fn format_timeframe(seconds: u32) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m", seconds / 60)
    } else {
        format!("{}h", seconds / 3600)
    }
}
