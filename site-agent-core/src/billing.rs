//! Billing-period arithmetic (`spec.md` §4.7: "Billing period is computed
//! as the first of the current month in the offering's configured
//! timezone").
//!
//! Grounded on `month_start`/`month_end`/`format_current_month` in
//! `examples/original_source/waldur_site_agent/backends/utils.py`.

use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use site_agent_types::Offering;

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("day 1 is always valid")
}

/// Last day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .expect("day 1 is always valid")
        .pred_opt()
        .expect("first of a later month always has a predecessor")
}

/// The billing period (first of the current month) for `offering`, resolved
/// in its configured timezone. Falls back to UTC for an empty/invalid
/// timezone string — `AgentConfig::validate` already rejects invalid
/// non-empty timezones at load time, so this only ever applies the
/// documented UTC default.
pub fn current_period(offering: &Offering) -> NaiveDate {
    let now_utc = Utc::now();
    let local_date = match offering.timezone.parse::<chrono_tz::Tz>() {
        Ok(tz) => tz.from_utc_datetime(&now_utc.naive_utc()).date_naive(),
        Err(_) => now_utc.date_naive(),
    };
    month_start(local_date)
}
