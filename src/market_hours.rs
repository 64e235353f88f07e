// =============================================================================
// Market-hours gate — 09:30–16:00 America/New_York for equities, 24/7 crypto
// =============================================================================

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use chrono_tz::America::New_York;

use crate::types::is_crypto_symbol;

/// NYSE full-day holidays. Early-close sessions trade as regular days.
const NYSE_HOLIDAYS: &[(i32, u32, u32)] = &[
    // 2024
    (2024, 1, 1),
    (2024, 1, 15),
    (2024, 2, 19),
    (2024, 3, 29),
    (2024, 5, 27),
    (2024, 6, 19),
    (2024, 7, 4),
    (2024, 9, 2),
    (2024, 11, 28),
    (2024, 12, 25),
    // 2025 (Jan 9: national day of mourning closure)
    (2025, 1, 1),
    (2025, 1, 9),
    (2025, 1, 20),
    (2025, 2, 17),
    (2025, 4, 18),
    (2025, 5, 26),
    (2025, 6, 19),
    (2025, 7, 4),
    (2025, 9, 1),
    (2025, 11, 27),
    (2025, 12, 25),
    // 2026 (Jul 3 observes Independence Day)
    (2026, 1, 1),
    (2026, 1, 19),
    (2026, 2, 16),
    (2026, 4, 3),
    (2026, 5, 25),
    (2026, 6, 19),
    (2026, 7, 3),
    (2026, 9, 7),
    (2026, 11, 26),
    (2026, 12, 25),
];

fn is_holiday(date: NaiveDate) -> bool {
    NYSE_HOLIDAYS
        .iter()
        .any(|&(y, m, d)| date.year() == y && date.month() == m && date.day() == d)
}

/// Whether the market for `symbol` is open at `now`.
///
/// Crypto trades around the clock. Equities trade 09:30 (inclusive) to 16:00
/// (exclusive) New York time, Monday through Friday, excluding holidays.
pub fn is_market_open(symbol: &str, now: DateTime<Utc>) -> bool {
    if is_crypto_symbol(symbol) {
        return true;
    }

    let local = now.with_timezone(&New_York);
    let weekday = local.weekday().num_days_from_monday();
    if weekday >= 5 {
        return false;
    }
    if is_holiday(local.date_naive()) {
        return false;
    }

    let open = NaiveTime::from_hms_opt(9, 30, 0).expect("valid time");
    let close = NaiveTime::from_hms_opt(16, 0, 0).expect("valid time");
    let time = local.time();
    time >= open && time < close
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn crypto_is_always_open() {
        assert!(is_market_open("BTC/USD", utc(2025, 6, 1, 3, 0))); // Sunday 3 AM
        assert!(is_market_open("ETH/USD", utc(2025, 12, 25, 12, 0))); // Christmas
    }

    #[test]
    fn weekday_session_is_open() {
        // Monday 2025-06-02, 10:00 EDT = 14:00 UTC.
        assert!(is_market_open("TSLA", utc(2025, 6, 2, 14, 0)));
    }

    #[test]
    fn open_boundary_is_inclusive_close_exclusive() {
        // 09:30 EDT = 13:30 UTC; 16:00 EDT = 20:00 UTC.
        assert!(is_market_open("TSLA", utc(2025, 6, 2, 13, 30)));
        assert!(!is_market_open("TSLA", utc(2025, 6, 2, 20, 0)));
        assert!(is_market_open("TSLA", utc(2025, 6, 2, 19, 59)));
    }

    #[test]
    fn premarket_is_closed() {
        // 09:29 EDT = 13:29 UTC.
        assert!(!is_market_open("TSLA", utc(2025, 6, 2, 13, 29)));
    }

    #[test]
    fn weekend_is_closed() {
        // Saturday 2025-06-07.
        assert!(!is_market_open("TSLA", utc(2025, 6, 7, 15, 0)));
    }

    #[test]
    fn holiday_is_closed() {
        // Friday 2025-07-04 would be mid-session at 15:00 UTC.
        assert!(!is_market_open("TSLA", utc(2025, 7, 4, 15, 0)));
    }

    #[test]
    fn winter_session_uses_est_offset() {
        // Wednesday 2025-01-15, 09:30 EST = 14:30 UTC.
        assert!(is_market_open("TSLA", utc(2025, 1, 15, 14, 30)));
        // 13:30 UTC is 08:30 EST — premarket in winter.
        assert!(!is_market_open("TSLA", utc(2025, 1, 15, 13, 30)));
    }
}
