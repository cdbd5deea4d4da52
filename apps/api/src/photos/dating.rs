//! Capture-date resolution.
//!
//! Three signals, first match wins:
//! 1. an 8-digit `YYYYMMDD` run in the file name (camera and export tooling convention),
//! 2. the date proposed by the inference service, sanity-checked,
//! 3. the file's own last-modified timestamp, which is always available.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

const MIN_YEAR_EXCLUSIVE: i32 = 1980;
const MAX_YEAR_EXCLUSIVE: i32 = 2100;
const DATE_FORMAT: &str = "%Y-%m-%d";
/// Largest year that still formats as four digits.
const MAX_FORMATTABLE_YEAR: i32 = 9999;

/// Resolves the canonical capture date using all three signals.
pub fn resolve_capture_date(
    file_name: &str,
    service_date: Option<&str>,
    file_timestamp_ms: i64,
) -> String {
    if let Some(date) = date_from_file_name(file_name) {
        return date;
    }
    if let Some(date) = service_date.and_then(date_from_service) {
        return date;
    }
    date_from_timestamp(file_timestamp_ms)
}

/// Date used before the inference service has answered: file name, then timestamp.
pub fn provisional_capture_date(file_name: &str, file_timestamp_ms: i64) -> String {
    resolve_capture_date(file_name, None, file_timestamp_ms)
}

/// Scans every 8-digit window of the file name, left to right.
/// Only ranges are checked, so `20230231` yields `2023-02-31`.
pub fn date_from_file_name(file_name: &str) -> Option<String> {
    file_name
        .as_bytes()
        .windows(8)
        .filter(|window| window.iter().all(u8::is_ascii_digit))
        .find_map(|window| {
            let digits = std::str::from_utf8(window).ok()?;
            let year: i32 = digits[0..4].parse().ok()?;
            let month: u32 = digits[4..6].parse().ok()?;
            let day: u32 = digits[6..8].parse().ok()?;

            let in_range = year > MIN_YEAR_EXCLUSIVE
                && year < MAX_YEAR_EXCLUSIVE
                && (1..=12).contains(&month)
                && (1..=31).contains(&day);
            in_range.then(|| format!("{year:04}-{month:02}-{day:02}"))
        })
}

/// Normalizes a service-proposed date such as `2024:03:10 14:22:01` or `2024/03/10`.
pub fn date_from_service(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if is_placeholder(raw) {
        return None;
    }

    let normalized = raw.replace([':', '/'], "-");
    let date_part = normalized.split_whitespace().next()?;
    let date_part = date_part.split('T').next()?;

    let date = NaiveDate::parse_from_str(date_part, DATE_FORMAT).ok()?;
    (date.year() > MIN_YEAR_EXCLUSIVE && date.year() <= MAX_FORMATTABLE_YEAR)
        .then(|| date.format(DATE_FORMAT).to_string())
}

/// UTC calendar date of a Unix-millisecond timestamp. Values outside years
/// 0000..=9999 map to the epoch.
pub fn date_from_timestamp(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .filter(|moment| (0..=MAX_FORMATTABLE_YEAR).contains(&moment.year()))
        .unwrap_or_default()
        .format(DATE_FORMAT)
        .to_string()
}

/// True for strings shaped exactly like `YYYY-MM-DD` (used to validate range queries).
pub fn is_date_string(value: &str) -> bool {
    value.len() == 10 && NaiveDate::parse_from_str(value, DATE_FORMAT).is_ok()
}

fn is_placeholder(raw: &str) -> bool {
    raw.is_empty()
        || raw.eq_ignore_ascii_case("unknown")
        || raw.contains("..")
        || raw.to_ascii_uppercase().contains("YYYY")
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-01-01T00:00:00Z
    const JAN_1_2024_MS: i64 = 1_704_067_200_000;

    #[test]
    fn test_file_name_date_wins() {
        assert_eq!(
            resolve_capture_date("IMG_20230714_picnic.jpg", Some("2019-01-01"), JAN_1_2024_MS),
            "2023-07-14"
        );
    }

    #[test]
    fn test_file_name_beats_service_in_trip_scenario() {
        assert_eq!(
            resolve_capture_date("20240305_trip.jpg", Some("2024/03/10"), JAN_1_2024_MS),
            "2024-03-05"
        );
    }

    #[test]
    fn test_file_name_range_checks() {
        assert_eq!(date_from_file_name("19800101.jpg"), None);
        assert_eq!(date_from_file_name("21000101.jpg"), None);
        assert_eq!(date_from_file_name("20231301.jpg"), None);
        assert_eq!(date_from_file_name("20230100.jpg"), None);
        assert_eq!(date_from_file_name("20230132.jpg"), None);
        assert_eq!(date_from_file_name("19810101.jpg"), Some("1981-01-01".into()));
        assert_eq!(date_from_file_name("20991231.jpg"), Some("2099-12-31".into()));
    }

    #[test]
    fn test_file_name_accepts_impossible_calendar_day() {
        assert_eq!(date_from_file_name("PXL_20230231.jpg"), Some("2023-02-31".into()));
    }

    #[test]
    fn test_file_name_skips_invalid_window() {
        // "12345678" is out of range; the later run is valid.
        assert_eq!(
            date_from_file_name("DSC12345678_20221105.jpg"),
            Some("2022-11-05".into())
        );
    }

    #[test]
    fn test_file_name_without_digits() {
        assert_eq!(date_from_file_name("holiday.jpg"), None);
        assert_eq!(date_from_file_name("IMG_1234.jpg"), None);
        assert_eq!(date_from_file_name(""), None);
    }

    #[test]
    fn test_service_date_normalization() {
        assert_eq!(date_from_service("2024/03/10"), Some("2024-03-10".into()));
        assert_eq!(date_from_service("2024:03:10 14:22:01"), Some("2024-03-10".into()));
        assert_eq!(date_from_service("2024-03-10T09:00:00Z"), Some("2024-03-10".into()));
        assert_eq!(date_from_service("  2024-03-10  "), Some("2024-03-10".into()));
    }

    #[test]
    fn test_service_date_rejects_placeholders() {
        assert_eq!(date_from_service("Unknown"), None);
        assert_eq!(date_from_service("2024-..-.."), None);
        assert_eq!(date_from_service("YYYY-MM-DD"), None);
        assert_eq!(date_from_service(""), None);
        assert_eq!(date_from_service("last summer"), None);
    }

    #[test]
    fn test_service_date_rejects_old_years() {
        assert_eq!(date_from_service("1975-06-01"), None);
        assert_eq!(date_from_service("1980-12-31"), None);
        assert_eq!(date_from_service("1981-01-01"), Some("1981-01-01".into()));
    }

    #[test]
    fn test_placeholder_service_dates_fall_through_to_timestamp() {
        for raw in ["Unknown", "20..-03-10", "..", "not a date"] {
            assert_eq!(
                resolve_capture_date("holiday.jpg", Some(raw), JAN_1_2024_MS),
                "2024-01-01",
                "service date {raw:?} should fall through"
            );
        }
    }

    #[test]
    fn test_service_date_used_when_file_name_has_none() {
        assert_eq!(
            resolve_capture_date("holiday.jpg", Some("2022:08:15 10:00:00"), JAN_1_2024_MS),
            "2022-08-15"
        );
    }

    #[test]
    fn test_provisional_uses_file_name_then_timestamp() {
        assert_eq!(provisional_capture_date("IMG_20230714.jpg", JAN_1_2024_MS), "2023-07-14");
        assert_eq!(provisional_capture_date("holiday.jpg", JAN_1_2024_MS), "2024-01-01");
    }

    #[test]
    fn test_timestamp_formatting() {
        assert_eq!(date_from_timestamp(0), "1970-01-01");
        assert_eq!(date_from_timestamp(JAN_1_2024_MS - 1), "2023-12-31");
        assert_eq!(date_from_timestamp(i64::MAX), "1970-01-01");
    }

    #[test]
    fn test_timestamp_beyond_four_digit_years_maps_to_epoch() {
        // 10000-01-01T00:00:00Z
        assert_eq!(date_from_timestamp(253_402_300_800_000), "1970-01-01");
        assert_eq!(date_from_timestamp(253_402_300_799_999), "9999-12-31");
        // Year -0001
        assert_eq!(date_from_timestamp(-62_200_000_000_000), "1970-01-01");
        assert!(is_date_string(&date_from_timestamp(253_402_300_800_000)));
    }

    #[test]
    fn test_service_date_rejects_five_digit_years() {
        assert_eq!(date_from_service("+12024-03-10"), None);
        assert_eq!(date_from_service("9999-12-31"), Some("9999-12-31".into()));
        assert_eq!(
            resolve_capture_date("holiday.jpg", Some("+12024-03-10"), 0),
            "1970-01-01"
        );
    }

    #[test]
    fn test_is_date_string() {
        assert!(is_date_string("2024-06-15"));
        assert!(!is_date_string("2024-6-15"));
        assert!(!is_date_string("2024/06/15"));
        assert!(!is_date_string("2024-13-01"));
    }
}
