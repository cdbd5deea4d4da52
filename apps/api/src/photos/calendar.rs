//! Date-range filtering and per-day grouping.
//!
//! Capture dates are always zero-padded `YYYY-MM-DD`, so plain string
//! comparison is chronological comparison.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::AppError;
use crate::models::photo::PhotoRecord;
use crate::photos::dating::is_date_string;

const EARLIEST_DATE: &str = "0000-01-01";
const LATEST_DATE: &str = "9999-12-31";

/// Inclusive range from query parameters. A missing bound is open-ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DateRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl DateRange {
    pub fn validate(&self) -> Result<(), AppError> {
        for (name, bound) in [("start", &self.start), ("end", &self.end)] {
            if let Some(value) = bound {
                if !is_date_string(value) {
                    return Err(AppError::Validation(format!(
                        "'{name}' must be a YYYY-MM-DD date, got '{value}'"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn apply<'a>(&self, records: &'a [PhotoRecord]) -> Vec<&'a PhotoRecord> {
        filter_by_range(
            records,
            self.start.as_deref().unwrap_or(EARLIEST_DATE),
            self.end.as_deref().unwrap_or(LATEST_DATE),
        )
    }
}

/// Records with `start <= capture_date <= end`, in input order.
/// An inverted range matches nothing.
pub fn filter_by_range<'a>(
    records: &'a [PhotoRecord],
    start: &str,
    end: &str,
) -> Vec<&'a PhotoRecord> {
    records
        .iter()
        .filter(|r| r.capture_date.as_str() >= start && r.capture_date.as_str() <= end)
        .collect()
}

/// Photo count per capture date, ordered by date.
pub fn group_by_date<'a>(
    records: impl IntoIterator<Item = &'a PhotoRecord>,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.capture_date.clone()).or_insert(0) += 1;
    }
    counts
}

/// Records captured on exactly `date`, in upload order.
pub fn select_day<'a>(records: &'a [PhotoRecord], date: &str) -> Vec<&'a PhotoRecord> {
    records.iter().filter(|r| r.capture_date == date).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::photo::sample_record;

    fn dated(dates: &[&str]) -> Vec<PhotoRecord> {
        dates
            .iter()
            .enumerate()
            .map(|(i, date)| sample_record(&format!("p{i}"), date))
            .collect()
    }

    #[test]
    fn test_range_is_inclusive() {
        let records = dated(&["2023-12-31", "2024-06-15", "2025-01-01"]);
        let hits = filter_by_range(&records, "2024-01-01", "2024-12-31");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].capture_date, "2024-06-15");

        let edges = filter_by_range(&records, "2023-12-31", "2025-01-01");
        assert_eq!(edges.len(), 3);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let records = dated(&["2024-06-15"]);
        assert!(filter_by_range(&records, "2024-12-31", "2024-01-01").is_empty());
    }

    #[test]
    fn test_group_by_date_counts_in_date_order() {
        let records = dated(&["2024-03-02", "2024-03-01", "2024-03-02"]);
        let counts = group_by_date(&records);
        let entries: Vec<_> = counts.iter().map(|(d, n)| (d.as_str(), *n)).collect();
        assert_eq!(entries, vec![("2024-03-01", 1), ("2024-03-02", 2)]);
    }

    #[test]
    fn test_select_day_keeps_upload_order() {
        let records = dated(&["2024-03-02", "2024-03-01", "2024-03-02"]);
        let day: Vec<_> = select_day(&records, "2024-03-02")
            .into_iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(day, vec!["p0", "p2"]);
        assert!(select_day(&records, "2024-03-03").is_empty());
    }

    #[test]
    fn test_open_ended_range() {
        let records = dated(&["2023-12-31", "2024-06-15", "2025-01-01"]);
        let from_2024 = DateRange {
            start: Some("2024-01-01".to_string()),
            end: None,
        };
        assert_eq!(from_2024.apply(&records).len(), 2);
        assert_eq!(DateRange::default().apply(&records).len(), 3);
    }

    #[test]
    fn test_range_rejects_malformed_bounds() {
        let range = DateRange {
            start: Some("2024/01/01".to_string()),
            end: None,
        };
        assert!(matches!(range.validate(), Err(AppError::Validation(_))));
        let range = DateRange {
            start: Some("2024-01-01".to_string()),
            end: Some("2024-12-31".to_string()),
        };
        assert!(range.validate().is_ok());
    }
}
