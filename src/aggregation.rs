// 📊 Aggregation Reporters - Grouped counts over a record set
//
// Every reporter conserves its input: undated or unkeyed records land in an
// explicit unspecified bucket instead of disappearing.

use crate::config::GroupBy;
use crate::record::{fold_key, EnrollmentRecord};
use crate::temporal::{matches_mode, Phase, StatusPolicy};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const UNSPECIFIED: &str = "Unspecified";

// ============================================================================
// START COUNTS (weekly / monthly)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartBucket {
    /// `2024-W01` or `2024-01`
    pub label: String,

    /// First day of the bucket (Monday for weeks)
    pub period_start: NaiveDate,

    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartCounts {
    /// Ascending by period
    pub buckets: Vec<StartBucket>,

    /// Records without a start date
    pub unspecified: usize,
}

impl StartCounts {
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.count).sum::<usize>() + self.unspecified
    }
}

/// Starts per ISO week
pub fn weekly_starts(records: &[EnrollmentRecord]) -> StartCounts {
    count_starts(records, |start| {
        let week = start.iso_week();
        let monday = NaiveDate::from_isoywd_opt(week.year(), week.week(), Weekday::Mon)
            .unwrap_or(start);
        (monday, format!("{}-W{:02}", week.year(), week.week()))
    })
}

/// Starts per calendar month
pub fn monthly_starts(records: &[EnrollmentRecord]) -> StartCounts {
    count_starts(records, |start| {
        let first = start.with_day(1).unwrap_or(start);
        (first, format!("{}-{:02}", start.year(), start.month()))
    })
}

fn count_starts(
    records: &[EnrollmentRecord],
    bucket_of: impl Fn(NaiveDate) -> (NaiveDate, String),
) -> StartCounts {
    let mut buckets: BTreeMap<NaiveDate, StartBucket> = BTreeMap::new();
    let mut unspecified = 0;

    for record in records {
        let Some(start) = record.start_date else {
            unspecified += 1;
            continue;
        };

        let (period_start, label) = bucket_of(start);
        buckets
            .entry(period_start)
            .or_insert_with(|| StartBucket {
                label,
                period_start,
                count: 0,
            })
            .count += 1;
    }

    StartCounts {
        buckets: buckets.into_values().collect(),
        unspecified,
    }
}

// ============================================================================
// GROUP SUMMARY (agent, status, course, any column)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub key: String,
    pub total: usize,
    /// Active at the reference date under the status policy
    pub active: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_by: String,
    pub reference_date: NaiveDate,
    /// Ascending by key, the unspecified bucket last
    pub groups: Vec<GroupCount>,
}

impl GroupSummary {
    pub fn total(&self) -> usize {
        self.groups.iter().map(|g| g.total).sum()
    }

    pub fn active(&self) -> usize {
        self.groups.iter().map(|g| g.active).sum()
    }
}

/// Folded value of the group-by column, `None` when missing or blank
pub fn group_value(record: &EnrollmentRecord, group_by: &GroupBy) -> Option<String> {
    match group_by {
        GroupBy::Agent => record.agent.as_deref().and_then(fold_key),
        GroupBy::Status => record.status.as_ref().map(|s| s.to_string()),
        GroupBy::Course => record
            .course_name
            .as_deref()
            .or(record.course_code.as_deref())
            .and_then(fold_key),
        GroupBy::Column(column) => record
            .extra
            .iter()
            .find(|(header, _)| header.trim().eq_ignore_ascii_case(column.trim()))
            .and_then(|(_, value)| fold_key(value)),
    }
}

pub fn group_summary(
    records: &[EnrollmentRecord],
    group_by: &GroupBy,
    reference: NaiveDate,
    policy: &StatusPolicy,
) -> GroupSummary {
    let mut groups: BTreeMap<String, GroupCount> = BTreeMap::new();
    let mut unspecified = GroupCount {
        key: UNSPECIFIED.to_string(),
        total: 0,
        active: 0,
    };

    for record in records {
        let bucket = match group_value(record, group_by) {
            Some(key) => groups.entry(key.clone()).or_insert_with(|| GroupCount {
                key,
                total: 0,
                active: 0,
            }),
            None => &mut unspecified,
        };

        bucket.total += 1;
        if matches_mode(record, reference, Phase::Active, policy) {
            bucket.active += 1;
        }
    }

    let mut groups: Vec<GroupCount> = groups.into_values().collect();
    if unspecified.total > 0 {
        groups.push(unspecified);
    }

    GroupSummary {
        group_by: group_by.label(),
        reference_date: reference,
        groups,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_record(agent: Option<&str>, start: Option<NaiveDate>) -> EnrollmentRecord {
        let mut record = EnrollmentRecord::new(1).with_status("STUDYING");
        record.agent = agent.map(str::to_string);
        record.start_date = start;
        record.end_date = start.map(|s| s + chrono::Duration::days(90));
        record
    }

    #[test]
    fn test_weekly_starts_by_iso_week() {
        let records = vec![
            // Monday and Sunday of 2024-W01
            create_test_record(None, Some(date(2024, 1, 1))),
            create_test_record(None, Some(date(2024, 1, 7))),
            create_test_record(None, Some(date(2024, 1, 8))),
            create_test_record(None, None),
        ];

        let counts = weekly_starts(&records);
        assert_eq!(counts.buckets.len(), 2);
        assert_eq!(counts.buckets[0].label, "2024-W01");
        assert_eq!(counts.buckets[0].period_start, date(2024, 1, 1));
        assert_eq!(counts.buckets[0].count, 2);
        assert_eq!(counts.buckets[1].label, "2024-W02");
        assert_eq!(counts.unspecified, 1);
        assert_eq!(counts.total(), records.len());
    }

    #[test]
    fn test_iso_week_crosses_year() {
        // 2024-12-30 is in 2025-W01
        let counts = weekly_starts(&[create_test_record(None, Some(date(2024, 12, 30)))]);
        assert_eq!(counts.buckets[0].label, "2025-W01");
        assert_eq!(counts.buckets[0].period_start, date(2024, 12, 30));
    }

    #[test]
    fn test_monthly_starts_sorted() {
        let records = vec![
            create_test_record(None, Some(date(2024, 3, 15))),
            create_test_record(None, Some(date(2024, 1, 31))),
            create_test_record(None, Some(date(2024, 3, 1))),
        ];

        let counts = monthly_starts(&records);
        let labels: Vec<&str> = counts.buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["2024-01", "2024-03"]);
        assert_eq!(counts.buckets[1].count, 2);
        assert_eq!(counts.unspecified, 0);
    }

    #[test]
    fn test_group_summary_conserves_total() {
        let reference = date(2024, 2, 15);
        let records = vec![
            create_test_record(Some("Global Ed"), Some(date(2024, 1, 1))),
            create_test_record(Some("global  ED "), Some(date(2023, 1, 1))),
            create_test_record(Some("Acme"), Some(date(2024, 2, 1))),
            create_test_record(Some("  "), Some(date(2024, 2, 1))),
            create_test_record(None, None),
        ];

        let summary = group_summary(&records, &GroupBy::Agent, reference, &StatusPolicy::default());
        assert_eq!(summary.total(), records.len());

        let keys: Vec<&str> = summary.groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["ACME", "GLOBAL ED", UNSPECIFIED]);

        assert_eq!(summary.groups[1].total, 2);
        assert_eq!(summary.groups[1].active, 1);
        assert_eq!(summary.groups[2].total, 2);
        assert_eq!(summary.groups[2].active, 1);
        assert_eq!(summary.group_by, "AGENT");
    }

    #[test]
    fn test_group_by_extra_column() {
        let mut record = create_test_record(None, Some(date(2024, 1, 1)));
        record.extra.insert("Campus".to_string(), "Sydney".to_string());
        let records = vec![record, create_test_record(None, None)];

        let summary = group_summary(
            &records,
            &GroupBy::Column("campus".to_string()),
            date(2024, 2, 15),
            &StatusPolicy::default(),
        );
        assert_eq!(summary.groups[0].key, "SYDNEY");
        assert_eq!(summary.groups[1].key, UNSPECIFIED);
    }

    #[test]
    fn test_group_by_status() {
        let records = vec![
            create_test_record(None, Some(date(2024, 1, 1))),
            create_test_record(None, Some(date(2024, 1, 1))).with_status("saved"),
        ];

        let summary = group_summary(
            &records,
            &GroupBy::Status,
            date(2024, 2, 15),
            &StatusPolicy::default(),
        );
        assert_eq!(summary.groups[0].key, "SAVED");
        assert_eq!(summary.groups[0].active, 0);
        assert_eq!(summary.groups[1].key, "STUDYING");
        assert_eq!(summary.groups[1].active, 1);
    }
}
