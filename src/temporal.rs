// ⏰ Temporal Classifier - Past / Active / Future at a reference date
//
// Intervals are closed: a record is Active on both its start and end day.
// Status gating is applied per mode, exclusion always beats inclusion.

use crate::record::{EnrollmentRecord, Status};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// PHASE & MODE
// ============================================================================

/// Where a dated record sits relative to the reference date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Past,
    Active,
    Future,
}

/// A caller's filter selection; same three values as `Phase`
pub type Mode = Phase;

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Past, Phase::Active, Phase::Future];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Past => "past",
            Phase::Active => "active",
            Phase::Future => "future",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Phase of a record at `reference`, `None` when either date is missing.
///
/// Checked Active → Future → Past so every dated record, inverted ranges
/// included, lands in exactly one phase.
pub fn phase_at(record: &EnrollmentRecord, reference: NaiveDate) -> Option<Phase> {
    let (start, end) = record.interval()?;

    if start <= reference && reference <= end {
        Some(Phase::Active)
    } else if start > reference {
        Some(Phase::Future)
    } else {
        Some(Phase::Past)
    }
}

// ============================================================================
// STATUS POLICY
// ============================================================================

/// Status filter for one mode
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusGate {
    /// Statuses admitted. Empty admits every status that is not excluded.
    #[serde(default)]
    pub include: BTreeSet<Status>,

    /// Statuses rejected, even when also listed in `include`
    #[serde(default)]
    pub exclude: BTreeSet<Status>,
}

impl StatusGate {
    pub fn new(include: &[Status], exclude: &[Status]) -> Self {
        StatusGate {
            include: include.iter().cloned().collect(),
            exclude: exclude.iter().cloned().collect(),
        }
    }

    /// No restriction at all
    pub fn open() -> Self {
        StatusGate::default()
    }

    pub fn admits(&self, status: Option<&Status>) -> bool {
        match status {
            Some(status) if self.exclude.contains(status) => false,
            Some(status) => self.include.is_empty() || self.include.contains(status),
            None => self.include.is_empty(),
        }
    }
}

/// One gate per mode. Gates missing from a config file keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPolicy {
    pub past: StatusGate,
    pub active: StatusGate,
    pub future: StatusGate,
}

impl StatusPolicy {
    pub fn gate(&self, mode: Mode) -> &StatusGate {
        match mode {
            Phase::Past => &self.past,
            Phase::Active => &self.active,
            Phase::Future => &self.future,
        }
    }

    /// Dates only, statuses ignored
    pub fn unrestricted() -> Self {
        StatusPolicy {
            past: StatusGate::open(),
            active: StatusGate::open(),
            future: StatusGate::open(),
        }
    }
}

impl Default for StatusPolicy {
    /// Conventions of the enrollment office: live enrollments are approved,
    /// studying or visa granted; the past view also keeps cancelled and
    /// finished COEs; drafts (SAVED) never count.
    fn default() -> Self {
        let live = [Status::Approved, Status::Studying, Status::VisaGranted];
        let closed = [Status::Finished, Status::Cancelled, Status::Saved];

        StatusPolicy {
            past: StatusGate::new(
                &[
                    Status::Approved,
                    Status::Studying,
                    Status::VisaGranted,
                    Status::Cancelled,
                    Status::Finished,
                ],
                &[Status::Saved],
            ),
            active: StatusGate::new(&live, &closed),
            future: StatusGate::new(&live, &closed),
        }
    }
}

// ============================================================================
// FILTERS
// ============================================================================

/// Does `record` belong to `mode` at `reference` under `policy`?
pub fn matches_mode(
    record: &EnrollmentRecord,
    reference: NaiveDate,
    mode: Mode,
    policy: &StatusPolicy,
) -> bool {
    phase_at(record, reference) == Some(mode) && policy.gate(mode).admits(record.status.as_ref())
}

/// Order-preserving subsequence of `records` in `mode` at `reference`.
pub fn filter_by_mode<'a>(
    records: &'a [EnrollmentRecord],
    reference: NaiveDate,
    mode: Mode,
    policy: &StatusPolicy,
) -> Vec<&'a EnrollmentRecord> {
    records
        .iter()
        .filter(|record| matches_mode(record, reference, mode, policy))
        .collect()
}

/// Phase annotation for every record, status policy not applied
pub fn classify(records: &[EnrollmentRecord], reference: NaiveDate) -> Vec<Option<Phase>> {
    records.iter().map(|record| phase_at(record, reference)).collect()
}

/// Records whose start date falls in `from..=to`. Undated records never match.
pub fn filter_by_start_range(
    records: &[EnrollmentRecord],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<&EnrollmentRecord> {
    records
        .iter()
        .filter(|record| matches!(record.start_date, Some(start) if from <= start && start <= to))
        .collect()
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

    fn create_test_record(status: &str, start: NaiveDate, end: NaiveDate) -> EnrollmentRecord {
        EnrollmentRecord::new(1)
            .with_id("C1")
            .with_status(status)
            .with_dates(start, end)
    }

    #[test]
    fn test_phase_boundaries() {
        let reference = date(2024, 2, 15);
        let starts_today = create_test_record("APPROVED", reference, date(2024, 6, 1));
        let ends_today = create_test_record("APPROVED", date(2024, 1, 1), reference);
        let tomorrow = create_test_record("APPROVED", date(2024, 2, 16), date(2024, 6, 1));
        let yesterday = create_test_record("APPROVED", date(2024, 1, 1), date(2024, 2, 14));

        assert_eq!(phase_at(&starts_today, reference), Some(Phase::Active));
        assert_eq!(phase_at(&ends_today, reference), Some(Phase::Active));
        assert_eq!(phase_at(&tomorrow, reference), Some(Phase::Future));
        assert_eq!(phase_at(&yesterday, reference), Some(Phase::Past));
    }

    #[test]
    fn test_single_day_enrollment_is_active() {
        let reference = date(2024, 2, 15);
        let record = create_test_record("STUDYING", reference, reference);
        let policy = StatusPolicy::default();
        let records = vec![record];

        assert_eq!(filter_by_mode(&records, reference, Phase::Active, &policy).len(), 1);
        assert!(filter_by_mode(&records, reference, Phase::Past, &policy).is_empty());
        assert!(filter_by_mode(&records, reference, Phase::Future, &policy).is_empty());
    }

    #[test]
    fn test_every_dated_record_has_one_phase() {
        let reference = date(2024, 2, 15);
        let policy = StatusPolicy::unrestricted();
        let records = vec![
            create_test_record("APPROVED", date(2023, 1, 1), date(2023, 6, 1)),
            create_test_record("APPROVED", date(2024, 1, 1), date(2024, 6, 1)),
            create_test_record("APPROVED", date(2024, 3, 1), date(2024, 6, 1)),
            // inverted range
            create_test_record("APPROVED", date(2024, 3, 1), date(2024, 1, 1)),
            create_test_record("APPROVED", date(2024, 2, 1), date(2024, 1, 1)),
        ];

        for record in &records {
            let hits = Phase::ALL
                .iter()
                .filter(|mode| matches_mode(record, reference, **mode, &policy))
                .count();
            assert_eq!(hits, 1);
        }
    }

    #[test]
    fn test_undated_records_never_classified() {
        let mut record = create_test_record("APPROVED", date(2024, 1, 1), date(2024, 6, 1));
        record.end_date = None;
        let records = vec![record];
        let policy = StatusPolicy::unrestricted();

        for mode in Phase::ALL {
            assert!(filter_by_mode(&records, date(2024, 2, 15), mode, &policy).is_empty());
        }
        assert_eq!(classify(&records, date(2024, 2, 15)), vec![None]);
    }

    #[test]
    fn test_saved_excluded_from_active() {
        let reference = date(2024, 2, 15);
        let records = vec![create_test_record("SAVED", date(2024, 1, 1), date(2024, 6, 1))];

        let active = filter_by_mode(&records, reference, Phase::Active, &StatusPolicy::default());
        assert!(active.is_empty());
    }

    #[test]
    fn test_exclusion_beats_inclusion() {
        let gate = StatusGate::new(&[Status::Saved, Status::Approved], &[Status::Saved]);
        assert!(!gate.admits(Some(&Status::Saved)));
        assert!(gate.admits(Some(&Status::Approved)));
        assert!(!gate.admits(Some(&Status::Studying)));
        assert!(!gate.admits(None));
    }

    #[test]
    fn test_open_gate_admits_unknown_and_missing() {
        let gate = StatusGate::new(&[], &[Status::Saved]);
        assert!(gate.admits(Some(&Status::Other("ON HOLD".to_string()))));
        assert!(gate.admits(None));
        assert!(!gate.admits(Some(&Status::Saved)));
    }

    #[test]
    fn test_default_past_policy_keeps_cancelled() {
        let reference = date(2024, 2, 15);
        let records = vec![
            create_test_record("CANCELLED", date(2023, 1, 1), date(2023, 6, 1)),
            create_test_record("SAVED", date(2023, 1, 1), date(2023, 6, 1)),
            create_test_record("FINISHED", date(2023, 1, 1), date(2023, 6, 1)),
        ];

        let past = filter_by_mode(&records, reference, Phase::Past, &StatusPolicy::default());
        assert_eq!(past.len(), 2);
        assert_eq!(past[0].status, Some(Status::Cancelled));
        assert_eq!(past[1].status, Some(Status::Finished));
    }

    #[test]
    fn test_filter_preserves_order() {
        let reference = date(2024, 2, 15);
        let mut records = Vec::new();
        for (i, status) in ["STUDYING", "SAVED", "APPROVED", "VISA GRANTED"].iter().enumerate() {
            let mut record = create_test_record(status, date(2024, 1, 1), date(2024, 6, 1));
            record.line_number = i + 1;
            records.push(record);
        }

        let active = filter_by_mode(&records, reference, Phase::Active, &StatusPolicy::default());
        let lines: Vec<usize> = active.iter().map(|r| r.line_number).collect();
        assert_eq!(lines, vec![1, 3, 4]);
    }

    #[test]
    fn test_start_range_filter() {
        let records = vec![
            create_test_record("APPROVED", date(2024, 1, 1), date(2024, 6, 1)),
            create_test_record("APPROVED", date(2024, 2, 1), date(2024, 6, 1)),
            create_test_record("APPROVED", date(2024, 3, 1), date(2024, 6, 1)),
        ];

        let hits = filter_by_start_range(&records, date(2024, 1, 1), date(2024, 2, 1));
        assert_eq!(hits.len(), 2);
    }
}
