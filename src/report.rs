// 📋 Analysis Report - Every check over one uploaded file, in one value
//
// This is what the presentation layer consumes: per-record annotations plus
// the derived tables. Nothing here renders or styles anything.

use crate::aggregation::{
    group_summary, monthly_starts, weekly_starts, GroupSummary, StartCounts,
};
use crate::config::{AnalysisConfig, ConfigError};
use crate::data_quality::{DataQualityEngine, QualityReport};
use crate::deduplication::{DeduplicationEngine, DuplicateReport};
use crate::duration::{DurationReport, DurationValidator};
use crate::expiry::{expiring_within, ExpiryReport, ExpiryTarget};
use crate::record::{EnrollmentRecord, Normalized};
use crate::temporal::{matches_mode, phase_at, Phase};
use chrono::NaiveDate;
use serde::Serialize;

/// One row as the presentation layer shows it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedRecord {
    pub line_number: usize,
    pub id: Option<String>,
    pub student: String,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub declared_weeks: Option<i64>,

    /// Phase by dates alone
    pub phase: Option<Phase>,

    /// Phase that also passed the status policy for that mode
    pub counted_as: Option<Phase>,

    pub is_duplicate: bool,
    pub computed_weeks: Option<i64>,
    pub duration_mismatch: bool,
    pub issue_count: usize,
}

/// Records per phase after the status policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub past: usize,
    pub active: usize,
    pub future: usize,
    /// Dated but rejected by the status policy
    pub excluded_by_status: usize,
    pub undated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub reference_date: NaiveDate,
    pub total_records: usize,
    pub phases: PhaseCounts,
    pub records: Vec<AnnotatedRecord>,
    pub duplicates: DuplicateReport,
    pub durations: DurationReport,
    pub weekly_starts: StartCounts,
    pub monthly_starts: StartCounts,
    pub groups: GroupSummary,
    pub visa_expiry: ExpiryReport,
    pub coe_expiry: ExpiryReport,
    pub quality: QualityReport,
}

impl AnalysisReport {
    /// Annotated rows whose counted phase is `mode`, input order
    pub fn in_mode(&self, mode: Phase) -> impl Iterator<Item = &AnnotatedRecord> {
        self.records
            .iter()
            .filter(move |record| record.counted_as == Some(mode))
    }
}

/// Run every check in `config` over `rows`.
///
/// Fails only when `config` is invalid; data problems end up in the report.
pub fn analyze(
    rows: &[Normalized],
    config: &AnalysisConfig,
) -> Result<AnalysisReport, ConfigError> {
    config.validate()?;

    let reference = config.reference_date();
    let records: Vec<EnrollmentRecord> = rows.iter().map(|row| row.record().clone()).collect();

    let duplicates = DeduplicationEngine::from_config(&config.duplicates)?.detect(&records);
    let durations =
        DurationValidator::with_tolerance(config.duration_tolerance_weeks)?.validate(&records);
    let quality = DataQualityEngine::for_duplicates(&config.duplicates).assess(rows);
    let visa_expiry = expiring_within(
        &records,
        ExpiryTarget::Visa,
        reference,
        config.expiry.visa_notice_days,
    )?;
    let coe_expiry = expiring_within(
        &records,
        ExpiryTarget::Coe,
        reference,
        config.expiry.coe_notice_days,
    )?;

    // Per-record lookups, built once
    let mut mismatched = vec![false; records.len()];
    for mismatch in &durations.mismatches {
        mismatched[mismatch.index] = true;
    }
    let mut issue_counts = vec![0usize; records.len()];
    for issue in &quality.issues {
        issue_counts[issue.index] += 1;
    }

    let mut phases = PhaseCounts::default();
    let annotated: Vec<AnnotatedRecord> = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let phase = phase_at(record, reference);
            let counted_as =
                phase.filter(|mode| matches_mode(record, reference, *mode, &config.status_policy));

            match (phase, counted_as) {
                (None, _) => phases.undated += 1,
                (Some(_), None) => phases.excluded_by_status += 1,
                (_, Some(Phase::Past)) => phases.past += 1,
                (_, Some(Phase::Active)) => phases.active += 1,
                (_, Some(Phase::Future)) => phases.future += 1,
            }

            AnnotatedRecord {
                line_number: record.line_number,
                id: record.id.clone(),
                student: record.display_name(),
                status: record.status.as_ref().map(|s| s.to_string()),
                start_date: record.start_date,
                end_date: record.end_date,
                declared_weeks: record.declared_duration_weeks,
                phase,
                counted_as,
                is_duplicate: duplicates.is_duplicate(index),
                computed_weeks: durations.computed.get(index).copied().flatten(),
                duration_mismatch: mismatched[index],
                issue_count: issue_counts[index],
            }
        })
        .collect();

    let report = AnalysisReport {
        reference_date: reference,
        total_records: records.len(),
        phases,
        records: annotated,
        weekly_starts: weekly_starts(&records),
        monthly_starts: monthly_starts(&records),
        groups: group_summary(&records, &config.group_by, reference, &config.status_policy),
        duplicates,
        durations,
        visa_expiry,
        coe_expiry,
        quality,
    };

    tracing::info!(
        reference = %reference,
        records = report.total_records,
        active = report.phases.active,
        duplicates = report.duplicates.duplicate_count(),
        duration_mismatches = report.durations.mismatches.len(),
        "analysis finished"
    );

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================
