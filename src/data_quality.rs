// ✅ Data Quality Engine - What in the file could not be checked, and why
//
// The analysis never rejects a row; this engine is where every skipped or
// doubtful field becomes a visible issue for the presentation layer.

use crate::config::DuplicateConfig;
use crate::record::{CourseIdentity, FailureKind, Field, Normalized, StudentIdentity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// ISSUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Record cannot be placed in time
    Warning,  // Record skipped by at least one check
    Info,     // Record usable but unusual
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub index: usize,
    pub line_number: usize,
    pub severity: Severity,
    pub field: String,
    pub issue: String,
    pub recommendation: String,
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_records: usize,
    pub records_with_issues: usize,
    pub critical_count: usize,
    pub warning_count: usize,
    pub info_count: usize,
    /// Issue count per field
    pub by_field: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Ordered by record, then severity
    pub issues: Vec<QualityIssue>,
    pub summary: BatchSummary,
}

impl QualityReport {
    pub fn summary_line(&self) -> String {
        format!(
            "{} of {} records have issues ({} critical, {} warnings, {} info)",
            self.summary.records_with_issues,
            self.summary.total_records,
            self.summary.critical_count,
            self.summary.warning_count,
            self.summary.info_count
        )
    }

    pub fn issues_for(&self, index: usize) -> impl Iterator<Item = &QualityIssue> {
        self.issues.iter().filter(move |issue| issue.index == index)
    }

    pub fn has_critical_issues(&self) -> bool {
        self.summary.critical_count > 0
    }
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine {
    student_identity: StudentIdentity,
    course_identity: CourseIdentity,
}

impl DataQualityEngine {
    pub fn new() -> Self {
        DataQualityEngine {
            student_identity: StudentIdentity::Name,
            course_identity: CourseIdentity::CourseCode,
        }
    }

    /// Key checks follow the same identities the duplicate detector groups by
    pub fn for_duplicates(config: &DuplicateConfig) -> Self {
        DataQualityEngine {
            student_identity: config.student_identity,
            course_identity: config.course_identity,
        }
    }

    pub fn assess(&self, rows: &[Normalized]) -> QualityReport {
        let mut issues = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            let mut found = self.validate(index, row);
            found.sort_by_key(|issue| issue.severity);
            issues.extend(found);
        }

        let summary = summarize(rows.len(), &issues);
        if summary.records_with_issues > 0 {
            tracing::info!(
                records = summary.total_records,
                with_issues = summary.records_with_issues,
                critical = summary.critical_count,
                "data quality issues found"
            );
        }

        QualityReport { issues, summary }
    }

    fn validate(&self, index: usize, row: &Normalized) -> Vec<QualityIssue> {
        let record = row.record();
        let mut issues = Vec::new();
        let mut push = |severity: Severity, field: &str, issue: String, recommendation: &str| {
            issues.push(QualityIssue {
                index,
                line_number: record.line_number,
                severity,
                field: field.to_string(),
                issue,
                recommendation: recommendation.to_string(),
            });
        };

        // Rule 1: parse failures recorded during normalization
        for failure in row.failures() {
            let severity = match failure.field {
                Field::StartDate | Field::EndDate => Severity::Critical,
                Field::Status => Severity::Info,
                _ => Severity::Warning,
            };
            let issue = match &failure.kind {
                FailureKind::Missing => format!("{} is empty", failure.field),
                FailureKind::Unparseable(raw) => {
                    format!("{} could not be read: '{}'", failure.field, raw)
                }
            };
            push(severity, failure.field.header(), issue, recommendation_for(failure.field));
        }

        // Rule 2: end before start
        if record.has_inverted_dates() {
            if let Some((start, end)) = record.interval() {
                push(
                    Severity::Warning,
                    "dates",
                    format!("End date {} is before start date {}", end, start),
                    "Check whether the start and end dates were swapped",
                );
            }
        }

        // Rule 3: grouping keys for overlap detection
        if record.student_key(self.student_identity).is_none() {
            push(
                Severity::Warning,
                "student",
                format!("Student identity ({:?}) incomplete", self.student_identity),
                "Fill in the student's name or ID so overlapping COEs can be detected",
            );
        }
        if record.course_key(self.course_identity).is_none() {
            push(
                Severity::Warning,
                "course",
                format!("Course key ({:?}) missing", self.course_identity),
                "Fill in the course so overlapping COEs can be detected",
            );
        }

        // Rule 4: status outside the known vocabulary
        if let Some(status) = record.status.as_ref().filter(|s| !s.is_known()) {
            push(
                Severity::Info,
                Field::Status.header(),
                format!("Unrecognised status '{}'", status),
                "Status is kept but only matches policies that list it explicitly",
            );
        }

        issues
    }
}

impl Default for DataQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn recommendation_for(field: Field) -> &'static str {
    match field {
        Field::StartDate | Field::EndDate => "Use DD/MM/YYYY or YYYY-MM-DD",
        Field::DurationWeeks => "Enter the course duration as a whole number of weeks",
        Field::CoeCode => "Add the COE code so duplicate codes can be detected",
        Field::Status => "Add the COE status",
        Field::VisaExpiry => "Use DD/MM/YYYY or YYYY-MM-DD for the visa expiry",
        Field::CoeEndDate => "Use DD/MM/YYYY or YYYY-MM-DD for the COE end date",
        _ => "Check the source spreadsheet",
    }
}

fn summarize(total_records: usize, issues: &[QualityIssue]) -> BatchSummary {
    let mut summary = BatchSummary {
        total_records,
        ..Default::default()
    };

    let mut last_index = None;
    for issue in issues {
        if last_index != Some(issue.index) {
            summary.records_with_issues += 1;
            last_index = Some(issue.index);
        }

        match issue.severity {
            Severity::Critical => summary.critical_count += 1,
            Severity::Warning => summary.warning_count += 1,
            Severity::Info => summary.info_count += 1,
        }
        *summary.by_field.entry(issue.field.clone()).or_insert(0) += 1;
    }

    summary
}

// ============================================================================
// TESTS
// ============================================================================
