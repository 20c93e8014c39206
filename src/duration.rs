// 📏 Duration Validator - Declared weeks vs. the weeks the dates span
//
// Computed weeks truncate: floor((end - start).days / 7).

use crate::config::ConfigError;
use crate::record::EnrollmentRecord;
use serde::{Deserialize, Serialize};

/// Whole weeks between start and end, `None` when either date is missing.
/// Inverted ranges give negative weeks (floor division, so -1 day is -1 week).
pub fn computed_weeks(record: &EnrollmentRecord) -> Option<i64> {
    let (start, end) = record.interval()?;
    Some((end - start).num_days().div_euclid(7))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationMismatch {
    pub index: usize,
    pub line_number: usize,
    pub declared_weeks: i64,
    pub computed_weeks: i64,
    /// computed - declared
    pub difference: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DurationReport {
    pub tolerance_weeks: i64,

    /// Input order
    pub mismatches: Vec<DurationMismatch>,

    /// Computed weeks per input record
    pub computed: Vec<Option<i64>>,

    /// Dated records with no usable declared duration
    pub unverifiable: Vec<usize>,

    /// Records missing a start or end date
    pub undated: Vec<usize>,
}

impl DurationReport {
    pub fn is_mismatch(&self, index: usize) -> bool {
        self.mismatches.iter().any(|m| m.index == index)
    }

    pub fn checked_count(&self) -> usize {
        self.computed.len() - self.unverifiable.len() - self.undated.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationValidator {
    tolerance_weeks: i64,
}

impl DurationValidator {
    /// Exact match required
    pub fn strict() -> Self {
        DurationValidator { tolerance_weeks: 0 }
    }

    pub fn with_tolerance(tolerance_weeks: i64) -> Result<Self, ConfigError> {
        if tolerance_weeks < 0 {
            return Err(ConfigError::Negative {
                name: "duration_tolerance_weeks",
                value: tolerance_weeks,
            });
        }
        Ok(DurationValidator { tolerance_weeks })
    }

    pub fn validate(&self, records: &[EnrollmentRecord]) -> DurationReport {
        let mut report = DurationReport {
            tolerance_weeks: self.tolerance_weeks,
            ..Default::default()
        };

        for (index, record) in records.iter().enumerate() {
            let computed = computed_weeks(record);
            report.computed.push(computed);

            let Some(computed) = computed else {
                report.undated.push(index);
                continue;
            };

            let Some(declared) = record.declared_duration_weeks else {
                report.unverifiable.push(index);
                continue;
            };

            // Records built in code skip parse_weeks bounds
            let difference = computed.saturating_sub(declared);
            if computed.abs_diff(declared) > self.tolerance_weeks.unsigned_abs() {
                report.mismatches.push(DurationMismatch {
                    index,
                    line_number: record.line_number,
                    declared_weeks: declared,
                    computed_weeks: computed,
                    difference,
                });
            }
        }

        tracing::debug!(
            tolerance = self.tolerance_weeks,
            mismatches = report.mismatches.len(),
            unverifiable = report.unverifiable.len(),
            undated = report.undated.len(),
            "duration validation finished"
        );

        report
    }
}

impl Default for DurationValidator {
    fn default() -> Self {
        Self::strict()
    }
}

// ============================================================================
// TESTS
// ============================================================================
