// 🔍 Deduplication Engine - Duplicate and overlapping COEs
// Three signals: Shared Identifier, Interval Overlap, Multiplicity Cluster
//
// A student + course group may legitimately hold several COEs back to back
// (extensions). Two COEs covering the same weeks are a data error.

use crate::config::{ConfigError, DuplicateConfig};
use crate::record::{CourseIdentity, EnrollmentRecord, StudentIdentity, StudentKey};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// MATCH KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Same COE code on two rows, regardless of student or dates
    SharedIdentifier,

    /// Same student + course, intervals share days
    Overlap,

    /// Same student + course, later COE continues the earlier one.
    /// Informational only, never flagged.
    Extension,
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateMatch {
    /// Index of first record (the earlier one for interval matches)
    pub first_index: usize,

    /// Index of second record
    pub second_index: usize,

    pub kind: MatchKind,

    /// Days both intervals cover; `None` for identifier matches
    pub shared_days: Option<i64>,

    /// Human-readable reason
    pub reason: String,
}

impl DuplicateMatch {
    pub fn is_duplicate(&self) -> bool {
        self.kind != MatchKind::Extension
    }
}

/// Same student + course appearing more than once. Softer than a flag:
/// meant for human review even when nothing overlaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub student_key: String,
    pub course_key: String,
    pub count: usize,
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateReport {
    /// One flag per input record, input order
    pub flags: Vec<bool>,

    pub matches: Vec<DuplicateMatch>,

    /// Groups with more than one record, ascending by key
    pub clusters: Vec<ClusterSummary>,

    /// Records with an incomplete student or course key
    pub ungrouped: Vec<usize>,
}

impl DuplicateReport {
    pub fn is_duplicate(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    pub fn duplicate_count(&self) -> usize {
        self.flags.iter().filter(|flag| **flag).count()
    }

    /// Flagged records, input order
    pub fn duplicates<'a>(&self, records: &'a [EnrollmentRecord]) -> Vec<&'a EnrollmentRecord> {
        records
            .iter()
            .enumerate()
            .filter(|(index, _)| self.is_duplicate(*index))
            .map(|(_, record)| record)
            .collect()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &DuplicateMatch> {
        self.matches
            .iter()
            .filter(|m| m.kind == MatchKind::Extension)
    }
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct DeduplicationEngine {
    student_identity: StudentIdentity,
    course_identity: CourseIdentity,

    /// Days an extension may share with the COE it continues (default: 1)
    extension_overlap_days: i64,
}

impl DeduplicationEngine {
    /// Create engine with default grouping (name + course code) and a
    /// one-day handover allowance
    pub fn new() -> Self {
        DeduplicationEngine {
            student_identity: StudentIdentity::Name,
            course_identity: CourseIdentity::CourseCode,
            extension_overlap_days: 1,
        }
    }

    pub fn from_config(config: &DuplicateConfig) -> Result<Self, ConfigError> {
        if config.extension_overlap_days < 0 {
            return Err(ConfigError::Negative {
                name: "duplicates.extension_overlap_days",
                value: config.extension_overlap_days,
            });
        }

        Ok(DeduplicationEngine {
            student_identity: config.student_identity,
            course_identity: config.course_identity,
            extension_overlap_days: config.extension_overlap_days,
        })
    }

    /// Run all three checks over `records`
    pub fn detect(&self, records: &[EnrollmentRecord]) -> DuplicateReport {
        let mut report = DuplicateReport {
            flags: vec![false; records.len()],
            ..Default::default()
        };

        self.check_identifiers(records, &mut report);

        let groups = self.group(records, &mut report.ungrouped);
        for ((student, course), indices) in &groups {
            if indices.len() < 2 {
                continue;
            }

            report.clusters.push(ClusterSummary {
                student_key: student.to_string(),
                course_key: course.clone(),
                count: indices.len(),
                indices: indices.clone(),
            });

            self.check_intervals(records, indices, &mut report);
        }

        for m in report.matches.iter().filter(|m| m.is_duplicate()) {
            report.flags[m.first_index] = true;
            report.flags[m.second_index] = true;
        }

        tracing::debug!(
            records = records.len(),
            groups = groups.len(),
            clusters = report.clusters.len(),
            ungrouped = report.ungrouped.len(),
            flagged = report.duplicate_count(),
            "duplicate detection finished"
        );

        report
    }

    /// Step 1: a COE code must be globally unique
    fn check_identifiers(&self, records: &[EnrollmentRecord], report: &mut DuplicateReport) {
        let mut by_id: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            if let Some(id) = record.identifier() {
                by_id.entry(id).or_default().push(index);
            }
        }

        for (id, indices) in by_id.iter().filter(|(_, indices)| indices.len() > 1) {
            for (pos, &first) in indices.iter().enumerate() {
                for &second in &indices[pos + 1..] {
                    report.matches.push(DuplicateMatch {
                        first_index: first,
                        second_index: second,
                        kind: MatchKind::SharedIdentifier,
                        shared_days: None,
                        reason: format!(
                            "COE code {} appears on rows {} and {}",
                            id, records[first].line_number, records[second].line_number
                        ),
                    });
                }
            }
        }
    }

    fn group(
        &self,
        records: &[EnrollmentRecord],
        ungrouped: &mut Vec<usize>,
    ) -> BTreeMap<(StudentKey, String), Vec<usize>> {
        let mut groups: BTreeMap<(StudentKey, String), Vec<usize>> = BTreeMap::new();

        for (index, record) in records.iter().enumerate() {
            let student = record.student_key(self.student_identity);
            let course = record.course_key(self.course_identity);
            match (student, course) {
                (Some(student), Some(course)) => {
                    groups.entry((student, course)).or_default().push(index)
                }
                _ => ungrouped.push(index),
            }
        }

        groups
    }

    /// Step 2: pairwise closed-interval overlap inside one group
    fn check_intervals(
        &self,
        records: &[EnrollmentRecord],
        indices: &[usize],
        report: &mut DuplicateReport,
    ) {
        // Inverted ranges can never overlap anything; data quality reports them.
        let mut dated: Vec<(usize, NaiveDate, NaiveDate)> = indices
            .iter()
            .filter_map(|&index| {
                let (start, end) = records[index].interval()?;
                (start <= end).then_some((index, start, end))
            })
            .collect();
        dated.sort_by_key(|&(index, start, end)| (start, end, index));

        for (pos, &(a, a_start, a_end)) in dated.iter().enumerate() {
            for &(b, b_start, b_end) in &dated[pos + 1..] {
                let latest_start = a_start.max(b_start);
                let earliest_end = a_end.min(b_end);
                let (a_line, b_line) = (records[a].line_number, records[b].line_number);

                if earliest_end < latest_start {
                    if (b_start - a_end).num_days() == 1 {
                        report.matches.push(DuplicateMatch {
                            first_index: a,
                            second_index: b,
                            kind: MatchKind::Extension,
                            shared_days: Some(0),
                            reason: format!(
                                "Row {} continues row {} from {}",
                                b_line, a_line, b_start
                            ),
                        });
                    }
                    continue;
                }

                let shared_days = (earliest_end - latest_start).num_days() + 1;
                let continues = b_start > a_start && b_end > a_end;

                if continues && shared_days <= self.extension_overlap_days {
                    report.matches.push(DuplicateMatch {
                        first_index: a,
                        second_index: b,
                        kind: MatchKind::Extension,
                        shared_days: Some(shared_days),
                        reason: format!(
                            "Row {} continues row {} from {} ({} shared day{})",
                            b_line,
                            a_line,
                            b_start,
                            shared_days,
                            if shared_days == 1 { "" } else { "s" }
                        ),
                    });
                } else {
                    report.matches.push(DuplicateMatch {
                        first_index: a,
                        second_index: b,
                        kind: MatchKind::Overlap,
                        shared_days: Some(shared_days),
                        reason: format!(
                            "Rows {} and {} overlap for {} days ({} to {})",
                            a_line, b_line, shared_days, latest_start, earliest_end
                        ),
                    });
                }
            }
        }
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
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

    fn create_test_record(
        line: usize,
        id: &str,
        student: &str,
        course: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EnrollmentRecord {
        EnrollmentRecord::new(line)
            .with_id(id)
            .with_status("APPROVED")
            .with_student(student)
            .with_course(course)
            .with_dates(start, end)
    }

    fn scenario() -> Vec<EnrollmentRecord> {
        vec![
            create_test_record(1, "C1", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 3, 25))
                .with_duration(12),
            create_test_record(2, "C2", "Jane Doe", "BSB101", date(2024, 3, 26), date(2024, 6, 17))
                .with_duration(12),
        ]
    }

    #[test]
    fn test_clean_extension_not_flagged() {
        let engine = DeduplicationEngine::new();
        let report = engine.detect(&scenario());

        assert_eq!(report.flags, vec![false, false]);
        assert_eq!(report.extensions().count(), 1);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].count, 2);
        assert_eq!(report.clusters[0].student_key, "JANE DOE");
        assert_eq!(report.clusters[0].course_key, "BSB101");
    }

    #[test]
    fn test_overlapping_coe_flagged() {
        let engine = DeduplicationEngine::new();
        let mut records = scenario();
        records.push(
            create_test_record(3, "C3", "Jane Doe", "BSB101", date(2024, 2, 1), date(2024, 4, 1))
                .with_duration(8),
        );

        let report = engine.detect(&records);

        assert!(report.is_duplicate(0));
        assert!(report.is_duplicate(2));
        // C3 also runs into C2's first week
        assert!(report.is_duplicate(1));

        let c1_c3 = report
            .matches
            .iter()
            .find(|m| m.first_index == 0 && m.second_index == 2)
            .unwrap();
        assert_eq!(c1_c3.kind, MatchKind::Overlap);
        assert_eq!(c1_c3.shared_days, Some(54));
    }

    #[test]
    fn test_overlap_is_symmetric() {
        let engine = DeduplicationEngine::new();
        let a =
            create_test_record(1, "A", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 3, 1));
        let b =
            create_test_record(2, "B", "Jane Doe", "BSB101", date(2024, 2, 1), date(2024, 5, 1));

        let forward = engine.detect(&[a.clone(), b.clone()]);
        let backward = engine.detect(&[b, a]);

        assert_eq!(forward.flags, vec![true, true]);
        assert_eq!(backward.flags, vec![true, true]);
    }

    #[test]
    fn test_handover_day_is_extension_by_default() {
        let records = vec![
            create_test_record(1, "A", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 3, 25)),
            create_test_record(2, "B", "Jane Doe", "BSB101", date(2024, 3, 25), date(2024, 6, 17)),
        ];

        let report = DeduplicationEngine::new().detect(&records);
        assert_eq!(report.flags, vec![false, false]);

        let strict = DeduplicationEngine::from_config(&DuplicateConfig {
            extension_overlap_days: 0,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(strict.detect(&records).flags, vec![true, true]);
    }

    #[test]
    fn test_lenient_threshold_allows_short_overlap() {
        let records = vec![
            create_test_record(1, "A", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 3, 25)),
            create_test_record(2, "B", "Jane Doe", "BSB101", date(2024, 3, 24), date(2024, 6, 17)),
        ];

        assert_eq!(DeduplicationEngine::new().detect(&records).flags, vec![true, true]);

        let lenient = DeduplicationEngine::from_config(&DuplicateConfig {
            extension_overlap_days: 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(lenient.detect(&records).flags, vec![false, false]);
    }

    #[test]
    fn test_contained_interval_is_never_extension() {
        let lenient = DeduplicationEngine::from_config(&DuplicateConfig {
            extension_overlap_days: 30,
            ..Default::default()
        })
        .unwrap();
        let records = vec![
            create_test_record(1, "A", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 6, 1)),
            create_test_record(2, "B", "Jane Doe", "BSB101", date(2024, 6, 1), date(2024, 6, 1)),
        ];

        assert_eq!(lenient.detect(&records).flags, vec![true, true]);
    }

    #[test]
    fn test_identical_records_flagged() {
        let records = vec![
            create_test_record(1, "A", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 1, 1)),
            create_test_record(2, "B", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 1, 1)),
        ];

        assert_eq!(DeduplicationEngine::new().detect(&records).flags, vec![true, true]);
    }

    #[test]
    fn test_shared_identifier_always_flagged() {
        let records = vec![
            create_test_record(1, "C9", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 3, 1)),
            create_test_record(2, " c9 ", "John Roe", "SIT202", date(2025, 1, 1), date(2025, 3, 1)),
            create_test_record(3, "C10", "John Roe", "SIT202", date(2026, 1, 1), date(2026, 3, 1)),
        ];

        let report = DeduplicationEngine::new().detect(&records);
        assert_eq!(report.flags, vec![true, true, false]);
        assert_eq!(report.matches[0].kind, MatchKind::SharedIdentifier);
    }

    #[test]
    fn test_missing_course_never_grouped() {
        let mut a =
            create_test_record(1, "A", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 3, 1));
        let mut b =
            create_test_record(2, "B", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 3, 1));
        a.course_code = None;
        b.course_code = Some("  ".to_string());

        let report = DeduplicationEngine::new().detect(&[a, b]);
        assert_eq!(report.flags, vec![false, false]);
        assert_eq!(report.ungrouped, vec![0, 1]);
        assert!(report.clusters.is_empty());
    }

    #[test]
    fn test_grouping_ignores_case_and_spacing() {
        let records = vec![
            create_test_record(1, "A", "Jane Doe", "bsb101", date(2024, 1, 1), date(2024, 3, 1)),
            create_test_record(2, "B", "JANE   doe", "BSB101 ", date(2024, 2, 1), date(2024, 4, 1)),
        ];

        assert_eq!(DeduplicationEngine::new().detect(&records).flags, vec![true, true]);
    }

    #[test]
    fn test_disjoint_cluster_reported_without_flags() {
        let mut records = vec![
            create_test_record(1, "A", "Jane Doe", "BSB101", date(2023, 1, 1), date(2023, 3, 1)),
            create_test_record(2, "B", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 3, 1)),
            create_test_record(3, "C", "Jane Doe", "BSB101", date(2025, 1, 1), date(2025, 3, 1)),
        ];
        records[2].start_date = None;

        let report = DeduplicationEngine::new().detect(&records);
        assert_eq!(report.duplicate_count(), 0);
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].count, 3);
        assert_eq!(report.clusters[0].indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_student_id_identity() {
        let engine = DeduplicationEngine::from_config(&DuplicateConfig {
            student_identity: StudentIdentity::StudentId,
            ..Default::default()
        })
        .unwrap();

        let records = vec![
            create_test_record(1, "A", "Jane Doe", "BSB101", date(2024, 1, 1), date(2024, 3, 1))
                .with_student_id("S1"),
            create_test_record(2, "B", "Janet Doe", "BSB101", date(2024, 2, 1), date(2024, 4, 1))
                .with_student_id("s1"),
        ];

        assert_eq!(engine.detect(&records).flags, vec![true, true]);
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let result = DeduplicationEngine::from_config(&DuplicateConfig {
            extension_overlap_days: -1,
            ..Default::default()
        });
        assert!(result.is_err());
    }
}
