// 📤 CSV Export - Annotated rows and the student contact sheet

use crate::record::EnrollmentRecord;
use crate::report::AnnotatedRecord;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;

const ANNOTATED_HEADERS: [&str; 13] = [
    "LINE",
    "COE CODE",
    "STUDENT",
    "COE STATUS",
    "PROPOSED START DATE",
    "PROPOSED END DATE",
    "DURATION IN WEEKS",
    "COMPUTED WEEKS",
    "PHASE",
    "COUNTED AS",
    "DUPLICATE",
    "DURATION MISMATCH",
    "ISSUES",
];

/// Write annotated rows, followed by every pass-through column seen in
/// `records`. `annotated` and `records` must line up index for index.
pub fn write_annotated<W: Write>(
    writer: W,
    annotated: &[&AnnotatedRecord],
    records: &[&EnrollmentRecord],
) -> Result<()> {
    if annotated.len() != records.len() {
        bail!(
            "annotation count {} does not match record count {}",
            annotated.len(),
            records.len()
        );
    }

    let extra_headers: BTreeSet<&str> = records
        .iter()
        .flat_map(|record| record.extra.keys().map(String::as_str))
        .collect();

    let mut wtr = csv::Writer::from_writer(writer);
    let header_row: Vec<&str> = ANNOTATED_HEADERS
        .iter()
        .copied()
        .chain(extra_headers.iter().copied())
        .collect();
    wtr.write_record(&header_row)?;

    let text = |value: Option<String>| value.unwrap_or_default();
    for (row, record) in annotated.iter().zip(records) {
        let mut cells = vec![
            row.line_number.to_string(),
            text(row.id.clone()),
            row.student.clone(),
            text(row.status.clone()),
            text(row.start_date.map(|d| d.to_string())),
            text(row.end_date.map(|d| d.to_string())),
            text(row.declared_weeks.map(|w| w.to_string())),
            text(row.computed_weeks.map(|w| w.to_string())),
            text(row.phase.map(|p| p.to_string())),
            text(row.counted_as.map(|p| p.to_string())),
            yes_no(row.is_duplicate),
            yes_no(row.duration_mismatch),
            row.issue_count.to_string(),
        ];
        for header in &extra_headers {
            cells.push(record.extra.get(*header).cloned().unwrap_or_default());
        }
        wtr.write_record(&cells)?;
    }

    wtr.flush().context("Failed to write annotated CSV")?;
    Ok(())
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}

/// One line of the contact sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactRow {
    #[serde(rename = "FIRST NAME")]
    pub first_name: String,
    #[serde(rename = "SECOND NAME")]
    pub second_name: String,
    #[serde(rename = "FAMILY NAME")]
    pub family_name: String,
    #[serde(rename = "STUDENT ID")]
    pub student_id: String,
    #[serde(rename = "PROVIDER STUDENT ID")]
    pub provider_student_id: String,
}

impl From<&EnrollmentRecord> for ContactRow {
    fn from(record: &EnrollmentRecord) -> Self {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        ContactRow {
            first_name: text(&record.first_name),
            second_name: text(&record.second_name),
            family_name: text(&record.family_name),
            student_id: text(&record.student_id),
            provider_student_id: text(&record.provider_student_id),
        }
    }
}

/// Names and student IDs, one row per record, input order
pub fn write_contacts<W: Write>(writer: W, records: &[&EnrollmentRecord]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(ContactRow::from(*record))?;
    }
    wtr.flush().context("Failed to write contact sheet")?;
    Ok(records.len())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::record::Normalized;
    use crate::report::analyze;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn create_test_record(line: usize, name: &str) -> EnrollmentRecord {
        EnrollmentRecord::new(line)
            .with_id(&format!("C{}", line))
            .with_status("STUDYING")
            .with_student(name)
            .with_student_id(&format!("S{}", line))
            .with_course("BSB101")
            .with_dates(date(2024, 1, 1), date(2024, 3, 25))
            .with_duration(12)
    }

    #[test]
    fn test_contact_sheet() {
        let a = create_test_record(1, "Jane Q Doe");
        let b = create_test_record(2, "John Roe");

        let mut out = Vec::new();
        let written = write_contacts(&mut out, &[&a, &b]).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(written, 2);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "FIRST NAME,SECOND NAME,FAMILY NAME,STUDENT ID,PROVIDER STUDENT ID"
        );
        assert_eq!(lines[1], "Jane,Q,Doe,S1,");
        assert_eq!(lines[2], "John,,Roe,S2,");
    }

    #[test]
    fn test_annotated_export_keeps_extra_columns() {
        let mut a = create_test_record(1, "Jane Doe");
        a.extra.insert("Campus".to_string(), "Sydney".to_string());
        let b = create_test_record(2, "John Roe");

        let rows: Vec<Normalized> = vec![a.clone().into(), b.clone().into()];
        let config = AnalysisConfig {
            reference_date: Some(date(2024, 2, 15)),
            ..Default::default()
        };
        let report = analyze(&rows, &config).unwrap();
        let annotated: Vec<&AnnotatedRecord> = report.records.iter().collect();

        let mut out = Vec::new();
        write_annotated(&mut out, &annotated, &[&a, &b]).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert!(lines[0].ends_with("ISSUES,Campus"));
        assert!(lines[1].starts_with("1,C1,Jane Doe,STUDYING,2024-01-01,2024-03-25,12,12,"));
        assert!(lines[1].contains(",active,active,no,no,0,"));
        assert!(lines[1].ends_with(",Sydney"));
        assert!(lines[2].ends_with(",0,"));
    }

    #[test]
    fn test_annotated_export_rejects_misaligned_input() {
        let a = create_test_record(1, "Jane Doe");
        assert!(write_annotated(Vec::new(), &[], &[&a]).is_err());
    }
}
