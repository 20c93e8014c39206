// 📂 Ingestion Adapter - CSV text → RawRow
//
// Maps whatever header spellings the export used onto canonical fields.
// Unknown columns are kept verbatim for pass-through export.

use crate::record::{normalize, Field, Normalized, RawRow};
use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

/// Columns an enrollment export is expected to carry. Only the two date
/// columns are mandatory; the rest are warned about.
pub const EXPECTED_COLUMNS: [Field; 8] = [
    Field::CoeCode,
    Field::Status,
    Field::FirstName,
    Field::FamilyName,
    Field::CourseCode,
    Field::DurationWeeks,
    Field::StartDate,
    Field::EndDate,
];

pub const MANDATORY_COLUMNS: [Field; 2] = [Field::StartDate, Field::EndDate];

/// One parsed upload
#[derive(Debug, Clone)]
pub struct Ingested {
    pub rows: Vec<RawRow>,

    /// Canonical fields found in the header row
    pub mapped: BTreeSet<Field>,

    /// Expected fields the header row lacked
    pub missing: Vec<Field>,

    /// Headers kept as pass-through columns
    pub unmapped: Vec<String>,

    /// SHA-256 of the raw bytes, identifies the upload
    pub fingerprint: String,
}

impl Ingested {
    pub fn normalize(&self) -> Vec<Normalized> {
        self.rows.iter().map(normalize).collect()
    }
}

/// Read a CSV export from disk
pub fn load_csv(csv_path: &Path) -> Result<Ingested> {
    let bytes = std::fs::read(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;
    read_csv(&bytes)
}

/// Read a CSV export from any reader (stdin, HTTP body)
pub fn read_from<R: Read>(mut reader: R) -> Result<Ingested> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).context("Failed to read CSV input")?;
    read_csv(&bytes)
}

pub fn read_csv(bytes: &[u8]) -> Result<Ingested> {
    let fingerprint = format!("{:x}", Sha256::digest(bytes));

    // Excel likes to prepend a UTF-8 BOM
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body);

    // Cells are decoded lossily: Excel exports are often Windows-1252, and one
    // accented name must not sink the whole file.
    let headers: Vec<String> = rdr
        .byte_headers()
        .context("Failed to read CSV header row")?
        .iter()
        .map(decode_cell)
        .collect();

    // First column wins when two headers map to the same field
    let mut columns: Vec<Option<Field>> = Vec::with_capacity(headers.len());
    let mut mapped = BTreeSet::new();
    let mut unmapped = Vec::new();
    for header in &headers {
        match Field::from_header(header) {
            Some(field) if mapped.insert(field) => columns.push(Some(field)),
            _ => {
                columns.push(None);
                if !header.is_empty() {
                    unmapped.push(header.to_string());
                }
            }
        }
    }

    let absent: Vec<Field> = MANDATORY_COLUMNS
        .iter()
        .copied()
        .filter(|field| !mapped.contains(field))
        .collect();
    if !absent.is_empty() {
        let names: Vec<&str> = absent.iter().map(|f| f.header()).collect();
        bail!("Missing required column(s): {}", names.join(", "));
    }

    let missing: Vec<Field> = EXPECTED_COLUMNS
        .iter()
        .copied()
        .filter(|field| !mapped.contains(field))
        .collect();
    if !missing.is_empty() {
        tracing::warn!(missing = ?missing, "expected columns not found");
    }
    if !unmapped.is_empty() {
        tracing::debug!(unmapped = ?unmapped, "pass-through columns");
    }

    let mut rows = Vec::new();
    let mut lossy_rows = 0;
    for (position, result) in rdr.byte_records().enumerate() {
        let record = result.with_context(|| format!("Failed to read CSV row {}", position + 1))?;

        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        if std::str::from_utf8(record.as_slice()).is_err() {
            lossy_rows += 1;
        }

        let mut row = RawRow::new(position + 1);
        for (column, cell) in record.iter().enumerate() {
            let cell = decode_cell(cell);
            match columns.get(column).copied().flatten() {
                Some(field) => {
                    row.cells.insert(field, cell);
                }
                None => {
                    if let Some(header) = headers.get(column).filter(|h| !h.is_empty()) {
                        row.extra.insert(header.clone(), cell);
                    }
                }
            }
        }
        rows.push(row);
    }
    if lossy_rows > 0 {
        tracing::warn!(rows = lossy_rows, "non UTF-8 bytes replaced");
    }

    tracing::info!(
        rows = rows.len(),
        mapped = mapped.len(),
        unmapped = unmapped.len(),
        fingerprint = %&fingerprint[..12],
        "loaded enrollment CSV"
    );

    Ok(Ingested {
        rows,
        mapped,
        missing,
        unmapped,
        fingerprint,
    })
}

fn decode_cell(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
COE Code,COE STATUS,First Name,Family Name,Course Code,Duration In Weeks,\
Proposed Start Date,Proposed End Date,Phone
C1,Studying,Jane,Doe,BSB101,12,01/01/2024,25/03/2024,0400 000 000
,,,,,,,,
C2,Approved,John,Roe,SIT202,abc,2024-02-01,2024-04-01,
";

    #[test]
    fn test_headers_mapped_case_insensitively() {
        let ingested = read_csv(SAMPLE.as_bytes()).unwrap();

        assert_eq!(ingested.rows.len(), 2);
        assert!(ingested.mapped.contains(&Field::StartDate));
        assert_eq!(ingested.unmapped, vec!["Phone".to_string()]);
        assert!(ingested.missing.is_empty());

        let first = &ingested.rows[0];
        assert_eq!(first.line_number, 1);
        assert_eq!(first.get(Field::CoeCode), Some("C1"));
        assert_eq!(first.extra.get("Phone").map(String::as_str), Some("0400 000 000"));
    }

    #[test]
    fn test_blank_rows_skipped_but_line_numbers_kept() {
        let ingested = read_csv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(ingested.rows[1].line_number, 3);
    }

    #[test]
    fn test_normalize_all_rows() {
        let normalized = read_csv(SAMPLE.as_bytes()).unwrap().normalize();
        assert!(normalized[0].is_complete());
        assert!(!normalized[1].is_complete());
        assert_eq!(normalized[1].failures()[0].field, Field::DurationWeeks);
    }

    #[test]
    fn test_missing_date_column_rejected() {
        let err = read_csv(b"COE Code,Proposed Start Date\nC1,01/01/2024\n").unwrap_err();
        assert!(err.to_string().contains("PROPOSED END DATE"));
    }

    #[test]
    fn test_missing_expected_columns_listed() {
        let ingested = read_csv(b"Start Date,End Date\n01/01/2024,25/03/2024\n").unwrap();
        assert!(ingested.missing.contains(&Field::CoeCode));
        assert!(!ingested.missing.contains(&Field::StartDate));
    }

    #[test]
    fn test_bom_and_fingerprint() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(SAMPLE.as_bytes());

        let with_bom = read_csv(&bytes).unwrap();
        let without = read_csv(SAMPLE.as_bytes()).unwrap();

        assert!(with_bom.mapped.contains(&Field::CoeCode));
        assert_eq!(with_bom.fingerprint.len(), 64);
        assert_ne!(with_bom.fingerprint, without.fingerprint);
    }

    #[test]
    fn test_invalid_utf8_cell_keeps_the_file() {
        let mut bytes = b"COE Code,First Name,Start Date,End Date\n".to_vec();
        bytes.extend_from_slice(b"C1,Jos\xE9,01/01/2024,25/03/2024\n");
        bytes.extend_from_slice(b"C2,Jane,01/02/2024,25/04/2024\n");

        let ingested = read_csv(&bytes).unwrap();

        assert_eq!(ingested.rows.len(), 2);
        assert_eq!(ingested.rows[0].get(Field::FirstName), Some("Jos\u{FFFD}"));
        assert_eq!(ingested.rows[0].get(Field::StartDate), Some("01/01/2024"));
        assert_eq!(ingested.rows[1].get(Field::FirstName), Some("Jane"));
    }

    #[test]
    fn test_duplicate_header_goes_to_extra() {
        let csv = b"Start Date,End Date,Course End Date\n01/01/2024,25/03/2024,30/03/2024\n";
        let ingested = read_csv(csv).unwrap();
        assert_eq!(ingested.rows[0].get(Field::EndDate), Some("25/03/2024"));
        assert_eq!(
            ingested.rows[0].extra.get("Course End Date").map(String::as_str),
            Some("30/03/2024")
        );
    }
}
