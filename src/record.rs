// 🎓 Record Model - Normalized COE enrollment rows
// Raw spreadsheet rows in, typed records out.
//
// Normalization never fails: a cell that cannot be parsed is recorded as a
// FieldFailure and the rest of the row is kept.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

// ============================================================================
// CANONICAL FIELDS
// ============================================================================

/// Semantic fields the core understands. Every other column is carried in
/// `EnrollmentRecord::extra` untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    CoeCode,
    Status,
    FirstName,
    SecondName,
    FamilyName,
    StudentId,
    ProviderStudentId,
    CourseCode,
    CourseName,
    DurationWeeks,
    StartDate,
    EndDate,
    VisaExpiry,
    CoeEndDate,
    Agent,
}

impl Field {
    pub const ALL: [Field; 15] = [
        Field::CoeCode,
        Field::Status,
        Field::FirstName,
        Field::SecondName,
        Field::FamilyName,
        Field::StudentId,
        Field::ProviderStudentId,
        Field::CourseCode,
        Field::CourseName,
        Field::DurationWeeks,
        Field::StartDate,
        Field::EndDate,
        Field::VisaExpiry,
        Field::CoeEndDate,
        Field::Agent,
    ];

    /// Header used when writing records back out
    pub fn header(&self) -> &'static str {
        match self {
            Field::CoeCode => "COE CODE",
            Field::Status => "COE STATUS",
            Field::FirstName => "FIRST NAME",
            Field::SecondName => "SECOND NAME",
            Field::FamilyName => "FAMILY NAME",
            Field::StudentId => "STUDENT ID",
            Field::ProviderStudentId => "PROVIDER STUDENT ID",
            Field::CourseCode => "COURSE CODE",
            Field::CourseName => "COURSE NAME",
            Field::DurationWeeks => "DURATION IN WEEKS",
            Field::StartDate => "PROPOSED START DATE",
            Field::EndDate => "PROPOSED END DATE",
            Field::VisaExpiry => "VISA EXPIRY DATE",
            Field::CoeEndDate => "COE END DATE",
            Field::Agent => "AGENT",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Field::CoeCode => &["COE", "COE ID", "COE NO", "COE NUMBER"],
            Field::Status => &["STATUS", "ENROLMENT STATUS", "ENROLLMENT STATUS"],
            Field::FirstName => &["FIRSTNAME", "GIVEN NAME"],
            Field::SecondName => &["MIDDLE NAME"],
            Field::FamilyName => &["LAST NAME", "SURNAME"],
            Field::StudentId => &["STUDENT NUMBER", "STUDENT NO"],
            Field::ProviderStudentId => &["PROVIDER ID"],
            Field::CourseCode => &["CRICOS CODE", "CRICOS COURSE CODE"],
            Field::CourseName => &["COURSE", "PROGRAM", "PROGRAM NAME"],
            Field::DurationWeeks => &["DURATION", "DURATION WEEKS", "WEEKS"],
            Field::StartDate => &["START DATE", "COURSE START DATE"],
            Field::EndDate => &["END DATE", "COURSE END DATE"],
            Field::VisaExpiry => &["VISA EXPIRY", "VISA END DATE"],
            Field::CoeEndDate => &["COE EXPIRY", "COE EXPIRY DATE"],
            Field::Agent => &["AGENT NAME", "AGENCY", "SUBMITTED BY"],
        }
    }

    /// Map an arbitrary header spelling onto a canonical field.
    ///
    /// Case-insensitive; `_` and `-` count as spaces and runs of whitespace
    /// collapse, so `proposed_start_date` and `Proposed  Start Date` both
    /// resolve to `StartDate`.
    pub fn from_header(header: &str) -> Option<Field> {
        let folded = fold_header(header);
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.header() == folded || field.aliases().contains(&folded.as_str()))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

fn fold_header(header: &str) -> String {
    header
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Case/whitespace folding used for every key comparison.
///
/// Returns `None` for blank input so a missing component can never compare
/// equal to another missing component.
pub fn fold_key(raw: &str) -> Option<String> {
    let folded = raw.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
    if folded.is_empty() {
        None
    } else {
        Some(folded)
    }
}

// ============================================================================
// STATUS VOCABULARY
// ============================================================================

/// COE status. The vocabulary is open: anything the file contains survives
/// as `Other`, folded to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Approved,
    Studying,
    VisaGranted,
    Cancelled,
    Finished,
    Saved,
    Other(String),
}

impl Status {
    pub fn parse(raw: &str) -> Option<Status> {
        let folded = fold_key(raw)?;
        Some(match folded.as_str() {
            "APPROVED" => Status::Approved,
            "STUDYING" => Status::Studying,
            "VISA GRANTED" => Status::VisaGranted,
            "CANCELLED" => Status::Cancelled,
            "FINISHED" => Status::Finished,
            "SAVED" => Status::Saved,
            _ => Status::Other(folded),
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Status::Approved => "APPROVED",
            Status::Studying => "STUDYING",
            Status::VisaGranted => "VISA GRANTED",
            Status::Cancelled => "CANCELLED",
            Status::Finished => "FINISHED",
            Status::Saved => "SAVED",
            Status::Other(value) => value,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Status::Other(_))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        Status::parse(&value).unwrap_or(Status::Other(value))
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.as_str().to_string()
    }
}

// ============================================================================
// GROUPING IDENTITIES
// ============================================================================

/// Which columns identify a student for overlap grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentIdentity {
    /// First + second + family name. First and family are required, the
    /// second name compares as empty when absent.
    #[default]
    Name,
    StudentId,
    ProviderStudentId,
}

/// Which column identifies a course for overlap grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseIdentity {
    #[default]
    CourseCode,
    CourseName,
}

/// Folded student identity tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StudentKey(Vec<String>);

impl fmt::Display for StudentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .0
            .iter()
            .map(String::as_str)
            .filter(|part| !part.is_empty())
            .collect();
        f.write_str(&parts.join(" "))
    }
}

impl Serialize for StudentKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// RAW ROW (from the ingestion adapter)
// ============================================================================

/// One spreadsheet row with headers already mapped onto canonical fields
#[derive(Debug, Clone, Default)]
pub struct RawRow {
    /// 1-based data row number in the source file
    pub line_number: usize,

    pub cells: HashMap<Field, String>,

    /// Unmapped columns, keyed by their original header
    pub extra: BTreeMap<String, String>,
}

impl RawRow {
    pub fn new(line_number: usize) -> Self {
        RawRow {
            line_number,
            ..Default::default()
        }
    }

    /// Builder: set a canonical cell
    pub fn with(mut self, field: Field, value: impl Into<String>) -> Self {
        self.cells.insert(field, value.into());
        self
    }

    /// Builder: set a pass-through cell
    pub fn with_extra(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(header.into(), value.into());
        self
    }

    /// Trimmed cell value, `None` when absent or blank
    pub fn get(&self, field: Field) -> Option<&str> {
        self.cells
            .get(&field)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

// ============================================================================
// ENROLLMENT RECORD
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub line_number: usize,

    /// COE code. Expected unique, not guaranteed.
    pub id: Option<String>,

    pub status: Option<Status>,

    pub first_name: Option<String>,
    pub second_name: Option<String>,
    pub family_name: Option<String>,
    pub student_id: Option<String>,
    pub provider_student_id: Option<String>,

    pub course_code: Option<String>,
    pub course_name: Option<String>,

    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,

    pub declared_duration_weeks: Option<i64>,

    /// Visa expiry, independent of `end_date`
    pub secondary_expiry: Option<NaiveDate>,

    /// End date printed on the COE itself, when the export carries one
    pub coe_end_date: Option<NaiveDate>,

    pub agent: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl EnrollmentRecord {
    pub fn new(line_number: usize) -> Self {
        EnrollmentRecord {
            line_number,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_status(mut self, status: &str) -> Self {
        self.status = Status::parse(status);
        self
    }

    /// Builder: "Jane Doe" → first "Jane", family "Doe"; three words fill
    /// the second name as well.
    pub fn with_student(mut self, full_name: &str) -> Self {
        let words: Vec<&str> = full_name.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            [first] => self.first_name = Some(first.to_string()),
            [first, family] => {
                self.first_name = Some(first.to_string());
                self.family_name = Some(family.to_string());
            }
            [first, middle @ .., family] => {
                self.first_name = Some(first.to_string());
                self.second_name = Some(middle.join(" "));
                self.family_name = Some(family.to_string());
            }
        }
        self
    }

    pub fn with_student_id(mut self, student_id: &str) -> Self {
        self.student_id = Some(student_id.to_string());
        self
    }

    pub fn with_course(mut self, course_code: &str) -> Self {
        self.course_code = Some(course_code.to_string());
        self
    }

    pub fn with_dates(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn with_duration(mut self, weeks: i64) -> Self {
        self.declared_duration_weeks = Some(weeks);
        self
    }

    pub fn with_visa_expiry(mut self, expiry: NaiveDate) -> Self {
        self.secondary_expiry = Some(expiry);
        self
    }

    pub fn with_coe_end_date(mut self, end: NaiveDate) -> Self {
        self.coe_end_date = Some(end);
        self
    }

    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    /// Both dates, when both parsed
    pub fn interval(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.start_date?, self.end_date?))
    }

    pub fn has_inverted_dates(&self) -> bool {
        matches!(self.interval(), Some((start, end)) if end < start)
    }

    /// Folded COE code used for identifier-duplicate checks
    pub fn identifier(&self) -> Option<String> {
        self.id.as_deref().and_then(fold_key)
    }

    pub fn student_key(&self, identity: StudentIdentity) -> Option<StudentKey> {
        let fold = |value: &Option<String>| value.as_deref().and_then(fold_key);
        let parts = match identity {
            StudentIdentity::Name => vec![
                fold(&self.first_name)?,
                fold(&self.second_name).unwrap_or_default(),
                fold(&self.family_name)?,
            ],
            StudentIdentity::StudentId => vec![fold(&self.student_id)?],
            StudentIdentity::ProviderStudentId => vec![fold(&self.provider_student_id)?],
        };
        Some(StudentKey(parts))
    }

    pub fn course_key(&self, identity: CourseIdentity) -> Option<String> {
        let value = match identity {
            CourseIdentity::CourseCode => &self.course_code,
            CourseIdentity::CourseName => &self.course_name,
        };
        value.as_deref().and_then(fold_key)
    }

    /// Display name, "First Second Family" with blanks skipped
    pub fn display_name(&self) -> String {
        [&self.first_name, &self.second_name, &self.family_name]
            .iter()
            .filter_map(|part| part.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Fields every row is expected to carry. Absence is recorded, not fatal.
pub const REQUIRED_FIELDS: [Field; 5] = [
    Field::CoeCode,
    Field::Status,
    Field::StartDate,
    Field::EndDate,
    Field::DurationWeeks,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "raw", rename_all = "snake_case")]
pub enum FailureKind {
    Missing,
    Unparseable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldFailure {
    pub field: Field,
    pub kind: FailureKind,
}

/// A row that normalized with at least one failed field
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRecord {
    pub record: EnrollmentRecord,
    pub failures: Vec<FieldFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Complete(EnrollmentRecord),
    Partial(PartialRecord),
}

impl Normalized {
    pub fn record(&self) -> &EnrollmentRecord {
        match self {
            Normalized::Complete(record) => record,
            Normalized::Partial(partial) => &partial.record,
        }
    }

    pub fn into_record(self) -> EnrollmentRecord {
        match self {
            Normalized::Complete(record) => record,
            Normalized::Partial(partial) => partial.record,
        }
    }

    pub fn failures(&self) -> &[FieldFailure] {
        match self {
            Normalized::Complete(_) => &[],
            Normalized::Partial(partial) => &partial.failures,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Normalized::Complete(_))
    }
}

impl From<EnrollmentRecord> for Normalized {
    fn from(record: EnrollmentRecord) -> Self {
        Normalized::Complete(record)
    }
}

/// Turn a raw row into a typed record, keeping whatever parses.
pub fn normalize(raw: &RawRow) -> Normalized {
    let mut failures = Vec::new();
    let text = |field: Field| raw.get(field).map(str::to_string);

    let record = EnrollmentRecord {
        line_number: raw.line_number,
        id: text(Field::CoeCode),
        status: raw.get(Field::Status).and_then(Status::parse),
        first_name: text(Field::FirstName),
        second_name: text(Field::SecondName),
        family_name: text(Field::FamilyName),
        student_id: text(Field::StudentId),
        provider_student_id: text(Field::ProviderStudentId),
        course_code: text(Field::CourseCode),
        course_name: text(Field::CourseName),
        start_date: parse_cell(raw, Field::StartDate, parse_date, &mut failures),
        end_date: parse_cell(raw, Field::EndDate, parse_date, &mut failures),
        declared_duration_weeks: parse_cell(raw, Field::DurationWeeks, parse_weeks, &mut failures),
        secondary_expiry: parse_cell(raw, Field::VisaExpiry, parse_date, &mut failures),
        coe_end_date: parse_cell(raw, Field::CoeEndDate, parse_date, &mut failures),
        agent: text(Field::Agent),
        extra: raw.extra.clone(),
    };

    for field in REQUIRED_FIELDS {
        if raw.get(field).is_none() {
            failures.push(FieldFailure {
                field,
                kind: FailureKind::Missing,
            });
        }
    }

    if failures.is_empty() {
        Normalized::Complete(record)
    } else {
        failures.sort_by_key(|failure| failure.field);
        Normalized::Partial(PartialRecord { record, failures })
    }
}

fn parse_cell<T>(
    raw: &RawRow,
    field: Field,
    parse: fn(&str) -> Option<T>,
    failures: &mut Vec<FieldFailure>,
) -> Option<T> {
    let value = raw.get(field)?;
    let parsed = parse(value);
    if parsed.is_none() {
        failures.push(FieldFailure {
            field,
            kind: FailureKind::Unparseable(value.to_string()),
        });
    }
    parsed
}

// Day-first: the source spreadsheets use Australian dates.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Anything outside this range came from the wrong format (e.g. "05/01/24"
/// read as year 5)
const PLAUSIBLE_YEARS: std::ops::RangeInclusive<i32> = 1900..=2999;

/// Excel serial day numbers below this are treated as garbage, not dates
const EXCEL_SERIAL_MIN: i64 = 10_000;
const EXCEL_SERIAL_MAX: i64 = 2_958_465;

/// Parse a calendar date, `None` on anything unrecognised.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    let plausible = |date: &NaiveDate| PLAUSIBLE_YEARS.contains(&date.year());

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if plausible(&date) {
                return Some(date);
            }
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            if plausible(&datetime.date()) {
                return Some(datetime.date());
            }
        }
    }

    parse_excel_serial(value)
}

fn parse_excel_serial(value: &str) -> Option<NaiveDate> {
    let serial = value.parse::<f64>().ok()?;
    if !serial.is_finite() || serial.fract() != 0.0 {
        return None;
    }

    let serial = serial as i64;
    if !(EXCEL_SERIAL_MIN..=EXCEL_SERIAL_MAX).contains(&serial) {
        return None;
    }

    // Excel day 1 is 1900-01-01 but counts the nonexistent 1900-02-29,
    // hence the 1899-12-30 epoch.
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial as u64))
}

/// Longest course a declared duration may describe
pub const MAX_DURATION_WEEKS: i64 = 10_000;

/// Coerce a week count. Decimals truncate toward zero; negative or
/// implausibly large counts are rejected.
pub fn parse_weeks(raw: &str) -> Option<i64> {
    let value = raw.trim();
    let weeks = match value.parse::<i64>() {
        Ok(weeks) => weeks,
        Err(_) => {
            let weeks = value.parse::<f64>().ok()?.trunc();
            if !(0.0..=MAX_DURATION_WEEKS as f64).contains(&weeks) {
                return None;
            }
            weeks as i64
        }
    };

    (0..=MAX_DURATION_WEEKS).contains(&weeks).then_some(weeks)
}

// ============================================================================
// TESTS
// ============================================================================
