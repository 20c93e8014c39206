// ⚙️ Analysis Configuration
// Every knob the core takes, passed explicitly on each call. Loadable from a
// JSON file; invalid values are rejected up front instead of defaulted.

use crate::record::{CourseIdentity, Field, Status, StudentIdentity};
use crate::temporal::{Mode, Phase, StatusPolicy};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Caller contract violations. Data problems never end up here.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown mode '{0}' (expected past, active or future)")]
    UnknownMode(String),

    #[error("unknown student identity '{0}' (expected name, student_id or provider_student_id)")]
    UnknownStudentIdentity(String),

    #[error("unknown course identity '{0}' (expected course_code or course_name)")]
    UnknownCourseIdentity(String),

    #[error("unknown group-by column '{0}'")]
    UnknownGroupBy(String),

    #[error("{name} must not be negative, got {value}")]
    Negative { name: &'static str, value: i64 },

    #[error("invalid date '{0}' (expected YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// ENUM PARSING (CLI flags, query strings)
// ============================================================================

impl FromStr for Phase {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "past" => Ok(Phase::Past),
            "active" => Ok(Phase::Active),
            "future" => Ok(Phase::Future),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

impl FromStr for StudentIdentity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "name" => Ok(StudentIdentity::Name),
            "student_id" => Ok(StudentIdentity::StudentId),
            "provider_student_id" => Ok(StudentIdentity::ProviderStudentId),
            _ => Err(ConfigError::UnknownStudentIdentity(s.to_string())),
        }
    }
}

impl FromStr for CourseIdentity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "course_code" => Ok(CourseIdentity::CourseCode),
            "course_name" => Ok(CourseIdentity::CourseName),
            _ => Err(ConfigError::UnknownCourseIdentity(s.to_string())),
        }
    }
}

/// Strict `YYYY-MM-DD` for configuration values
pub fn parse_reference_date(s: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ConfigError::InvalidDate(s.to_string()))
}

// ============================================================================
// GROUP-BY COLUMN
// ============================================================================

/// Column used by the group summary reporter
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    #[default]
    Agent,
    Status,
    Course,
    /// Any pass-through column, matched by header case-insensitively
    Column(String),
}

impl GroupBy {
    pub fn label(&self) -> String {
        match self {
            GroupBy::Agent => Field::Agent.header().to_string(),
            GroupBy::Status => Field::Status.header().to_string(),
            GroupBy::Course => Field::CourseName.header().to_string(),
            GroupBy::Column(name) => name.clone(),
        }
    }
}

impl FromStr for GroupBy {
    type Err = ConfigError;

    /// `agent`, `status`, `course`, or `column:<header>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(column) = trimmed.strip_prefix("column:") {
            if column.trim().is_empty() {
                return Err(ConfigError::UnknownGroupBy(s.to_string()));
            }
            return Ok(GroupBy::Column(column.trim().to_string()));
        }

        match trimmed.to_lowercase().as_str() {
            "agent" => Ok(GroupBy::Agent),
            "status" => Ok(GroupBy::Status),
            "course" => Ok(GroupBy::Course),
            _ => Err(ConfigError::UnknownGroupBy(s.to_string())),
        }
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Grouping keys and extension threshold for the overlap detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub student_identity: StudentIdentity,
    pub course_identity: CourseIdentity,

    /// Days a back-to-back COE may share with the one it extends and still
    /// count as an extension. 1 = the new COE may start on the old end date;
    /// 0 = any shared day is a duplicate.
    pub extension_overlap_days: i64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        DuplicateConfig {
            student_identity: StudentIdentity::Name,
            course_identity: CourseIdentity::CourseCode,
            extension_overlap_days: 1,
        }
    }
}

/// Notice windows for the expiry tracker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryConfig {
    pub visa_notice_days: i64,
    pub coe_notice_days: i64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        ExpiryConfig {
            visa_notice_days: 90,
            coe_notice_days: 60,
        }
    }
}

// ============================================================================
// ANALYSIS CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Reference date for classification. `None` = today (local time).
    pub reference_date: Option<NaiveDate>,

    pub status_policy: StatusPolicy,

    pub duplicates: DuplicateConfig,

    /// Allowed |computed − declared| weeks. 0 = strict.
    pub duration_tolerance_weeks: i64,

    pub group_by: GroupBy,

    pub expiry: ExpiryConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            reference_date: None,
            status_policy: StatusPolicy::default(),
            duplicates: DuplicateConfig::default(),
            duration_tolerance_weeks: 0,
            group_by: GroupBy::Agent,
            expiry: ExpiryConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load and validate a JSON config file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("duration_tolerance_weeks", self.duration_tolerance_weeks),
            (
                "duplicates.extension_overlap_days",
                self.duplicates.extension_overlap_days,
            ),
            ("expiry.visa_notice_days", self.expiry.visa_notice_days),
            ("expiry.coe_notice_days", self.expiry.coe_notice_days),
        ];

        for (name, value) in non_negative {
            if value < 0 {
                return Err(ConfigError::Negative { name, value });
            }
        }

        if let GroupBy::Column(column) = &self.group_by {
            if column.trim().is_empty() {
                return Err(ConfigError::UnknownGroupBy(column.clone()));
            }
        }

        Ok(())
    }

    /// The configured reference date, or today
    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    /// Status gate lookup shorthand
    pub fn admits(&self, mode: Mode, status: Option<&Status>) -> bool {
        self.status_policy.gate(mode).admits(status)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.duration_tolerance_weeks, 0);
        assert_eq!(config.duplicates.extension_overlap_days, 1);
        assert_eq!(config.expiry.visa_notice_days, 90);
        assert_eq!(config.expiry.coe_notice_days, 60);
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let config = AnalysisConfig {
            duration_tolerance_weeks: -1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Negative {
                name: "duration_tolerance_weeks",
                value: -1
            }
        ));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert_eq!("Active".parse::<Phase>().unwrap(), Phase::Active);
        assert!(matches!(
            "current".parse::<Phase>(),
            Err(ConfigError::UnknownMode(_))
        ));
    }

    #[test]
    fn test_group_by_parsing() {
        assert_eq!("agent".parse::<GroupBy>().unwrap(), GroupBy::Agent);
        assert_eq!(
            "column:Campus".parse::<GroupBy>().unwrap(),
            GroupBy::Column("Campus".to_string())
        );
        assert!("column:".parse::<GroupBy>().is_err());
        assert!("nationality".parse::<GroupBy>().is_err());
    }

    #[test]
    fn test_identity_parsing() {
        assert_eq!(
            "student-id".parse::<StudentIdentity>().unwrap(),
            StudentIdentity::StudentId
        );
        assert_eq!(
            "course_name".parse::<CourseIdentity>().unwrap(),
            CourseIdentity::CourseName
        );
        assert!("email".parse::<StudentIdentity>().is_err());
    }

    #[test]
    fn test_from_json_partial() {
        let config = AnalysisConfig::from_json(
            r#"{
                "reference_date": "2024-02-15",
                "duration_tolerance_weeks": 1,
                "status_policy": {
                    "past": { "include": [], "exclude": ["saved"] },
                    "active": { "include": ["STUDYING"] },
                    "future": {}
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.reference_date(), NaiveDate::from_ymd_opt(2024, 2, 15).unwrap());
        assert_eq!(config.duration_tolerance_weeks, 1);
        assert!(config.admits(Phase::Active, Some(&Status::Studying)));
        assert!(!config.admits(Phase::Active, Some(&Status::Approved)));
        assert!(!config.admits(Phase::Past, Some(&Status::Saved)));
        assert!(config.admits(Phase::Future, None));
        assert_eq!(config.duplicates, DuplicateConfig::default());
    }

    #[test]
    fn test_from_json_rejects_negative_notice() {
        let result = AnalysisConfig::from_json(r#"{ "expiry": { "visa_notice_days": -5 } }"#);
        assert!(matches!(result, Err(ConfigError::Negative { .. })));
    }

    #[test]
    fn test_json_round_trip_of_defaults() {
        let json = AnalysisConfig::default().to_json().unwrap();
        let back = AnalysisConfig::from_json(&json).unwrap();
        assert_eq!(back, AnalysisConfig::default());
    }

    #[test]
    fn test_strict_reference_date() {
        assert!(parse_reference_date("2024-02-15").is_ok());
        assert!(matches!(
            parse_reference_date("15/02/2024"),
            Err(ConfigError::InvalidDate(_))
        ));
    }
}
