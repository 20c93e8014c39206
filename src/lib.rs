// COE Analyzer - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod record;         // Record model + normalization
pub mod config;         // Analysis configuration
pub mod temporal;       // Past / active / future classifier
pub mod deduplication;  // Overlap & duplicate detector
pub mod duration;       // Declared vs computed weeks
pub mod aggregation;    // Weekly / monthly / group-by counts
pub mod expiry;         // Visa and COE expiry windows
pub mod data_quality;   // Skipped and doubtful fields
pub mod report;         // Everything above in one value
pub mod ingest;         // CSV → RawRow
pub mod export;         // Annotated CSV + contact sheet

// Re-export commonly used types
pub use aggregation::{
    group_summary, group_value, monthly_starts, weekly_starts, GroupCount, GroupSummary,
    StartBucket, StartCounts, UNSPECIFIED,
};
pub use config::{
    parse_reference_date, AnalysisConfig, ConfigError, DuplicateConfig, ExpiryConfig, GroupBy,
};
pub use data_quality::{BatchSummary, DataQualityEngine, QualityIssue, QualityReport, Severity};
pub use deduplication::{
    ClusterSummary, DeduplicationEngine, DuplicateMatch, DuplicateReport, MatchKind,
};
pub use duration::{computed_weeks, DurationMismatch, DurationReport, DurationValidator};
pub use expiry::{expiring_within, ExpiryNotice, ExpiryReport, ExpiryTarget};
pub use export::{write_annotated, write_contacts, ContactRow};
pub use ingest::{load_csv, read_csv, read_from, Ingested};
pub use record::{
    fold_key, normalize, parse_date, parse_weeks, CourseIdentity, EnrollmentRecord, FailureKind,
    Field, FieldFailure, Normalized, PartialRecord, RawRow, Status, StudentIdentity, StudentKey,
    MAX_DURATION_WEEKS,
};
pub use report::{analyze, AnalysisReport, AnnotatedRecord, PhaseCounts};
pub use temporal::{
    classify, filter_by_mode, filter_by_start_range, matches_mode, phase_at, Mode, Phase,
    StatusGate, StatusPolicy,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
