use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use coe_analyzer::{
    analyze, expiring_within, filter_by_mode, filter_by_start_range, group_summary, load_csv,
    monthly_starts, parse_reference_date, weekly_starts, write_annotated, write_contacts,
    AnalysisConfig, AnnotatedRecord, CourseIdentity, DeduplicationEngine, DurationValidator,
    EnrollmentRecord, ExpiryTarget, GroupBy, Normalized, Phase, StudentIdentity,
};

#[derive(Parser)]
#[command(name = "coe-analyzer", version)]
#[command(about = "Classify, de-duplicate and validate COE enrollment exports", long_about = None)]
struct Cli {
    /// JSON analysis config; missing keys take defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Reference date (YYYY-MM-DD), defaults to today
    #[arg(long, global = true, value_parser = parse_reference_date)]
    reference_date: Option<NaiveDate>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Input {
    /// Enrollment export (CSV)
    csv: PathBuf,

    /// Keep only records starting on or after this date
    #[arg(long, value_parser = parse_reference_date)]
    start_from: Option<NaiveDate>,

    /// Keep only records starting on or before this date
    #[arg(long, value_parser = parse_reference_date)]
    start_to: Option<NaiveDate>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Period {
    Week,
    Month,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Visa,
    Coe,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every check and write the full report as JSON
    Analyze {
        #[command(flatten)]
        input: Input,
        /// Write JSON here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List records in one phase (past, active, future)
    Classify {
        #[command(flatten)]
        input: Input,
        #[arg(long, default_value = "active")]
        mode: Phase,
    },
    /// Overlapping COEs and repeated COE codes
    Duplicates {
        #[command(flatten)]
        input: Input,
        #[arg(long)]
        student_identity: Option<StudentIdentity>,
        #[arg(long)]
        course_identity: Option<CourseIdentity>,
        /// Shared days still treated as an extension
        #[arg(long)]
        extension_days: Option<i64>,
    },
    /// Declared vs computed course duration
    Durations {
        #[command(flatten)]
        input: Input,
        /// Allowed difference in weeks
        #[arg(long)]
        tolerance: Option<i64>,
    },
    /// Course starts per week or month
    Starts {
        #[command(flatten)]
        input: Input,
        #[arg(long, value_enum, default_value = "week")]
        by: Period,
    },
    /// Totals and active counts per agent, status, course or column:<header>
    Summary {
        #[command(flatten)]
        input: Input,
        #[arg(long)]
        by: Option<GroupBy>,
    },
    /// Visa or COE expiring soon (or already expired)
    Expiring {
        #[command(flatten)]
        input: Input,
        #[arg(long, value_enum, default_value = "visa")]
        target: Target,
        /// Notice window in days
        #[arg(long)]
        within_days: Option<i64>,
    },
    /// Annotated rows as CSV
    Export {
        #[command(flatten)]
        input: Input,
        #[arg(long)]
        mode: Option<Phase>,
        #[arg(long, default_value = "coe_analysis.csv")]
        out: PathBuf,
    },
    /// Student names and IDs as CSV
    Contacts {
        #[command(flatten)]
        input: Input,
        #[arg(long)]
        mode: Option<Phase>,
        #[arg(long, default_value = "contact_sheet.csv")]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if cli.reference_date.is_some() {
        config.reference_date = cli.reference_date;
    }

    match cli.command {
        Commands::Analyze { input, out } => run_analyze(&input, &config, out.as_deref()),
        Commands::Classify { input, mode } => run_classify(&input, &config, mode),
        Commands::Duplicates {
            input,
            student_identity,
            course_identity,
            extension_days,
        } => {
            if let Some(identity) = student_identity {
                config.duplicates.student_identity = identity;
            }
            if let Some(identity) = course_identity {
                config.duplicates.course_identity = identity;
            }
            if let Some(days) = extension_days {
                config.duplicates.extension_overlap_days = days;
            }
            run_duplicates(&input, &config)
        }
        Commands::Durations { input, tolerance } => {
            if let Some(weeks) = tolerance {
                config.duration_tolerance_weeks = weeks;
            }
            run_durations(&input, &config)
        }
        Commands::Starts { input, by } => run_starts(&input, by),
        Commands::Summary { input, by } => {
            if let Some(group_by) = by {
                config.group_by = group_by;
            }
            run_summary(&input, &config)
        }
        Commands::Expiring {
            input,
            target,
            within_days,
        } => {
            let target = match target {
                Target::Visa => ExpiryTarget::Visa,
                Target::Coe => ExpiryTarget::Coe,
            };
            if let Some(days) = within_days {
                match target {
                    ExpiryTarget::Visa => config.expiry.visa_notice_days = days,
                    ExpiryTarget::Coe => config.expiry.coe_notice_days = days,
                }
            }
            run_expiring(&input, &config, target)
        }
        Commands::Export { input, mode, out } => run_export(&input, &config, mode, &out),
        Commands::Contacts { input, mode, out } => run_contacts(&input, &config, mode, &out),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

// ============================================================================
// INPUT
// ============================================================================

/// Read, normalize and apply the start-date range
fn load(input: &Input) -> Result<Vec<Normalized>> {
    let ingested = load_csv(&input.csv)?;
    let mut rows = ingested.normalize();

    if input.start_from.is_some() || input.start_to.is_some() {
        let from = input.start_from.unwrap_or(NaiveDate::MIN);
        let to = input.start_to.unwrap_or(NaiveDate::MAX);
        let records = records_of(&rows);
        let kept: HashSet<usize> = filter_by_start_range(&records, from, to)
            .iter()
            .map(|record| record.line_number)
            .collect();
        rows.retain(|row| kept.contains(&row.record().line_number));
    }

    eprintln!("📂 Loaded {} records from {}", rows.len(), input.csv.display());
    Ok(rows)
}

fn records_of(rows: &[Normalized]) -> Vec<EnrollmentRecord> {
    rows.iter().map(|row| row.record().clone()).collect()
}

fn open_output(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}

// ============================================================================
// SUBCOMMANDS
// ============================================================================

fn run_analyze(input: &Input, config: &AnalysisConfig, out: Option<&Path>) -> Result<()> {
    let rows = load(input)?;
    let report = analyze(&rows, config)?;
    let json = serde_json::to_string_pretty(&report)?;

    match out {
        Some(path) => {
            open_output(path)?.write_all(json.as_bytes())?;
            println!("\n📋 Analysis at {}", report.reference_date);
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("   Past:     {}", report.phases.past);
            println!("   Active:   {}", report.phases.active);
            println!("   Future:   {}", report.phases.future);
            println!("   Excluded: {} (status)", report.phases.excluded_by_status);
            println!("   Undated:  {}", report.phases.undated);
            println!("🔁 Duplicates: {}", report.duplicates.duplicate_count());
            println!("📏 Duration mismatches: {}", report.durations.mismatches.len());
            println!("✅ {}", report.quality.summary_line());
            println!("\n✓ Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn run_classify(input: &Input, config: &AnalysisConfig, mode: Phase) -> Result<()> {
    config.validate()?;
    let records = records_of(&load(input)?);
    let reference = config.reference_date();
    let selected = filter_by_mode(&records, reference, mode, &config.status_policy);

    println!("\n📅 {} {} records at {}", selected.len(), mode, reference);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for record in selected {
        println!(
            "  line {:>4}  {:<12} {:<30} {} → {}  {}",
            record.line_number,
            record.id.as_deref().unwrap_or("-"),
            record.display_name(),
            fmt_date(record.start_date),
            fmt_date(record.end_date),
            record.status.as_ref().map(|s| s.as_str()).unwrap_or("-"),
        );
    }
    Ok(())
}

fn run_duplicates(input: &Input, config: &AnalysisConfig) -> Result<()> {
    config.validate()?;
    let records = records_of(&load(input)?);
    let report = DeduplicationEngine::from_config(&config.duplicates)?.detect(&records);

    println!("\n🔁 {} records flagged as duplicates", report.duplicate_count());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for m in &report.matches {
        let marker = if m.is_duplicate() { "⚠️ " } else { "ℹ️ " };
        println!(
            "{} line {} ↔ line {}: {}",
            marker,
            records[m.first_index].line_number,
            records[m.second_index].line_number,
            m.reason
        );
    }
    if !report.ungrouped.is_empty() {
        println!(
            "\n   {} records lack a student or course key and were only checked by COE code",
            report.ungrouped.len()
        );
    }
    Ok(())
}

fn run_durations(input: &Input, config: &AnalysisConfig) -> Result<()> {
    config.validate()?;
    let records = records_of(&load(input)?);
    let report =
        DurationValidator::with_tolerance(config.duration_tolerance_weeks)?.validate(&records);

    println!(
        "\n📏 {} of {} checked records mismatch (tolerance {} weeks)",
        report.mismatches.len(),
        report.checked_count(),
        report.tolerance_weeks
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for mismatch in &report.mismatches {
        println!(
            "  line {:>4}  declared {:>3}  computed {:>3}  ({:+})",
            mismatch.line_number,
            mismatch.declared_weeks,
            mismatch.computed_weeks,
            mismatch.difference
        );
    }
    println!(
        "\n   Not checked: {} without declared weeks, {} without dates",
        report.unverifiable.len(),
        report.undated.len()
    );
    Ok(())
}

fn run_starts(input: &Input, by: Period) -> Result<()> {
    let records = records_of(&load(input)?);
    let counts = match by {
        Period::Week => weekly_starts(&records),
        Period::Month => monthly_starts(&records),
    };

    println!("\n🗓️  Course starts");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for bucket in &counts.buckets {
        println!("  {:<10} ({})  {:>5}", bucket.label, bucket.period_start, bucket.count);
    }
    if counts.unspecified > 0 {
        println!("  {:<23} {:>5}", coe_analyzer::UNSPECIFIED, counts.unspecified);
    }
    println!("  {:<23} {:>5}", "Total", counts.total());
    Ok(())
}

fn run_summary(input: &Input, config: &AnalysisConfig) -> Result<()> {
    config.validate()?;
    let records = records_of(&load(input)?);
    let summary = group_summary(
        &records,
        &config.group_by,
        config.reference_date(),
        &config.status_policy,
    );

    println!("\n📊 By {} at {}", summary.group_by, summary.reference_date);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  {:<30} {:>7} {:>7}", "", "Total", "Active");
    for group in &summary.groups {
        println!("  {:<30} {:>7} {:>7}", group.key, group.total, group.active);
    }
    println!("  {:<30} {:>7} {:>7}", "Total", summary.total(), summary.active());
    Ok(())
}

fn run_expiring(input: &Input, config: &AnalysisConfig, target: ExpiryTarget) -> Result<()> {
    config.validate()?;
    let records = records_of(&load(input)?);
    let notice_days = match target {
        ExpiryTarget::Visa => config.expiry.visa_notice_days,
        ExpiryTarget::Coe => config.expiry.coe_notice_days,
    };
    let report = expiring_within(&records, target, config.reference_date(), notice_days)?;

    let what = match target {
        ExpiryTarget::Visa => "Visas",
        ExpiryTarget::Coe => "COEs",
    };
    println!(
        "\n🛂 {} expiring within {} days of {}",
        what, report.notice_days, report.reference_date
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for notice in &report.notices {
        let record = &records[notice.index];
        let when = if notice.days_remaining < 0 {
            format!("expired {} days ago", -notice.days_remaining)
        } else {
            format!("{} days left", notice.days_remaining)
        };
        println!(
            "  line {:>4}  {:<30} {}  {}",
            notice.line_number,
            record.display_name(),
            notice.expires_on,
            when
        );
    }
    if report.missing > 0 {
        println!("\n   {} records have no date to check", report.missing);
    }
    Ok(())
}

/// Records (and their annotations) in `mode`, or all of them
fn select<'a>(
    report_rows: &'a [AnnotatedRecord],
    records: &'a [EnrollmentRecord],
    mode: Option<Phase>,
) -> (Vec<&'a AnnotatedRecord>, Vec<&'a EnrollmentRecord>) {
    report_rows
        .iter()
        .zip(records)
        .filter(|(row, _)| mode.is_none() || row.counted_as == mode)
        .unzip()
}

fn run_export(
    input: &Input,
    config: &AnalysisConfig,
    mode: Option<Phase>,
    out: &Path,
) -> Result<()> {
    let rows = load(input)?;
    let report = analyze(&rows, config)?;
    let records = records_of(&rows);
    let (annotated, selected) = select(&report.records, &records, mode);

    write_annotated(open_output(out)?, &annotated, &selected)?;
    println!("✓ Wrote {} annotated rows to {}", annotated.len(), out.display());
    Ok(())
}

fn run_contacts(
    input: &Input,
    config: &AnalysisConfig,
    mode: Option<Phase>,
    out: &Path,
) -> Result<()> {
    let rows = load(input)?;
    let report = analyze(&rows, config)?;
    let records = records_of(&rows);
    let (_, selected) = select(&report.records, &records, mode);

    let written = write_contacts(open_output(out)?, &selected)?;
    println!("📇 Wrote {} contacts to {}", written, out.display());
    Ok(())
}

fn fmt_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|| "-".to_string())
}
