// 🛂 Expiry Tracker - Visa and COE end dates coming up (or already past)

use crate::config::ConfigError;
use crate::record::EnrollmentRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryTarget {
    /// Secondary expiry (visa)
    Visa,
    /// COE end date, else the proposed end date
    Coe,
}

impl ExpiryTarget {
    pub fn date_of(&self, record: &EnrollmentRecord) -> Option<NaiveDate> {
        match self {
            ExpiryTarget::Visa => record.secondary_expiry,
            ExpiryTarget::Coe => record.coe_end_date.or(record.end_date),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryNotice {
    pub index: usize,
    pub line_number: usize,
    pub expires_on: NaiveDate,
    /// Negative once expired
    pub days_remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryReport {
    pub target: ExpiryTarget,
    pub reference_date: NaiveDate,
    pub notice_days: i64,
    /// Input order
    pub notices: Vec<ExpiryNotice>,
    /// Records with no date for the target
    pub missing: usize,
}

impl ExpiryReport {
    pub fn expired(&self) -> impl Iterator<Item = &ExpiryNotice> {
        self.notices.iter().filter(|n| n.days_remaining < 0)
    }
}

/// Records whose target date is at most `notice_days` after `reference`,
/// already expired ones included.
pub fn expiring_within(
    records: &[EnrollmentRecord],
    target: ExpiryTarget,
    reference: NaiveDate,
    notice_days: i64,
) -> Result<ExpiryReport, ConfigError> {
    if notice_days < 0 {
        return Err(ConfigError::Negative {
            name: "notice_days",
            value: notice_days,
        });
    }

    let mut notices = Vec::new();
    let mut missing = 0;

    for (index, record) in records.iter().enumerate() {
        let Some(expires_on) = target.date_of(record) else {
            missing += 1;
            continue;
        };

        let days_remaining = (expires_on - reference).num_days();
        if days_remaining <= notice_days {
            notices.push(ExpiryNotice {
                index,
                line_number: record.line_number,
                expires_on,
                days_remaining,
            });
        }
    }

    Ok(ExpiryReport {
        target,
        reference_date: reference,
        notice_days,
        notices,
        missing,
    })
}
