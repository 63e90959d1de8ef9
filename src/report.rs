//! The CI report entity and the request shapes that create or modify it.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::audit::AuditLogEntry;
use crate::ci_engine::CiCalculation;
use crate::emissions::{DataQualityLevel, EmissionInputs, Methodology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    Submitted,
    UnderReview,
    Verified,
    Rejected,
    Expired,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 6] = [
        ReportStatus::Draft,
        ReportStatus::Submitted,
        ReportStatus::UnderReview,
        ReportStatus::Verified,
        ReportStatus::Rejected,
        ReportStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Submitted => "submitted",
            ReportStatus::UnderReview => "under_review",
            ReportStatus::Verified => "verified",
            ReportStatus::Rejected => "rejected",
            ReportStatus::Expired => "expired",
        }
    }

    /// Verified or rejected: a determination has been made.
    pub fn is_decided(self) -> bool {
        matches!(self, ReportStatus::Verified | ReportStatus::Rejected)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        ReportStatus::ALL
            .iter()
            .copied()
            .find(|s| s.as_str() == input.trim().to_lowercase())
            .ok_or(())
    }
}

/// Values written only by the calculation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedValues {
    pub total_ci_value: f64,
    pub ci_score: f64,
    pub ci_unit: String,
    pub uncertainty_range_low: f64,
    pub uncertainty_range_high: f64,
    pub ci_rating: String,
    pub ghg_savings_percentage: f64,
}

impl From<&CiCalculation> for DerivedValues {
    fn from(calc: &CiCalculation) -> Self {
        Self {
            total_ci_value: calc.total_ci_value,
            ci_score: calc.ci_score.value,
            ci_unit: calc.ci_score.unit.clone(),
            uncertainty_range_low: calc.uncertainty_range_low,
            uncertainty_range_high: calc.uncertainty_range_high,
            ci_rating: calc.ci_rating.clone(),
            ghg_savings_percentage: calc.ghg_savings_percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiReport {
    /// Internal numeric key assigned by the store.
    pub id: u64,
    /// Public identifier, e.g. `CI-2026-1a2b3c4d`.
    pub report_id: String,
    pub supplier_id: String,
    pub feedstock_id: String,
    pub reporting_period_start: NaiveDate,
    pub reporting_period_end: NaiveDate,
    pub reference_year: i32,
    pub methodology: Option<Methodology>,
    pub data_quality: Option<DataQualityLevel>,
    pub emissions: EmissionInputs,
    pub derived: Option<DerivedValues>,
    pub status: ReportStatus,
    pub submitted_at: Option<DateTime<Utc>>,
    pub assigned_auditor_id: Option<String>,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub decision_notes: Option<String>,
    pub supporting_documents: Vec<String>,
    /// Bumped by the store on every committed change.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn new_report_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("CI-{}-{}", now.year(), &suffix[..8])
}

/// Create request for a draft report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub feedstock_id: String,
    pub reporting_period_start: NaiveDate,
    pub reporting_period_end: NaiveDate,
    pub reference_year: i32,
    #[serde(default)]
    pub methodology: Option<String>,
    #[serde(default)]
    pub data_quality: Option<String>,
    #[serde(default)]
    pub emissions: EmissionInputs,
    #[serde(default)]
    pub supporting_documents: Vec<String>,
}

/// Partial update of a draft. Absent fields are left as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportPatch {
    #[serde(default)]
    pub reporting_period_start: Option<NaiveDate>,
    #[serde(default)]
    pub reporting_period_end: Option<NaiveDate>,
    #[serde(default)]
    pub reference_year: Option<i32>,
    #[serde(default)]
    pub methodology: Option<String>,
    #[serde(default)]
    pub data_quality: Option<String>,
    #[serde(default)]
    pub emissions: EmissionInputs,
    #[serde(default)]
    pub supporting_documents: Option<Vec<String>>,
}

impl ReportPatch {
    pub fn is_empty(&self) -> bool {
        self.reporting_period_start.is_none()
            && self.reporting_period_end.is_none()
            && self.reference_year.is_none()
            && self.methodology.is_none()
            && self.data_quality.is_none()
            && self.emissions.is_empty()
            && self.supporting_documents.is_none()
    }
}

/// Read response: the report with its audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportView {
    pub report: CiReport,
    pub history: Vec<AuditLogEntry>,
}
