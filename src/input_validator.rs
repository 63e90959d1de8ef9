use chrono::NaiveDate;
use std::str::FromStr;

use crate::emissions::{
    DataQualityLevel, EmissionCategory, EmissionInputs, Methodology, MAX_CATEGORY_VALUE,
};
use crate::errors::{CiError, CiResult};
use crate::report::{CiReport, NewReport, ReportPatch};

const MIN_REFERENCE_YEAR: i32 = 1990;
const MAX_REFERENCE_YEAR: i32 = 2100;

/// Closed-enumeration values parsed out of a create or update request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParsedSelectors {
    pub methodology: Option<Methodology>,
    pub data_quality: Option<DataQualityLevel>,
}

/// Checks request payloads before they reach the engine or the store.
pub struct InputValidator {
    max_documents: usize,
    max_reference_len: usize,
    max_identifier_len: usize,
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl InputValidator {
    pub fn new() -> Self {
        Self {
            max_documents: 50,
            max_reference_len: 512,
            max_identifier_len: 128,
        }
    }

    pub fn parse_methodology(&self, raw: &str) -> CiResult<Methodology> {
        Methodology::from_str(raw).map_err(|_| {
            CiError::validation("methodology", format!("unknown methodology '{raw}'"))
        })
    }

    pub fn parse_data_quality(&self, raw: &str) -> CiResult<DataQualityLevel> {
        DataQualityLevel::from_str(raw).map_err(|_| {
            CiError::validation("data_quality", format!("unknown data quality level '{raw}'"))
        })
    }

    pub fn validate_emissions(&self, inputs: &EmissionInputs) -> CiResult<()> {
        for category in EmissionCategory::ALL {
            if let Some(value) = inputs.get(category) {
                if !value.is_finite() {
                    return Err(CiError::validation(category.field_name(), "must be a finite number"));
                }
                if value < 0.0 {
                    return Err(CiError::validation(category.field_name(), "must not be negative"));
                }
                if value > MAX_CATEGORY_VALUE {
                    return Err(CiError::validation(
                        category.field_name(),
                        format!("must not exceed {MAX_CATEGORY_VALUE}"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn validate_period(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        reference_year: i32,
    ) -> CiResult<()> {
        if start >= end {
            return Err(CiError::validation(
                "reporting_period",
                "reporting_period_start must be before reporting_period_end",
            ));
        }
        if !(MIN_REFERENCE_YEAR..=MAX_REFERENCE_YEAR).contains(&reference_year) {
            return Err(CiError::validation(
                "reference_year",
                format!("must be between {MIN_REFERENCE_YEAR} and {MAX_REFERENCE_YEAR}"),
            ));
        }
        Ok(())
    }

    pub fn validate_identifier(&self, field: &str, value: &str) -> CiResult<()> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CiError::validation(field, "cannot be empty"));
        }
        if trimmed.len() > self.max_identifier_len {
            return Err(CiError::validation(field, "too long"));
        }
        if trimmed.chars().any(|c| c.is_control()) {
            return Err(CiError::validation(field, "contains control characters"));
        }
        Ok(())
    }

    pub fn validate_documents(&self, documents: &[String]) -> CiResult<()> {
        if documents.len() > self.max_documents {
            return Err(CiError::validation(
                "supporting_documents",
                format!("at most {} documents", self.max_documents),
            ));
        }
        for reference in documents {
            if reference.trim().is_empty() || reference.len() > self.max_reference_len {
                return Err(CiError::validation(
                    "supporting_documents",
                    "document references must be non-empty and reasonably short",
                ));
            }
        }
        Ok(())
    }

    fn parse_selectors(
        &self,
        methodology: Option<&str>,
        data_quality: Option<&str>,
    ) -> CiResult<ParsedSelectors> {
        Ok(ParsedSelectors {
            methodology: methodology.map(|m| self.parse_methodology(m)).transpose()?,
            data_quality: data_quality.map(|q| self.parse_data_quality(q)).transpose()?,
        })
    }

    pub fn validate_new_report(&self, req: &NewReport) -> CiResult<ParsedSelectors> {
        self.validate_identifier("feedstock_id", &req.feedstock_id)?;
        self.validate_period(
            req.reporting_period_start,
            req.reporting_period_end,
            req.reference_year,
        )?;
        self.validate_emissions(&req.emissions)?;
        self.validate_documents(&req.supporting_documents)?;
        self.parse_selectors(req.methodology.as_deref(), req.data_quality.as_deref())
    }

    /// Validates the patch on its own. Period ordering is re-checked by the
    /// caller against the merged report.
    pub fn validate_patch(&self, patch: &ReportPatch) -> CiResult<ParsedSelectors> {
        if patch.is_empty() {
            return Err(CiError::validation("patch", "no fields to update"));
        }
        self.validate_emissions(&patch.emissions)?;
        if let Some(documents) = &patch.supporting_documents {
            self.validate_documents(documents)?;
        }
        self.parse_selectors(patch.methodology.as_deref(), patch.data_quality.as_deref())
    }

    /// Everything a draft needs before it can be submitted.
    pub fn validate_for_submission(&self, report: &CiReport) -> CiResult<()> {
        if report.methodology.is_none() {
            return Err(CiError::validation("methodology", "required before submission"));
        }
        if report.data_quality.is_none() {
            return Err(CiError::validation("data_quality", "required before submission"));
        }
        let missing = report.emissions.missing_required();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|c| c.field_name()).collect();
            return Err(CiError::validation(
                "emissions",
                format!("required categories missing: {}", names.join(", ")),
            ));
        }
        if report.derived.is_none() {
            return Err(CiError::validation("emissions", "derived values have not been computed"));
        }
        self.validate_period(
            report.reporting_period_start,
            report.reporting_period_end,
            report.reference_year,
        )
    }
}
