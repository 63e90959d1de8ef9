//! Report status machine.
//!
//! ```text
//! Draft -> Submitted -> UnderReview -> Verified -> Expired
//!                                   \-> Rejected -> Expired
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::access_policy::Operation;
use crate::audit::AuditAction;
use crate::errors::{CiError, CiResult};
use crate::report::{CiReport, ReportStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Verified,
    Rejected,
}

impl ReviewOutcome {
    pub fn status(self) -> ReportStatus {
        match self {
            ReviewOutcome::Verified => ReportStatus::Verified,
            ReviewOutcome::Rejected => ReportStatus::Rejected,
        }
    }
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StatusRequest {
    Submit,
    Claim,
    Decide {
        outcome: ReviewOutcome,
        #[serde(default)]
        notes: Option<String>,
    },
}

impl StatusRequest {
    pub fn operation(&self) -> Operation {
        match self {
            StatusRequest::Submit => Operation::Submit,
            StatusRequest::Claim => Operation::Claim,
            StatusRequest::Decide { .. } => Operation::Decide,
        }
    }

    pub fn target_status(&self) -> ReportStatus {
        match self {
            StatusRequest::Submit => ReportStatus::Submitted,
            StatusRequest::Claim => ReportStatus::UnderReview,
            StatusRequest::Decide { outcome, .. } => outcome.status(),
        }
    }

    pub fn audit_action(&self) -> AuditAction {
        match self {
            StatusRequest::Submit => AuditAction::Submitted,
            StatusRequest::Claim => AuditAction::Assigned,
            StatusRequest::Decide {
                outcome: ReviewOutcome::Verified,
                ..
            } => AuditAction::Verified,
            StatusRequest::Decide {
                outcome: ReviewOutcome::Rejected,
                ..
            } => AuditAction::Rejected,
        }
    }
}

/// Whether `from -> to` is an edge of the status graph.
pub fn is_valid_transition(from: ReportStatus, to: ReportStatus) -> bool {
    use ReportStatus::*;
    matches!(
        (from, to),
        (Draft, Submitted)
            | (Submitted, UnderReview)
            | (UnderReview, Verified)
            | (UnderReview, Rejected)
            | (Verified, Expired)
            | (Rejected, Expired)
    )
}

pub fn check_transition(from: ReportStatus, to: ReportStatus) -> CiResult<()> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(CiError::invalid_state(
            format!("transition to {to}"),
            from.as_str(),
        ))
    }
}

/// Apply an already-authorized request to a copy of the report.
pub fn apply(
    report: &CiReport,
    request: &StatusRequest,
    actor_id: &str,
    now: DateTime<Utc>,
) -> CiResult<CiReport> {
    check_transition(report.status, request.target_status())?;
    let mut next = report.clone();
    next.status = request.target_status();
    next.updated_at = now;
    match request {
        StatusRequest::Submit => {
            next.submitted_at = Some(now);
        }
        StatusRequest::Claim => {
            next.assigned_auditor_id = Some(actor_id.to_string());
        }
        StatusRequest::Decide { outcome, notes } => {
            let notes = notes.as_ref().map(|n| n.trim()).filter(|n| !n.is_empty());
            if *outcome == ReviewOutcome::Rejected && notes.is_none() {
                return Err(CiError::validation("notes", "a rejection must state its reasons"));
            }
            next.verified_by = Some(actor_id.to_string());
            next.verified_at = Some(now);
            next.decision_notes = notes.map(str::to_string);
        }
    }
    Ok(next)
}

/// A decided report lapses once its validity window has run out.
pub fn is_expired(report: &CiReport, validity: Duration, now: DateTime<Utc>) -> bool {
    if !report.status.is_decided() {
        return false;
    }
    match report.verified_at {
        // A window reaching past the representable range never elapses.
        Some(decided_at) => decided_at
            .checked_add_signed(validity)
            .is_some_and(|lapses_at| lapses_at <= now),
        None => false,
    }
}

pub fn expire(report: &CiReport, now: DateTime<Utc>) -> CiResult<CiReport> {
    check_transition(report.status, ReportStatus::Expired)?;
    let mut next = report.clone();
    next.status = ReportStatus::Expired;
    next.updated_at = now;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emissions::EmissionInputs;
    use chrono::NaiveDate;

    fn report(status: ReportStatus) -> CiReport {
        let now = Utc::now();
        CiReport {
            id: 7,
            report_id: "CI-2026-00000007".to_string(),
            supplier_id: "sup-1".to_string(),
            feedstock_id: "fs-1".to_string(),
            reporting_period_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            reporting_period_end: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            reference_year: 2025,
            methodology: None,
            data_quality: None,
            emissions: EmissionInputs::default(),
            derived: None,
            status,
            submitted_at: None,
            assigned_auditor_id: None,
            verified_by: None,
            verified_at: None,
            decision_notes: None,
            supporting_documents: vec![],
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn graph_has_exactly_six_edges() {
        let edges = ReportStatus::ALL
            .iter()
            .flat_map(|a| ReportStatus::ALL.iter().map(move |b| (*a, *b)))
            .filter(|(a, b)| is_valid_transition(*a, *b))
            .count();
        assert_eq!(edges, 6);
        assert!(!is_valid_transition(ReportStatus::Verified, ReportStatus::Draft));
        assert!(!is_valid_transition(ReportStatus::Expired, ReportStatus::Verified));
    }

    #[test]
    fn claim_records_the_auditor() {
        let now = Utc::now();
        let next = apply(&report(ReportStatus::Submitted), &StatusRequest::Claim, "aud-9", now).unwrap();
        assert_eq!(next.status, ReportStatus::UnderReview);
        assert_eq!(next.assigned_auditor_id.as_deref(), Some("aud-9"));
    }

    #[test]
    fn rejection_requires_notes() {
        let request = StatusRequest::Decide {
            outcome: ReviewOutcome::Rejected,
            notes: Some("   ".to_string()),
        };
        let err = apply(&report(ReportStatus::UnderReview), &request, "aud-1", Utc::now()).unwrap_err();
        assert!(matches!(err, CiError::Validation { .. }));
    }

    #[test]
    fn decision_stamps_reviewer() {
        let now = Utc::now();
        let request = StatusRequest::Decide {
            outcome: ReviewOutcome::Verified,
            notes: None,
        };
        let next = apply(&report(ReportStatus::UnderReview), &request, "aud-1", now).unwrap();
        assert_eq!(next.status, ReportStatus::Verified);
        assert_eq!(next.verified_by.as_deref(), Some("aud-1"));
        assert_eq!(next.verified_at, Some(now));
    }

    #[test]
    fn skipping_a_step_is_invalid_state() {
        let err = apply(&report(ReportStatus::Draft), &StatusRequest::Claim, "aud-1", Utc::now()).unwrap_err();
        assert!(matches!(err, CiError::InvalidState { .. }));
    }

    #[test]
    fn expiry_is_inclusive_of_the_boundary() {
        let decided = Utc::now();
        let mut r = report(ReportStatus::Verified);
        r.verified_at = Some(decided);
        let validity = Duration::days(365);
        assert!(!is_expired(&r, validity, decided + Duration::days(364)));
        assert!(is_expired(&r, validity, decided + validity));
        r.status = ReportStatus::UnderReview;
        assert!(!is_expired(&r, validity, decided + Duration::days(1000)));
    }

    #[test]
    fn unbounded_validity_never_lapses() {
        let mut r = report(ReportStatus::Rejected);
        r.verified_at = Some(Utc::now());
        let validity = Duration::days(200_000_000);
        assert!(!is_expired(&r, validity, Utc::now()));
    }

    #[test]
    fn request_wire_format() {
        let parsed: StatusRequest =
            serde_json::from_str(r#"{"action":"decide","outcome":"rejected","notes":"LUC data missing"}"#)
                .unwrap();
        assert_eq!(parsed.target_status(), ReportStatus::Rejected);
        assert_eq!(parsed.audit_action(), AuditAction::Rejected);
        let submit: StatusRequest = serde_json::from_str(r#"{"action":"submit"}"#).unwrap();
        assert_eq!(submit, StatusRequest::Submit);
    }
}
