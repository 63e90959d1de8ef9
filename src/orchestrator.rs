//! Request coordination for CI reports
//!
//! Every operation runs in the same order: load, authorize, validate,
//! compute, then one atomic store commit carrying the change and its audit
//! entry. Denied mutations on an existing report are committed as audit-only
//! entries so the attempt is on record.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::access_policy::{AccessPolicyTable, Operation};
use crate::audit::{replay_status, verify_chain, AuditAction, AuditLogEntry, PendingAudit};
use crate::ci_engine::{CiCalculation, CiEngine};
use crate::config_loader::CiConfig;
use crate::emissions::{DataQualityLevel, EmissionInputs, Methodology, Scope};
use crate::errors::{CiError, CiResult};
use crate::feedstock::{FeedstockDirectory, OpenFeedstockDirectory, StaticFeedstockDirectory};
use crate::input_validator::InputValidator;
use crate::lifecycle::{self, StatusRequest};
use crate::log_sink::alert_defect;
use crate::report::{new_report_id, CiReport, DerivedValues, NewReport, ReportPatch, ReportStatus, ReportView};
use crate::report_store::{open_store, CommitReceipt, ComplianceStore, ReportMutation};
use crate::roles::{Actor, Role};

/// Outcome of checking a report's stored state against its audit history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    pub report_id: String,
    pub entries: usize,
    pub stored_status: Option<ReportStatus>,
    pub replayed_status: Option<ReportStatus>,
    pub head_hash: Option<String>,
}

pub struct ReportOrchestrator {
    store: Arc<dyn ComplianceStore>,
    engine: CiEngine,
    policy: AccessPolicyTable,
    feedstocks: Arc<dyn FeedstockDirectory>,
    validator: InputValidator,
    validity: Duration,
}

impl ReportOrchestrator {
    pub fn new(
        store: Arc<dyn ComplianceStore>,
        engine: CiEngine,
        feedstocks: Arc<dyn FeedstockDirectory>,
        validity_days: u32,
    ) -> Self {
        Self {
            store,
            engine,
            policy: AccessPolicyTable::standard(),
            feedstocks,
            validator: InputValidator::new(),
            validity: Duration::days(i64::from(validity_days)),
        }
    }

    pub fn from_config(config: &CiConfig) -> CiResult<Self> {
        let engine = CiEngine::from_config(config)?;
        let store = open_store(config)?;
        Ok(Self::new(store, engine, feedstocks_from(config), config.validity_days))
    }

    pub fn engine(&self) -> &CiEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<dyn ComplianceStore> {
        &self.store
    }

    /// Stateless calculation from raw selector strings.
    pub fn calculate(
        &self,
        inputs: &EmissionInputs,
        methodology: &str,
        data_quality: &str,
    ) -> CiResult<CiCalculation> {
        let methodology = self.validator.parse_methodology(methodology)?;
        let quality = self.validator.parse_data_quality(data_quality)?;
        self.validator.validate_emissions(inputs)?;
        self.engine.calculate(inputs, methodology, quality)
    }

    pub fn create_report(&self, actor: &Actor, request: NewReport) -> CiResult<CiReport> {
        if actor.role != Role::Supplier {
            return Err(CiError::forbidden(
                "create",
                format!("{} accounts cannot create CI reports", actor.role),
            ));
        }
        let selectors = self.validator.validate_new_report(&request)?;
        let feedstock_id = request.feedstock_id.trim().to_string();
        let owner = self.feedstocks.require_owner(&feedstock_id, &actor.user_id)?;
        if owner != actor.user_id {
            return Err(CiError::forbidden(
                "create",
                format!("feedstock {feedstock_id} belongs to another supplier"),
            ));
        }

        let derived = self.derive(&request.emissions, selectors.methodology, selectors.data_quality)?;
        let now = Utc::now();
        let report = CiReport {
            id: 0,
            report_id: new_report_id(now),
            supplier_id: actor.user_id.clone(),
            feedstock_id,
            reporting_period_start: request.reporting_period_start,
            reporting_period_end: request.reporting_period_end,
            reference_year: request.reference_year,
            methodology: selectors.methodology,
            data_quality: selectors.data_quality,
            emissions: request.emissions,
            derived,
            status: ReportStatus::Draft,
            submitted_at: None,
            assigned_auditor_id: None,
            verified_by: None,
            verified_at: None,
            decision_notes: None,
            supporting_documents: request.supporting_documents,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let metadata = json!({
            "feedstock_id": report.feedstock_id,
            "methodology": report.methodology,
            "data_quality": report.data_quality,
            "ci_score": report.derived.as_ref().map(|d| d.ci_score),
            "scope_totals": scope_breakdown(&report.emissions),
        });
        let audit = PendingAudit::new(&report.report_id, actor, AuditAction::Created, now, metadata);
        let receipt = self.store.commit(ReportMutation::Insert(report), audit)?;
        let report = stored_report(receipt)?;
        info!("CI report {} created by {}", report.report_id, actor.user_id);
        Ok(report)
    }

    pub fn read_report(&self, actor: &Actor, report_id: &str) -> CiResult<ReportView> {
        let report = self.load_existing(report_id)?;
        self.policy.authorize(actor, &report, Operation::View)?;
        let history = self.store.history(report_id)?;
        Ok(ReportView { report, history })
    }

    /// Reports the actor is allowed to view, optionally filtered by status.
    pub fn list_reports(&self, actor: &Actor, status: Option<ReportStatus>) -> CiResult<Vec<CiReport>> {
        Ok(self
            .store
            .list_reports(status)?
            .into_iter()
            .filter(|r| self.policy.authorize(actor, r, Operation::View).is_ok())
            .collect())
    }

    pub fn update_report(&self, actor: &Actor, report_id: &str, patch: ReportPatch) -> CiResult<CiReport> {
        let current = self.load_existing(report_id)?;
        self.apply_update(actor, &current, patch).or_else(|err| {
            self.record_denial(actor, &current, Operation::Edit, AuditAction::UpdateDenied, err)
        })
    }

    fn apply_update(&self, actor: &Actor, current: &CiReport, patch: ReportPatch) -> CiResult<CiReport> {
        self.policy.authorize(actor, current, Operation::Edit)?;
        let selectors = self.validator.validate_patch(&patch)?;

        let mut next = current.clone();
        let mut changed: Vec<&str> = Vec::new();

        if let Some(start) = patch.reporting_period_start {
            if start != next.reporting_period_start {
                next.reporting_period_start = start;
                changed.push("reporting_period_start");
            }
        }
        if let Some(end) = patch.reporting_period_end {
            if end != next.reporting_period_end {
                next.reporting_period_end = end;
                changed.push("reporting_period_end");
            }
        }
        if let Some(year) = patch.reference_year {
            if year != next.reference_year {
                next.reference_year = year;
                changed.push("reference_year");
            }
        }
        if let Some(methodology) = selectors.methodology {
            if next.methodology != Some(methodology) {
                next.methodology = Some(methodology);
                changed.push("methodology");
            }
        }
        if let Some(quality) = selectors.data_quality {
            if next.data_quality != Some(quality) {
                next.data_quality = Some(quality);
                changed.push("data_quality");
            }
        }
        let emission_changes = next.emissions.merge(&patch.emissions);
        changed.extend(emission_changes.iter().map(|c| c.field_name()));
        if let Some(documents) = patch.supporting_documents {
            if documents != next.supporting_documents {
                next.supporting_documents = documents;
                changed.push("supporting_documents");
            }
        }

        self.validator.validate_period(
            next.reporting_period_start,
            next.reporting_period_end,
            next.reference_year,
        )?;

        let recalculated = !emission_changes.is_empty()
            || changed.contains(&"methodology")
            || changed.contains(&"data_quality");
        if recalculated {
            next.derived = self.derive(&next.emissions, next.methodology, next.data_quality)?;
        }

        let now = Utc::now();
        next.updated_at = now;
        let metadata = json!({
            "changed_fields": changed,
            "recalculated": recalculated,
            "ci_score": next.derived.as_ref().map(|d| d.ci_score),
            "scope_totals": scope_breakdown(&next.emissions),
        });
        let audit = PendingAudit::new(&next.report_id, actor, AuditAction::Updated, now, metadata);
        let receipt = self.store.commit(
            ReportMutation::Replace {
                report: next,
                expected_version: current.version,
            },
            audit,
        )?;
        let report = stored_report(receipt)?;
        debug!(
            "CI report {} updated by {} (recalculated: {})",
            report.report_id, actor.user_id, recalculated
        );
        Ok(report)
    }

    pub fn transition(&self, actor: &Actor, report_id: &str, request: StatusRequest) -> CiResult<CiReport> {
        let current = self.load_existing(report_id)?;
        let op = request.operation();
        self.apply_transition(actor, &current, &request)
            .or_else(|err| self.record_denial(actor, &current, op, AuditAction::TransitionDenied, err))
    }

    fn apply_transition(&self, actor: &Actor, current: &CiReport, request: &StatusRequest) -> CiResult<CiReport> {
        if let Err(err) = self.policy.authorize(actor, current, request.operation()) {
            return Err(self.claim_race(actor, current, request, err));
        }
        if *request == StatusRequest::Submit {
            self.validator.validate_for_submission(current)?;
        }

        let now = Utc::now();
        let next = lifecycle::apply(current, request, &actor.user_id, now)?;
        let mut metadata = Map::new();
        metadata.insert("from".into(), json!(current.status));
        metadata.insert("to".into(), json!(next.status));
        if let StatusRequest::Decide { notes: Some(notes), .. } = request {
            metadata.insert("notes".into(), json!(notes));
        }
        if let Some(derived) = &next.derived {
            metadata.insert("ci_score".into(), json!(derived.ci_score));
        }

        let audit = PendingAudit::new(
            &next.report_id,
            actor,
            request.audit_action(),
            now,
            Value::Object(metadata),
        );
        let receipt = self.store.commit(
            ReportMutation::Replace {
                report: next,
                expected_version: current.version,
            },
            audit,
        )?;
        let report = stored_report(receipt)?;
        info!(
            "CI report {} moved {} -> {} by {}",
            report.report_id, current.status, report.status, actor.user_id
        );
        Ok(report)
    }

    /// A reviewer claiming a report someone else already took gets a
    /// conflict rather than a state error.
    fn claim_race(&self, actor: &Actor, current: &CiReport, request: &StatusRequest, err: CiError) -> CiError {
        let lost_race = *request == StatusRequest::Claim
            && current.status == ReportStatus::UnderReview
            && actor.has_review_capability();
        if !lost_race {
            return err;
        }
        CiError::conflict(format!(
            "report {} is already under review by {}",
            current.report_id,
            current.assigned_auditor_id.as_deref().unwrap_or("another auditor")
        ))
    }

    pub fn delete_report(&self, actor: &Actor, report_id: &str) -> CiResult<AuditLogEntry> {
        let current = self.load_existing(report_id)?;
        self.apply_delete(actor, &current).or_else(|err| {
            self.record_denial(actor, &current, Operation::Delete, AuditAction::DeletionAttempted, err)
        })
    }

    fn apply_delete(&self, actor: &Actor, current: &CiReport) -> CiResult<AuditLogEntry> {
        self.policy.authorize(actor, current, Operation::Delete)?;
        let audit = PendingAudit::new(
            &current.report_id,
            actor,
            AuditAction::Deleted,
            Utc::now(),
            json!({ "status": current.status, "version": current.version }),
        );
        let receipt = self.store.commit(
            ReportMutation::Delete {
                report_id: current.report_id.clone(),
                expected_version: current.version,
            },
            audit,
        )?;
        info!("CI report {} deleted by {}", current.report_id, actor.user_id);
        Ok(receipt.entry)
    }

    /// Expire every decided report whose validity window has elapsed.
    /// Returns the identifiers that were moved to `expired`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> CiResult<Vec<String>> {
        let system = Actor::system();
        let mut expired = Vec::new();
        for status in [ReportStatus::Verified, ReportStatus::Rejected] {
            for report in self.store.list_reports(Some(status))? {
                if !lifecycle::is_expired(&report, self.validity, now) {
                    continue;
                }
                let next = lifecycle::expire(&report, now)?;
                let audit = PendingAudit::new(
                    &report.report_id,
                    &system,
                    AuditAction::Expired,
                    now,
                    json!({
                        "from": report.status,
                        "verified_at": report.verified_at,
                        "validity_days": self.validity.num_days(),
                    }),
                );
                let mutation = ReportMutation::Replace {
                    report: next,
                    expected_version: report.version,
                };
                match self.store.commit(mutation, audit) {
                    Ok(_) => expired.push(report.report_id),
                    Err(CiError::Conflict { message }) => {
                        warn!("Skipping expiry of {}: {}", report.report_id, message);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        if !expired.is_empty() {
            info!("Expired {} CI report(s)", expired.len());
        }
        Ok(expired)
    }

    /// Audit history. Deleted reports keep theirs, visible to admins only.
    pub fn history(&self, actor: &Actor, report_id: &str) -> CiResult<Vec<AuditLogEntry>> {
        match self.store.load_report(report_id)? {
            Some(report) => self.policy.authorize(actor, &report, Operation::View)?,
            None if actor.role == Role::Admin => {}
            None => return Err(CiError::not_found("ci_report", report_id)),
        }
        let entries = self.store.history(report_id)?;
        if entries.is_empty() {
            return Err(CiError::not_found("ci_report", report_id));
        }
        Ok(entries)
    }

    /// Verify the chain and check that replaying it yields the stored status.
    pub fn reconcile(&self, report_id: &str) -> CiResult<Reconciliation> {
        let entries = self.store.history(report_id)?;
        let stored_status = self.store.load_report(report_id)?.map(|r| r.status);
        if entries.is_empty() && stored_status.is_none() {
            return Err(CiError::not_found("ci_report", report_id));
        }
        verify_chain(&entries).map_err(|e| alert_defect("audit_chain", e))?;
        let replayed_status = replay_status(&entries).map_err(|e| alert_defect("audit_chain", e))?;
        if replayed_status != stored_status {
            return Err(alert_defect(
                "audit_chain",
                CiError::audit_integrity(format!(
                    "{report_id}: stored status {:?} but history replays to {:?}",
                    stored_status, replayed_status
                )),
            ));
        }
        Ok(Reconciliation {
            report_id: report_id.to_string(),
            entries: entries.len(),
            stored_status,
            replayed_status,
            head_hash: entries.last().map(|e| e.hash.clone()),
        })
    }

    fn load_existing(&self, report_id: &str) -> CiResult<CiReport> {
        self.store
            .load_report(report_id)?
            .ok_or_else(|| CiError::not_found("ci_report", report_id))
    }

    fn derive(
        &self,
        emissions: &EmissionInputs,
        methodology: Option<Methodology>,
        quality: Option<DataQualityLevel>,
    ) -> CiResult<Option<DerivedValues>> {
        match (methodology, quality) {
            (Some(m), Some(q)) => {
                let calc = self.engine.calculate(emissions, m, q)?;
                Ok(Some(DerivedValues::from(&calc)))
            }
            _ => Ok(None),
        }
    }

    /// Put a denied mutation on record, then hand back the original error.
    /// Other failures pass through untouched.
    fn record_denial<T>(
        &self,
        actor: &Actor,
        report: &CiReport,
        op: Operation,
        action: AuditAction,
        err: CiError,
    ) -> CiResult<T> {
        if !err.is_denial() {
            return Err(err);
        }
        let metadata = json!({
            "operation": op.as_str(),
            "code": err.kind().code(),
            "status": report.status,
            "reason": err.to_string(),
        });
        let audit = PendingAudit::new(&report.report_id, actor, action, Utc::now(), metadata);
        self.store.commit(ReportMutation::None, audit)?;
        warn!(
            "Denied {} on {} for {} '{}': {}",
            op, report.report_id, actor.role, actor.user_id, err
        );
        Err(err)
    }
}

fn feedstocks_from(config: &CiConfig) -> Arc<dyn FeedstockDirectory> {
    if config.feedstocks.is_empty() {
        Arc::new(OpenFeedstockDirectory)
    } else {
        Arc::new(StaticFeedstockDirectory::new(config.feedstocks.clone()))
    }
}

/// Scope 1/2/3 subtotals recorded alongside each emissions snapshot.
fn scope_breakdown(emissions: &EmissionInputs) -> Value {
    json!({
        "direct": emissions.scope_total(Scope::Direct),
        "energy": emissions.scope_total(Scope::Energy),
        "value_chain": emissions.scope_total(Scope::ValueChain),
    })
}

fn stored_report(receipt: CommitReceipt) -> CiResult<CiReport> {
    receipt.report.ok_or_else(|| {
        CiError::audit_integrity(format!(
            "store returned no report for audit entry {}",
            receipt.entry.id
        ))
    })
}
