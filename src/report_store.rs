//! Persistence seam for reports and their audit chains.
//!
//! Every state change goes through [`ComplianceStore::commit`], which writes
//! the report mutation and its audit entry together or not at all.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::audit::{AuditLogEntry, PendingAudit};
use crate::config_loader::CiConfig;
use crate::errors::{CiError, CiResult, SafeLock};
use crate::report::{CiReport, ReportStatus};
use crate::report_store_sled::SledStore;

/// The report change that accompanies an audit entry.
#[derive(Debug, Clone)]
pub enum ReportMutation {
    /// New report. The store assigns `id` and sets `version` to 1.
    Insert(CiReport),
    /// Overwrite, provided the stored version still equals `expected_version`.
    /// The stored copy gets `expected_version + 1`.
    Replace {
        report: CiReport,
        expected_version: u64,
    },
    Delete {
        report_id: String,
        expected_version: u64,
    },
    /// Audit-only commit, used for denied attempts.
    None,
}

impl ReportMutation {
    pub fn report_id(&self) -> Option<&str> {
        match self {
            ReportMutation::Insert(report) | ReportMutation::Replace { report, .. } => {
                Some(report.report_id.as_str())
            }
            ReportMutation::Delete { report_id, .. } => Some(report_id.as_str()),
            ReportMutation::None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommitReceipt {
    /// The report as stored after the commit; `None` for deletes and audit-only commits.
    pub report: Option<CiReport>,
    pub entry: AuditLogEntry,
}

pub trait ComplianceStore: Send + Sync {
    fn load_report(&self, report_id: &str) -> CiResult<Option<CiReport>>;

    fn list_reports(&self, status: Option<ReportStatus>) -> CiResult<Vec<CiReport>>;

    /// Full audit chain for a report, oldest first. Survives deletion.
    fn history(&self, report_id: &str) -> CiResult<Vec<AuditLogEntry>>;

    fn commit(&self, mutation: ReportMutation, audit: PendingAudit) -> CiResult<CommitReceipt>;
}

pub(crate) fn check_commit_target(mutation: &ReportMutation, audit: &PendingAudit) -> CiResult<()> {
    match mutation.report_id() {
        Some(id) if id != audit.report_id => Err(CiError::audit_integrity(format!(
            "audit entry for {} attached to a change of {}",
            audit.report_id, id
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn version_conflict(report_id: &str, expected: u64, found: u64) -> CiError {
    CiError::conflict(format!(
        "report {report_id} changed concurrently (expected version {expected}, found {found})"
    ))
}

#[derive(Default)]
struct MemoryState {
    reports: BTreeMap<String, CiReport>,
    logs: BTreeMap<String, Vec<AuditLogEntry>>,
    next_report_key: u64,
    next_audit_id: u64,
}

/// In-process store. One mutex covers reports and logs, so a commit is
/// observed entirely or not at all.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComplianceStore for MemoryStore {
    fn load_report(&self, report_id: &str) -> CiResult<Option<CiReport>> {
        let state = self.state.safe_lock()?;
        Ok(state.reports.get(report_id).cloned())
    }

    fn list_reports(&self, status: Option<ReportStatus>) -> CiResult<Vec<CiReport>> {
        let state = self.state.safe_lock()?;
        Ok(state
            .reports
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect())
    }

    fn history(&self, report_id: &str) -> CiResult<Vec<AuditLogEntry>> {
        let state = self.state.safe_lock()?;
        Ok(state.logs.get(report_id).cloned().unwrap_or_default())
    }

    fn commit(&self, mutation: ReportMutation, audit: PendingAudit) -> CiResult<CommitReceipt> {
        check_commit_target(&mutation, &audit)?;
        let mut state = self.state.safe_lock()?;

        // Everything fallible happens before the first write.
        let stored = match &mutation {
            ReportMutation::Insert(report) => {
                if state.reports.contains_key(&report.report_id)
                    || state.logs.contains_key(&report.report_id)
                {
                    return Err(CiError::conflict(format!(
                        "report {} already exists",
                        report.report_id
                    )));
                }
                let mut report = report.clone();
                report.id = state.next_report_key + 1;
                report.version = 1;
                Some(report)
            }
            ReportMutation::Replace {
                report,
                expected_version,
            } => {
                let current = state
                    .reports
                    .get(&report.report_id)
                    .ok_or_else(|| CiError::not_found("ci_report", &report.report_id))?;
                if current.version != *expected_version {
                    return Err(version_conflict(
                        &report.report_id,
                        *expected_version,
                        current.version,
                    ));
                }
                let mut report = report.clone();
                report.id = current.id;
                report.version = expected_version + 1;
                Some(report)
            }
            ReportMutation::Delete {
                report_id,
                expected_version,
            } => {
                let current = state
                    .reports
                    .get(report_id)
                    .ok_or_else(|| CiError::not_found("ci_report", report_id))?;
                if current.version != *expected_version {
                    return Err(version_conflict(report_id, *expected_version, current.version));
                }
                None
            }
            ReportMutation::None => None,
        };

        let chain = state.logs.get(&audit.report_id);
        let sequence = chain.map_or(0, Vec::len) as u64 + 1;
        let prev_hash = chain.and_then(|c| c.last()).map(|e| e.hash.clone());
        let report_id = audit.report_id.clone();
        let entry = audit.seal(state.next_audit_id + 1, sequence, prev_hash)?;

        state.next_audit_id += 1;
        match (&mutation, &stored) {
            (ReportMutation::Insert(_), Some(report)) => {
                state.next_report_key = report.id;
                state.reports.insert(report.report_id.clone(), report.clone());
            }
            (ReportMutation::Replace { .. }, Some(report)) => {
                state.reports.insert(report.report_id.clone(), report.clone());
            }
            (ReportMutation::Delete { report_id, .. }, _) => {
                state.reports.remove(report_id);
            }
            _ => {}
        }
        state.logs.entry(report_id).or_default().push(entry.clone());

        Ok(CommitReceipt {
            report: stored,
            entry,
        })
    }
}

/// Open the backend named by `db_backend`.
pub fn open_store(config: &CiConfig) -> CiResult<Arc<dyn ComplianceStore>> {
    match config.db_backend.as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        "sled" => Ok(Arc::new(SledStore::open(&config.data_dir)?)),
        other => Err(CiError::config(format!("unknown db_backend '{other}'"))),
    }
}
