use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use tracing::warn;

use crate::audit::{AuditLogEntry, PendingAudit};
use crate::errors::{CiError, CiResult};
use crate::report::{CiReport, ReportStatus};
use crate::report_store::{
    check_commit_target, version_conflict, CommitReceipt, ComplianceStore, ReportMutation,
};

const REPORTS_TREE: &str = "ci_reports";
const AUDIT_TREE: &str = "ci_audit_logs";
const HEADS_TREE: &str = "ci_audit_heads";

/// Last entry of a report's chain.
#[derive(Debug, Serialize, Deserialize)]
struct ChainHead {
    sequence: u64,
    hash: String,
}

fn audit_key(report_id: &str, sequence: u64) -> Vec<u8> {
    format!("{report_id}\0{sequence:020}").into_bytes()
}

fn audit_prefix(report_id: &str) -> Vec<u8> {
    format!("{report_id}\0").into_bytes()
}

type TxResult<T> = Result<T, ConflictableTransactionError<CiError>>;

fn abort<T>(err: CiError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

fn encode<T: Serialize>(value: &T, context: &str) -> TxResult<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| ConflictableTransactionError::Abort(CiError::serialization(context, e)))
}

fn decode_report(bytes: &[u8]) -> CiResult<CiReport> {
    serde_json::from_slice(bytes).map_err(|e| CiError::serialization("decode ci_report", e))
}

fn tx_load_report(reports: &TransactionalTree, report_id: &str) -> TxResult<Option<CiReport>> {
    match reports.get(report_id.as_bytes())? {
        Some(bytes) => match decode_report(&bytes) {
            Ok(report) => Ok(Some(report)),
            Err(e) => abort(e),
        },
        None => Ok(None),
    }
}

/// Persistent store on sled. Reports, audit entries and chain heads live in
/// separate trees and every commit is one multi-tree transaction.
pub struct SledStore {
    db: Db,
    reports: Tree,
    logs: Tree,
    heads: Tree,
}

impl SledStore {
    pub fn open(path: &str) -> CiResult<Self> {
        let db = sled::open(path).map_err(|e| CiError::database(format!("open sled at {path}"), e))?;
        Self::from_db(db)
    }

    /// Throwaway database, removed on drop.
    pub fn temporary() -> CiResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| CiError::database("open temporary sled", e))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> CiResult<Self> {
        let reports = db.open_tree(REPORTS_TREE)?;
        let logs = db.open_tree(AUDIT_TREE)?;
        let heads = db.open_tree(HEADS_TREE)?;
        Ok(Self {
            db,
            reports,
            logs,
            heads,
        })
    }

    fn next_id(&self) -> CiResult<u64> {
        // generate_id starts at zero; keys start at one.
        Ok(self.db.generate_id()? + 1)
    }
}

impl ComplianceStore for SledStore {
    fn load_report(&self, report_id: &str) -> CiResult<Option<CiReport>> {
        self.reports
            .get(report_id.as_bytes())?
            .map(|bytes| decode_report(&bytes))
            .transpose()
    }

    fn list_reports(&self, status: Option<ReportStatus>) -> CiResult<Vec<CiReport>> {
        let mut out = Vec::new();
        for item in self.reports.iter() {
            let (_, bytes) = item?;
            let report = decode_report(&bytes)?;
            if status.is_none_or(|s| report.status == s) {
                out.push(report);
            }
        }
        Ok(out)
    }

    fn history(&self, report_id: &str) -> CiResult<Vec<AuditLogEntry>> {
        let mut entries = Vec::new();
        for item in self.logs.scan_prefix(audit_prefix(report_id)) {
            let (_, bytes) = item?;
            let entry: AuditLogEntry = serde_json::from_slice(&bytes)
                .map_err(|e| CiError::serialization("decode audit entry", e))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    fn commit(&self, mutation: ReportMutation, audit: PendingAudit) -> CiResult<CommitReceipt> {
        check_commit_target(&mutation, &audit)?;
        let audit_id = self.next_id()?;
        let report_key = match mutation {
            ReportMutation::Insert(_) => self.next_id()?,
            _ => 0,
        };

        let result = (&self.reports, &self.logs, &self.heads).transaction(|(reports, logs, heads)| -> TxResult<CommitReceipt> {
            let stored = match &mutation {
                ReportMutation::Insert(report) => {
                    if reports.get(report.report_id.as_bytes())?.is_some()
                        || heads.get(report.report_id.as_bytes())?.is_some()
                    {
                        return abort(CiError::conflict(format!(
                            "report {} already exists",
                            report.report_id
                        )));
                    }
                    let mut report = report.clone();
                    report.id = report_key;
                    report.version = 1;
                    reports.insert(report.report_id.as_bytes(), encode(&report, "encode ci_report")?)?;
                    Some(report)
                }
                ReportMutation::Replace {
                    report,
                    expected_version,
                } => {
                    let Some(current) = tx_load_report(reports, &report.report_id)? else {
                        return abort(CiError::not_found("ci_report", &report.report_id));
                    };
                    if current.version != *expected_version {
                        return abort(version_conflict(
                            &report.report_id,
                            *expected_version,
                            current.version,
                        ));
                    }
                    let mut report = report.clone();
                    report.id = current.id;
                    report.version = expected_version + 1;
                    reports.insert(report.report_id.as_bytes(), encode(&report, "encode ci_report")?)?;
                    Some(report)
                }
                ReportMutation::Delete {
                    report_id,
                    expected_version,
                } => {
                    let Some(current) = tx_load_report(reports, report_id)? else {
                        return abort(CiError::not_found("ci_report", report_id));
                    };
                    if current.version != *expected_version {
                        return abort(version_conflict(report_id, *expected_version, current.version));
                    }
                    reports.remove(report_id.as_bytes())?;
                    None
                }
                ReportMutation::None => None,
            };

            let head: Option<ChainHead> = match heads.get(audit.report_id.as_bytes())? {
                Some(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(head) => Some(head),
                    Err(e) => return abort(CiError::serialization("decode chain head", e)),
                },
                None => None,
            };
            let sequence = head.as_ref().map_or(0, |h| h.sequence) + 1;
            let entry = match audit.clone().seal(audit_id, sequence, head.map(|h| h.hash)) {
                Ok(entry) => entry,
                Err(e) => return abort(e),
            };

            logs.insert(
                audit_key(&entry.report_id, entry.sequence),
                encode(&entry, "encode audit entry")?,
            )?;
            let new_head = ChainHead {
                sequence: entry.sequence,
                hash: entry.hash.clone(),
            };
            heads.insert(entry.report_id.as_bytes(), encode(&new_head, "encode chain head")?)?;

            Ok(CommitReceipt {
                report: stored,
                entry,
            })
        });

        let receipt = result.map_err(|e| match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => CiError::database("commit transaction", err),
        })?;
        Ok(settle(receipt, self.db.flush()))
    }
}

/// The transaction has already applied when the flush runs, so a flush
/// failure must not turn a committed change into an error the caller retries.
fn settle(receipt: CommitReceipt, flushed: sled::Result<usize>) -> CommitReceipt {
    if let Err(e) = flushed {
        warn!(
            "Flush after audit entry {} for {} failed: {}",
            receipt.entry.id, receipt.entry.report_id, e
        );
    }
    receipt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{verify_chain, AuditAction};
    use crate::emissions::EmissionInputs;
    use crate::roles::Actor;
    use chrono::{NaiveDate, Utc};
    use serde_json::json;

    fn draft(report_id: &str) -> CiReport {
        let now = Utc::now();
        CiReport {
            id: 0,
            report_id: report_id.to_string(),
            supplier_id: "sup-1".to_string(),
            feedstock_id: "fs-1".to_string(),
            reporting_period_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            reporting_period_end: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            reference_year: 2025,
            methodology: None,
            data_quality: None,
            emissions: EmissionInputs::default(),
            derived: None,
            status: ReportStatus::Draft,
            submitted_at: None,
            assigned_auditor_id: None,
            verified_by: None,
            verified_at: None,
            decision_notes: None,
            supporting_documents: vec![],
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn pending(report_id: &str, action: AuditAction) -> PendingAudit {
        PendingAudit::new(report_id, &Actor::supplier("sup-1"), action, Utc::now(), json!({"k": 1}))
    }

    #[test]
    fn chain_is_ordered_and_scoped_per_report() {
        let store = SledStore::temporary().unwrap();
        for id in ["CI-A", "CI-AB"] {
            store
                .commit(ReportMutation::Insert(draft(id)), pending(id, AuditAction::Created))
                .unwrap();
        }
        for _ in 0..11 {
            store
                .commit(ReportMutation::None, pending("CI-A", AuditAction::UpdateDenied))
                .unwrap();
        }
        let history = store.history("CI-A").unwrap();
        assert_eq!(history.len(), 12);
        assert_eq!(history.last().unwrap().sequence, 12);
        verify_chain(&history).unwrap();
        assert_eq!(store.history("CI-AB").unwrap().len(), 1);
    }

    #[test]
    fn aborted_commit_leaves_no_trace() {
        let store = SledStore::temporary().unwrap();
        store
            .commit(ReportMutation::Insert(draft("CI-A")), pending("CI-A", AuditAction::Created))
            .unwrap();
        let err = store
            .commit(
                ReportMutation::Delete {
                    report_id: "CI-A".to_string(),
                    expected_version: 2,
                },
                pending("CI-A", AuditAction::Deleted),
            )
            .unwrap_err();
        assert!(matches!(err, CiError::Conflict { .. }));
        assert!(store.load_report("CI-A").unwrap().is_some());
        assert_eq!(store.history("CI-A").unwrap().len(), 1);
    }

    #[test]
    fn replace_bumps_version() {
        let store = SledStore::temporary().unwrap();
        let created = store
            .commit(ReportMutation::Insert(draft("CI-A")), pending("CI-A", AuditAction::Created))
            .unwrap()
            .report
            .unwrap();
        let mut edited = created.clone();
        edited.reference_year = 2024;
        let receipt = store
            .commit(
                ReportMutation::Replace {
                    report: edited,
                    expected_version: created.version,
                },
                pending("CI-A", AuditAction::Updated),
            )
            .unwrap();
        let stored = store.load_report("CI-A").unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.id, created.id);
        assert_eq!(stored.reference_year, 2024);
        assert_eq!(receipt.entry.prev_hash.as_deref(), Some(store.history("CI-A").unwrap()[0].hash.as_str()));
    }

    #[test]
    fn failed_flush_still_returns_committed_receipt() {
        let store = SledStore::temporary().unwrap();
        let receipt = store
            .commit(ReportMutation::Insert(draft("CI-F")), pending("CI-F", AuditAction::Created))
            .unwrap();
        let entry_id = receipt.entry.id;

        let settled = settle(receipt, Err(sled::Error::Unsupported("flush refused".to_string())));
        assert_eq!(settled.entry.id, entry_id);
        assert_eq!(settled.report.unwrap().version, 1);
        assert_eq!(store.history("CI-F").unwrap().len(), 1);
    }
}
