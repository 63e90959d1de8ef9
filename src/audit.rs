//! Append-only, hash-linked audit trail
//!
//! Each report owns its own chain. An entry's `hash` covers the previous
//! entry's hash plus the canonical JSON of the entry body, so any edit or
//! removal in the middle of a chain is detectable by [`verify_chain`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::{CiError, CiResult};
use crate::report::ReportStatus;
use crate::roles::{Actor, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Submitted,
    Assigned,
    Verified,
    Rejected,
    Expired,
    Deleted,
    DeletionAttempted,
    UpdateDenied,
    TransitionDenied,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Submitted => "submitted",
            AuditAction::Assigned => "assigned",
            AuditAction::Verified => "verified",
            AuditAction::Rejected => "rejected",
            AuditAction::Expired => "expired",
            AuditAction::Deleted => "deleted",
            AuditAction::DeletionAttempted => "deletion_attempted",
            AuditAction::UpdateDenied => "update_denied",
            AuditAction::TransitionDenied => "transition_denied",
        }
    }

    /// Denied attempts are recorded but never change the report.
    pub fn is_denial(self) -> bool {
        matches!(
            self,
            AuditAction::DeletionAttempted
                | AuditAction::UpdateDenied
                | AuditAction::TransitionDenied
        )
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Store-wide, strictly increasing.
    pub id: u64,
    pub report_id: String,
    /// Position in this report's chain, starting at 1.
    pub sequence: u64,
    pub actor_id: String,
    pub actor_role: Role,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
    pub prev_hash: Option<String>,
    pub hash: String,
}

/// The hashed portion of an entry.
#[derive(Serialize)]
struct EntryBody<'a> {
    id: u64,
    report_id: &'a str,
    sequence: u64,
    actor_id: &'a str,
    actor_role: Role,
    action: AuditAction,
    timestamp: &'a DateTime<Utc>,
    metadata: &'a Value,
}

impl AuditLogEntry {
    fn body(&self) -> EntryBody<'_> {
        EntryBody {
            id: self.id,
            report_id: &self.report_id,
            sequence: self.sequence,
            actor_id: &self.actor_id,
            actor_role: self.actor_role,
            action: self.action,
            timestamp: &self.timestamp,
            metadata: &self.metadata,
        }
    }

    pub fn compute_hash(&self) -> CiResult<String> {
        let line = serde_json::to_string(&self.body())
            .map_err(|e| CiError::serialization("audit entry body", e))?;
        Ok(chain_hash(self.prev_hash.as_deref(), &line))
    }
}

fn chain_hash(prev_hash: Option<&str>, line: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(line.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// An audit record waiting for the store to give it an id and a chain position.
#[derive(Debug, Clone)]
pub struct PendingAudit {
    pub report_id: String,
    pub actor: Actor,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

impl PendingAudit {
    pub fn new(
        report_id: impl Into<String>,
        actor: &Actor,
        action: AuditAction,
        timestamp: DateTime<Utc>,
        metadata: Value,
    ) -> Self {
        Self {
            report_id: report_id.into(),
            actor: actor.clone(),
            action,
            timestamp,
            metadata,
        }
    }

    pub fn seal(self, id: u64, sequence: u64, prev_hash: Option<String>) -> CiResult<AuditLogEntry> {
        let mut entry = AuditLogEntry {
            id,
            report_id: self.report_id,
            sequence,
            actor_id: self.actor.user_id,
            actor_role: self.actor.role,
            action: self.action,
            timestamp: self.timestamp,
            metadata: self.metadata,
            prev_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }
}

/// Check sequence numbering and hash links of one report's chain.
pub fn verify_chain(entries: &[AuditLogEntry]) -> CiResult<()> {
    let mut prev: Option<&AuditLogEntry> = None;
    for (index, entry) in entries.iter().enumerate() {
        let expected_sequence = index as u64 + 1;
        if entry.sequence != expected_sequence {
            return Err(CiError::audit_integrity(format!(
                "{}: expected sequence {expected_sequence}, found {}",
                entry.report_id, entry.sequence
            )));
        }
        if let Some(p) = prev {
            if p.report_id != entry.report_id {
                return Err(CiError::audit_integrity(format!(
                    "chain mixes reports {} and {}",
                    p.report_id, entry.report_id
                )));
            }
        }
        let expected_prev = prev.map(|p| p.hash.as_str());
        if entry.prev_hash.as_deref() != expected_prev {
            return Err(CiError::audit_integrity(format!(
                "{}: broken link at sequence {}",
                entry.report_id, entry.sequence
            )));
        }
        if entry.compute_hash()? != entry.hash {
            return Err(CiError::audit_integrity(format!(
                "{}: hash mismatch at sequence {}",
                entry.report_id, entry.sequence
            )));
        }
        prev = Some(entry);
    }
    Ok(())
}

/// Rebuild a report's status from its history alone.
///
/// `Ok(None)` means the report never existed or was deleted.
pub fn replay_status(entries: &[AuditLogEntry]) -> CiResult<Option<ReportStatus>> {
    let mut status: Option<ReportStatus> = None;
    let mut deleted = false;

    for entry in entries {
        if deleted {
            return Err(CiError::audit_integrity(format!(
                "{}: {} recorded after deletion",
                entry.report_id, entry.action
            )));
        }
        if entry.action.is_denial() {
            if status.is_none() {
                return Err(CiError::audit_integrity(format!(
                    "{}: {} recorded before creation",
                    entry.report_id, entry.action
                )));
            }
            continue;
        }

        status = match (status, entry.action) {
            (None, AuditAction::Created) => Some(ReportStatus::Draft),
            (Some(ReportStatus::Draft), AuditAction::Updated) => Some(ReportStatus::Draft),
            (Some(ReportStatus::Draft), AuditAction::Submitted) => Some(ReportStatus::Submitted),
            (Some(ReportStatus::Submitted), AuditAction::Assigned) => {
                Some(ReportStatus::UnderReview)
            }
            (Some(ReportStatus::UnderReview), AuditAction::Verified) => {
                Some(ReportStatus::Verified)
            }
            (Some(ReportStatus::UnderReview), AuditAction::Rejected) => {
                Some(ReportStatus::Rejected)
            }
            (Some(ReportStatus::Verified | ReportStatus::Rejected), AuditAction::Expired) => {
                Some(ReportStatus::Expired)
            }
            (Some(ReportStatus::Draft), AuditAction::Deleted) => {
                deleted = true;
                None
            }
            (from, action) => {
                return Err(CiError::audit_integrity(format!(
                    "{}: {} is not possible from {}",
                    entry.report_id,
                    action,
                    from.map(ReportStatus::as_str).unwrap_or("nothing")
                )));
            }
        };
    }
    Ok(status)
}
