use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::errors::{CiError, CiResult};
use crate::report::{CiReport, ReportStatus};
use crate::roles::{Actor, Role};

/// Operations an actor can request against a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    View,
    Edit,
    Delete,
    Submit,
    Claim,
    Decide,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::View => "view",
            Operation::Edit => "edit",
            Operation::Delete => "delete",
            Operation::Submit => "submit",
            Operation::Claim => "claim",
            Operation::Decide => "decide",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an actor stands in relation to one particular report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    Owner,
    AssignedAuditor,
    Auditor,
    Admin,
    /// Buyers, other suppliers, system jobs.
    Outsider,
}

impl Relation {
    pub fn of(actor: &Actor, report: &CiReport) -> Self {
        match actor.role {
            Role::Admin => Relation::Admin,
            Role::Supplier if actor.user_id == report.supplier_id => Relation::Owner,
            Role::Auditor
                if report.assigned_auditor_id.as_deref() == Some(actor.user_id.as_str()) =>
            {
                Relation::AssignedAuditor
            }
            Role::Auditor => Relation::Auditor,
            Role::Supplier | Role::Buyer | Role::System => Relation::Outsider,
        }
    }
}

/// Capability matrix: (relation, status) -> permitted operations.
pub struct AccessPolicyTable {
    grants: HashMap<(Relation, ReportStatus), HashSet<Operation>>,
}

impl Default for AccessPolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl AccessPolicyTable {
    pub fn standard() -> Self {
        use Operation::*;
        use ReportStatus::*;

        let mut table = Self {
            grants: HashMap::new(),
        };

        table.grant(Relation::Owner, &[Draft], &[View, Edit, Delete, Submit]);
        table.grant(
            Relation::Owner,
            &[Submitted, UnderReview, Verified, Rejected, Expired],
            &[View],
        );

        for reviewer in [Relation::Auditor, Relation::AssignedAuditor, Relation::Admin] {
            table.grant(reviewer, &[Submitted], &[View, Claim]);
            table.grant(reviewer, &[UnderReview, Verified, Rejected, Expired], &[View]);
        }
        table.grant(Relation::AssignedAuditor, &[UnderReview], &[Decide]);
        table.grant(Relation::Admin, &[UnderReview], &[Decide]);

        table.grant(Relation::Outsider, &[Verified], &[View]);

        table
    }

    fn grant(&mut self, relation: Relation, statuses: &[ReportStatus], ops: &[Operation]) {
        for status in statuses {
            self.grants
                .entry((relation, *status))
                .or_default()
                .extend(ops.iter().copied());
        }
    }

    pub fn permits(&self, relation: Relation, status: ReportStatus, op: Operation) -> bool {
        self.grants
            .get(&(relation, status))
            .is_some_and(|ops| ops.contains(&op))
    }

    /// True when some relation may perform `op` while the report is in `status`.
    fn state_allows(&self, status: ReportStatus, op: Operation) -> bool {
        self.grants
            .iter()
            .any(|((_, s), ops)| *s == status && ops.contains(&op))
    }

    /// Single lookup per request. When no relation at all may perform `op`
    /// in the report's current status the answer is InvalidState, otherwise
    /// a missing grant for this actor is Forbidden.
    pub fn authorize(&self, actor: &Actor, report: &CiReport, op: Operation) -> CiResult<()> {
        let relation = Relation::of(actor, report);
        if self.permits(relation, report.status, op) {
            return Ok(());
        }
        if !self.state_allows(report.status, op) {
            return Err(CiError::invalid_state(op.as_str(), report.status.as_str()));
        }
        Err(CiError::forbidden(
            op.as_str(),
            format!(
                "{} '{}' may not {} report {} while it is {}",
                actor.role, actor.user_id, op, report.report_id, report.status
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emissions::EmissionInputs;
    use chrono::{NaiveDate, Utc};

    fn report(status: ReportStatus, auditor: Option<&str>) -> CiReport {
        let now = Utc::now();
        CiReport {
            id: 1,
            report_id: "CI-2026-abcdef01".to_string(),
            supplier_id: "sup-1".to_string(),
            feedstock_id: "fs-1".to_string(),
            reporting_period_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            reporting_period_end: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
            reference_year: 2025,
            methodology: None,
            data_quality: None,
            emissions: EmissionInputs::default(),
            derived: None,
            status,
            submitted_at: None,
            assigned_auditor_id: auditor.map(str::to_string),
            verified_by: None,
            verified_at: None,
            decision_notes: None,
            supporting_documents: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn owner_has_full_access_only_while_draft() {
        let table = AccessPolicyTable::standard();
        let owner = Actor::supplier("sup-1");
        let draft = report(ReportStatus::Draft, None);
        for op in [Operation::View, Operation::Edit, Operation::Delete, Operation::Submit] {
            assert!(table.authorize(&owner, &draft, op).is_ok());
        }
        let submitted = report(ReportStatus::Submitted, None);
        assert!(table.authorize(&owner, &submitted, Operation::View).is_ok());
        assert!(matches!(
            table.authorize(&owner, &submitted, Operation::Edit),
            Err(CiError::InvalidState { .. })
        ));
    }

    #[test]
    fn edit_on_non_draft_is_invalid_state_for_everyone() {
        let table = AccessPolicyTable::standard();
        let verified = report(ReportStatus::Verified, Some("aud-1"));
        for actor in [
            Actor::supplier("sup-1"),
            Actor::auditor("aud-1"),
            Actor::admin("adm"),
            Actor::buyer("buy"),
        ] {
            assert!(matches!(
                table.authorize(&actor, &verified, Operation::Edit),
                Err(CiError::InvalidState { .. })
            ));
        }
    }

    #[test]
    fn other_supplier_cannot_touch_a_draft() {
        let table = AccessPolicyTable::standard();
        let draft = report(ReportStatus::Draft, None);
        let stranger = Actor::supplier("sup-2");
        assert!(matches!(
            table.authorize(&stranger, &draft, Operation::View),
            Err(CiError::Forbidden { .. })
        ));
        assert!(matches!(
            table.authorize(&stranger, &draft, Operation::Edit),
            Err(CiError::Forbidden { .. })
        ));
    }

    #[test]
    fn buyer_reads_only_verified() {
        let table = AccessPolicyTable::standard();
        let buyer = Actor::buyer("buy-1");
        assert!(table
            .authorize(&buyer, &report(ReportStatus::Verified, Some("aud")), Operation::View)
            .is_ok());
        for status in [
            ReportStatus::Draft,
            ReportStatus::Submitted,
            ReportStatus::UnderReview,
            ReportStatus::Rejected,
        ] {
            assert!(table
                .authorize(&buyer, &report(status, None), Operation::View)
                .is_err());
        }
    }

    #[test]
    fn only_assigned_auditor_or_admin_decides() {
        let table = AccessPolicyTable::standard();
        let under_review = report(ReportStatus::UnderReview, Some("aud-1"));
        assert!(table
            .authorize(&Actor::auditor("aud-1"), &under_review, Operation::Decide)
            .is_ok());
        assert!(table
            .authorize(&Actor::admin("adm"), &under_review, Operation::Decide)
            .is_ok());
        assert!(matches!(
            table.authorize(&Actor::auditor("aud-2"), &under_review, Operation::Decide),
            Err(CiError::Forbidden { .. })
        ));
    }

    #[test]
    fn reviewers_cannot_see_drafts() {
        let table = AccessPolicyTable::standard();
        let draft = report(ReportStatus::Draft, None);
        assert!(matches!(
            table.authorize(&Actor::auditor("aud-1"), &draft, Operation::View),
            Err(CiError::Forbidden { .. })
        ));
        assert!(matches!(
            table.authorize(&Actor::admin("adm"), &draft, Operation::View),
            Err(CiError::Forbidden { .. })
        ));
    }

    #[test]
    fn system_actor_holds_no_grants() {
        let table = AccessPolicyTable::standard();
        let verified = report(ReportStatus::Verified, Some("aud"));
        // Outsider view on verified is allowed; nothing else.
        assert!(table
            .authorize(&Actor::system(), &verified, Operation::Decide)
            .is_err());
    }
}
