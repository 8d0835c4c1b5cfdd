use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::quotation::QuotationId;
use crate::domain::user::{Role, UserId};
use crate::errors::{PolicyViolation, WorkflowError};
use crate::policy::ApprovalLevel;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// Who may decide a pending request: a specific user, or any active holder of
/// a role (the "pool" used for manager-level requests).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApproverScope {
    Specific { user_id: UserId },
    AnyWithRole { role: Role },
}

/// Aggregate root of the discount approval workflow.
///
/// A request is created Pending and closed exactly once by approve or reject.
/// Escalation reassigns the approver without changing status; resubmission
/// never touches this record, it creates a new one pointing back via
/// `resubmitted_from`. Decided records are an immutable audit trail.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub quotation_id: QuotationId,
    pub requested_by: UserId,
    pub approver: ApproverScope,
    pub status: ApprovalStatus,
    pub approval_level: ApprovalLevel,
    /// Discount value snapshotted at request time.
    pub discount_percentage: Decimal,
    /// Policy threshold that placed the request at `approval_level`.
    pub threshold: Decimal,
    pub reason: String,
    pub comments: Option<String>,
    pub decision_reason: Option<String>,
    pub decision_comments: Option<String>,
    pub escalated_to_admin: bool,
    pub resubmitted_from: Option<ApprovalId>,
    pub request_date: DateTime<Utc>,
    pub approval_date: Option<DateTime<Utc>>,
    pub rejection_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct NewApprovalRequest {
    pub quotation_id: QuotationId,
    pub requested_by: UserId,
    pub approver: ApproverScope,
    pub approval_level: ApprovalLevel,
    pub discount_percentage: Decimal,
    pub threshold: Decimal,
    pub reason: String,
    pub comments: Option<String>,
    pub resubmitted_from: Option<ApprovalId>,
}

impl ApprovalRequest {
    pub fn new_pending(request: NewApprovalRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: ApprovalId::generate(),
            quotation_id: request.quotation_id,
            requested_by: request.requested_by,
            approver: request.approver,
            status: ApprovalStatus::Pending,
            approval_level: request.approval_level,
            discount_percentage: request.discount_percentage,
            threshold: request.threshold,
            reason: request.reason,
            comments: request.comments,
            decision_reason: None,
            decision_comments: None,
            escalated_to_admin: false,
            resubmitted_from: request.resubmitted_from,
            request_date: now,
            approval_date: None,
            rejection_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    fn require_status(
        &self,
        expected: ApprovalStatus,
        action: &'static str,
    ) -> Result<(), WorkflowError> {
        if self.status == expected {
            return Ok(());
        }

        Err(WorkflowError::InvalidState {
            approval_id: self.id.0.clone(),
            action,
            actual: self.status,
            expected,
        })
    }

    pub fn approve(
        &mut self,
        reason: String,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        self.require_status(ApprovalStatus::Pending, "approve")?;

        self.status = ApprovalStatus::Approved;
        self.approval_date = Some(now);
        self.decision_reason = Some(reason);
        self.decision_comments = comments;
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(
        &mut self,
        reason: String,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        self.require_status(ApprovalStatus::Pending, "reject")?;

        self.status = ApprovalStatus::Rejected;
        self.rejection_date = Some(now);
        self.decision_reason = Some(reason);
        self.decision_comments = comments;
        self.updated_at = now;
        Ok(())
    }

    /// Escalation is a one-way Pending -> Pending reassignment to a specific
    /// admin; the request stays open and the quotation stays locked.
    pub fn escalate_to(
        &mut self,
        admin_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        self.require_status(ApprovalStatus::Pending, "escalate")?;

        if self.escalated_to_admin {
            return Err(
                PolicyViolation::AlreadyEscalated { approval_id: self.id.0.clone() }.into()
            );
        }

        self.approver = ApproverScope::Specific { user_id: admin_id };
        self.escalated_to_admin = true;
        self.updated_at = now;
        Ok(())
    }
}
