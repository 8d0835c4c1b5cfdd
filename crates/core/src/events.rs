use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalId, ApproverScope};
use crate::domain::quotation::QuotationId;
use crate::domain::user::UserId;
use crate::policy::ApprovalLevel;

/// Domain events raised after each committed workflow transition. Delivery is
/// fire-and-forget: a sink failure never reverses the transition it reports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ApprovalEvent {
    Requested {
        approval_id: ApprovalId,
        quotation_id: QuotationId,
        requested_by: UserId,
        approver: ApproverScope,
        level: ApprovalLevel,
        threshold: Decimal,
        reason: String,
    },
    Approved {
        approval_id: ApprovalId,
        quotation_id: QuotationId,
        decided_by: UserId,
        discount_percentage: Decimal,
    },
    Rejected {
        approval_id: ApprovalId,
        quotation_id: QuotationId,
        decided_by: UserId,
        reason: String,
    },
    Escalated {
        approval_id: ApprovalId,
        quotation_id: QuotationId,
        escalated_by: UserId,
        escalated_to: UserId,
        reason: Option<String>,
    },
    Resubmitted {
        previous_approval_id: ApprovalId,
        approval_id: ApprovalId,
        quotation_id: QuotationId,
        resubmitted_by: UserId,
    },
}

impl ApprovalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Requested { .. } => "approval.requested",
            Self::Approved { .. } => "approval.approved",
            Self::Rejected { .. } => "approval.rejected",
            Self::Escalated { .. } => "approval.escalated",
            Self::Resubmitted { .. } => "approval.resubmitted",
        }
    }

    pub fn approval_id(&self) -> &ApprovalId {
        match self {
            Self::Requested { approval_id, .. }
            | Self::Approved { approval_id, .. }
            | Self::Rejected { approval_id, .. }
            | Self::Escalated { approval_id, .. }
            | Self::Resubmitted { approval_id, .. } => approval_id,
        }
    }
}

/// Notification/delivery side of the workflow. Implementations must swallow
/// their own failures (logging them) rather than surfacing errors to the
/// engine.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ApprovalEvent);
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<Vec<ApprovalEvent>>>,
}

impl InMemoryEventSink {
    pub fn events(&self) -> Vec<ApprovalEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for InMemoryEventSink {
    fn publish(&self, event: ApprovalEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
