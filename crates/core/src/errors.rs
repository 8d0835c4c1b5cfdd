use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::approval::ApprovalStatus;
use crate::domain::user::Role;

/// Entity kinds named by `WorkflowError::NotFound`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    Approval,
    Quotation,
    User,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Approval => "approval",
            Self::Quotation => "quotation",
            Self::User => "user",
        };
        f.write_str(name)
    }
}

/// Caller-visible failure taxonomy for every workflow operation. None of
/// these are retried inside the engine; the transport layer maps them to
/// user-facing responses.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum WorkflowError {
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: EntityKind, id: String },
    #[error("approval `{approval_id}` is {actual:?} but {action} requires {expected:?}")]
    InvalidState {
        approval_id: String,
        action: &'static str,
        actual: ApprovalStatus,
        expected: ApprovalStatus,
    },
    #[error("user `{user_id}` is not authorized to {action}")]
    Unauthorized { user_id: String, action: &'static str },
    #[error(transparent)]
    PolicyViolation(#[from] PolicyViolation),
    #[error(
        "quotation `{quotation_id}` discount is now {current_pct}% but {submitted_pct}% was submitted"
    )]
    Conflict { quotation_id: String, submitted_pct: Decimal, current_pct: Decimal },
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Governance rules that block an operation outright, as opposed to state or
/// authorization problems.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PolicyViolation {
    #[error("discount {discount_pct}% is below the {minimum_pct}% approval threshold")]
    DiscountNotGoverned { discount_pct: Decimal, minimum_pct: Decimal },
    #[error("quotation `{quotation_id}` is already locked by pending approval `{approval_id}`")]
    QuotationLocked { quotation_id: String, approval_id: String },
    #[error("approval `{approval_id}` was already escalated to an admin")]
    AlreadyEscalated { approval_id: String },
    #[error("no active {role:?} is available to take the approval")]
    NoEligibleApprover { role: Role },
}
