use async_trait::async_trait;
use thiserror::Error;

use quotecrm_core::domain::approval::{ApprovalId, ApprovalRequest};
use quotecrm_core::domain::quotation::{Quotation, QuotationId};
use quotecrm_core::domain::user::{Role, User, UserId};

pub mod approval;
pub mod memory;
pub mod quotation;
pub mod user;

pub use approval::SqlApprovalRepository;
pub use memory::InMemoryWorkflowStore;
pub use quotation::SqlQuotationRepository;
pub use user::SqlUserDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
}

#[async_trait]
pub trait QuotationRepository: Send + Sync {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError>;
    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError>;
}

/// Read-only view of the user/role directory the workflow consumes.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;

    /// First active, non-deleted holder of the role, in a deterministic order.
    async fn find_first_active_by_role(&self, role: Role) -> Result<Option<User>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn find_by_id(&self, id: &ApprovalId)
        -> Result<Option<ApprovalRequest>, RepositoryError>;

    /// Append-only approval history for a quotation, newest first.
    async fn find_by_quotation_id(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError>;

    async fn save(&self, approval: ApprovalRequest) -> Result<(), RepositoryError>;

    /// Persists an approval request and its quotation in one transaction.
    /// Violating the one-pending-request-per-quotation constraint surfaces as
    /// `RepositoryError::Constraint`.
    async fn commit_transition(
        &self,
        approval: &ApprovalRequest,
        quotation: &Quotation,
    ) -> Result<(), RepositoryError>;

    /// Persists a batch of request/quotation pairs in one transaction; either
    /// every pair commits or none do.
    async fn commit_transitions(
        &self,
        transitions: &[(ApprovalRequest, Quotation)],
    ) -> Result<(), RepositoryError>;
}
