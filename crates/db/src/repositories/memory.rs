use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use quotecrm_core::domain::approval::{ApprovalId, ApprovalRequest};
use quotecrm_core::domain::quotation::{Quotation, QuotationId};
use quotecrm_core::domain::user::{Role, User, UserId};

use super::{ApprovalRepository, QuotationRepository, RepositoryError, UserDirectory};

#[derive(Default)]
struct StoreState {
    quotations: HashMap<String, Quotation>,
    approvals: HashMap<String, ApprovalRequest>,
    users: HashMap<String, User>,
}

impl StoreState {
    /// Mirrors the partial unique index on pending requests per quotation.
    fn check_pending_constraint(&self, approval: &ApprovalRequest) -> Result<(), RepositoryError> {
        if !approval.is_pending() {
            return Ok(());
        }

        let conflict = self.approvals.values().any(|existing| {
            existing.quotation_id == approval.quotation_id
                && existing.is_pending()
                && existing.id != approval.id
        });
        if conflict {
            return Err(RepositoryError::Constraint(format!(
                "quotation `{}` already has a pending approval request",
                approval.quotation_id.0
            )));
        }

        Ok(())
    }
}

/// Shared-state in-memory store implementing every workflow repository trait.
/// Clones share the same underlying maps, so one instance can serve as all of
/// the engine's collaborators in tests and dry runs.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryWorkflowStore {
    pub async fn insert_quotation(&self, quotation: Quotation) {
        let mut state = self.state.write().await;
        state.quotations.insert(quotation.id.0.clone(), quotation);
    }

    pub async fn insert_user(&self, user: User) {
        let mut state = self.state.write().await;
        state.users.insert(user.id.0.clone(), user);
    }

    pub async fn insert_approval(&self, approval: ApprovalRequest) {
        let mut state = self.state.write().await;
        state.approvals.insert(approval.id.0.clone(), approval);
    }
}

#[async_trait::async_trait]
impl QuotationRepository for InMemoryWorkflowStore {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.quotations.get(&id.0).cloned())
    }

    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.quotations.insert(quotation.id.0.clone(), quotation);
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryWorkflowStore {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.users.get(&id.0).cloned())
    }

    async fn find_first_active_by_role(
        &self,
        role: Role,
    ) -> Result<Option<User>, RepositoryError> {
        let state = self.state.read().await;
        let mut candidates: Vec<&User> = state
            .users
            .values()
            .filter(|user| user.role == role && user.is_eligible_approver())
            .collect();
        candidates.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(candidates.first().map(|user| (*user).clone()))
    }
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryWorkflowStore {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.approvals.get(&id.0).cloned())
    }

    async fn find_by_quotation_id(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let state = self.state.read().await;
        let mut history: Vec<ApprovalRequest> = state
            .approvals
            .values()
            .filter(|approval| &approval.quotation_id == quotation_id)
            .cloned()
            .collect();
        history.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.id.0.cmp(&left.id.0))
        });
        Ok(history)
    }

    async fn save(&self, approval: ApprovalRequest) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.check_pending_constraint(&approval)?;
        state.approvals.insert(approval.id.0.clone(), approval);
        Ok(())
    }

    async fn commit_transition(
        &self,
        approval: &ApprovalRequest,
        quotation: &Quotation,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.check_pending_constraint(approval)?;
        state.approvals.insert(approval.id.0.clone(), approval.clone());
        state.quotations.insert(quotation.id.0.clone(), quotation.clone());
        Ok(())
    }

    async fn commit_transitions(
        &self,
        transitions: &[(ApprovalRequest, Quotation)],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        for (approval, _) in transitions {
            state.check_pending_constraint(approval)?;
        }
        for (approval, quotation) in transitions {
            state.approvals.insert(approval.id.0.clone(), approval.clone());
            state.quotations.insert(quotation.id.0.clone(), quotation.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use quotecrm_core::domain::approval::{
        ApprovalRequest, ApproverScope, NewApprovalRequest,
    };
    use quotecrm_core::domain::quotation::{Quotation, QuotationId};
    use quotecrm_core::domain::user::{Role, User, UserId};
    use quotecrm_core::policy::ApprovalLevel;

    use crate::repositories::{
        ApprovalRepository, QuotationRepository, RepositoryError, UserDirectory,
    };

    use super::InMemoryWorkflowStore;

    fn quotation(id: &str) -> Quotation {
        let now = Utc::now();
        let mut quotation = Quotation {
            id: QuotationId(id.to_string()),
            client_id: "C-1".to_string(),
            sub_total: Decimal::new(1000, 0),
            discount_percentage: Decimal::new(12, 0),
            discount_amount: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            total_amount: Decimal::ZERO,
            is_pending_approval: false,
            pending_approval_id: None,
            created_at: now,
            updated_at: now,
        };
        quotation.recompute_totals();
        quotation
    }

    fn pending_approval(quotation_id: &str) -> ApprovalRequest {
        ApprovalRequest::new_pending(
            NewApprovalRequest {
                quotation_id: QuotationId(quotation_id.to_string()),
                requested_by: UserId("u-rep".to_string()),
                approver: ApproverScope::AnyWithRole { role: Role::Manager },
                approval_level: ApprovalLevel::Manager,
                discount_percentage: Decimal::new(12, 0),
                threshold: Decimal::new(10, 0),
                reason: "above threshold".to_string(),
                comments: None,
                resubmitted_from: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn quotation_round_trip() {
        let store = InMemoryWorkflowStore::default();
        let quotation = quotation("Q-1");

        QuotationRepository::save(&store, quotation.clone()).await.expect("save");
        let found = QuotationRepository::find_by_id(&store, &quotation.id).await.expect("find");
        assert_eq!(found, Some(quotation));
    }

    #[tokio::test]
    async fn first_active_by_role_is_deterministic() {
        let store = InMemoryWorkflowStore::default();
        for id in ["u-mgr-2", "u-mgr-1", "u-mgr-3"] {
            store
                .insert_user(User {
                    id: UserId(id.to_string()),
                    role: Role::Manager,
                    is_active: true,
                    deleted_at: None,
                    reporting_manager_id: None,
                })
                .await;
        }

        let found =
            store.find_first_active_by_role(Role::Manager).await.expect("find").expect("exists");
        assert_eq!(found.id.0, "u-mgr-1");
    }

    #[tokio::test]
    async fn second_pending_request_is_rejected() {
        let store = InMemoryWorkflowStore::default();
        let quotation = quotation("Q-1");
        store.insert_quotation(quotation.clone()).await;

        store
            .commit_transition(&pending_approval("Q-1"), &quotation)
            .await
            .expect("first pending request");

        let error = store
            .commit_transition(&pending_approval("Q-1"), &quotation)
            .await
            .expect_err("second pending request must fail");
        assert!(matches!(error, RepositoryError::Constraint(_)));
    }

    #[tokio::test]
    async fn bulk_commit_is_all_or_nothing() {
        let store = InMemoryWorkflowStore::default();
        let first_quotation = quotation("Q-1");
        let second_quotation = quotation("Q-2");

        // Occupy Q-2 so the second pair in the batch violates the constraint.
        store
            .commit_transition(&pending_approval("Q-2"), &second_quotation)
            .await
            .expect("existing pending on Q-2");

        let batch = vec![
            (pending_approval("Q-1"), first_quotation.clone()),
            (pending_approval("Q-2"), second_quotation),
        ];
        let error =
            store.commit_transitions(&batch).await.expect_err("batch must fail atomically");
        assert!(matches!(error, RepositoryError::Constraint(_)));

        let q1_history = store
            .find_by_quotation_id(&QuotationId("Q-1".to_string()))
            .await
            .expect("history");
        assert!(q1_history.is_empty(), "failed batch must leave no partial writes");
    }
}
