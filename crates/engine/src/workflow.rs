use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use quotecrm_core::domain::approval::{
    ApprovalId, ApprovalRequest, ApprovalStatus, ApproverScope, NewApprovalRequest,
};
use quotecrm_core::domain::quotation::{Quotation, QuotationId};
use quotecrm_core::domain::user::{Role, User, UserId};
use quotecrm_core::errors::{EntityKind, PolicyViolation, WorkflowError};
use quotecrm_core::events::{ApprovalEvent, EventSink};
use quotecrm_core::policy::{ApprovalLevel, DiscountPolicy, RequiredApproval};

use quotecrm_db::repositories::{
    ApprovalRepository, QuotationRepository, RepositoryError, UserDirectory,
};

/// Submission of a quotation's discount for approval.
pub struct RequestApproval {
    pub quotation_id: QuotationId,
    pub requested_by: UserId,
    /// Must match the quotation's current discount; stale values are
    /// rejected as a conflict.
    pub discount_percentage: Decimal,
    pub reason: String,
    pub comments: Option<String>,
}

/// An approve or reject verdict on a pending request.
pub struct Decision {
    pub approval_id: ApprovalId,
    pub decided_by: UserId,
    pub reason: String,
    pub comments: Option<String>,
}

pub struct Escalation {
    pub approval_id: ApprovalId,
    pub escalated_by: UserId,
    pub reason: Option<String>,
}

pub struct Resubmission {
    pub approval_id: ApprovalId,
    pub resubmitted_by: UserId,
    pub reason: String,
    pub comments: Option<String>,
}

pub struct BulkApproval {
    pub approval_ids: Vec<ApprovalId>,
    pub approved_by: UserId,
    pub reason: String,
    pub comments: Option<String>,
}

/// Orchestrates the discount approval state machine over the repository
/// traits: Pending -> {Approved, Rejected}, with escalation as a
/// Pending -> Pending reassignment and resubmission as a new chained request.
///
/// Every operation is one synchronous unit of work: read, validate, mutate
/// both aggregates, commit once. Events are published after the commit and
/// never roll a transition back.
pub struct ApprovalWorkflow {
    approvals: Arc<dyn ApprovalRepository>,
    quotations: Arc<dyn QuotationRepository>,
    users: Arc<dyn UserDirectory>,
    events: Arc<dyn EventSink>,
    policy: DiscountPolicy,
}

fn storage(error: RepositoryError) -> WorkflowError {
    WorkflowError::Storage(error.to_string())
}

impl ApprovalWorkflow {
    pub fn new(
        approvals: Arc<dyn ApprovalRepository>,
        quotations: Arc<dyn QuotationRepository>,
        users: Arc<dyn UserDirectory>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_policy(approvals, quotations, users, events, DiscountPolicy::default())
    }

    pub fn with_policy(
        approvals: Arc<dyn ApprovalRepository>,
        quotations: Arc<dyn QuotationRepository>,
        users: Arc<dyn UserDirectory>,
        events: Arc<dyn EventSink>,
        policy: DiscountPolicy,
    ) -> Self {
        Self { approvals, quotations, users, events, policy }
    }

    pub async fn request_approval(
        &self,
        request: RequestApproval,
    ) -> Result<ApprovalRequest, WorkflowError> {
        let quotation = self.load_quotation(&request.quotation_id).await?;

        if quotation.is_locked() {
            let approval_id =
                quotation.pending_approval_id.as_ref().map(|id| id.0.clone()).unwrap_or_default();
            return Err(PolicyViolation::QuotationLocked {
                quotation_id: quotation.id.0.clone(),
                approval_id,
            }
            .into());
        }

        if request.discount_percentage != quotation.discount_percentage {
            return Err(WorkflowError::Conflict {
                quotation_id: quotation.id.0.clone(),
                submitted_pct: request.discount_percentage,
                current_pct: quotation.discount_percentage,
            });
        }

        let required = self.classify(request.discount_percentage)?;
        self.load_user(&request.requested_by).await?;
        let approver = self.resolve_request_approver(required.level).await?;

        let now = Utc::now();
        let approval = ApprovalRequest::new_pending(
            NewApprovalRequest {
                quotation_id: quotation.id.clone(),
                requested_by: request.requested_by.clone(),
                approver: approver.clone(),
                approval_level: required.level,
                discount_percentage: request.discount_percentage,
                threshold: required.threshold,
                reason: request.reason.clone(),
                comments: request.comments,
                resubmitted_from: None,
            },
            now,
        );

        let mut locked = quotation;
        locked.lock_for_approval(approval.id.clone());
        locked.updated_at = now;
        self.commit_request(&approval, &locked).await?;

        info!(
            approval_id = %approval.id.0,
            quotation_id = %locked.id.0,
            level = required.level.as_str(),
            "discount approval requested"
        );
        self.events.publish(ApprovalEvent::Requested {
            approval_id: approval.id.clone(),
            quotation_id: locked.id,
            requested_by: request.requested_by,
            approver,
            level: required.level,
            threshold: required.threshold,
            reason: request.reason,
        });

        Ok(approval)
    }

    pub async fn approve(&self, decision: Decision) -> Result<ApprovalRequest, WorkflowError> {
        let mut approval = self.load_approval(&decision.approval_id).await?;
        let actor = self.load_user(&decision.decided_by).await?;
        self.authorize_decision(&actor, &approval, "approve")?;

        let now = Utc::now();
        approval.approve(decision.reason, decision.comments, now)?;

        let mut quotation = self.load_quotation(&approval.quotation_id).await?;
        quotation.apply_discount(approval.discount_percentage);
        quotation.unlock_from_approval();
        quotation.updated_at = now;

        self.approvals.commit_transition(&approval, &quotation).await.map_err(storage)?;

        info!(
            approval_id = %approval.id.0,
            quotation_id = %quotation.id.0,
            discount_pct = %approval.discount_percentage,
            "discount approval granted"
        );
        self.events.publish(ApprovalEvent::Approved {
            approval_id: approval.id.clone(),
            quotation_id: quotation.id,
            decided_by: decision.decided_by,
            discount_percentage: approval.discount_percentage,
        });

        Ok(approval)
    }

    pub async fn reject(&self, decision: Decision) -> Result<ApprovalRequest, WorkflowError> {
        let mut approval = self.load_approval(&decision.approval_id).await?;
        let actor = self.load_user(&decision.decided_by).await?;
        self.authorize_decision(&actor, &approval, "reject")?;

        let now = Utc::now();
        let reason = decision.reason.clone();
        approval.reject(decision.reason, decision.comments, now)?;

        // Rejection policy: the discount goes to zero, not back to a prior
        // value.
        let mut quotation = self.load_quotation(&approval.quotation_id).await?;
        quotation.clear_discount();
        quotation.unlock_from_approval();
        quotation.updated_at = now;

        self.approvals.commit_transition(&approval, &quotation).await.map_err(storage)?;

        info!(
            approval_id = %approval.id.0,
            quotation_id = %quotation.id.0,
            "discount approval rejected"
        );
        self.events.publish(ApprovalEvent::Rejected {
            approval_id: approval.id.clone(),
            quotation_id: quotation.id,
            decided_by: decision.decided_by,
            reason,
        });

        Ok(approval)
    }

    pub async fn escalate(
        &self,
        escalation: Escalation,
    ) -> Result<ApprovalRequest, WorkflowError> {
        let mut approval = self.load_approval(&escalation.approval_id).await?;

        if !approval.is_pending() {
            return Err(WorkflowError::InvalidState {
                approval_id: approval.id.0.clone(),
                action: "escalate",
                actual: approval.status,
                expected: ApprovalStatus::Pending,
            });
        }
        if approval.escalated_to_admin {
            return Err(
                PolicyViolation::AlreadyEscalated { approval_id: approval.id.0.clone() }.into()
            );
        }

        let actor = self.load_user(&escalation.escalated_by).await?;
        if !actor.can_escalate() {
            return Err(WorkflowError::Unauthorized {
                user_id: actor.id.0.clone(),
                action: "escalate",
            });
        }

        let admin = self.resolve_first_active(Role::Admin).await?;
        approval.escalate_to(admin.id.clone(), Utc::now())?;
        self.approvals.save(approval.clone()).await.map_err(storage)?;

        info!(
            approval_id = %approval.id.0,
            escalated_to = %admin.id.0,
            "approval escalated to admin"
        );
        self.events.publish(ApprovalEvent::Escalated {
            approval_id: approval.id.clone(),
            quotation_id: approval.quotation_id.clone(),
            escalated_by: escalation.escalated_by,
            escalated_to: admin.id,
            reason: escalation.reason,
        });

        Ok(approval)
    }

    pub async fn resubmit(
        &self,
        resubmission: Resubmission,
    ) -> Result<ApprovalRequest, WorkflowError> {
        let previous = self.load_approval(&resubmission.approval_id).await?;

        if previous.status != ApprovalStatus::Rejected {
            return Err(WorkflowError::InvalidState {
                approval_id: previous.id.0.clone(),
                action: "resubmit",
                actual: previous.status,
                expected: ApprovalStatus::Rejected,
            });
        }
        if resubmission.resubmitted_by != previous.requested_by {
            return Err(WorkflowError::Unauthorized {
                user_id: resubmission.resubmitted_by.0.clone(),
                action: "resubmit",
            });
        }

        let requester = self.load_user(&resubmission.resubmitted_by).await?;
        let quotation = self.load_quotation(&previous.quotation_id).await?;

        if quotation.is_locked() {
            let approval_id =
                quotation.pending_approval_id.as_ref().map(|id| id.0.clone()).unwrap_or_default();
            return Err(PolicyViolation::QuotationLocked {
                quotation_id: quotation.id.0.clone(),
                approval_id,
            }
            .into());
        }

        // The quotation may have been edited since the rejection, so the
        // current discount is reclassified from scratch.
        let required = self.classify(quotation.discount_percentage)?;
        let approver = self.resolve_resubmit_approver(&requester, required.level).await?;

        let now = Utc::now();
        let approval = ApprovalRequest::new_pending(
            NewApprovalRequest {
                quotation_id: quotation.id.clone(),
                requested_by: previous.requested_by.clone(),
                approver,
                approval_level: required.level,
                discount_percentage: quotation.discount_percentage,
                threshold: required.threshold,
                reason: resubmission.reason,
                comments: resubmission.comments,
                resubmitted_from: Some(previous.id.clone()),
            },
            now,
        );

        let mut locked = quotation;
        locked.lock_for_approval(approval.id.clone());
        locked.updated_at = now;
        self.commit_request(&approval, &locked).await?;

        info!(
            approval_id = %approval.id.0,
            previous_approval_id = %previous.id.0,
            quotation_id = %locked.id.0,
            "rejected approval resubmitted"
        );
        self.events.publish(ApprovalEvent::Resubmitted {
            previous_approval_id: previous.id,
            approval_id: approval.id.clone(),
            quotation_id: locked.id,
            resubmitted_by: resubmission.resubmitted_by,
        });

        Ok(approval)
    }

    /// Approves a batch in one logical unit: every id is validated before any
    /// mutation is applied, and the batch commits in a single transaction.
    pub async fn bulk_approve(
        &self,
        bulk: BulkApproval,
    ) -> Result<Vec<ApprovalRequest>, WorkflowError> {
        let actor = self.load_user(&bulk.approved_by).await?;
        let now = Utc::now();

        let mut transitions: Vec<(ApprovalRequest, Quotation)> =
            Vec::with_capacity(bulk.approval_ids.len());
        let mut seen: HashSet<&ApprovalId> = HashSet::with_capacity(bulk.approval_ids.len());
        for approval_id in &bulk.approval_ids {
            // A repeated id collapses to a single transition.
            if !seen.insert(approval_id) {
                continue;
            }
            let mut approval = self.load_approval(approval_id).await?;
            self.authorize_decision(&actor, &approval, "approve")?;
            approval.approve(bulk.reason.clone(), bulk.comments.clone(), now)?;

            let mut quotation = self.load_quotation(&approval.quotation_id).await?;
            quotation.apply_discount(approval.discount_percentage);
            quotation.unlock_from_approval();
            quotation.updated_at = now;

            transitions.push((approval, quotation));
        }

        self.approvals.commit_transitions(&transitions).await.map_err(storage)?;

        info!(count = transitions.len(), "bulk approval applied");
        for (approval, quotation) in &transitions {
            self.events.publish(ApprovalEvent::Approved {
                approval_id: approval.id.clone(),
                quotation_id: quotation.id.clone(),
                decided_by: bulk.approved_by.clone(),
                discount_percentage: approval.discount_percentage,
            });
        }

        Ok(transitions.into_iter().map(|(approval, _)| approval).collect())
    }

    fn classify(&self, discount_pct: Decimal) -> Result<RequiredApproval, WorkflowError> {
        self.policy.classify(discount_pct).ok_or_else(|| {
            PolicyViolation::DiscountNotGoverned {
                discount_pct,
                minimum_pct: self.policy.manager_threshold,
            }
            .into()
        })
    }

    /// Manager-level requests go to the manager pool; admin-level requests
    /// are assigned to a specific active admin up front.
    async fn resolve_request_approver(
        &self,
        level: ApprovalLevel,
    ) -> Result<ApproverScope, WorkflowError> {
        match level {
            ApprovalLevel::Manager => Ok(ApproverScope::AnyWithRole { role: Role::Manager }),
            ApprovalLevel::Admin => {
                let admin = self.resolve_first_active(Role::Admin).await?;
                Ok(ApproverScope::Specific { user_id: admin.id })
            }
        }
    }

    /// On resubmission the requester's direct reporting manager is preferred
    /// when one is active; otherwise the first active holder of the role.
    async fn resolve_resubmit_approver(
        &self,
        requester: &User,
        level: ApprovalLevel,
    ) -> Result<ApproverScope, WorkflowError> {
        match level {
            ApprovalLevel::Manager => {
                if let Some(manager_id) = &requester.reporting_manager_id {
                    let manager = self.users.find_by_id(manager_id).await.map_err(storage)?;
                    if let Some(manager) = manager {
                        if manager.is_eligible_approver() && manager.can_escalate() {
                            return Ok(ApproverScope::Specific { user_id: manager.id });
                        }
                    }
                }
                let manager = self.resolve_first_active(Role::Manager).await?;
                Ok(ApproverScope::Specific { user_id: manager.id })
            }
            ApprovalLevel::Admin => {
                let admin = self.resolve_first_active(Role::Admin).await?;
                Ok(ApproverScope::Specific { user_id: admin.id })
            }
        }
    }

    async fn resolve_first_active(&self, role: Role) -> Result<User, WorkflowError> {
        self.users
            .find_first_active_by_role(role)
            .await
            .map_err(storage)?
            .ok_or_else(|| PolicyViolation::NoEligibleApprover { role }.into())
    }

    fn authorize_decision(
        &self,
        actor: &User,
        approval: &ApprovalRequest,
        action: &'static str,
    ) -> Result<(), WorkflowError> {
        let denied = WorkflowError::Unauthorized { user_id: actor.id.0.clone(), action };

        if !actor.is_eligible_approver() || !actor.can_decide(approval.approval_level) {
            return Err(denied);
        }

        // A specifically assigned request can still be decided by any admin.
        if let ApproverScope::Specific { user_id } = &approval.approver {
            if actor.id != *user_id && actor.role != Role::Admin {
                return Err(denied);
            }
        }

        Ok(())
    }

    /// A constraint violation here means another pending request won the
    /// race for the quotation lock; the winner's id is re-read for the error.
    async fn commit_request(
        &self,
        approval: &ApprovalRequest,
        quotation: &Quotation,
    ) -> Result<(), WorkflowError> {
        match self.approvals.commit_transition(approval, quotation).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::Constraint(message)) => {
                warn!(quotation_id = %quotation.id.0, %message, "lost quotation lock race");
                let approval_id = self
                    .quotations
                    .find_by_id(&quotation.id)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|current| current.pending_approval_id)
                    .map(|id| id.0)
                    .unwrap_or_default();
                Err(PolicyViolation::QuotationLocked {
                    quotation_id: quotation.id.0.clone(),
                    approval_id,
                }
                .into())
            }
            Err(other) => Err(storage(other)),
        }
    }

    async fn load_approval(&self, id: &ApprovalId) -> Result<ApprovalRequest, WorkflowError> {
        self.approvals.find_by_id(id).await.map_err(storage)?.ok_or_else(|| {
            WorkflowError::NotFound { entity: EntityKind::Approval, id: id.0.clone() }
        })
    }

    async fn load_quotation(&self, id: &QuotationId) -> Result<Quotation, WorkflowError> {
        self.quotations.find_by_id(id).await.map_err(storage)?.ok_or_else(|| {
            WorkflowError::NotFound { entity: EntityKind::Quotation, id: id.0.clone() }
        })
    }

    async fn load_user(&self, id: &UserId) -> Result<User, WorkflowError> {
        self.users
            .find_by_id(id)
            .await
            .map_err(storage)?
            .ok_or_else(|| WorkflowError::NotFound { entity: EntityKind::User, id: id.0.clone() })
    }
}
