use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::ApprovalLevel;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Closed role set for the approval workflow. Capability checks dispatch on
/// this enum rather than comparing role-name strings at each call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SalesRep,
    Manager,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sales_rep" => Some(Self::SalesRep),
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SalesRep => "sales_rep",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub role: Role,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub reporting_manager_id: Option<UserId>,
}

impl User {
    /// Only active, non-deleted users may be routed approvals or decide them.
    pub fn is_eligible_approver(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }

    /// Manager-level requests may be decided by any Manager or Admin;
    /// Admin-level requests only by an Admin.
    pub fn can_decide(&self, level: ApprovalLevel) -> bool {
        match level {
            ApprovalLevel::Manager => matches!(self.role, Role::Manager | Role::Admin),
            ApprovalLevel::Admin => self.role == Role::Admin,
        }
    }

    pub fn can_escalate(&self) -> bool {
        matches!(self.role, Role::Manager | Role::Admin)
    }
}
