use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Governance tier required to decide a discount approval request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalLevel {
    Manager,
    Admin,
}

impl ApprovalLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "manager" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }
}

/// Outcome of classifying an eligible discount: the tier that must decide it
/// and the numeric threshold that placed it there.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequiredApproval {
    pub level: ApprovalLevel,
    pub threshold: Decimal,
}

/// Discount governance thresholds. Discounts at or above the admin threshold
/// need an Admin, at or above the manager threshold a Manager; anything below
/// the manager threshold does not require approval at all.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscountPolicy {
    pub manager_threshold: Decimal,
    pub admin_threshold: Decimal,
}

impl Default for DiscountPolicy {
    fn default() -> Self {
        Self { manager_threshold: Decimal::new(10, 0), admin_threshold: Decimal::new(20, 0) }
    }
}

impl DiscountPolicy {
    /// Maps a discount percentage to the approval tier governing it, or
    /// `None` when the discount is below the minimum governed threshold.
    pub fn classify(&self, discount_pct: Decimal) -> Option<RequiredApproval> {
        if discount_pct >= self.admin_threshold {
            Some(RequiredApproval { level: ApprovalLevel::Admin, threshold: self.admin_threshold })
        } else if discount_pct >= self.manager_threshold {
            Some(RequiredApproval {
                level: ApprovalLevel::Manager,
                threshold: self.manager_threshold,
            })
        } else {
            None
        }
    }
}
