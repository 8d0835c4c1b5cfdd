use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotationId(pub String);

/// The slice of the quotation aggregate the approval workflow reads and
/// mutates: discount, derived totals, and the approval lock.
///
/// While `is_pending_approval` is set the quotation must not take new
/// approval requests; `pending_approval_id` points at the open request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quotation {
    pub id: QuotationId,
    pub client_id: String,
    pub sub_total: Decimal,
    pub discount_percentage: Decimal,
    pub discount_amount: Decimal,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub is_pending_approval: bool,
    pub pending_approval_id: Option<ApprovalId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quotation {
    /// Sets the discount percentage and recomputes the derived amounts.
    /// Tax applies to the post-discount base.
    pub fn apply_discount(&mut self, discount_pct: Decimal) {
        self.discount_percentage = discount_pct;
        self.recompute_totals();
    }

    /// Drives the discount back to zero. Rejection policy: the prior value is
    /// not restored.
    pub fn clear_discount(&mut self) {
        self.apply_discount(Decimal::ZERO);
    }

    pub fn recompute_totals(&mut self) {
        let hundred = Decimal::new(100, 0);
        self.discount_amount = (self.sub_total * self.discount_percentage / hundred).round_dp(2);
        let taxable = self.sub_total - self.discount_amount;
        self.tax_amount = (taxable * self.tax_rate / hundred).round_dp(2);
        self.total_amount = taxable + self.tax_amount;
    }

    pub fn lock_for_approval(&mut self, approval_id: ApprovalId) {
        self.is_pending_approval = true;
        self.pending_approval_id = Some(approval_id);
    }

    pub fn unlock_from_approval(&mut self) {
        self.is_pending_approval = false;
        self.pending_approval_id = None;
    }

    pub fn is_locked(&self) -> bool {
        self.is_pending_approval
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::domain::approval::ApprovalId;

    use super::{Quotation, QuotationId};

    fn quotation(sub_total: Decimal, tax_rate: Decimal) -> Quotation {
        let now = Utc::now();
        let mut quotation = Quotation {
            id: QuotationId("Q-1".to_string()),
            client_id: "C-1".to_string(),
            sub_total,
            discount_percentage: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            tax_rate,
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

    #[test]
    fn fifteen_percent_discount_on_one_thousand_is_one_fifty() {
        let mut quotation = quotation(Decimal::new(1000, 0), Decimal::ZERO);
        quotation.apply_discount(Decimal::new(15, 0));

        assert_eq!(quotation.discount_amount, Decimal::new(150, 0));
        assert_eq!(quotation.total_amount, Decimal::new(850, 0));
    }

    #[test]
    fn tax_is_recomputed_on_the_post_discount_base() {
        let mut quotation = quotation(Decimal::new(1000, 0), Decimal::new(10, 0));
        quotation.apply_discount(Decimal::new(15, 0));

        // taxable 850, tax 85, total 935
        assert_eq!(quotation.tax_amount, Decimal::new(85, 0));
        assert_eq!(quotation.total_amount, Decimal::new(935, 0));
    }

    #[test]
    fn clear_discount_zeroes_both_percentage_and_amount() {
        let mut quotation = quotation(Decimal::new(1000, 0), Decimal::new(10, 0));
        quotation.apply_discount(Decimal::new(25, 0));
        quotation.clear_discount();

        assert_eq!(quotation.discount_percentage, Decimal::ZERO);
        assert_eq!(quotation.discount_amount, Decimal::ZERO);
        assert_eq!(quotation.tax_amount, Decimal::new(100, 0));
        assert_eq!(quotation.total_amount, Decimal::new(1100, 0));
    }

    #[test]
    fn lock_and_unlock_track_the_pending_request() {
        let mut quotation = quotation(Decimal::new(500, 0), Decimal::ZERO);
        assert!(!quotation.is_locked());

        quotation.lock_for_approval(ApprovalId("APR-1".to_string()));
        assert!(quotation.is_locked());
        assert_eq!(quotation.pending_approval_id, Some(ApprovalId("APR-1".to_string())));

        quotation.unlock_from_approval();
        assert!(!quotation.is_locked());
        assert_eq!(quotation.pending_approval_id, None);
    }

    #[test]
    fn fractional_amounts_round_to_cents() {
        let mut quotation = quotation(Decimal::new(99_99, 2), Decimal::new(825, 2));
        quotation.apply_discount(Decimal::new(125, 1));

        // 12.5% of 99.99 = 12.49875 -> 12.50
        assert_eq!(quotation.discount_amount, Decimal::new(12_50, 2));
        // taxable 87.49, 8.25% tax = 7.218... -> 7.22
        assert_eq!(quotation.tax_amount, Decimal::new(7_22, 2));
        assert_eq!(quotation.total_amount, Decimal::new(94_71, 2));
    }
}
