use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use quotecrm_core::domain::approval::{
    ApprovalId, ApprovalRequest, ApprovalStatus, ApproverScope,
};
use quotecrm_core::domain::quotation::{Quotation, QuotationId};
use quotecrm_core::domain::user::{Role, UserId};
use quotecrm_core::policy::ApprovalLevel;

use super::{ApprovalRepository, RepositoryError};
use crate::repositories::quotation::update_quotation;
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn approval_status_as_str(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Pending => "pending",
        ApprovalStatus::Approved => "approved",
        ApprovalStatus::Rejected => "rejected",
    }
}

fn parse_status(raw: &str) -> Result<ApprovalStatus, RepositoryError> {
    match raw {
        "pending" => Ok(ApprovalStatus::Pending),
        "approved" => Ok(ApprovalStatus::Approved),
        "rejected" => Ok(ApprovalStatus::Rejected),
        other => Err(RepositoryError::Decode(format!("unknown approval status `{other}`"))),
    }
}

pub(crate) fn decode_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    raw.parse()
        .map_err(|_| RepositoryError::Decode(format!("invalid decimal in `{column}`: `{raw}`")))
}

pub(crate) fn decode_datetime(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{raw}`")))
}

fn decode_optional_datetime(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| decode_datetime(column, &value)).transpose()
}

pub(crate) fn get_text(row: &SqliteRow, column: &str) -> Result<String, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn get_optional_text(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<String>, RepositoryError> {
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn decode_scope(
    approver_user_id: Option<String>,
    approver_role: Option<String>,
) -> Result<ApproverScope, RepositoryError> {
    match (approver_user_id, approver_role) {
        (Some(user_id), _) => Ok(ApproverScope::Specific { user_id: UserId(user_id) }),
        (None, Some(role)) => {
            let role = Role::parse(&role).ok_or_else(|| {
                RepositoryError::Decode(format!("unknown approver role `{role}`"))
            })?;
            Ok(ApproverScope::AnyWithRole { role })
        }
        (None, None) => Err(RepositoryError::Decode(
            "approval row has neither approver_user_id nor approver_role".to_string(),
        )),
    }
}

fn scope_columns(scope: &ApproverScope) -> (Option<&str>, Option<&str>) {
    match scope {
        ApproverScope::Specific { user_id } => (Some(user_id.0.as_str()), None),
        ApproverScope::AnyWithRole { role } => (None, Some(role.as_str())),
    }
}

fn row_to_approval(row: &SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let status = parse_status(&get_text(row, "status")?)?;
    let level_raw = get_text(row, "approval_level")?;
    let approval_level = ApprovalLevel::parse(&level_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown approval level `{level_raw}`"))
    })?;
    let approver =
        decode_scope(get_optional_text(row, "approver_user_id")?, get_optional_text(row, "approver_role")?)?;
    let escalated_to_admin: i64 =
        row.try_get("escalated_to_admin").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ApprovalRequest {
        id: ApprovalId(get_text(row, "id")?),
        quotation_id: QuotationId(get_text(row, "quotation_id")?),
        requested_by: UserId(get_text(row, "requested_by")?),
        approver,
        status,
        approval_level,
        discount_percentage: decode_decimal(
            "discount_percentage",
            &get_text(row, "discount_percentage")?,
        )?,
        threshold: decode_decimal("threshold", &get_text(row, "threshold")?)?,
        reason: get_text(row, "reason")?,
        comments: get_optional_text(row, "comments")?,
        decision_reason: get_optional_text(row, "decision_reason")?,
        decision_comments: get_optional_text(row, "decision_comments")?,
        escalated_to_admin: escalated_to_admin != 0,
        resubmitted_from: get_optional_text(row, "resubmitted_from")?.map(ApprovalId),
        request_date: decode_datetime("request_date", &get_text(row, "request_date")?)?,
        approval_date: decode_optional_datetime(
            "approval_date",
            get_optional_text(row, "approval_date")?,
        )?,
        rejection_date: decode_optional_datetime(
            "rejection_date",
            get_optional_text(row, "rejection_date")?,
        )?,
        created_at: decode_datetime("created_at", &get_text(row, "created_at")?)?,
        updated_at: decode_datetime("updated_at", &get_text(row, "updated_at")?)?,
    })
}

const SELECT_COLUMNS: &str = "id, quotation_id, requested_by, approver_user_id, approver_role,
        status, approval_level, discount_percentage, threshold, reason, comments,
        decision_reason, decision_comments, escalated_to_admin, resubmitted_from,
        request_date, approval_date, rejection_date, created_at, updated_at";

fn map_constraint(error: sqlx::Error) -> RepositoryError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Constraint(db.message().to_string())
        }
        _ => RepositoryError::Database(error),
    }
}

async fn upsert_approval(
    tx: &mut Transaction<'_, Sqlite>,
    approval: &ApprovalRequest,
) -> Result<(), RepositoryError> {
    let (approver_user_id, approver_role) = scope_columns(&approval.approver);

    sqlx::query(
        "INSERT INTO approval_request
             (id, quotation_id, requested_by, approver_user_id, approver_role, status,
              approval_level, discount_percentage, threshold, reason, comments,
              decision_reason, decision_comments, escalated_to_admin, resubmitted_from,
              request_date, approval_date, rejection_date, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             approver_user_id = excluded.approver_user_id,
             approver_role = excluded.approver_role,
             status = excluded.status,
             decision_reason = excluded.decision_reason,
             decision_comments = excluded.decision_comments,
             escalated_to_admin = excluded.escalated_to_admin,
             approval_date = excluded.approval_date,
             rejection_date = excluded.rejection_date,
             updated_at = excluded.updated_at",
    )
    .bind(&approval.id.0)
    .bind(&approval.quotation_id.0)
    .bind(&approval.requested_by.0)
    .bind(approver_user_id)
    .bind(approver_role)
    .bind(approval_status_as_str(approval.status))
    .bind(approval.approval_level.as_str())
    .bind(approval.discount_percentage.to_string())
    .bind(approval.threshold.to_string())
    .bind(&approval.reason)
    .bind(&approval.comments)
    .bind(&approval.decision_reason)
    .bind(&approval.decision_comments)
    .bind(i64::from(approval.escalated_to_admin))
    .bind(approval.resubmitted_from.as_ref().map(|id| id.0.as_str()))
    .bind(approval.request_date.to_rfc3339())
    .bind(approval.approval_date.map(|dt| dt.to_rfc3339()))
    .bind(approval.rejection_date.map(|dt| dt.to_rfc3339()))
    .bind(approval.created_at.to_rfc3339())
    .bind(approval.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(map_constraint)?;

    Ok(())
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(
        &self,
        id: &ApprovalId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM approval_request WHERE id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_approval(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_quotation_id(
        &self,
        quotation_id: &QuotationId,
    ) -> Result<Vec<ApprovalRequest>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM approval_request
             WHERE quotation_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(&quotation_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_approval).collect()
    }

    async fn save(&self, approval: ApprovalRequest) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        upsert_approval(&mut tx, &approval).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_transition(
        &self,
        approval: &ApprovalRequest,
        quotation: &Quotation,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        upsert_approval(&mut tx, approval).await?;
        update_quotation(&mut tx, quotation).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_transitions(
        &self,
        transitions: &[(ApprovalRequest, Quotation)],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        for (approval, quotation) in transitions {
            upsert_approval(&mut tx, approval).await?;
            update_quotation(&mut tx, quotation).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use quotecrm_core::domain::approval::{
        ApprovalId, ApprovalRequest, ApprovalStatus, ApproverScope, NewApprovalRequest,
    };
    use quotecrm_core::domain::quotation::{Quotation, QuotationId};
    use quotecrm_core::domain::user::{Role, UserId};
    use quotecrm_core::policy::ApprovalLevel;

    use super::SqlApprovalRepository;
    use crate::repositories::{
        ApprovalRepository, QuotationRepository, RepositoryError, SqlQuotationRepository,
    };
    use crate::connection::memory_config;
    use crate::{connect, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect(&memory_config()).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_quotation(id: &str) -> Quotation {
        let now = Utc::now();
        let mut quotation = Quotation {
            id: QuotationId(id.to_string()),
            client_id: "C-1".to_string(),
            sub_total: Decimal::new(1000, 0),
            discount_percentage: Decimal::new(12, 0),
            discount_amount: Decimal::ZERO,
            tax_rate: Decimal::new(10, 0),
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

    /// Insert a parent quotation so the FK constraint is satisfied.
    async fn insert_quotation(pool: &sqlx::SqlitePool, id: &str) {
        let repo = SqlQuotationRepository::new(pool.clone());
        repo.save(sample_quotation(id)).await.expect("insert parent quotation");
    }

    fn sample_approval(quotation_id: &str) -> ApprovalRequest {
        ApprovalRequest::new_pending(
            NewApprovalRequest {
                quotation_id: QuotationId(quotation_id.to_string()),
                requested_by: UserId("u-rep".to_string()),
                approver: ApproverScope::AnyWithRole { role: Role::Manager },
                approval_level: ApprovalLevel::Manager,
                discount_percentage: Decimal::new(12, 0),
                threshold: Decimal::new(10, 0),
                reason: "discount exceeds threshold".to_string(),
                comments: Some("loyal customer".to_string()),
                resubmitted_from: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn save_and_find_round_trips_every_field() {
        let pool = setup().await;
        insert_quotation(&pool, "Q-1").await;

        let repo = SqlApprovalRepository::new(pool);
        let approval = sample_approval("Q-1");

        repo.save(approval.clone()).await.expect("save");
        let found = repo.find_by_id(&approval.id).await.expect("find").expect("exists");

        assert_eq!(found.quotation_id, approval.quotation_id);
        assert_eq!(found.approver, ApproverScope::AnyWithRole { role: Role::Manager });
        assert_eq!(found.status, ApprovalStatus::Pending);
        assert_eq!(found.discount_percentage, Decimal::new(12, 0));
        assert_eq!(found.threshold, Decimal::new(10, 0));
        assert_eq!(found.comments.as_deref(), Some("loyal customer"));
        assert!(!found.escalated_to_admin);
    }

    #[tokio::test]
    async fn specific_approver_scope_round_trips() {
        let pool = setup().await;
        insert_quotation(&pool, "Q-1").await;

        let repo = SqlApprovalRepository::new(pool);
        let mut approval = sample_approval("Q-1");
        approval.approver = ApproverScope::Specific { user_id: UserId("u-admin".to_string()) };
        approval.approval_level = ApprovalLevel::Admin;

        repo.save(approval.clone()).await.expect("save");
        let found = repo.find_by_id(&approval.id).await.expect("find").expect("exists");

        assert_eq!(
            found.approver,
            ApproverScope::Specific { user_id: UserId("u-admin".to_string()) }
        );
        assert_eq!(found.approval_level, ApprovalLevel::Admin);
    }

    #[tokio::test]
    async fn find_by_quotation_id_returns_history_newest_first() {
        let pool = setup().await;
        insert_quotation(&pool, "Q-1").await;
        insert_quotation(&pool, "Q-2").await;

        let repo = SqlApprovalRepository::new(pool);

        let mut first = sample_approval("Q-1");
        first.status = ApprovalStatus::Rejected;
        first.created_at = Utc::now() - chrono::Duration::hours(1);
        repo.save(first.clone()).await.expect("save first");

        let mut second = sample_approval("Q-1");
        second.resubmitted_from = Some(first.id.clone());
        repo.save(second.clone()).await.expect("save second");

        repo.save(sample_approval("Q-2")).await.expect("save other quotation");

        let history =
            repo.find_by_quotation_id(&QuotationId("Q-1".to_string())).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, second.id);
        assert_eq!(history[0].resubmitted_from, Some(first.id));
    }

    #[tokio::test]
    async fn commit_transition_persists_both_aggregates() {
        let pool = setup().await;
        insert_quotation(&pool, "Q-1").await;

        let repo = SqlApprovalRepository::new(pool.clone());
        let approval = sample_approval("Q-1");

        let mut quotation = sample_quotation("Q-1");
        quotation.lock_for_approval(approval.id.clone());

        repo.commit_transition(&approval, &quotation).await.expect("commit");

        let stored_quotation = SqlQuotationRepository::new(pool)
            .find_by_id(&quotation.id)
            .await
            .expect("find quotation")
            .expect("exists");
        assert!(stored_quotation.is_pending_approval);
        assert_eq!(stored_quotation.pending_approval_id, Some(approval.id.clone()));

        let stored_approval =
            repo.find_by_id(&approval.id).await.expect("find approval").expect("exists");
        assert_eq!(stored_approval.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn second_pending_request_for_same_quotation_is_a_constraint_error() {
        let pool = setup().await;
        insert_quotation(&pool, "Q-1").await;

        let repo = SqlApprovalRepository::new(pool.clone());

        let first = sample_approval("Q-1");
        let mut quotation = sample_quotation("Q-1");
        quotation.lock_for_approval(first.id.clone());
        repo.commit_transition(&first, &quotation).await.expect("first commit");

        let second = sample_approval("Q-1");
        let error = repo
            .commit_transition(&second, &quotation)
            .await
            .expect_err("second pending request must be rejected");
        assert!(matches!(error, RepositoryError::Constraint(_)));

        // Nothing from the failed transaction should be visible.
        let history =
            repo.find_by_quotation_id(&QuotationId("Q-1".to_string())).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, first.id);
    }

    #[tokio::test]
    async fn upsert_updates_decision_fields() {
        let pool = setup().await;
        insert_quotation(&pool, "Q-1").await;

        let repo = SqlApprovalRepository::new(pool);
        let mut approval = sample_approval("Q-1");
        repo.save(approval.clone()).await.expect("save pending");

        approval
            .approve("approved, strategic account".to_string(), None, Utc::now())
            .expect("approve");
        repo.save(approval.clone()).await.expect("upsert decision");

        let found = repo.find_by_id(&approval.id).await.expect("find").expect("exists");
        assert_eq!(found.status, ApprovalStatus::Approved);
        assert_eq!(found.decision_reason.as_deref(), Some("approved, strategic account"));
        assert!(found.approval_date.is_some());
        assert_eq!(found.reason, "discount exceeds threshold");
    }

    #[tokio::test]
    async fn unknown_id_returns_none() {
        let pool = setup().await;
        let repo = SqlApprovalRepository::new(pool);

        let found =
            repo.find_by_id(&ApprovalId("missing".to_string())).await.expect("find missing");
        assert!(found.is_none());
    }
}
