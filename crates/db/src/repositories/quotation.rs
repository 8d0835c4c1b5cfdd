use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};

use quotecrm_core::domain::approval::ApprovalId;
use quotecrm_core::domain::quotation::{Quotation, QuotationId};

use super::{QuotationRepository, RepositoryError};
use crate::repositories::approval::{
    decode_datetime, decode_decimal, get_optional_text, get_text,
};
use crate::DbPool;

pub struct SqlQuotationRepository {
    pool: DbPool,
}

impl SqlQuotationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_quotation(row: &SqliteRow) -> Result<Quotation, RepositoryError> {
    let is_pending_approval: i64 = sqlx::Row::try_get(row, "is_pending_approval")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(Quotation {
        id: QuotationId(get_text(row, "id")?),
        client_id: get_text(row, "client_id")?,
        sub_total: decode_decimal("sub_total", &get_text(row, "sub_total")?)?,
        discount_percentage: decode_decimal(
            "discount_percentage",
            &get_text(row, "discount_percentage")?,
        )?,
        discount_amount: decode_decimal("discount_amount", &get_text(row, "discount_amount")?)?,
        tax_rate: decode_decimal("tax_rate", &get_text(row, "tax_rate")?)?,
        tax_amount: decode_decimal("tax_amount", &get_text(row, "tax_amount")?)?,
        total_amount: decode_decimal("total_amount", &get_text(row, "total_amount")?)?,
        is_pending_approval: is_pending_approval != 0,
        pending_approval_id: get_optional_text(row, "pending_approval_id")?.map(ApprovalId),
        created_at: decode_datetime("created_at", &get_text(row, "created_at")?)?,
        updated_at: decode_datetime("updated_at", &get_text(row, "updated_at")?)?,
    })
}

pub(crate) async fn update_quotation(
    tx: &mut Transaction<'_, Sqlite>,
    quotation: &Quotation,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quotation
             (id, client_id, sub_total, discount_percentage, discount_amount, tax_rate,
              tax_amount, total_amount, is_pending_approval, pending_approval_id,
              created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             client_id = excluded.client_id,
             sub_total = excluded.sub_total,
             discount_percentage = excluded.discount_percentage,
             discount_amount = excluded.discount_amount,
             tax_rate = excluded.tax_rate,
             tax_amount = excluded.tax_amount,
             total_amount = excluded.total_amount,
             is_pending_approval = excluded.is_pending_approval,
             pending_approval_id = excluded.pending_approval_id,
             updated_at = excluded.updated_at",
    )
    .bind(&quotation.id.0)
    .bind(&quotation.client_id)
    .bind(quotation.sub_total.to_string())
    .bind(quotation.discount_percentage.to_string())
    .bind(quotation.discount_amount.to_string())
    .bind(quotation.tax_rate.to_string())
    .bind(quotation.tax_amount.to_string())
    .bind(quotation.total_amount.to_string())
    .bind(i64::from(quotation.is_pending_approval))
    .bind(quotation.pending_approval_id.as_ref().map(|id| id.0.as_str()))
    .bind(quotation.created_at.to_rfc3339())
    .bind(quotation.updated_at.to_rfc3339())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl QuotationRepository for SqlQuotationRepository {
    async fn find_by_id(&self, id: &QuotationId) -> Result<Option<Quotation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, client_id, sub_total, discount_percentage, discount_amount, tax_rate,
                    tax_amount, total_amount, is_pending_approval, pending_approval_id,
                    created_at, updated_at
             FROM quotation WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_quotation(r)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, quotation: Quotation) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        update_quotation(&mut tx, &quotation).await?;
        tx.commit().await?;
        Ok(())
    }
}
