use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use quotecrm_core::domain::user::{Role, User, UserId};

use super::{RepositoryError, UserDirectory};
use crate::repositories::approval::{decode_datetime, get_optional_text, get_text};
use crate::DbPool;

pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, user: &User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO app_user (id, role, is_active, deleted_at, reporting_manager_id)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 role = excluded.role,
                 is_active = excluded.is_active,
                 deleted_at = excluded.deleted_at,
                 reporting_manager_id = excluded.reporting_manager_id",
        )
        .bind(&user.id.0)
        .bind(user.role.as_str())
        .bind(i64::from(user.is_active))
        .bind(user.deleted_at.map(|dt| dt.to_rfc3339()))
        .bind(user.reporting_manager_id.as_ref().map(|id| id.0.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    let role_raw = get_text(row, "role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown role `{role_raw}`")))?;
    let is_active: i64 =
        row.try_get("is_active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let deleted_at = get_optional_text(row, "deleted_at")?
        .map(|raw| decode_datetime("deleted_at", &raw))
        .transpose()?;

    Ok(User {
        id: UserId(get_text(row, "id")?),
        role,
        is_active: is_active != 0,
        deleted_at,
        reporting_manager_id: get_optional_text(row, "reporting_manager_id")?.map(UserId),
    })
}

#[async_trait::async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, role, is_active, deleted_at, reporting_manager_id
             FROM app_user WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_user(r)?)),
            None => Ok(None),
        }
    }

    async fn find_first_active_by_role(
        &self,
        role: Role,
    ) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, role, is_active, deleted_at, reporting_manager_id
             FROM app_user
             WHERE role = ? AND is_active = 1 AND deleted_at IS NULL
             ORDER BY id ASC
             LIMIT 1",
        )
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_user(r)?)),
            None => Ok(None),
        }
    }
}
