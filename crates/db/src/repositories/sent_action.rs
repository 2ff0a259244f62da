use sqlx::{sqlite::SqliteRow, Row};

use fleet_core::domain::action::{SentActionId, SentActionRecord};
use fleet_core::domain::event::EventId;
use fleet_core::domain::tenant::{TenantId, UserId};

use super::{format_timestamp, parse_timestamp, RepositoryError, SentActionRepository};
use crate::DbPool;

pub struct SqlSentActionRepository {
    pool: DbPool,
}

impl SqlSentActionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SentActionRepository for SqlSentActionRepository {
    async fn record(&self, record: SentActionRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO sent_actions (
                id,
                tenant_id,
                user_id,
                target,
                subject,
                body,
                in_reply_to,
                sent_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.tenant_id.0)
        .bind(&record.user_id.0)
        .bind(&record.target)
        .bind(&record.subject)
        .bind(&record.body)
        .bind(record.in_reply_to.as_ref().map(|id| id.0.as_str()))
        .bind(format_timestamp(&record.sent_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<Vec<SentActionRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, user_id, target, subject, body, in_reply_to, sent_at
             FROM sent_actions
             WHERE tenant_id = ? AND user_id = ?
             ORDER BY sent_at ASC, id ASC",
        )
        .bind(&tenant_id.0)
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(record_from_row).collect()
    }
}

fn record_from_row(row: SqliteRow) -> Result<SentActionRecord, RepositoryError> {
    Ok(SentActionRecord {
        id: SentActionId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        user_id: UserId(row.try_get("user_id")?),
        target: row.try_get("target")?,
        subject: row.try_get("subject")?,
        body: row.try_get("body")?,
        in_reply_to: row.try_get::<Option<String>, _>("in_reply_to")?.map(EventId),
        sent_at: parse_timestamp("sent_at", row.try_get("sent_at")?)?,
    })
}
