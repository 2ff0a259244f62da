use sqlx::{sqlite::SqliteRow, Row};

use fleet_core::domain::event::{EventId, ExternalEvent};
use fleet_core::domain::tenant::TenantId;

use super::{
    decode_rows, format_timestamp, parse_flag, parse_timestamp, ExternalEventRepository,
    RepositoryError,
};
use crate::DbPool;

const EVENT_COLUMNS: &str =
    "id, tenant_id, sender, subject, body_text, body_html, received_at, read, notified";

pub struct SqlExternalEventRepository {
    pool: DbPool,
}

impl SqlExternalEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ExternalEventRepository for SqlExternalEventRepository {
    async fn insert(&self, event: ExternalEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO external_events (
                id,
                tenant_id,
                sender,
                subject,
                body_text,
                body_html,
                received_at,
                read,
                notified
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id.0)
        .bind(&event.tenant_id.0)
        .bind(&event.sender)
        .bind(&event.subject)
        .bind(&event.body_text)
        .bind(&event.body_html)
        .bind(format_timestamp(&event.received_at))
        .bind(i64::from(event.read))
        .bind(i64::from(event.notified))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(
        &self,
        tenant_id: &TenantId,
        id: &EventId,
    ) -> Result<Option<ExternalEvent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM external_events WHERE tenant_id = ? AND id = ?"
        ))
        .bind(&tenant_id.0)
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(event_from_row).transpose()
    }

    async fn list_unnotified(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ExternalEvent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM external_events
             WHERE tenant_id = ? AND notified = 0
             ORDER BY received_at ASC, id ASC"
        ))
        .bind(&tenant_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows("external_events", rows, event_from_row))
    }

    async fn list_recent(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ExternalEvent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS}
             FROM external_events
             WHERE tenant_id = ?
             ORDER BY received_at DESC, id DESC
             LIMIT ?"
        ))
        .bind(&tenant_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows("external_events", rows, event_from_row))
    }

    async fn mark_notified(
        &self,
        tenant_id: &TenantId,
        id: &EventId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE external_events
             SET notified = 1
             WHERE id = ? AND tenant_id = ? AND notified = 0",
        )
        .bind(&id.0)
        .bind(&tenant_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_read(
        &self,
        tenant_id: &TenantId,
        id: &EventId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE external_events
             SET read = 1
             WHERE id = ? AND tenant_id = ? AND read = 0",
        )
        .bind(&id.0)
        .bind(&tenant_id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn event_from_row(row: SqliteRow) -> Result<ExternalEvent, RepositoryError> {
    Ok(ExternalEvent {
        id: EventId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        sender: row.try_get("sender")?,
        subject: row.try_get("subject")?,
        body_text: row.try_get("body_text")?,
        body_html: row.try_get("body_html")?,
        received_at: parse_timestamp("received_at", row.try_get("received_at")?)?,
        read: parse_flag("read", row.try_get("read")?)?,
        notified: parse_flag("notified", row.try_get("notified")?)?,
    })
}
