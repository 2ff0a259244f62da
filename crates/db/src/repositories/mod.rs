use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use thiserror::Error;
use tracing::warn;

use fleet_core::domain::action::SentActionRecord;
use fleet_core::domain::artifact::{ArtifactId, StoredArtifact};
use fleet_core::domain::event::{EventId, ExternalEvent};
use fleet_core::domain::tenant::{TenantConfig, TenantId, UserId};
use fleet_core::errors::CoreError;

pub mod artifact;
pub mod event;
pub mod memory;
pub mod sent_action;
pub mod tenant;

pub use artifact::SqlArtifactRepository;
pub use event::SqlExternalEventRepository;
pub use memory::{
    InMemoryArtifactRepository, InMemoryExternalEventRepository, InMemorySentActionRepository,
    InMemoryTenantRepository,
};
pub use sent_action::SqlSentActionRepository;
pub use tenant::SqlTenantRepository;

const SQLITE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for CoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Decode(message) => CoreError::Data(message),
            other => CoreError::StoreUnavailable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Active tenants, oldest first.
    async fn list_active(&self) -> Result<Vec<TenantConfig>, RepositoryError>;
    async fn list_all(&self) -> Result<Vec<TenantConfig>, RepositoryError>;
    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError>;
    async fn insert(&self, tenant: TenantConfig) -> Result<(), RepositoryError>;
    /// Returns false when no tenant has this id.
    async fn set_active(&self, id: &TenantId, active: bool) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ExternalEventRepository: Send + Sync {
    async fn insert(&self, event: ExternalEvent) -> Result<(), RepositoryError>;

    async fn find(
        &self,
        tenant_id: &TenantId,
        id: &EventId,
    ) -> Result<Option<ExternalEvent>, RepositoryError>;

    /// Events with `notified = false`, oldest first.
    async fn list_unnotified(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ExternalEvent>, RepositoryError>;

    /// Most recent events first.
    async fn list_recent(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ExternalEvent>, RepositoryError>;

    /// Flips `notified` from false to true. Only the caller that performed the
    /// transition gets `true`.
    async fn mark_notified(
        &self,
        tenant_id: &TenantId,
        id: &EventId,
    ) -> Result<bool, RepositoryError>;

    async fn mark_read(&self, tenant_id: &TenantId, id: &EventId)
        -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn save(&self, artifact: StoredArtifact) -> Result<(), RepositoryError>;

    async fn list_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<Vec<StoredArtifact>, RepositoryError>;

    async fn count_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<u64, RepositoryError>;

    /// Deletes every artifact of the user and returns how many were removed.
    async fn clear_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<u64, RepositoryError>;

    /// Sets the secondary-storage reference if none is recorded yet.
    async fn set_secondary_ref(
        &self,
        id: &ArtifactId,
        secondary_ref: &str,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait SentActionRepository: Send + Sync {
    async fn record(&self, record: SentActionRecord) -> Result<(), RepositoryError>;

    async fn list_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<Vec<SentActionRecord>, RepositoryError>;
}

pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

/// Accepts RFC 3339 and SQLite's `datetime('now')` form (taken as UTC).
pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(&value) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&value, SQLITE_DATETIME_FORMAT)
        .map(|timestamp| timestamp.and_utc())
        .map_err(|error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        })
}

/// Decodes a result set row by row. Rows that fail to decode are logged and
/// left out so one bad row cannot hide the rest.
pub(crate) fn decode_rows<T>(
    table: &'static str,
    rows: Vec<SqliteRow>,
    decode: fn(SqliteRow) -> Result<T, RepositoryError>,
) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.try_get::<String, _>("id").unwrap_or_default();
            match decode(row) {
                Ok(value) => Some(value),
                Err(error) => {
                    warn!(
                        event_name = "db.row_skipped",
                        table,
                        row_id = %id,
                        error = %error,
                        "skipping undecodable row"
                    );
                    None
                }
            }
        })
        .collect()
}

pub(crate) fn parse_flag(column: &str, value: i64) -> Result<bool, RepositoryError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected 0 or 1): {other}"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};
    use secrecy::SecretString;

    use fleet_core::domain::tenant::{TenantConfig, TenantId, UserId};

    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    pub fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }

    pub fn sample_tenant(id: &str) -> TenantConfig {
        TenantConfig {
            id: TenantId(id.to_string()),
            owner_id: UserId(format!("owner-{id}")),
            credential: SecretString::from(format!("token-{id}")),
            display_name: Some(format!("Assistant {id}")),
            personality: None,
            active: true,
            created_at: parse_ts("2026-03-01T12:00:00Z"),
        }
    }
}
