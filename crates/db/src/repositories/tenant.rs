use secrecy::{ExposeSecret, SecretString};
use sqlx::{sqlite::SqliteRow, Row};

use fleet_core::domain::tenant::{TenantConfig, TenantId, UserId};

use super::{
    decode_rows, format_timestamp, parse_flag, parse_timestamp, RepositoryError, TenantRepository,
};
use crate::DbPool;

const TENANT_COLUMNS: &str =
    "id, owner_id, credential, display_name, personality, active, created_at";

pub struct SqlTenantRepository {
    pool: DbPool,
}

impl SqlTenantRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TenantRepository for SqlTenantRepository {
    async fn list_active(&self) -> Result<Vec<TenantConfig>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants WHERE active = 1 ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows("tenants", rows, tenant_from_row))
    }

    async fn list_all(&self) -> Result<Vec<TenantConfig>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_rows("tenants", rows, tenant_from_row))
    }

    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(tenant_from_row).transpose()
    }

    async fn insert(&self, tenant: TenantConfig) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO tenants (
                id,
                owner_id,
                credential,
                display_name,
                personality,
                active,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tenant.id.0)
        .bind(&tenant.owner_id.0)
        .bind(tenant.credential.expose_secret())
        .bind(&tenant.display_name)
        .bind(&tenant.personality)
        .bind(i64::from(tenant.active))
        .bind(format_timestamp(&tenant.created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                Err(RepositoryError::Conflict(format!(
                    "tenant `{}` or its gateway credential is already registered",
                    tenant.id
                )))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn set_active(&self, id: &TenantId, active: bool) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE tenants SET active = ? WHERE id = ?")
            .bind(i64::from(active))
            .bind(&id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn tenant_from_row(row: SqliteRow) -> Result<TenantConfig, RepositoryError> {
    Ok(TenantConfig {
        id: TenantId(row.try_get("id")?),
        owner_id: UserId(row.try_get("owner_id")?),
        credential: SecretString::from(row.try_get::<String, _>("credential")?),
        display_name: row.try_get("display_name")?,
        personality: row.try_get("personality")?,
        active: parse_flag("active", row.try_get("active")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use fleet_core::domain::tenant::TenantId;

    use super::SqlTenantRepository;
    use crate::repositories::test_support::{parse_ts, sample_tenant, setup_pool};
    use crate::repositories::{RepositoryError, TenantRepository};

    #[tokio::test]
    async fn list_active_skips_deactivated_tenants_and_keeps_creation_order() {
        let repo = SqlTenantRepository::new(setup_pool().await);
        let mut older = sample_tenant("t-older");
        older.created_at = parse_ts("2026-01-01T00:00:00Z");
        let newer = sample_tenant("t-newer");
        let mut inactive = sample_tenant("t-inactive");
        inactive.active = false;

        repo.insert(newer.clone()).await.expect("insert newer");
        repo.insert(older.clone()).await.expect("insert older");
        repo.insert(inactive).await.expect("insert inactive");

        let active = repo.list_active().await.expect("list active");
        let ids: Vec<&str> = active.iter().map(|tenant| tenant.id.0.as_str()).collect();
        assert_eq!(ids, vec!["t-older", "t-newer"]);
        assert_eq!(active[1].credential.expose_secret(), "token-t-newer");
        assert_eq!(repo.list_all().await.expect("list all").len(), 3);
    }

    #[tokio::test]
    async fn duplicate_credential_is_a_conflict() {
        let repo = SqlTenantRepository::new(setup_pool().await);
        repo.insert(sample_tenant("t-1")).await.expect("insert");

        let mut duplicate = sample_tenant("t-2");
        duplicate.credential = sample_tenant("t-1").credential;
        let error = repo.insert(duplicate).await.expect_err("duplicate credential");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn set_active_reports_unknown_ids() {
        let repo = SqlTenantRepository::new(setup_pool().await);
        repo.insert(sample_tenant("t-1")).await.expect("insert");

        assert!(repo.set_active(&TenantId("t-1".into()), false).await.expect("deactivate"));
        assert!(!repo.set_active(&TenantId("missing".into()), false).await.expect("missing"));

        let found = repo.find_by_id(&TenantId("t-1".into())).await.expect("find");
        assert_eq!(found.map(|tenant| tenant.active), Some(false));
        assert!(repo.list_active().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn rows_written_by_sqlite_itself_are_listed_and_garbage_rows_skipped() {
        let pool = setup_pool().await;
        let repo = SqlTenantRepository::new(pool.clone());
        repo.insert(sample_tenant("t-good")).await.expect("insert good");
        sqlx::query(
            "INSERT INTO tenants (id, owner_id, credential, created_at)
             VALUES ('t-sql', '42', 'tok-sql', datetime('now'))",
        )
        .execute(&pool)
        .await
        .expect("insert sqlite-dated row");
        sqlx::query(
            "INSERT INTO tenants (id, owner_id, credential, created_at)
             VALUES ('t-broken', '43', 'tok-broken', 'last tuesday')",
        )
        .execute(&pool)
        .await
        .expect("insert broken row");

        let active = repo.list_active().await.expect("list active");
        let mut ids: Vec<&str> = active.iter().map(|tenant| tenant.id.0.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["t-good", "t-sql"]);
        assert_eq!(repo.list_all().await.expect("list all").len(), 2);
    }
}
