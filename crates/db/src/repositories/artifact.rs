use sqlx::{sqlite::SqliteRow, Row};

use fleet_core::domain::artifact::{ArtifactId, ArtifactKind, DocumentExtraction, StoredArtifact};
use fleet_core::domain::tenant::{TenantId, UserId};

use super::{format_timestamp, parse_timestamp, ArtifactRepository, RepositoryError};
use crate::DbPool;

const ARTIFACT_COLUMNS: &str = "id, tenant_id, user_id, external_handle, display_name, kind, \
     size, secondary_ref, extracted_json, created_at";

pub struct SqlArtifactRepository {
    pool: DbPool,
}

impl SqlArtifactRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ArtifactRepository for SqlArtifactRepository {
    async fn save(&self, artifact: StoredArtifact) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO artifacts (
                id,
                tenant_id,
                user_id,
                external_handle,
                display_name,
                kind,
                size,
                secondary_ref,
                extracted_json,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                secondary_ref = excluded.secondary_ref,
                extracted_json = excluded.extracted_json",
        )
        .bind(&artifact.id.0)
        .bind(&artifact.tenant_id.0)
        .bind(&artifact.user_id.0)
        .bind(&artifact.external_handle)
        .bind(&artifact.display_name)
        .bind(artifact.kind.as_str())
        .bind(artifact.size)
        .bind(&artifact.secondary_ref)
        .bind(artifact.extraction.encode())
        .bind(format_timestamp(&artifact.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<Vec<StoredArtifact>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ARTIFACT_COLUMNS}
             FROM artifacts
             WHERE tenant_id = ? AND user_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(&tenant_id.0)
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(artifact_from_row).collect()
    }

    async fn count_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM artifacts WHERE tenant_id = ? AND user_id = ?",
        )
        .bind(&tenant_id.0)
        .bind(&user_id.0)
        .fetch_one(&self.pool)
        .await?
        .try_get("count")?;

        u64::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("negative artifact count: {count}")))
    }

    async fn clear_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM artifacts WHERE tenant_id = ? AND user_id = ?")
            .bind(&tenant_id.0)
            .bind(&user_id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn set_secondary_ref(
        &self,
        id: &ArtifactId,
        secondary_ref: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE artifacts SET secondary_ref = ? WHERE id = ? AND secondary_ref IS NULL",
        )
        .bind(secondary_ref)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn artifact_from_row(row: SqliteRow) -> Result<StoredArtifact, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = ArtifactKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown artifact kind `{kind_raw}`")))?;
    let extracted_json = row.try_get::<Option<String>, _>("extracted_json")?;

    Ok(StoredArtifact {
        id: ArtifactId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        user_id: UserId(row.try_get("user_id")?),
        external_handle: row.try_get("external_handle")?,
        display_name: row.try_get("display_name")?,
        kind,
        size: row.try_get("size")?,
        secondary_ref: row.try_get("secondary_ref")?,
        extraction: DocumentExtraction::decode(extracted_json.as_deref()),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use fleet_core::domain::artifact::{ArtifactId, ArtifactKind, DocumentExtraction, StoredArtifact};
    use fleet_core::domain::tenant::{TenantId, UserId};

    use super::SqlArtifactRepository;
    use crate::repositories::test_support::{sample_tenant, setup_pool};
    use crate::repositories::tenant::SqlTenantRepository;
    use crate::repositories::{ArtifactRepository, TenantRepository};

    fn sample_artifact(id: &str, tenant: &str, user: &str) -> StoredArtifact {
        let mut amounts = BTreeMap::new();
        amounts.insert("wages".to_string(), "52000.00".parse().expect("decimal"));
        StoredArtifact {
            id: ArtifactId(id.to_string()),
            tenant_id: TenantId(tenant.to_string()),
            user_id: UserId(user.to_string()),
            external_handle: format!("file-{id}"),
            display_name: Some("w2.jpg".to_string()),
            kind: ArtifactKind::Photo,
            size: Some(2048),
            secondary_ref: None,
            extraction: DocumentExtraction {
                doc_type: "W-2".to_string(),
                payer_name: Some("Acme Corp".to_string()),
                tax_year: Some("2025".to_string()),
                amounts,
                summary: None,
                file_name: None,
            },
            created_at: Utc::now(),
        }
    }

    async fn repo() -> SqlArtifactRepository {
        let pool = setup_pool().await;
        let tenants = SqlTenantRepository::new(pool.clone());
        tenants.insert(sample_tenant("t-1")).await.expect("tenant");
        tenants.insert(sample_tenant("t-2")).await.expect("tenant");
        SqlArtifactRepository::new(pool)
    }

    #[tokio::test]
    async fn artifacts_round_trip_with_extraction_payload() {
        let repo = repo().await;
        let artifact = sample_artifact("a-1", "t-1", "u-1");
        repo.save(artifact.clone()).await.expect("save");

        let listed = repo
            .list_for_user(&TenantId("t-1".into()), &UserId("u-1".into()))
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].extraction, artifact.extraction);
        assert_eq!(listed[0].kind, ArtifactKind::Photo);
    }

    #[tokio::test]
    async fn counts_and_clears_are_scoped_per_tenant_and_user() {
        let repo = repo().await;
        repo.save(sample_artifact("a-1", "t-1", "u-1")).await.expect("save");
        repo.save(sample_artifact("a-2", "t-1", "u-1")).await.expect("save");
        repo.save(sample_artifact("a-3", "t-2", "u-1")).await.expect("save");

        let tenant = TenantId("t-1".into());
        let user = UserId("u-1".into());
        assert_eq!(repo.count_for_user(&tenant, &user).await.expect("count"), 2);
        assert_eq!(repo.clear_for_user(&tenant, &user).await.expect("clear"), 2);
        assert_eq!(repo.count_for_user(&tenant, &user).await.expect("count"), 0);
        assert_eq!(
            repo.count_for_user(&TenantId("t-2".into()), &user).await.expect("other tenant"),
            1
        );
    }

    #[tokio::test]
    async fn secondary_ref_is_backfilled_once() {
        let repo = repo().await;
        repo.save(sample_artifact("a-1", "t-1", "u-1")).await.expect("save");

        let id = ArtifactId("a-1".into());
        assert!(repo.set_secondary_ref(&id, "https://drive.example/1").await.expect("set"));
        assert!(!repo.set_secondary_ref(&id, "https://drive.example/2").await.expect("again"));

        let listed = repo
            .list_for_user(&TenantId("t-1".into()), &UserId("u-1".into()))
            .await
            .expect("list");
        assert_eq!(listed[0].secondary_ref.as_deref(), Some("https://drive.example/1"));
    }

    #[tokio::test]
    async fn malformed_extraction_payload_decodes_to_default() {
        let repo = repo().await;
        repo.save(sample_artifact("a-1", "t-1", "u-1")).await.expect("save");
        sqlx::query("UPDATE artifacts SET extracted_json = '{not json' WHERE id = 'a-1'")
            .execute(&repo.pool)
            .await
            .expect("corrupt payload");

        let listed = repo
            .list_for_user(&TenantId("t-1".into()), &UserId("u-1".into()))
            .await
            .expect("list");
        assert_eq!(listed[0].extraction, DocumentExtraction::default());
    }
}
