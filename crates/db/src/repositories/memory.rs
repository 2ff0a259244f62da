use std::collections::HashMap;

use tokio::sync::RwLock;

use fleet_core::domain::action::SentActionRecord;
use fleet_core::domain::artifact::{ArtifactId, StoredArtifact};
use fleet_core::domain::event::{EventId, ExternalEvent};
use fleet_core::domain::tenant::{TenantConfig, TenantId, UserId};

use super::{
    ArtifactRepository, ExternalEventRepository, RepositoryError, SentActionRepository,
    TenantRepository,
};

#[derive(Default)]
pub struct InMemoryTenantRepository {
    tenants: RwLock<Vec<TenantConfig>>,
}

#[async_trait::async_trait]
impl TenantRepository for InMemoryTenantRepository {
    async fn list_active(&self) -> Result<Vec<TenantConfig>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.iter().filter(|tenant| tenant.active).cloned().collect())
    }

    async fn list_all(&self) -> Result<Vec<TenantConfig>, RepositoryError> {
        Ok(self.tenants.read().await.clone())
    }

    async fn find_by_id(&self, id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.iter().find(|tenant| &tenant.id == id).cloned())
    }

    async fn insert(&self, tenant: TenantConfig) -> Result<(), RepositoryError> {
        let mut tenants = self.tenants.write().await;
        if tenants.iter().any(|existing| existing.id == tenant.id) {
            return Err(RepositoryError::Conflict(format!(
                "tenant `{}` is already registered",
                tenant.id
            )));
        }
        tenants.push(tenant);
        Ok(())
    }

    async fn set_active(&self, id: &TenantId, active: bool) -> Result<bool, RepositoryError> {
        let mut tenants = self.tenants.write().await;
        match tenants.iter_mut().find(|tenant| &tenant.id == id) {
            Some(tenant) => {
                tenant.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryExternalEventRepository {
    events: RwLock<Vec<ExternalEvent>>,
}

#[async_trait::async_trait]
impl ExternalEventRepository for InMemoryExternalEventRepository {
    async fn insert(&self, event: ExternalEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn find(
        &self,
        tenant_id: &TenantId,
        id: &EventId,
    ) -> Result<Option<ExternalEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().find(|event| &event.tenant_id == tenant_id && &event.id == id).cloned())
    }

    async fn list_unnotified(
        &self,
        tenant_id: &TenantId,
    ) -> Result<Vec<ExternalEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut pending: Vec<ExternalEvent> = events
            .iter()
            .filter(|event| &event.tenant_id == tenant_id && !event.notified)
            .cloned()
            .collect();
        pending.sort_by(|left, right| {
            left.received_at.cmp(&right.received_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(pending)
    }

    async fn list_recent(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ExternalEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut recent: Vec<ExternalEvent> =
            events.iter().filter(|event| &event.tenant_id == tenant_id).cloned().collect();
        recent.sort_by(|left, right| {
            right.received_at.cmp(&left.received_at).then_with(|| right.id.cmp(&left.id))
        });
        recent.truncate(limit as usize);
        Ok(recent)
    }

    async fn mark_notified(
        &self,
        tenant_id: &TenantId,
        id: &EventId,
    ) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        match events
            .iter_mut()
            .find(|event| &event.tenant_id == tenant_id && &event.id == id && !event.notified)
        {
            Some(event) => {
                event.notified = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_read(
        &self,
        tenant_id: &TenantId,
        id: &EventId,
    ) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        match events
            .iter_mut()
            .find(|event| &event.tenant_id == tenant_id && &event.id == id && !event.read)
        {
            Some(event) => {
                event.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryArtifactRepository {
    artifacts: RwLock<Vec<StoredArtifact>>,
}

#[async_trait::async_trait]
impl ArtifactRepository for InMemoryArtifactRepository {
    async fn save(&self, artifact: StoredArtifact) -> Result<(), RepositoryError> {
        let mut artifacts = self.artifacts.write().await;
        match artifacts.iter_mut().find(|existing| existing.id == artifact.id) {
            Some(existing) => *existing = artifact,
            None => artifacts.push(artifact),
        }
        Ok(())
    }

    async fn list_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<Vec<StoredArtifact>, RepositoryError> {
        let artifacts = self.artifacts.read().await;
        Ok(artifacts
            .iter()
            .filter(|artifact| &artifact.tenant_id == tenant_id && &artifact.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn count_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<u64, RepositoryError> {
        Ok(self.list_for_user(tenant_id, user_id).await?.len() as u64)
    }

    async fn clear_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<u64, RepositoryError> {
        let mut artifacts = self.artifacts.write().await;
        let before = artifacts.len();
        artifacts
            .retain(|artifact| !(&artifact.tenant_id == tenant_id && &artifact.user_id == user_id));
        Ok((before - artifacts.len()) as u64)
    }

    async fn set_secondary_ref(
        &self,
        id: &ArtifactId,
        secondary_ref: &str,
    ) -> Result<bool, RepositoryError> {
        let mut artifacts = self.artifacts.write().await;
        match artifacts
            .iter_mut()
            .find(|artifact| &artifact.id == id && artifact.secondary_ref.is_none())
        {
            Some(artifact) => {
                artifact.secondary_ref = Some(secondary_ref.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemorySentActionRepository {
    records: RwLock<Vec<SentActionRecord>>,
}

#[async_trait::async_trait]
impl SentActionRepository for InMemorySentActionRepository {
    async fn record(&self, record: SentActionRecord) -> Result<(), RepositoryError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn list_for_user(
        &self,
        tenant_id: &TenantId,
        user_id: &UserId,
    ) -> Result<Vec<SentActionRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|record| &record.tenant_id == tenant_id && &record.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use fleet_core::domain::event::{EventId, ExternalEvent};
    use fleet_core::domain::tenant::TenantId;

    use super::{InMemoryExternalEventRepository, InMemoryTenantRepository};
    use crate::repositories::test_support::sample_tenant;
    use crate::repositories::{ExternalEventRepository, RepositoryError, TenantRepository};

    #[tokio::test]
    async fn in_memory_tenant_repo_rejects_duplicates_and_filters_inactive() {
        let repo = InMemoryTenantRepository::default();
        repo.insert(sample_tenant("t-1")).await.expect("insert");
        let mut inactive = sample_tenant("t-2");
        inactive.active = false;
        repo.insert(inactive).await.expect("insert");

        let duplicate = repo.insert(sample_tenant("t-1")).await;
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));
        assert_eq!(repo.list_active().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn in_memory_event_repo_flips_notified_once() {
        let repo = InMemoryExternalEventRepository::default();
        let tenant = TenantId("t-1".into());
        repo.insert(ExternalEvent {
            id: EventId("e-1".into()),
            tenant_id: tenant.clone(),
            sender: "alice@example.com".into(),
            subject: "Hello".into(),
            body_text: "Body".into(),
            body_html: None,
            received_at: Utc::now(),
            read: false,
            notified: false,
        })
        .await
        .expect("insert");

        let id = EventId("e-1".into());
        assert!(repo.mark_notified(&tenant, &id).await.expect("first"));
        assert!(!repo.mark_notified(&tenant, &id).await.expect("second"));
        assert!(!repo.mark_notified(&TenantId("t-2".into()), &id).await.expect("other tenant"));
    }
}
