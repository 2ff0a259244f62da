use std::sync::Arc;

use tracing::debug;

use fleet_core::domain::tenant::TenantConfig;
use fleet_core::errors::CoreError;
use fleet_db::TenantRepository;

/// Read-only view of the tenants the process should be serving.
#[derive(Clone)]
pub struct TenantRegistry {
    tenants: Arc<dyn TenantRepository>,
}

impl TenantRegistry {
    pub fn new(tenants: Arc<dyn TenantRepository>) -> Self {
        Self { tenants }
    }

    /// Tenants flagged active. Connection failures surface as `StoreUnavailable`,
    /// decode failures as `Data`.
    pub async fn list_active_tenants(&self) -> Result<Vec<TenantConfig>, CoreError> {
        let tenants = self.tenants.list_active().await.map_err(CoreError::from)?;
        debug!(
            event_name = "system.registry.listed",
            active_tenants = tenants.len(),
            "active tenants listed"
        );
        Ok(tenants)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use chrono::Utc;
    use secrecy::SecretString;

    use fleet_core::domain::tenant::{TenantConfig, TenantId, UserId};
    use fleet_db::{RepositoryError, TenantRepository};

    pub(crate) fn tenant(id: &str) -> TenantConfig {
        TenantConfig {
            id: TenantId(id.to_owned()),
            owner_id: UserId(format!("owner-{id}")),
            credential: SecretString::from(format!("token-{id}")),
            display_name: None,
            personality: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Tenant store whose every call fails like a dropped connection.
    pub(crate) struct UnavailableTenantRepository;

    fn unavailable() -> RepositoryError {
        RepositoryError::Database(sqlx::Error::PoolTimedOut)
    }

    /// Tenant store whose listing returns an unreadable value.
    pub(crate) struct CorruptTenantRepository;

    #[async_trait]
    impl TenantRepository for CorruptTenantRepository {
        async fn list_active(&self) -> Result<Vec<TenantConfig>, RepositoryError> {
            Err(RepositoryError::Decode("invalid value for `active`".to_owned()))
        }

        async fn list_all(&self) -> Result<Vec<TenantConfig>, RepositoryError> {
            self.list_active().await
        }

        async fn find_by_id(&self, _id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError> {
            Ok(None)
        }

        async fn insert(&self, _tenant: TenantConfig) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn set_active(&self, _id: &TenantId, _active: bool) -> Result<bool, RepositoryError> {
            Ok(false)
        }
    }

    #[async_trait]
    impl TenantRepository for UnavailableTenantRepository {
        async fn list_active(&self) -> Result<Vec<TenantConfig>, RepositoryError> {
            Err(unavailable())
        }

        async fn list_all(&self) -> Result<Vec<TenantConfig>, RepositoryError> {
            Err(unavailable())
        }

        async fn find_by_id(&self, _id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError> {
            Err(unavailable())
        }

        async fn insert(&self, _tenant: TenantConfig) -> Result<(), RepositoryError> {
            Err(unavailable())
        }

        async fn set_active(&self, _id: &TenantId, _active: bool) -> Result<bool, RepositoryError> {
            Err(unavailable())
        }
    }
}
