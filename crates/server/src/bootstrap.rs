use std::sync::Arc;
use std::time::Duration;

use fleet_agent::{mailer_from_config, LanguageModels, RouterDeps};
use fleet_core::config::{AppConfig, ConfigError, LoadOptions};
use fleet_core::errors::{ActionExecutionError, CompletionError};
use fleet_core::ports::{NoopAccountLinker, NoopSecondaryStorage};
use fleet_db::repositories::{
    SqlArtifactRepository, SqlExternalEventRepository, SqlSentActionRepository,
    SqlTenantRepository,
};
use fleet_db::{connect_with_settings, migrations, DbPool};
use fleet_telegram::{BotApiSettings, ReconnectPolicy, TelegramGatewayFactory};
use thiserror::Error;
use tracing::info;

use crate::registry::TenantRegistry;
use crate::session::{SessionFactory, SessionSettings};
use crate::supervisor::SessionSupervisor;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub supervisor: Arc<SessionSupervisor>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("language model client setup failed: {0}")]
    Llm(#[source] CompletionError),
    #[error("mail client setup failed: {0}")]
    Mail(#[source] ActionExecutionError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let models = LanguageModels::from_config(&config.llm).map_err(BootstrapError::Llm)?;
    let mailer = mailer_from_config(&config.mail).map_err(BootstrapError::Mail)?;
    let deps = RouterDeps {
        llm: models.chat,
        extractor: models.vision,
        mailer,
        storage: Arc::new(NoopSecondaryStorage),
        linker: Arc::new(NoopAccountLinker),
        artifacts: Arc::new(SqlArtifactRepository::new(db_pool.clone())),
        events: Arc::new(SqlExternalEventRepository::new(db_pool.clone())),
        sent_actions: Arc::new(SqlSentActionRepository::new(db_pool.clone())),
    };

    let gateways = TelegramGatewayFactory::new(BotApiSettings {
        api_base: config.telegram.api_base.clone(),
        poll_timeout_secs: config.telegram.poll_timeout_secs,
    });
    let sessions = SessionFactory::new(
        Arc::new(gateways),
        deps,
        SessionSettings {
            address_domain: config.mail.address_domain.clone(),
            default_sender: config.mail.from_address.clone(),
            history_limit: config.runtime.history_limit,
            notifier_interval: Duration::from_secs(config.runtime.notifier_interval_secs.max(1)),
            reconnect_policy: ReconnectPolicy::default(),
        },
    );
    let registry = TenantRegistry::new(Arc::new(SqlTenantRepository::new(db_pool.clone())));
    let supervisor = Arc::new(SessionSupervisor::new(registry, Arc::new(sessions)));

    info!(
        event_name = "system.bootstrap.ready",
        mail_enabled = config.mail_enabled(),
        llm_fallback = config.llm.fallback.is_some(),
        "session supervisor ready"
    );

    Ok(Application { config, db_pool, supervisor })
}

#[cfg(test)]
mod tests {
    use fleet_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_applies_schema_and_starts_with_no_sessions() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with defaults");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('tenants', 'external_events', 'artifacts', 'sent_actions')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 4);

        let report = app.supervisor.reconcile().await.expect("reconcile on empty store");
        assert!(report.started.is_empty());
        assert_eq!(app.supervisor.running_count(), 0);

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_rejects_an_unreachable_database() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite:///nonexistent-dir/fleet.db".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
    }
}
