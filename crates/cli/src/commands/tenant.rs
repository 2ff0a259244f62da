use chrono::Utc;
use fleet_core::domain::tenant::{TenantConfig, TenantId, UserId};
use fleet_db::repositories::SqlTenantRepository;
use fleet_db::{RepositoryError, TenantRepository};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use uuid::Uuid;

use crate::commands::{with_migrated_store, CommandResult, StepFailure};

#[derive(Debug, Clone)]
pub struct NewTenant {
    pub id: Option<String>,
    pub owner: String,
    pub token: String,
    pub display_name: Option<String>,
    pub personality: Option<String>,
}

fn store_failure(error: RepositoryError) -> StepFailure {
    match error {
        RepositoryError::Conflict(message) => ("conflict", message, 6),
        other => ("store", other.to_string(), 4),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub fn add(request: NewTenant) -> CommandResult {
    let owner = request.owner.trim().to_string();
    let token = request.token.trim().to_string();
    if owner.is_empty() || token.is_empty() {
        return CommandResult::failure(
            "tenant.add",
            "invalid_input",
            "--owner and --token must not be empty",
            2,
        );
    }

    let tenant = TenantConfig {
        id: TenantId(non_blank(request.id).unwrap_or_else(|| Uuid::new_v4().simple().to_string())),
        owner_id: UserId(owner),
        credential: SecretString::from(token),
        display_name: non_blank(request.display_name),
        personality: non_blank(request.personality),
        active: true,
        created_at: Utc::now(),
    };
    let tenant_id = tenant.id.clone();

    let result = with_migrated_store("tenant.add", |pool| async move {
        SqlTenantRepository::new(pool).insert(tenant).await.map_err(store_failure)
    });

    match result {
        Ok(()) => CommandResult::success_with_data(
            "tenant.add",
            format!("registered tenant `{tenant_id}`"),
            json!({ "tenant_id": tenant_id.0 }),
        ),
        Err(failure) => failure,
    }
}

pub fn list() -> CommandResult {
    let result = with_migrated_store("tenant.list", |pool| async move {
        SqlTenantRepository::new(pool).list_all().await.map_err(store_failure)
    });

    match result {
        Ok(tenants) => {
            let active = tenants.iter().filter(|tenant| tenant.active).count();
            let rows = tenants.iter().map(tenant_row).collect::<Vec<_>>();
            CommandResult::success_with_data(
                "tenant.list",
                format!("{} tenants registered, {active} active", tenants.len()),
                json!({ "tenants": rows }),
            )
        }
        Err(failure) => failure,
    }
}

pub fn deactivate(id: &str) -> CommandResult {
    let tenant_id = TenantId(id.trim().to_string());
    let lookup = tenant_id.clone();
    let result = with_migrated_store("tenant.deactivate", |pool| async move {
        SqlTenantRepository::new(pool).set_active(&lookup, false).await.map_err(store_failure)
    });

    match result {
        Ok(true) => CommandResult::success(
            "tenant.deactivate",
            format!("tenant `{tenant_id}` deactivated; a running session keeps serving until restart"),
        ),
        Ok(false) => CommandResult::failure(
            "tenant.deactivate",
            "not_found",
            format!("no tenant with id `{tenant_id}`"),
            7,
        ),
        Err(failure) => failure,
    }
}

fn tenant_row(tenant: &TenantConfig) -> serde_json::Value {
    json!({
        "id": tenant.id.0,
        "owner_id": tenant.owner_id.0,
        "display_name": tenant.display_name,
        "active": tenant.active,
        "credential": redact_credential(tenant.credential.expose_secret()),
        "created_at": tenant.created_at.to_rfc3339(),
    })
}

/// Keeps the bot id prefix of a `<id>:<secret>` token and masks the rest.
pub fn redact_credential(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once(':') {
        return format!("{prefix}:***");
    }

    "<redacted>".to_string()
}
