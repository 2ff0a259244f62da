use fleet_core::domain::tenant::{TenantConfig, UserId};

pub const PRIVATE_ASSISTANT_NOTICE: &str =
    "🔒 This is a private assistant.\n\nWant your own? Ask the operator of this fleet for one.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: &'static str },
}

/// A tenant's session answers its owner and nobody else.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPolicy {
    owner_id: UserId,
}

impl AccessPolicy {
    pub fn for_tenant(tenant: &TenantConfig) -> Self {
        Self { owner_id: tenant.owner_id.clone() }
    }

    pub fn evaluate(&self, sender: &UserId) -> AccessDecision {
        if *sender == self.owner_id {
            AccessDecision::Allow
        } else {
            AccessDecision::Deny {
                reason_code: "not_tenant_owner",
                user_message: PRIVATE_ASSISTANT_NOTICE,
            }
        }
    }
}
