use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PERSONALITY: &str = "You are a helpful assistant.";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// End-user identifier as reported by the gateway. Only unique within a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant row as stored. Immutable for the lifetime of a running session.
#[derive(Clone, Debug)]
pub struct TenantConfig {
    pub id: TenantId,
    pub owner_id: UserId,
    pub credential: SecretString,
    pub display_name: Option<String>,
    pub personality: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl TenantConfig {
    pub fn personality_or_default(&self) -> &str {
        self.personality
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_PERSONALITY)
    }
}

/// Resolved identity of a gateway credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayIdentity {
    pub id: String,
    pub username: Option<String>,
    pub display_name: String,
}

/// Derives the per-tenant reply-to address from the gateway username:
/// `@Neatly_SF_bot` becomes `neatlysf@<domain>`.
pub fn derive_reply_address(username: Option<&str>, domain: &str) -> Option<String> {
    let username = username.map(str::trim).filter(|value| !value.is_empty())?;
    let local = username.to_lowercase().replace('@', "").replace("bot", "").replace('_', "");
    if local.is_empty() {
        return None;
    }
    let domain = domain.trim().trim_start_matches('@');
    Some(format!("{local}@{domain}"))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{derive_reply_address, TenantConfig, TenantId, UserId, DEFAULT_PERSONALITY};

    #[test]
    fn reply_address_strips_bot_suffix_and_underscores() {
        assert_eq!(
            derive_reply_address(Some("@Neatly_SF_bot"), "mail.example.com").as_deref(),
            Some("neatlysf@mail.example.com")
        );
        assert_eq!(
            derive_reply_address(Some("MaxBot"), "@example.com").as_deref(),
            Some("max@example.com")
        );
    }

    #[test]
    fn reply_address_is_absent_without_username() {
        assert_eq!(derive_reply_address(None, "example.com"), None);
        assert_eq!(derive_reply_address(Some("  "), "example.com"), None);
        assert_eq!(derive_reply_address(Some("bot"), "example.com"), None);
    }

    #[test]
    fn blank_personality_falls_back_to_default() {
        let tenant = TenantConfig {
            id: TenantId("t-1".to_owned()),
            owner_id: UserId("42".to_owned()),
            credential: "123:abc".to_owned().into(),
            display_name: None,
            personality: Some("   ".to_owned()),
            active: true,
            created_at: Utc::now(),
        };

        assert_eq!(tenant.personality_or_default(), DEFAULT_PERSONALITY);
    }
}
