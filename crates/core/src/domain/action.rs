use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::EventId;
use crate::domain::tenant::{TenantId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SentActionId(pub String);

impl fmt::Display for SentActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A side-effecting email send that needs explicit confirmation before it runs.
///
/// This is also the argument schema of the `propose_email` model tool, so
/// deserialization doubles as validation of model output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<EventId>,
}

impl ActionProposal {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self { to: to.into(), subject: subject.into(), body: body.into(), in_reply_to: None }
    }

    pub fn replying_to(mut self, event_id: EventId) -> Self {
        self.in_reply_to = Some(event_id);
        self
    }

    /// A proposal needs a plausible address and a non-empty body.
    pub fn is_well_formed(&self) -> bool {
        let to = self.to.trim();
        let plausible_address = to
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
            .unwrap_or(false);
        plausible_address && !to.contains(char::is_whitespace) && !self.body.trim().is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingAction {
    pub proposal: ActionProposal,
    pub proposed_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(proposal: ActionProposal) -> Self {
        Self { proposal, proposed_at: Utc::now() }
    }
}

/// Write-once audit row for an executed action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentActionRecord {
    pub id: SentActionId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub target: String,
    pub subject: String,
    pub body: String,
    pub in_reply_to: Option<EventId>,
    pub sent_at: DateTime<Utc>,
}

impl SentActionRecord {
    pub fn from_proposal(tenant_id: TenantId, user_id: UserId, proposal: &ActionProposal) -> Self {
        Self {
            id: SentActionId(uuid::Uuid::new_v4().to_string()),
            tenant_id,
            user_id,
            target: proposal.to.clone(),
            subject: proposal.subject.clone(),
            body: proposal.body.clone(),
            in_reply_to: proposal.in_reply_to.clone(),
            sent_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ActionProposal;

    #[test]
    fn tool_arguments_deserialize_without_reply_reference() {
        let proposal: ActionProposal = serde_json::from_str(
            r#"{"to":"bob@example.com","subject":"Hello","body":"hi bob"}"#,
        )
        .expect("valid tool arguments");

        assert_eq!(proposal, ActionProposal::new("bob@example.com", "Hello", "hi bob"));
        assert!(proposal.is_well_formed());
    }

    #[test]
    fn tool_arguments_missing_fields_are_rejected() {
        let result = serde_json::from_str::<ActionProposal>(r#"{"to":"bob@example.com"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn malformed_addresses_are_not_well_formed() {
        assert!(!ActionProposal::new("bob", "s", "b").is_well_formed());
        assert!(!ActionProposal::new("bob@localhost", "s", "b").is_well_formed());
        assert!(!ActionProposal::new("bob@example.com", "s", "  ").is_well_formed());
    }
}
