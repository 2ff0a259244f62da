use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::tenant::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub String);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inbound external message (an email) written to the store by the ingestion path.
///
/// The session only ever flips `read` and `notified` from false to true.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub id: EventId,
    pub tenant_id: TenantId,
    pub sender: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub received_at: DateTime<Utc>,
    pub read: bool,
    pub notified: bool,
}

impl ExternalEvent {
    /// First `max_chars` characters of the plain-text body, whitespace collapsed.
    pub fn preview(&self, max_chars: usize) -> String {
        let collapsed = self.body_text.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() <= max_chars {
            return collapsed;
        }
        let truncated = collapsed.chars().take(max_chars).collect::<String>();
        format!("{}…", truncated.trim_end())
    }

    pub fn subject_or_placeholder(&self) -> &str {
        let subject = self.subject.trim();
        if subject.is_empty() {
            "(no subject)"
        } else {
            subject
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{EventId, ExternalEvent};
    use crate::domain::tenant::TenantId;

    fn event(body: &str, subject: &str) -> ExternalEvent {
        ExternalEvent {
            id: EventId("evt-1".to_owned()),
            tenant_id: TenantId("t-1".to_owned()),
            sender: "alice@example.com".to_owned(),
            subject: subject.to_owned(),
            body_text: body.to_owned(),
            body_html: None,
            received_at: Utc::now(),
            read: false,
            notified: false,
        }
    }

    #[test]
    fn preview_collapses_whitespace_and_truncates() {
        let event = event("hello\n\n   there   friend", "Hi");
        assert_eq!(event.preview(100), "hello there friend");
        assert_eq!(event.preview(5), "hello…");
    }

    #[test]
    fn empty_subject_uses_placeholder() {
        assert_eq!(event("body", "  ").subject_or_placeholder(), "(no subject)");
        assert_eq!(event("body", "Invoice").subject_or_placeholder(), "Invoice");
    }
}
