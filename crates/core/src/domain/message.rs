use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::artifact::ArtifactKind;
use crate::domain::tenant::UserId;

/// Gateway-side address of a conversation (a chat id).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatRef(pub String);

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub handle: String,
    pub kind: ArtifactKind,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: String,
    pub chat: ChatRef,
    pub user_id: UserId,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn text(
        message_id: impl Into<String>,
        chat: ChatRef,
        user_id: UserId,
        text: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            chat,
            user_id,
            text: Some(text.into()),
            attachment: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}
