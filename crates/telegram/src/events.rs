use chrono::{DateTime, Utc};
use serde::Deserialize;

use fleet_core::domain::artifact::ArtifactKind;
use fleet_core::domain::message::{Attachment, ChatRef, InboundMessage};
use fleet_core::domain::tenant::UserId;

#[derive(Clone, Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub document: Option<Document>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct File {
    pub file_id: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Maps an update onto an inbound message. Updates without a sender, or
/// with neither text nor a supported attachment, are dropped.
pub fn inbound_from_update(update: &Update) -> Option<InboundMessage> {
    let message = update.message.as_ref()?;
    let sender = message.from.as_ref().filter(|user| !user.is_bot)?;

    let text = message
        .text
        .as_ref()
        .or(message.caption.as_ref())
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty());
    let attachment = attachment_from_message(message);
    if text.is_none() && attachment.is_none() {
        return None;
    }

    Some(InboundMessage {
        message_id: message.message_id.to_string(),
        chat: ChatRef(message.chat.id.to_string()),
        user_id: UserId(sender.id.to_string()),
        text,
        attachment,
        received_at: DateTime::<Utc>::from_timestamp(message.date, 0).unwrap_or_else(Utc::now),
    })
}

fn attachment_from_message(message: &Message) -> Option<Attachment> {
    if let Some(largest) = message
        .photo
        .as_ref()
        .and_then(|sizes| sizes.iter().max_by_key(|size| size.width * size.height))
    {
        return Some(Attachment {
            handle: largest.file_id.clone(),
            kind: ArtifactKind::Photo,
            file_name: None,
            mime_type: Some("image/jpeg".to_owned()),
            size: largest.file_size,
        });
    }

    message.document.as_ref().map(|document| Attachment {
        handle: document.file_id.clone(),
        kind: ArtifactKind::Document,
        file_name: document.file_name.clone(),
        mime_type: document.mime_type.clone(),
        size: document.file_size,
    })
}
