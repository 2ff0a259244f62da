use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use fleet_core::domain::message::{ChatRef, InboundMessage};
use fleet_core::domain::tenant::GatewayIdentity;
use fleet_core::errors::GatewayError;
use fleet_core::ports::{Gateway, GatewayFactory};

use crate::events::{inbound_from_update, ApiResponse, File, Update, User};

/// Bot API caps a single message at 4096 characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Clone, Debug)]
pub struct BotApiSettings {
    pub api_base: String,
    pub poll_timeout_secs: u64,
}

impl Default for BotApiSettings {
    fn default() -> Self {
        Self { api_base: "https://api.telegram.org".to_owned(), poll_timeout_secs: 30 }
    }
}

pub struct BotApiClient {
    http: reqwest::Client,
    api_base: String,
    token: SecretString,
    poll_timeout_secs: u64,
    next_offset: Mutex<i64>,
}

impl BotApiClient {
    pub fn new(settings: &BotApiSettings, token: SecretString) -> Result<Self, GatewayError> {
        if token.expose_secret().trim().is_empty() {
            return Err(GatewayError::MissingCredential);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.poll_timeout_secs + 10))
            .build()
            .map_err(|error| GatewayError::Transport(error.without_url().to_string()))?;

        Ok(Self {
            http,
            api_base: settings.api_base.trim().trim_end_matches('/').to_owned(),
            token,
            poll_timeout_secs: settings.poll_timeout_secs,
            next_offset: Mutex::new(0),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token.expose_secret())
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.token.expose_secret())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::NOT_FOUND {
            return Err(GatewayError::Unauthorized(format!("{method} returned {status}")));
        }

        let body: ApiResponse<T> = response.json().await.map_err(|error| {
            GatewayError::InvalidResponse(format!(
                "{method} returned undecodable body ({status}): {}",
                error.without_url()
            ))
        })?;

        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(GatewayError::InvalidResponse(format!(
                "{method} failed ({status}): {}",
                body.description.unwrap_or_else(|| "no description".to_owned())
            ))),
        }
    }
}

fn transport_error(error: reqwest::Error) -> GatewayError {
    GatewayError::Transport(error.without_url().to_string())
}

/// Splits text into chunks of at most `max_chars` characters, preferring
/// line boundaries.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl Gateway for BotApiClient {
    async fn resolve_identity(&self) -> Result<GatewayIdentity, GatewayError> {
        let me: User = self.call("getMe", self.http.get(self.method_url("getMe"))).await?;
        Ok(GatewayIdentity {
            id: me.id.to_string(),
            username: me.username,
            display_name: me.first_name,
        })
    }

    async fn next_batch(&self) -> Result<Option<Vec<InboundMessage>>, GatewayError> {
        let mut offset = self.next_offset.lock().await;
        let request = self.http.get(self.method_url("getUpdates")).query(&[
            ("offset", offset.to_string()),
            ("timeout", self.poll_timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_owned()),
        ]);
        let updates: Vec<Update> = self.call("getUpdates", request).await?;

        let mut batch = Vec::with_capacity(updates.len());
        for update in &updates {
            *offset = (*offset).max(update.update_id + 1);
            match inbound_from_update(update) {
                Some(message) => batch.push(message),
                None => debug!(
                    event_name = "gateway.telegram.update_skipped",
                    update_id = update.update_id,
                    "skipping update without supported content"
                ),
            }
        }

        Ok(Some(batch))
    }

    async fn send_text(&self, chat: &ChatRef, text: &str) -> Result<(), GatewayError> {
        for chunk in chunk_text(text, MAX_MESSAGE_CHARS) {
            let request = self
                .http
                .post(self.method_url("sendMessage"))
                .json(&json!({ "chat_id": chat.0, "text": chunk }));
            let _: serde_json::Value = self.call("sendMessage", request).await?;
        }
        Ok(())
    }

    async fn fetch_attachment(&self, handle: &str) -> Result<Vec<u8>, GatewayError> {
        let request = self.http.get(self.method_url("getFile")).query(&[("file_id", handle)]);
        let file: File = self.call("getFile", request).await?;
        let Some(file_path) = file.file_path else {
            return Err(GatewayError::InvalidResponse(format!(
                "getFile returned no file_path for `{}`",
                file.file_id
            )));
        };

        let response =
            self.http.get(self.file_url(&file_path)).send().await.map_err(transport_error)?;
        if !response.status().is_success() {
            warn!(
                event_name = "gateway.telegram.download_failed",
                status = %response.status(),
                "attachment download failed"
            );
            return Err(GatewayError::InvalidResponse(format!(
                "file download returned {}",
                response.status()
            )));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

pub struct TelegramGatewayFactory {
    settings: BotApiSettings,
}

impl TelegramGatewayFactory {
    pub fn new(settings: BotApiSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl GatewayFactory for TelegramGatewayFactory {
    async fn connect(&self, credential: &SecretString) -> Result<Arc<dyn Gateway>, GatewayError> {
        let client = BotApiClient::new(&self.settings, credential.clone())?;
        Ok(Arc::new(client))
    }
}
