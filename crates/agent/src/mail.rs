use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{info, warn};

use fleet_core::config::MailConfig;
use fleet_core::errors::ActionExecutionError;
use fleet_core::ports::MailSender;

const SEND_TIMEOUT_SECS: u64 = 30;

/// Delivers plain-text mail through the SendGrid v3 API.
pub struct SendGridMailer {
    http: reqwest::Client,
    api_base: String,
    api_key: SecretString,
}

impl SendGridMailer {
    pub fn new(api_base: &str, api_key: SecretString) -> Result<Self, ActionExecutionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SEND_TIMEOUT_SECS))
            .build()
            .map_err(|error| ActionExecutionError::Transport(error.without_url().to_string()))?;
        Ok(Self { http, api_base: api_base.trim().trim_end_matches('/').to_owned(), api_key })
    }
}

#[async_trait]
impl MailSender for SendGridMailer {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), ActionExecutionError> {
        let payload = json!({
            "personalizations": [{"to": [{"email": to}]}],
            "from": {"email": from},
            "subject": subject,
            "content": [{"type": "text/plain", "value": body}]
        });

        let response = self
            .http
            .post(format!("{}/v3/mail/send", self.api_base))
            .bearer_auth(self.api_key.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|error| ActionExecutionError::Transport(error.without_url().to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(event_name = "mail.sent", status = %status, "mail accepted by provider");
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        warn!(event_name = "mail.rejected", status = %status, "mail provider rejected the message");
        Err(ActionExecutionError::Rejected(format!(
            "status {status}: {}",
            detail.chars().take(200).collect::<String>()
        )))
    }
}

/// Stand-in used when no mail provider is configured; every send fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledMailer;

#[async_trait]
impl MailSender for DisabledMailer {
    async fn send(
        &self,
        _from: &str,
        _to: &str,
        _subject: &str,
        _body: &str,
    ) -> Result<(), ActionExecutionError> {
        Err(ActionExecutionError::Disabled)
    }
}

pub fn mailer_from_config(config: &MailConfig) -> Result<Arc<dyn MailSender>, ActionExecutionError> {
    match config.sendgrid_api_key.as_ref().filter(|key| !key.expose_secret().trim().is_empty()) {
        Some(api_key) => Ok(Arc::new(SendGridMailer::new(&config.api_base, api_key.clone())?)),
        None => {
            warn!(
                event_name = "mail.disabled",
                "no sendgrid api key configured; confirmed actions will fail"
            );
            Ok(Arc::new(DisabledMailer))
        }
    }
}
