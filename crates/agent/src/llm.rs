//! OpenAI-compatible chat-completions clients.
//!
//! Chat turns go out with a single `propose_email` function tool declared; a
//! tool call in the response comes back as a typed [`ActionProposal`] instead
//! of text. Photos are read with the vision model and parsed into a
//! [`DocumentExtraction`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use fleet_core::config::LlmConfig;
use fleet_core::conversation::ConversationTurn;
use fleet_core::domain::action::ActionProposal;
use fleet_core::domain::artifact::DocumentExtraction;
use fleet_core::errors::CompletionError;
use fleet_core::ports::{Completion, DocumentExtractor, LlmClient};

pub const PROPOSE_EMAIL_TOOL: &str = "propose_email";

const MAX_TOKENS: u32 = 1024;
const ERROR_BODY_PREVIEW_CHARS: usize = 200;

const VISION_PROMPT: &str = r#"Analyze this tax document. Return JSON:
{"doc_type": "W-2/1099-INT/1099-DIV/1099-MISC/1098/receipt/other",
 "payer_name": "name", "tax_year": "year",
 "amounts": {"wages": 0, "federal_withheld": 0, "state_withheld": 0, "interest_income": 0, "dividend_income": 0},
 "summary": "brief description"}"#;

const PROPOSAL_DEGRADED_REPLY: &str =
    "I couldn't put that email together. Tell me the address, a subject and what it should say.";

#[derive(Clone, Debug)]
pub struct ChatEndpoint {
    pub api_base: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub vision_model: String,
    pub timeout_secs: u64,
}

impl ChatEndpoint {
    pub fn primary(config: &LlmConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            vision_model: config.vision_model.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    /// The fallback provider serves both chat and vision with its one model.
    pub fn fallback(config: &LlmConfig) -> Option<Self> {
        config.fallback.as_ref().map(|fallback| Self {
            api_base: fallback.api_base.clone(),
            api_key: fallback.api_key.clone(),
            model: fallback.model.clone(),
            vision_model: fallback.model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChatToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    #[serde(rename = "type", default)]
    call_type: String,
    function: ChatToolFunction,
}

#[derive(Debug, Deserialize)]
struct ChatToolFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProposeEmailArguments {
    to: String,
    subject: String,
    body: String,
}

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: ChatEndpoint,
}

impl ChatCompletionsClient {
    pub fn new(endpoint: ChatEndpoint) -> Result<Self, CompletionError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = endpoint.api_key.as_ref() {
            let key = api_key.expose_secret().trim();
            if !key.is_empty() {
                let mut bearer = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
                    CompletionError::InvalidResponse("api key is not a valid header value".to_owned())
                })?;
                bearer.set_sensitive(true);
                headers.insert(AUTHORIZATION, bearer);
            }
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(endpoint.timeout_secs.max(1)))
            .build()
            .map_err(transport_error)?;

        Ok(Self { http, endpoint })
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.api_base.trim().trim_end_matches('/'))
    }

    async fn post(&self, body: &Value) -> Result<ChatChoiceMessage, CompletionError> {
        let response =
            self.http.post(self.chat_completions_url()).json(body).send().await.map_err(transport_error)?;
        let status = response.status();
        let raw = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(CompletionError::Provider {
                status: status.as_u16(),
                message: raw.chars().take(ERROR_BODY_PREVIEW_CHARS).collect(),
            });
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&raw)
            .map_err(|error| CompletionError::InvalidResponse(error.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| CompletionError::InvalidResponse("response contained no choices".to_owned()))
    }
}

fn transport_error(error: reqwest::Error) -> CompletionError {
    CompletionError::Transport(error.without_url().to_string())
}

fn propose_email_tool() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": PROPOSE_EMAIL_TOOL,
            "description": "Draft an email for the user to confirm before it is sent.",
            "parameters": {
                "type": "object",
                "properties": {
                    "to": {"type": "string", "description": "Recipient email address"},
                    "subject": {"type": "string"},
                    "body": {"type": "string", "description": "Plain-text message body"}
                },
                "required": ["to", "subject", "body"],
                "additionalProperties": false
            }
        }
    })
}

pub fn build_chat_request_body(model: &str, system_prompt: &str, turns: &[ConversationTurn]) -> Value {
    let mut messages = Vec::with_capacity(turns.len() + 1);
    messages.push(json!({"role": "system", "content": system_prompt}));
    messages.extend(
        turns.iter().map(|turn| json!({"role": turn.role.as_str(), "content": turn.text})),
    );

    json!({
        "model": model,
        "messages": messages,
        "max_tokens": MAX_TOKENS,
        "tools": [propose_email_tool()],
        "tool_choice": "auto"
    })
}

fn build_vision_request_body(model: &str, image: &[u8]) -> Value {
    let data_url = format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(image));
    json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "image_url", "image_url": {"url": data_url}},
                {"type": "text", "text": VISION_PROMPT}
            ]
        }]
    })
}

fn parse_completion(message: ChatChoiceMessage) -> Result<Completion, CompletionError> {
    let mut rejected_proposal = false;
    for tool_call in message.tool_calls {
        if tool_call.call_type != "function" || tool_call.function.name != PROPOSE_EMAIL_TOOL {
            continue;
        }

        match serde_json::from_str::<ProposeEmailArguments>(&tool_call.function.arguments) {
            Ok(arguments) => {
                let proposal = ActionProposal::new(arguments.to, arguments.subject, arguments.body);
                if proposal.is_well_formed() {
                    return Ok(Completion::Proposal(proposal));
                }
                rejected_proposal = true;
            }
            Err(error) => {
                warn!(
                    event_name = "llm.proposal.invalid_arguments",
                    error = %error,
                    "model returned malformed propose_email arguments"
                );
                rejected_proposal = true;
            }
        }
    }

    let text = message.content.map(|content| content.trim().to_owned()).filter(|text| !text.is_empty());
    match text {
        Some(text) => Ok(Completion::Text(text)),
        None if rejected_proposal => Ok(Completion::Text(PROPOSAL_DEGRADED_REPLY.to_owned())),
        None => Err(CompletionError::InvalidResponse("completion contained no content".to_owned())),
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(
        &self,
        system_prompt: &str,
        turns: &[ConversationTurn],
    ) -> Result<Completion, CompletionError> {
        let body = build_chat_request_body(&self.endpoint.model, system_prompt, turns);
        let message = self.post(&body).await?;
        parse_completion(message)
    }
}

#[async_trait]
impl DocumentExtractor for ChatCompletionsClient {
    async fn extract(&self, image: &[u8]) -> Result<DocumentExtraction, CompletionError> {
        let body = build_vision_request_body(&self.endpoint.vision_model, image);
        let message = self.post(&body).await?;
        let text = message
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CompletionError::InvalidResponse("vision response was empty".to_owned()))?;
        Ok(DocumentExtraction::from_model_output(&text))
    }
}

/// Tries the primary provider, then the fallback once.
pub struct FallbackLlmClient {
    primary: Arc<dyn LlmClient>,
    fallback: Option<Arc<dyn LlmClient>>,
}

impl FallbackLlmClient {
    pub fn new(primary: Arc<dyn LlmClient>, fallback: Option<Arc<dyn LlmClient>>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl LlmClient for FallbackLlmClient {
    async fn complete(
        &self,
        system_prompt: &str,
        turns: &[ConversationTurn],
    ) -> Result<Completion, CompletionError> {
        match self.primary.complete(system_prompt, turns).await {
            Ok(completion) => Ok(completion),
            Err(error) => {
                let Some(fallback) = self.fallback.as_ref() else {
                    return Err(error);
                };
                warn!(
                    event_name = "llm.fallback.engaged",
                    error = %error,
                    "primary completion provider failed; trying fallback"
                );
                fallback.complete(system_prompt, turns).await
            }
        }
    }
}

pub struct FallbackExtractor {
    primary: Arc<dyn DocumentExtractor>,
    fallback: Option<Arc<dyn DocumentExtractor>>,
}

impl FallbackExtractor {
    pub fn new(
        primary: Arc<dyn DocumentExtractor>,
        fallback: Option<Arc<dyn DocumentExtractor>>,
    ) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl DocumentExtractor for FallbackExtractor {
    async fn extract(&self, image: &[u8]) -> Result<DocumentExtraction, CompletionError> {
        match self.primary.extract(image).await {
            Ok(extraction) => Ok(extraction),
            Err(error) => {
                let Some(fallback) = self.fallback.as_ref() else {
                    return Err(error);
                };
                debug!(
                    event_name = "llm.fallback.vision_engaged",
                    error = %error,
                    "primary vision provider failed; trying fallback"
                );
                fallback.extract(image).await
            }
        }
    }
}

/// Chat and vision clients built from configuration, with the fallback
/// provider wired in when one is configured.
pub struct LanguageModels {
    pub chat: Arc<dyn LlmClient>,
    pub vision: Arc<dyn DocumentExtractor>,
}

impl LanguageModels {
    pub fn from_config(config: &LlmConfig) -> Result<Self, CompletionError> {
        let primary = Arc::new(ChatCompletionsClient::new(ChatEndpoint::primary(config))?);
        let fallback = match ChatEndpoint::fallback(config) {
            Some(endpoint) => Some(Arc::new(ChatCompletionsClient::new(endpoint)?)),
            None => None,
        };

        let chat = FallbackLlmClient::new(
            primary.clone(),
            fallback.clone().map(|client| client as Arc<dyn LlmClient>),
        );
        let vision = FallbackExtractor::new(
            primary,
            fallback.map(|client| client as Arc<dyn DocumentExtractor>),
        );
        Ok(Self { chat: Arc::new(chat), vision: Arc::new(vision) })
    }
}
