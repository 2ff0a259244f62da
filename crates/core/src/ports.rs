//! Contracts between the orchestrator and its collaborators.
//!
//! Concrete adapters live in `fleet-telegram` and `fleet-agent`. The
//! in-memory implementations at the bottom are used by tests across the
//! workspace.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::conversation::ConversationTurn;
use crate::domain::action::ActionProposal;
use crate::domain::artifact::DocumentExtraction;
use crate::domain::message::{ChatRef, InboundMessage};
use crate::domain::tenant::{GatewayIdentity, TenantId, UserId};
use crate::errors::{ActionExecutionError, CompletionError, GatewayError};

/// One tenant's connection to the messaging gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn resolve_identity(&self) -> Result<GatewayIdentity, GatewayError>;

    /// Waits for the next batch of inbound messages. `Ok(None)` means the
    /// stream has closed and no further batches will arrive.
    async fn next_batch(&self) -> Result<Option<Vec<InboundMessage>>, GatewayError>;

    async fn send_text(&self, chat: &ChatRef, text: &str) -> Result<(), GatewayError>;

    async fn fetch_attachment(&self, handle: &str) -> Result<Vec<u8>, GatewayError>;
}

#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn connect(&self, credential: &SecretString) -> Result<Arc<dyn Gateway>, GatewayError>;
}

#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Text(String),
    Proposal(ActionProposal),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<Completion, CompletionError>;
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> Result<DocumentExtraction, CompletionError>;
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), ActionExecutionError>;
}

/// Optional backup copy of uploaded artifacts. Returns the remote reference
/// on success; failures are swallowed by the implementation.
#[async_trait]
pub trait SecondaryStorage: Send + Sync {
    /// When false, callers skip downloading bytes that would only be discarded.
    fn is_enabled(&self) -> bool {
        true
    }

    async fn upload(&self, user_id: &UserId, file_name: &str, bytes: &[u8]) -> Option<String>;
}

#[async_trait]
pub trait AccountLinker: Send + Sync {
    async fn is_linked(&self, tenant_id: &TenantId, user_id: &UserId) -> bool;

    /// Returns an authorization URL to send to the user, if linking is available.
    async fn start_link(&self, tenant_id: &TenantId, user_id: &UserId) -> Option<String>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSecondaryStorage;

#[async_trait]
impl SecondaryStorage for NoopSecondaryStorage {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn upload(&self, _user_id: &UserId, _file_name: &str, _bytes: &[u8]) -> Option<String> {
        None
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAccountLinker;

#[async_trait]
impl AccountLinker for NoopAccountLinker {
    async fn is_linked(&self, _tenant_id: &TenantId, _user_id: &UserId) -> bool {
        false
    }

    async fn start_link(&self, _tenant_id: &TenantId, _user_id: &UserId) -> Option<String> {
        None
    }
}

fn locked<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentText {
    pub chat: ChatRef,
    pub text: String,
}

/// Scripted gateway: hands out queued batches, then reports the stream closed.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    identity: Arc<Mutex<Option<GatewayIdentity>>>,
    batches: Arc<Mutex<VecDeque<Result<Vec<InboundMessage>, GatewayError>>>>,
    sent: Arc<Mutex<Vec<SentText>>>,
    attachments: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fail_sends: Arc<Mutex<bool>>,
}

impl InMemoryGateway {
    pub fn with_identity(identity: GatewayIdentity) -> Self {
        let gateway = Self::default();
        *locked(&gateway.identity) = Some(identity);
        gateway
    }

    pub fn push_batch(&self, batch: Vec<InboundMessage>) {
        locked(&self.batches).push_back(Ok(batch));
    }

    pub fn push_error(&self, error: GatewayError) {
        locked(&self.batches).push_back(Err(error));
    }

    pub fn put_attachment(&self, handle: impl Into<String>, bytes: Vec<u8>) {
        locked(&self.attachments).insert(handle.into(), bytes);
    }

    pub fn fail_sends(&self, fail: bool) {
        *locked(&self.fail_sends) = fail;
    }

    pub fn sent(&self) -> Vec<SentText> {
        locked(&self.sent).clone()
    }

    pub fn sent_to(&self, chat: &ChatRef) -> Vec<String> {
        locked(&self.sent)
            .iter()
            .filter(|sent| &sent.chat == chat)
            .map(|sent| sent.text.clone())
            .collect()
    }
}

#[async_trait]
impl Gateway for InMemoryGateway {
    async fn resolve_identity(&self) -> Result<GatewayIdentity, GatewayError> {
        locked(&self.identity)
            .clone()
            .ok_or_else(|| GatewayError::Unauthorized("identity not scripted".to_owned()))
    }

    async fn next_batch(&self) -> Result<Option<Vec<InboundMessage>>, GatewayError> {
        match locked(&self.batches).pop_front() {
            Some(Ok(batch)) => Ok(Some(batch)),
            Some(Err(error)) => Err(error),
            None => Ok(None),
        }
    }

    async fn send_text(&self, chat: &ChatRef, text: &str) -> Result<(), GatewayError> {
        if *locked(&self.fail_sends) {
            return Err(GatewayError::Transport("scripted send failure".to_owned()));
        }
        locked(&self.sent).push(SentText { chat: chat.clone(), text: text.to_owned() });
        Ok(())
    }

    async fn fetch_attachment(&self, handle: &str) -> Result<Vec<u8>, GatewayError> {
        locked(&self.attachments)
            .get(handle)
            .cloned()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("unknown attachment `{handle}`")))
    }
}

/// Factory that maps credentials to pre-built in-memory gateways.
#[derive(Clone, Default)]
pub struct InMemoryGatewayFactory {
    gateways: Arc<Mutex<HashMap<String, InMemoryGateway>>>,
    connects: Arc<Mutex<Vec<String>>>,
}

impl InMemoryGatewayFactory {
    pub fn register(&self, credential: impl Into<String>, gateway: InMemoryGateway) {
        locked(&self.gateways).insert(credential.into(), gateway);
    }

    pub fn connect_count(&self) -> usize {
        locked(&self.connects).len()
    }
}

#[async_trait]
impl GatewayFactory for InMemoryGatewayFactory {
    async fn connect(&self, credential: &SecretString) -> Result<Arc<dyn Gateway>, GatewayError> {
        let credential = credential.expose_secret();
        locked(&self.connects).push(credential.to_owned());
        locked(&self.gateways)
            .get(credential)
            .cloned()
            .map(|gateway| Arc::new(gateway) as Arc<dyn Gateway>)
            .ok_or_else(|| GatewayError::Unauthorized("unknown credential".to_owned()))
    }
}

/// Replays queued completions and records every prompt it was given.
#[derive(Clone, Default)]
pub struct ScriptedLlmClient {
    responses: Arc<Mutex<VecDeque<Result<Completion, CompletionError>>>>,
    calls: Arc<Mutex<Vec<(String, Vec<ConversationTurn>)>>>,
}

impl ScriptedLlmClient {
    pub fn push_text(&self, text: impl Into<String>) {
        locked(&self.responses).push_back(Ok(Completion::Text(text.into())));
    }

    pub fn push(&self, response: Result<Completion, CompletionError>) {
        locked(&self.responses).push_back(response);
    }

    pub fn calls(&self) -> Vec<(String, Vec<ConversationTurn>)> {
        locked(&self.calls).clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        system_prompt: &str,
        history: &[ConversationTurn],
    ) -> Result<Completion, CompletionError> {
        locked(&self.calls).push((system_prompt.to_owned(), history.to_vec()));
        locked(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Ok(Completion::Text("ok".to_owned())))
    }
}

#[derive(Clone, Default)]
pub struct ScriptedExtractor {
    responses: Arc<Mutex<VecDeque<Result<DocumentExtraction, CompletionError>>>>,
}

impl ScriptedExtractor {
    pub fn push(&self, response: Result<DocumentExtraction, CompletionError>) {
        locked(&self.responses).push_back(response);
    }
}

#[async_trait]
impl DocumentExtractor for ScriptedExtractor {
    async fn extract(&self, _image: &[u8]) -> Result<DocumentExtraction, CompletionError> {
        locked(&self.responses).pop_front().unwrap_or_else(|| Ok(DocumentExtraction::default()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone, Default)]
pub struct RecordingMailSender {
    sent: Arc<Mutex<Vec<SentMail>>>,
    failure: Arc<Mutex<Option<ActionExecutionError>>>,
}

impl RecordingMailSender {
    pub fn failing(error: ActionExecutionError) -> Self {
        let sender = Self::default();
        *locked(&sender.failure) = Some(error);
        sender
    }

    pub fn sent(&self) -> Vec<SentMail> {
        locked(&self.sent).clone()
    }
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), ActionExecutionError> {
        if let Some(error) = locked(&self.failure).clone() {
            return Err(error);
        }
        locked(&self.sent).push(SentMail {
            from: from.to_owned(),
            to: to.to_owned(),
            subject: subject.to_owned(),
            body: body.to_owned(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{
        Gateway, GatewayFactory, InMemoryGateway, InMemoryGatewayFactory, MailSender,
        RecordingMailSender,
    };
    use crate::domain::message::{ChatRef, InboundMessage};
    use crate::domain::tenant::{GatewayIdentity, UserId};
    use crate::errors::{ActionExecutionError, GatewayError};

    fn identity() -> GatewayIdentity {
        GatewayIdentity {
            id: "42".to_owned(),
            username: Some("tax_helper_bot".to_owned()),
            display_name: "Tax Helper".to_owned(),
        }
    }

    #[tokio::test]
    async fn in_memory_gateway_drains_batches_then_closes() {
        let gateway = InMemoryGateway::with_identity(identity());
        gateway.push_batch(vec![InboundMessage::text(
            "1",
            ChatRef("100".to_owned()),
            UserId("100".to_owned()),
            "hi",
        )]);

        let first = gateway.next_batch().await.expect("batch");
        assert_eq!(first.map(|batch| batch.len()), Some(1));
        assert_eq!(gateway.next_batch().await.expect("closed"), None);
    }

    #[tokio::test]
    async fn factory_rejects_unknown_credentials() {
        let factory = InMemoryGatewayFactory::default();
        factory.register("good", InMemoryGateway::with_identity(identity()));

        let bad = factory.connect(&SecretString::from("bad".to_owned())).await;
        assert!(matches!(bad, Err(GatewayError::Unauthorized(_))));

        let good = factory.connect(&SecretString::from("good".to_owned())).await.expect("gateway");
        assert_eq!(good.resolve_identity().await.expect("identity").display_name, "Tax Helper");
        assert_eq!(factory.connect_count(), 2);
    }

    #[tokio::test]
    async fn recording_mail_sender_reports_scripted_failure() {
        let sender = RecordingMailSender::failing(ActionExecutionError::Disabled);
        let result = sender.send("a@x.io", "b@x.io", "s", "b").await;
        assert_eq!(result, Err(ActionExecutionError::Disabled));
        assert!(sender.sent().is_empty());
    }
}
