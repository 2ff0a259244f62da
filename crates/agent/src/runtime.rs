//! Per-session conversation router.
//!
//! One router serves exactly one tenant. It owns that tenant's conversation
//! buffers and pending-action slots; nothing here is shared across sessions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fleet_core::conversation::{ConversationKey, ConversationStore, ConversationTurn};
use fleet_core::domain::action::{ActionProposal, PendingAction, SentActionRecord};
use fleet_core::domain::artifact::{ArtifactId, ArtifactKind, DocumentExtraction, StoredArtifact};
use fleet_core::domain::event::EventId;
use fleet_core::domain::message::{Attachment, InboundMessage};
use fleet_core::domain::tenant::{TenantConfig, UserId};
use fleet_core::errors::CoreError;
use fleet_core::flows::{CancelOutcome, ConfirmOutcome, PendingActionTable};
use fleet_core::ports::{
    AccountLinker, Completion, DocumentExtractor, Gateway, InboundHandler, LlmClient, MailSender,
    SecondaryStorage,
};
use fleet_db::{ArtifactRepository, ExternalEventRepository, SentActionRepository};

use crate::conversation::{classify, ActionDraft, Command, DraftBody, MessageIntent};
use crate::guardrails::{AccessDecision, AccessPolicy};
use crate::summary::{render_extraction_reply, render_summary};

pub const INBOX_PAGE_SIZE: u32 = 5;
const INBOX_PREVIEW_CHARS: usize = 80;
const PROMPT_BODY_PREVIEW_CHARS: usize = 600;
const SUMMARY_SUBJECT: &str = "Tax Document Summary";

pub const HELP_TEXT: &str = "📋 Tax Document Assistant\n\n\
1️⃣ Send photos of W-2s, 1099s, receipts\n\
2️⃣ I'll extract the numbers\n\
3️⃣ Say \"show summary\" to review\n\
4️⃣ Say \"email summary to you@email.com\" to send\n\n\
Ready! 📸";

const PHOTO_FAILED_REPLY: &str = "Had trouble. Try a clearer photo.";

/// Outbound collaborators and stores a router works against.
#[derive(Clone)]
pub struct RouterDeps {
    pub llm: Arc<dyn LlmClient>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub mailer: Arc<dyn MailSender>,
    pub storage: Arc<dyn SecondaryStorage>,
    pub linker: Arc<dyn AccountLinker>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub events: Arc<dyn ExternalEventRepository>,
    pub sent_actions: Arc<dyn SentActionRepository>,
}

/// Identity a session presents to its owner, fixed for the session lifetime.
#[derive(Clone, Debug)]
pub struct SessionProfile {
    pub tenant: TenantConfig,
    pub display_name: String,
    pub reply_address: Option<String>,
    /// `from` of outgoing mail when the tenant has no reply address.
    pub default_sender: String,
}

impl SessionProfile {
    pub fn sender_address(&self) -> &str {
        self.reply_address.as_deref().unwrap_or(&self.default_sender)
    }

    pub fn system_prompt(&self) -> String {
        let personality = self.tenant.personality_or_default();
        match self.reply_address.as_deref() {
            Some(address) => format!(
                "{personality}\n\nYour email address is {address}. Users can receive emails at this address."
            ),
            None => personality.to_owned(),
        }
    }
}

pub struct ConversationRouter {
    profile: SessionProfile,
    access: AccessPolicy,
    history: ConversationStore,
    pending: PendingActionTable,
    deps: RouterDeps,
    gateway: Arc<dyn Gateway>,
}

impl ConversationRouter {
    pub fn new(
        profile: SessionProfile,
        history_limit: usize,
        deps: RouterDeps,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        Self {
            access: AccessPolicy::for_tenant(&profile.tenant),
            profile,
            history: ConversationStore::new(history_limit),
            pending: PendingActionTable::new(),
            deps,
            gateway,
        }
    }

    pub fn profile(&self) -> &SessionProfile {
        &self.profile
    }

    pub fn history(&self) -> &ConversationStore {
        &self.history
    }

    pub fn pending(&self) -> &PendingActionTable {
        &self.pending
    }

    fn key(&self, user_id: &UserId) -> ConversationKey {
        ConversationKey::new(self.profile.tenant.id.clone(), user_id.clone())
    }

    /// Produces the replies for one inbound message, in send order.
    pub async fn route(&self, message: &InboundMessage) -> Result<Vec<String>, CoreError> {
        if let AccessDecision::Deny { reason_code, user_message } =
            self.access.evaluate(&message.user_id)
        {
            info!(
                event_name = "router.access_denied",
                tenant_id = %self.profile.tenant.id,
                user_id = %message.user_id,
                reason_code,
                "message from non-owner ignored"
            );
            return Ok(vec![user_message.to_owned()]);
        }

        let key = self.key(&message.user_id);
        if let Some(attachment) = message.attachment.as_ref() {
            return self.ingest_attachment(&key, attachment).await;
        }

        let Some(text) = message.text.as_deref().map(str::trim).filter(|text| !text.is_empty())
        else {
            return Ok(Vec::new());
        };

        let intent = classify(text);
        debug!(
            event_name = "router.dispatch",
            tenant_id = %key.tenant_id,
            user_id = %key.user_id,
            intent = intent_name(&intent),
            "inbound message classified"
        );

        match intent {
            MessageIntent::Command(command) => self.run_command(&key, command).await,
            MessageIntent::Proposal(draft) => {
                let proposal = self.proposal_from_draft(&key, draft).await?;
                Ok(vec![self.propose(&key, proposal).await])
            }
            MessageIntent::Chat => self.chat(&key, text).await,
        }
    }

    async fn chat(&self, key: &ConversationKey, text: &str) -> Result<Vec<String>, CoreError> {
        let mut turns = self.history.history(key);
        turns.push(ConversationTurn::user(text));

        // The buffer is only touched once the model has answered.
        let completion = self.deps.llm.complete(&self.profile.system_prompt(), &turns).await?;

        self.history.append(key, ConversationTurn::user(text));
        let reply = match completion {
            Completion::Text(reply) => {
                self.history.append(key, ConversationTurn::assistant(reply.clone()));
                reply
            }
            // Confirmation prompts stay out of the model's context.
            Completion::Proposal(proposal) => self.propose(key, proposal).await,
        };
        Ok(vec![reply])
    }

    async fn proposal_from_draft(
        &self,
        key: &ConversationKey,
        draft: ActionDraft,
    ) -> Result<ActionProposal, CoreError> {
        let ActionDraft { to, body } = draft;
        Ok(match body {
            DraftBody::Summary => {
                let artifacts =
                    self.deps.artifacts.list_for_user(&key.tenant_id, &key.user_id).await?;
                ActionProposal::new(to, SUMMARY_SUBJECT, render_summary(&artifacts))
            }
            DraftBody::Text(text) => ActionProposal::new(
                to,
                format!("Message from {}", self.profile.display_name),
                text,
            ),
        })
    }

    async fn propose(&self, key: &ConversationKey, proposal: ActionProposal) -> String {
        let action = self.pending.propose(key, proposal).await;
        info!(
            event_name = "router.action_proposed",
            tenant_id = %key.tenant_id,
            user_id = %key.user_id,
            "mail proposal awaiting confirmation"
        );
        confirmation_prompt(&action)
    }

    async fn run_command(
        &self,
        key: &ConversationKey,
        command: Command,
    ) -> Result<Vec<String>, CoreError> {
        let reply = match command {
            Command::Start => self.greeting(),
            Command::Help => HELP_TEXT.to_owned(),
            Command::EmailAddress => match self.profile.reply_address.as_deref() {
                Some(address) => format!(
                    "📧 Your email address: {address}\n\nAnyone can send emails to this address and I'll forward them to you here!"
                ),
                None => "I don't have an email address set up yet.".to_owned(),
            },
            Command::ShowSummary => {
                let artifacts =
                    self.deps.artifacts.list_for_user(&key.tenant_id, &key.user_id).await?;
                render_summary(&artifacts)
            }
            Command::ClearDocuments => {
                let removed =
                    self.deps.artifacts.clear_for_user(&key.tenant_id, &key.user_id).await?;
                info!(
                    event_name = "router.documents_cleared",
                    tenant_id = %key.tenant_id,
                    user_id = %key.user_id,
                    removed,
                    "user documents cleared"
                );
                "🗑️ Cleared!".to_owned()
            }
            Command::Inbox => self.inbox(key).await?,
            Command::Reply { event_id, text } => return self.reply_to_event(key, event_id, text).await,
            Command::Confirm => self.confirm(key).await,
            Command::Cancel => match self.pending.cancel(key).await {
                CancelOutcome::Cancelled(action) => {
                    format!("🗑️ Discarded the draft to {}.", action.proposal.to)
                }
                CancelOutcome::NothingPending => "Nothing to cancel.".to_owned(),
            },
            Command::LinkAccount => self.link_account(key).await,
        };
        Ok(vec![reply])
    }

    fn greeting(&self) -> String {
        let address = self.profile.reply_address.as_deref().unwrap_or("not set up yet");
        format!(
            "Hey! I'm {}, your private assistant.\n\n📧 My email: {address}\nForward emails here and I'll notify you!\n\nI can also help with taxes - just send photos of your docs.",
            self.profile.display_name
        )
    }

    async fn inbox(&self, key: &ConversationKey) -> Result<String, CoreError> {
        let events = self.deps.events.list_recent(&key.tenant_id, INBOX_PAGE_SIZE).await?;
        if events.is_empty() {
            return Ok("📭 No emails yet.".to_owned());
        }

        let mut out = String::from("📬 Recent emails:\n");
        for event in &events {
            let marker = if event.read { " " } else { "•" };
            out.push_str(&format!(
                "\n{marker} [{}] {}: {}\n   {}\n",
                event.id,
                event.sender,
                event.subject_or_placeholder(),
                event.preview(INBOX_PREVIEW_CHARS)
            ));

            if !event.read {
                if let Err(error) = self.deps.events.mark_read(&key.tenant_id, &event.id).await {
                    warn!(
                        event_name = "router.inbox.mark_read_failed",
                        tenant_id = %key.tenant_id,
                        event_id = %event.id,
                        error = %error,
                        "could not mark displayed event as read"
                    );
                }
            }
        }
        out.push_str("\nReply with: reply <id> <message>");
        Ok(out)
    }

    async fn reply_to_event(
        &self,
        key: &ConversationKey,
        event_id: EventId,
        text: String,
    ) -> Result<Vec<String>, CoreError> {
        let Some(event) = self.deps.events.find(&key.tenant_id, &event_id).await? else {
            return Ok(vec![format!("I couldn't find an email with id {event_id}.")]);
        };

        let subject = event.subject_or_placeholder();
        let subject = if subject.to_ascii_lowercase().starts_with("re:") {
            subject.to_owned()
        } else {
            format!("Re: {subject}")
        };
        let proposal = ActionProposal::new(event.sender.clone(), subject, text).replying_to(event.id);
        Ok(vec![self.propose(key, proposal).await])
    }

    async fn confirm(&self, key: &ConversationKey) -> String {
        let mailer = self.deps.mailer.clone();
        let sent_actions = self.deps.sent_actions.clone();
        let sender = self.profile.sender_address().to_owned();
        let tenant_id = key.tenant_id.clone();
        let user_id = key.user_id.clone();

        let outcome = self
            .pending
            .confirm(key, |action: PendingAction| async move {
                let proposal = &action.proposal;
                if let Err(error) =
                    mailer.send(&sender, &proposal.to, &proposal.subject, &proposal.body).await
                {
                    return Err(error);
                }

                let record = SentActionRecord::from_proposal(tenant_id.clone(), user_id, proposal);
                if let Err(error) = sent_actions.record(record).await {
                    warn!(
                        event_name = "router.sent_action.record_failed",
                        tenant_id = %tenant_id,
                        error = %error,
                        "mail was sent but the audit record could not be written"
                    );
                }
                Ok(())
            })
            .await;

        match outcome {
            ConfirmOutcome::Executed(action) => {
                info!(
                    event_name = "router.action_executed",
                    tenant_id = %key.tenant_id,
                    user_id = %key.user_id,
                    "confirmed mail sent"
                );
                format!("✅ Sent to {}!", action.proposal.to)
            }
            ConfirmOutcome::Failed { action, error } => {
                warn!(
                    event_name = "router.action_failed",
                    tenant_id = %key.tenant_id,
                    user_id = %key.user_id,
                    error = %error,
                    "confirmed mail could not be sent; draft discarded"
                );
                format!(
                    "❌ Couldn't send to {}. {}",
                    action.proposal.to,
                    CoreError::from(error).user_message()
                )
            }
            ConfirmOutcome::NothingPending => "Nothing is waiting for confirmation.".to_owned(),
        }
    }

    async fn link_account(&self, key: &ConversationKey) -> String {
        if self.deps.linker.is_linked(&key.tenant_id, &key.user_id).await {
            return "✅ Your account is already linked.".to_owned();
        }
        match self.deps.linker.start_link(&key.tenant_id, &key.user_id).await {
            Some(url) => format!("🔗 Open this link to connect your account:\n{url}"),
            None => "Account linking isn't available for this assistant.".to_owned(),
        }
    }

    async fn ingest_attachment(
        &self,
        key: &ConversationKey,
        attachment: &Attachment,
    ) -> Result<Vec<String>, CoreError> {
        match attachment.kind {
            ArtifactKind::Photo => self.ingest_photo(key, attachment).await,
            ArtifactKind::Document => self.ingest_document(key, attachment).await,
        }
    }

    async fn ingest_photo(
        &self,
        key: &ConversationKey,
        attachment: &Attachment,
    ) -> Result<Vec<String>, CoreError> {
        let bytes = match self.gateway.fetch_attachment(&attachment.handle).await {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(
                    event_name = "router.photo.download_failed",
                    tenant_id = %key.tenant_id,
                    error = %error,
                    "photo download failed"
                );
                return Ok(vec![PHOTO_FAILED_REPLY.to_owned()]);
            }
        };

        let extraction = match self.deps.extractor.extract(&bytes).await {
            Ok(extraction) => extraction,
            Err(error) => {
                warn!(
                    event_name = "router.photo.extraction_failed",
                    tenant_id = %key.tenant_id,
                    error = %error,
                    "document extraction failed"
                );
                return Ok(vec![PHOTO_FAILED_REPLY.to_owned()]);
            }
        };

        let artifact = self.new_artifact(key, attachment, extraction);
        let file_name = attachment
            .file_name
            .clone()
            .unwrap_or_else(|| format!("{}_{}.jpg", artifact.extraction.doc_type, artifact.id));
        self.deps.artifacts.save(artifact.clone()).await?;
        self.backfill_secondary_copy(key, &artifact.id, &file_name, &bytes).await;

        let collected = self.deps.artifacts.count_for_user(&key.tenant_id, &key.user_id).await?;
        Ok(vec![render_extraction_reply(&artifact.extraction, collected)])
    }

    async fn ingest_document(
        &self,
        key: &ConversationKey,
        attachment: &Attachment,
    ) -> Result<Vec<String>, CoreError> {
        let file_name = attachment.file_name.clone().unwrap_or_else(|| "document".to_owned());
        let artifact =
            self.new_artifact(key, attachment, DocumentExtraction::for_file(file_name.clone()));
        self.deps.artifacts.save(artifact.clone()).await?;

        if self.deps.storage.is_enabled() {
            match self.gateway.fetch_attachment(&attachment.handle).await {
                Ok(bytes) => {
                    self.backfill_secondary_copy(key, &artifact.id, &file_name, &bytes).await
                }
                Err(error) => warn!(
                    event_name = "router.document.download_failed",
                    tenant_id = %key.tenant_id,
                    error = %error,
                    "document download for secondary storage failed"
                ),
            }
        }

        let collected = self.deps.artifacts.count_for_user(&key.tenant_id, &key.user_id).await?;
        Ok(vec![format!("📎 Saved {file_name}! ({collected} total)")])
    }

    fn new_artifact(
        &self,
        key: &ConversationKey,
        attachment: &Attachment,
        extraction: DocumentExtraction,
    ) -> StoredArtifact {
        StoredArtifact {
            id: ArtifactId(Uuid::new_v4().to_string()),
            tenant_id: key.tenant_id.clone(),
            user_id: key.user_id.clone(),
            external_handle: attachment.handle.clone(),
            display_name: attachment.file_name.clone(),
            kind: attachment.kind,
            size: attachment.size,
            secondary_ref: None,
            extraction,
            created_at: Utc::now(),
        }
    }

    async fn backfill_secondary_copy(
        &self,
        key: &ConversationKey,
        artifact_id: &ArtifactId,
        file_name: &str,
        bytes: &[u8],
    ) {
        if !self.deps.storage.is_enabled() {
            return;
        }
        let Some(link) = self.deps.storage.upload(&key.user_id, file_name, bytes).await else {
            return;
        };
        if let Err(error) = self.deps.artifacts.set_secondary_ref(artifact_id, &link).await {
            warn!(
                event_name = "router.secondary_ref.backfill_failed",
                tenant_id = %key.tenant_id,
                artifact_id = %artifact_id,
                error = %error,
                "secondary copy uploaded but its reference was not stored"
            );
        }
    }
}

fn intent_name(intent: &MessageIntent) -> &'static str {
    match intent {
        MessageIntent::Command(command) => command.name(),
        MessageIntent::Proposal(_) => "proposal",
        MessageIntent::Chat => "chat",
    }
}

fn confirmation_prompt(action: &PendingAction) -> String {
    let proposal = &action.proposal;
    let mut body: String = proposal.body.chars().take(PROMPT_BODY_PREVIEW_CHARS).collect();
    if proposal.body.chars().count() > PROMPT_BODY_PREVIEW_CHARS {
        body.push('…');
    }
    format!(
        "📧 Ready to send to {}\nSubject: {}\n\n{body}\n\nReply \"confirm\" to send or \"cancel\" to discard.",
        proposal.to, proposal.subject
    )
}

#[async_trait]
impl InboundHandler for ConversationRouter {
    async fn handle(&self, message: InboundMessage) {
        let replies = match self.route(&message).await {
            Ok(replies) => replies,
            Err(error) => {
                warn!(
                    event_name = "router.dispatch_failed",
                    tenant_id = %self.profile.tenant.id,
                    user_id = %message.user_id,
                    error_class = error.class(),
                    error = %error,
                    "message handling failed"
                );
                vec![error.user_message().to_owned()]
            }
        };

        for reply in replies {
            if let Err(error) = self.gateway.send_text(&message.chat, &reply).await {
                warn!(
                    event_name = "router.reply_failed",
                    tenant_id = %self.profile.tenant.id,
                    error = %error,
                    "reply could not be delivered"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use secrecy::SecretString;

    use fleet_core::conversation::{ConversationKey, ConversationTurn};
    use fleet_core::domain::action::ActionProposal;
    use fleet_core::domain::artifact::{ArtifactKind, DocumentExtraction};
    use fleet_core::domain::event::{EventId, ExternalEvent};
    use fleet_core::domain::message::{Attachment, ChatRef, InboundMessage};
    use fleet_core::domain::tenant::{TenantConfig, TenantId, UserId};
    use fleet_core::errors::{ActionExecutionError, CompletionError};
    use fleet_core::flows::PendingState;
    use fleet_core::ports::{
        Completion, InMemoryGateway, InboundHandler, NoopAccountLinker, NoopSecondaryStorage,
        RecordingMailSender, ScriptedExtractor, ScriptedLlmClient,
    };
    use fleet_db::repositories::{
        InMemoryArtifactRepository, InMemoryExternalEventRepository, InMemorySentActionRepository,
    };
    use fleet_db::{ArtifactRepository, ExternalEventRepository, SentActionRepository};

    use super::{ConversationRouter, RouterDeps, SessionProfile};

    const OWNER: &str = "1001";

    struct Harness {
        router: ConversationRouter,
        gateway: InMemoryGateway,
        llm: ScriptedLlmClient,
        extractor: ScriptedExtractor,
        mailer: RecordingMailSender,
        artifacts: Arc<InMemoryArtifactRepository>,
        events: Arc<InMemoryExternalEventRepository>,
        sent_actions: Arc<InMemorySentActionRepository>,
    }

    fn tenant(id: &str) -> TenantConfig {
        TenantConfig {
            id: TenantId(id.to_owned()),
            owner_id: UserId(OWNER.to_owned()),
            credential: SecretString::from(format!("token-{id}")),
            display_name: Some("Max".to_owned()),
            personality: Some("You are Max.".to_owned()),
            active: true,
            created_at: Utc::now(),
        }
    }

    fn harness_with_mailer(tenant_id: &str, mailer: RecordingMailSender) -> Harness {
        let gateway = InMemoryGateway::default();
        let llm = ScriptedLlmClient::default();
        let extractor = ScriptedExtractor::default();
        let artifacts = Arc::new(InMemoryArtifactRepository::default());
        let events = Arc::new(InMemoryExternalEventRepository::default());
        let sent_actions = Arc::new(InMemorySentActionRepository::default());

        let deps = RouterDeps {
            llm: Arc::new(llm.clone()),
            extractor: Arc::new(extractor.clone()),
            mailer: Arc::new(mailer.clone()),
            storage: Arc::new(NoopSecondaryStorage),
            linker: Arc::new(NoopAccountLinker),
            artifacts: artifacts.clone(),
            events: events.clone(),
            sent_actions: sent_actions.clone(),
        };
        let profile = SessionProfile {
            tenant: tenant(tenant_id),
            display_name: "Max".to_owned(),
            reply_address: Some("max@mail.example.com".to_owned()),
            default_sender: "assistant@example.com".to_owned(),
        };
        let router = ConversationRouter::new(profile, 20, deps, Arc::new(gateway.clone()));

        Harness { router, gateway, llm, extractor, mailer, artifacts, events, sent_actions }
    }

    fn harness(tenant_id: &str) -> Harness {
        harness_with_mailer(tenant_id, RecordingMailSender::default())
    }

    fn from(user: &str, text: &str) -> InboundMessage {
        InboundMessage::text("m-1", ChatRef(user.to_owned()), UserId(user.to_owned()), text)
    }

    fn key(tenant_id: &str) -> ConversationKey {
        ConversationKey::new(TenantId(tenant_id.to_owned()), UserId(OWNER.to_owned()))
    }

    async fn say(harness: &Harness, text: &str) -> Vec<String> {
        harness.router.route(&from(OWNER, text)).await.expect("route")
    }

    fn event(tenant_id: &str, id: &str, subject: &str) -> ExternalEvent {
        ExternalEvent {
            id: EventId(id.to_owned()),
            tenant_id: TenantId(tenant_id.to_owned()),
            sender: "carol@example.com".to_owned(),
            subject: subject.to_owned(),
            body_text: "Are we still on for Friday?".to_owned(),
            body_html: None,
            received_at: Utc::now() - Duration::minutes(5),
            read: false,
            notified: false,
        }
    }

    #[tokio::test]
    async fn chat_reply_is_single_and_buffer_holds_both_turns() {
        let harness = harness("t-1");
        harness.llm.push_text("Hello! I'm Max.");

        let replies = say(&harness, "hi").await;

        assert_eq!(replies, vec!["Hello! I'm Max.".to_owned()]);
        assert_eq!(harness.router.history().len(&key("t-1")), 2);
        let calls = harness.llm.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.starts_with("You are Max."));
        assert!(calls[0].0.contains("Your email address is max@mail.example.com."));
    }

    #[tokio::test]
    async fn completion_failure_leaves_history_untouched() {
        let harness = harness("t-1");
        harness.llm.push(Err(CompletionError::Transport("timeout".to_owned())));

        let error = harness.router.route(&from(OWNER, "hi")).await.expect_err("completion error");

        assert!(error.user_message().contains("Hit a snag"));
        assert_eq!(harness.router.history().len(&key("t-1")), 0);
    }

    #[tokio::test]
    async fn email_request_is_confirmed_then_sent_once() {
        let harness = harness("t-1");

        let prompt = say(&harness, "email bob@example.com saying hi").await;
        assert!(prompt[0].contains("bob@example.com"));
        assert!(prompt[0].contains("confirm"));
        assert!(harness.mailer.sent().is_empty());

        let done = say(&harness, "confirm").await;
        assert_eq!(done, vec!["✅ Sent to bob@example.com!".to_owned()]);

        let sent = harness.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "bob@example.com");
        assert_eq!(sent[0].from, "max@mail.example.com");
        assert_eq!(sent[0].subject, "Message from Max");
        assert_eq!(sent[0].body, "hi");
        assert_eq!(harness.router.pending().state(&key("t-1")).await, PendingState::Empty);

        let records = harness
            .sent_actions
            .list_for_user(&TenantId("t-1".to_owned()), &UserId(OWNER.to_owned()))
            .await
            .expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, "bob@example.com");

        let again = say(&harness, "confirm").await;
        assert_eq!(again, vec!["Nothing is waiting for confirmation.".to_owned()]);
        assert_eq!(harness.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn newer_proposal_replaces_the_older_one() {
        let harness = harness("t-1");
        say(&harness, "email old@example.com saying first").await;
        say(&harness, "email new@example.com saying second").await;
        say(&harness, "yes").await;

        let sent = harness.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "new@example.com");
        assert_eq!(sent[0].body, "second");
    }

    #[tokio::test]
    async fn failed_send_clears_the_slot_and_reports_failure() {
        let harness = harness_with_mailer(
            "t-1",
            RecordingMailSender::failing(ActionExecutionError::Rejected("400".to_owned())),
        );
        say(&harness, "email bob@example.com saying hi").await;

        let reply = say(&harness, "confirm").await;

        assert!(reply[0].starts_with("❌ Couldn't send to bob@example.com."));
        assert!(reply[0].contains("Nothing was sent"));
        assert_eq!(harness.router.pending().state(&key("t-1")).await, PendingState::Empty);
        let records = harness
            .sent_actions
            .list_for_user(&TenantId("t-1".to_owned()), &UserId(OWNER.to_owned()))
            .await
            .expect("records");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn cancel_discards_and_reports_nothing_pending_afterwards() {
        let harness = harness("t-1");
        say(&harness, "email bob@example.com saying hi").await;

        assert_eq!(say(&harness, "cancel").await, vec!["🗑️ Discarded the draft to bob@example.com.".to_owned()]);
        assert_eq!(say(&harness, "cancel").await, vec!["Nothing to cancel.".to_owned()]);
        assert!(harness.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn model_proposals_go_through_confirmation() {
        let harness = harness("t-1");
        harness.llm.push(Ok(Completion::Proposal(ActionProposal::new(
            "dana@example.com",
            "Lunch",
            "Noon works.",
        ))));

        let reply = say(&harness, "let dana know noon works for lunch").await;

        assert!(reply[0].contains("dana@example.com"));
        assert!(harness.mailer.sent().is_empty());
        assert_eq!(harness.router.pending().state(&key("t-1")).await, PendingState::Proposed);
        let history = harness.router.history().history(&key("t-1"));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], ConversationTurn::user("let dana know noon works for lunch"));
    }

    #[tokio::test]
    async fn strangers_get_the_notice_and_nothing_else() {
        let harness = harness("t-1");

        let replies = harness.router.route(&from("999", "email bob@example.com saying hi")).await;

        let replies = replies.expect("route");
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("private assistant"));
        assert!(harness.llm.calls().is_empty());
        let stranger = ConversationKey::new(TenantId("t-1".to_owned()), UserId("999".to_owned()));
        assert_eq!(harness.router.pending().state(&stranger).await, PendingState::Empty);
        assert_eq!(harness.router.history().len(&stranger), 0);
    }

    #[tokio::test]
    async fn tenants_sharing_a_user_id_are_isolated() {
        let first = harness("t-1");
        let second = harness("t-2");

        first.llm.push_text("hello from one");
        say(&first, "hi").await;
        say(&first, "email bob@example.com saying hi").await;

        assert_eq!(second.router.history().len(&key("t-2")), 0);
        assert_eq!(
            say(&second, "confirm").await,
            vec!["Nothing is waiting for confirmation.".to_owned()]
        );
        assert_eq!(first.router.pending().state(&key("t-1")).await, PendingState::Proposed);
        assert!(second.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn commands_bypass_the_model() {
        let harness = harness("t-1");

        let greeting = say(&harness, "/start").await;
        let address = say(&harness, "what's my email address?").await;
        let help = say(&harness, "how do I handle my 1099?").await;

        assert!(greeting[0].starts_with("Hey! I'm Max"));
        assert!(address[0].contains("max@mail.example.com"));
        assert!(help[0].contains("show summary"));
        assert!(harness.llm.calls().is_empty());
        assert_eq!(harness.router.history().len(&key("t-1")), 0);
    }

    #[tokio::test]
    async fn photo_is_extracted_stored_and_summarised() {
        let harness = harness("t-1");
        harness.gateway.put_attachment("photo-1", b"jpeg".to_vec());
        let mut amounts = BTreeMap::new();
        amounts.insert("wages".to_owned(), Decimal::new(5_000_000, 2));
        harness.extractor.push(Ok(DocumentExtraction {
            doc_type: "W-2".to_owned(),
            payer_name: Some("Acme".to_owned()),
            amounts,
            ..DocumentExtraction::default()
        }));

        let photo = from(OWNER, "").with_attachment(Attachment {
            handle: "photo-1".to_owned(),
            kind: ArtifactKind::Photo,
            file_name: None,
            mime_type: Some("image/jpeg".to_owned()),
            size: Some(4),
        });
        let reply = harness.router.route(&photo).await.expect("route");

        assert!(reply[0].starts_with("📄 W-2 from Acme"));
        assert!(reply[0].contains("• Wages: $50,000.00"));
        assert!(reply[0].ends_with("✅ 1 doc(s) collected."));

        let summary = say(&harness, "show summary").await;
        assert!(summary[0].contains("W-2 - Acme"));
        assert!(summary[0].contains("TOTALS:\n   Wages: $50,000.00"));

        say(&harness, "email summary to accountant@example.com").await;
        say(&harness, "confirm").await;
        let sent = harness.mailer.sent();
        assert_eq!(sent[0].subject, "Tax Document Summary");
        assert!(sent[0].body.contains("W-2 - Acme"));

        assert_eq!(say(&harness, "clear documents").await, vec!["🗑️ Cleared!".to_owned()]);
        let remaining = harness
            .artifacts
            .count_for_user(&TenantId("t-1".to_owned()), &UserId(OWNER.to_owned()))
            .await
            .expect("count");
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn unreadable_photo_gets_a_retry_hint() {
        let harness = harness("t-1");
        let photo = from(OWNER, "").with_attachment(Attachment {
            handle: "missing".to_owned(),
            kind: ArtifactKind::Photo,
            file_name: None,
            mime_type: None,
            size: None,
        });

        let reply = harness.router.route(&photo).await.expect("route");
        assert_eq!(reply, vec!["Had trouble. Try a clearer photo.".to_owned()]);
    }

    #[tokio::test]
    async fn documents_are_saved_without_extraction() {
        let harness = harness("t-1");
        let document = from(OWNER, "").with_attachment(Attachment {
            handle: "doc-1".to_owned(),
            kind: ArtifactKind::Document,
            file_name: Some("1099.pdf".to_owned()),
            mime_type: Some("application/pdf".to_owned()),
            size: Some(2048),
        });

        let reply = harness.router.route(&document).await.expect("route");

        assert_eq!(reply, vec!["📎 Saved 1099.pdf! (1 total)".to_owned()]);
        let stored = harness
            .artifacts
            .list_for_user(&TenantId("t-1".to_owned()), &UserId(OWNER.to_owned()))
            .await
            .expect("artifacts");
        assert_eq!(stored[0].extraction.doc_type, "pdf");
        assert_eq!(stored[0].extraction.file_name.as_deref(), Some("1099.pdf"));
    }

    #[tokio::test]
    async fn inbox_marks_read_and_reply_links_the_event() {
        let harness = harness("t-1");
        harness.events.insert(event("t-1", "evt-1", "Dinner")).await.expect("insert");

        let inbox = say(&harness, "inbox").await;
        assert!(inbox[0].contains("[evt-1] carol@example.com: Dinner"));
        let stored = harness
            .events
            .find(&TenantId("t-1".to_owned()), &EventId("evt-1".to_owned()))
            .await
            .expect("find")
            .expect("event");
        assert!(stored.read);

        let prompt = say(&harness, "reply evt-1 Yes, see you then").await;
        assert!(prompt[0].contains("Subject: Re: Dinner"));
        say(&harness, "confirm").await;

        let records = harness
            .sent_actions
            .list_for_user(&TenantId("t-1".to_owned()), &UserId(OWNER.to_owned()))
            .await
            .expect("records");
        assert_eq!(records[0].in_reply_to, Some(EventId("evt-1".to_owned())));
        assert_eq!(records[0].target, "carol@example.com");
    }

    #[tokio::test]
    async fn replying_to_an_unknown_event_is_an_error_text() {
        let harness = harness("t-1");
        harness.events.insert(event("t-2", "evt-9", "Other tenant")).await.expect("insert");

        let reply = say(&harness, "reply evt-9 hello").await;

        assert_eq!(reply, vec!["I couldn't find an email with id evt-9.".to_owned()]);
        assert_eq!(harness.router.pending().state(&key("t-1")).await, PendingState::Empty);
    }

    #[tokio::test]
    async fn handler_sends_replies_and_apologises_on_failure() {
        let harness = harness("t-1");
        harness.llm.push_text("hey");
        harness.llm.push(Err(CompletionError::Transport("down".to_owned())));

        harness.router.handle(from(OWNER, "hi")).await;
        harness.router.handle(from(OWNER, "hello again")).await;

        let sent = harness.gateway.sent_to(&ChatRef(OWNER.to_owned()));
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], "hey");
        assert!(sent[1].contains("Hit a snag"));
    }
}
