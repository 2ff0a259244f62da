//! Conversation handling for a single tenant session.
//!
//! Inbound text is classified first (`conversation`): commands and explicit
//! mail requests are answered without the language model; everything else is
//! sent to the model with the tenant's personality and the user's recent
//! history. Side effects only happen after the owner confirms a pending
//! proposal.
//!
//! # Key Types
//!
//! - `ConversationRouter` - per-session dispatcher (see `runtime` module)
//! - `ChatCompletionsClient` - OpenAI-compatible chat and vision client
//! - `SendGridMailer` - mail delivery for confirmed proposals
//! - `AccessPolicy` - owner-only access guard

pub mod conversation;
pub mod guardrails;
pub mod llm;
pub mod mail;
pub mod runtime;
pub mod summary;

pub use guardrails::AccessPolicy;
pub use llm::{ChatCompletionsClient, ChatEndpoint, FallbackExtractor, FallbackLlmClient, LanguageModels};
pub use mail::{mailer_from_config, DisabledMailer, SendGridMailer};
pub use runtime::{ConversationRouter, RouterDeps, SessionProfile};
