//! Core domain model for the fleet orchestrator.
//!
//! Holds everything that is independent of the messaging gateway, the store
//! and the LLM provider: tenant and event types, the error taxonomy, the
//! per-tenant conversation buffers, the pending-action state machine and the
//! async collaborator contracts implemented by the adapter crates.

pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ports;

pub use conversation::{ConversationKey, ConversationStore, ConversationTurn, TurnRole};
pub use domain::action::{ActionProposal, PendingAction, SentActionId, SentActionRecord};
pub use domain::artifact::{ArtifactId, ArtifactKind, DocumentExtraction, StoredArtifact};
pub use domain::event::{EventId, ExternalEvent};
pub use domain::message::{Attachment, ChatRef, InboundMessage};
pub use domain::tenant::{GatewayIdentity, TenantConfig, TenantId, UserId};
pub use errors::{ActionExecutionError, CompletionError, CoreError, GatewayError};
pub use flows::{CancelOutcome, ConfirmOutcome, PendingActionTable};
