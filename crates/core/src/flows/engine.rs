//! Single-slot pending-action table.
//!
//! Each (tenant, end-user) key owns one slot guarded by its own async mutex.
//! The mutex is held across action execution, so a confirm can never run a
//! proposal that a concurrent propose has already replaced, and two confirms
//! for the same key execute at most once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::conversation::ConversationKey;
use crate::domain::action::{ActionProposal, PendingAction};
use crate::errors::ActionExecutionError;
use crate::flows::states::{transition, PendingEffect, PendingEvent, PendingState};

type Slot = Arc<tokio::sync::Mutex<Option<PendingAction>>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Executed(PendingAction),
    Failed { action: PendingAction, error: ActionExecutionError },
    NothingPending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(PendingAction),
    NothingPending,
}

#[derive(Default)]
pub struct PendingActionTable {
    slots: Mutex<HashMap<ConversationKey, Slot>>,
}

impl PendingActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites whatever is pending for `key` and returns the stored action.
    pub async fn propose(&self, key: &ConversationKey, proposal: ActionProposal) -> PendingAction {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let outcome = transition(state_of(&guard), PendingEvent::Propose);
        debug!(
            event_name = "pending.transition",
            tenant_id = %key.tenant_id,
            user_id = %key.user_id,
            from = ?outcome.from,
            to = ?outcome.to,
            effect = ?outcome.effect,
            "pending action proposed"
        );

        let action = PendingAction::new(proposal);
        *guard = Some(action.clone());
        action
    }

    /// Executes the pending action at most once. The slot is cleared whether
    /// or not execution succeeds.
    pub async fn confirm<F, Fut>(&self, key: &ConversationKey, execute: F) -> ConfirmOutcome
    where
        F: FnOnce(PendingAction) -> Fut,
        Fut: Future<Output = Result<(), ActionExecutionError>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let outcome = transition(state_of(&guard), PendingEvent::Confirm);
        debug!(
            event_name = "pending.transition",
            tenant_id = %key.tenant_id,
            user_id = %key.user_id,
            from = ?outcome.from,
            to = ?outcome.to,
            effect = ?outcome.effect,
            "pending action confirm requested"
        );

        if outcome.effect != PendingEffect::Execute {
            return ConfirmOutcome::NothingPending;
        }
        let Some(action) = guard.take() else {
            return ConfirmOutcome::NothingPending;
        };

        match execute(action.clone()).await {
            Ok(()) => ConfirmOutcome::Executed(action),
            Err(error) => ConfirmOutcome::Failed { action, error },
        }
    }

    pub async fn cancel(&self, key: &ConversationKey) -> CancelOutcome {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let outcome = transition(state_of(&guard), PendingEvent::Cancel);
        debug!(
            event_name = "pending.transition",
            tenant_id = %key.tenant_id,
            user_id = %key.user_id,
            from = ?outcome.from,
            to = ?outcome.to,
            effect = ?outcome.effect,
            "pending action cancel requested"
        );

        match (outcome.effect, guard.take()) {
            (PendingEffect::Discard, Some(action)) => CancelOutcome::Cancelled(action),
            _ => CancelOutcome::NothingPending,
        }
    }

    pub async fn pending(&self, key: &ConversationKey) -> Option<PendingAction> {
        let slot = self.existing_slot(key)?;
        let guard = slot.lock().await;
        guard.clone()
    }

    pub async fn state(&self, key: &ConversationKey) -> PendingState {
        match self.existing_slot(key) {
            Some(slot) => state_of(&*slot.lock().await),
            None => PendingState::Empty,
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<ConversationKey, Slot>> {
        match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn slot(&self, key: &ConversationKey) -> Slot {
        self.slots().entry(key.clone()).or_default().clone()
    }

    /// Lookup for read-only callers; never allocates a slot.
    fn existing_slot(&self, key: &ConversationKey) -> Option<Slot> {
        self.slots().get(key).cloned()
    }
}

fn state_of(slot: &Option<PendingAction>) -> PendingState {
    if slot.is_some() {
        PendingState::Proposed
    } else {
        PendingState::Empty
    }
}
