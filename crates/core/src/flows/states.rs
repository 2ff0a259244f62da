use serde::{Deserialize, Serialize};

/// Slot state for one (tenant, end-user) key. `Confirmed` and `Cancelled`
/// are momentary: both settle back to `Empty` in the same step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingState {
    Empty,
    Proposed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingEvent {
    Propose,
    Confirm,
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingEffect {
    Store,
    Replace,
    Execute,
    Discard,
    ReportNothingPending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: PendingState,
    pub to: PendingState,
    pub event: PendingEvent,
    pub effect: PendingEffect,
}

pub fn transition(current: PendingState, event: PendingEvent) -> TransitionOutcome {
    use PendingEffect::*;
    use PendingEvent::*;
    use PendingState::*;

    let (to, effect) = match (current, event) {
        (Empty, Propose) => (Proposed, Store),
        (Proposed, Propose) => (Proposed, Replace),
        (Proposed, Confirm) => (Empty, Execute),
        (Proposed, Cancel) => (Empty, Discard),
        (Empty, Confirm) | (Empty, Cancel) => (Empty, ReportNothingPending),
    };

    TransitionOutcome { from: current, to, event, effect }
}
