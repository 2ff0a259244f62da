pub mod engine;
pub mod states;

pub use engine::{CancelOutcome, ConfirmOutcome, PendingActionTable};
pub use states::{transition, PendingEffect, PendingEvent, PendingState, TransitionOutcome};
