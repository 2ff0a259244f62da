use thiserror::Error;

/// Failure classes a session can observe. Every variant is handled at the
/// session boundary; none of them stops the supervisor or a sibling session.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("tenant configuration invalid: {0}")]
    Config(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error(transparent)]
    Completion(#[from] CompletionError),
    #[error(transparent)]
    ActionExecution(#[from] ActionExecutionError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("persisted data could not be decoded: {0}")]
    Data(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion provider is not configured")]
    NotConfigured,
    #[error("completion transport failed: {0}")]
    Transport(String),
    #[error("completion provider returned status {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("completion response was invalid: {0}")]
    InvalidResponse(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionExecutionError {
    #[error("mail delivery is not configured")]
    Disabled,
    #[error("mail provider rejected the message: {0}")]
    Rejected(String),
    #[error("mail transport failed: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway credential is missing")]
    MissingCredential,
    #[error("gateway rejected the credential: {0}")]
    Unauthorized(String),
    #[error("gateway transport failed: {0}")]
    Transport(String),
    #[error("gateway response was invalid: {0}")]
    InvalidResponse(String),
}

impl CoreError {
    /// Text safe to show an end-user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Completion(_) => "Hit a snag thinking about that. Please try again in a moment.",
            Self::ActionExecution(_) => "That didn't go through. Nothing was sent.",
            Self::StoreUnavailable(_) | Self::Gateway(_) => {
                "Something went wrong on my side. Please try again shortly."
            }
            Self::Config(_) | Self::Data(_) => "An unexpected internal error occurred.",
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::Completion(_) => "completion",
            Self::ActionExecution(_) => "action_execution",
            Self::Gateway(_) => "gateway",
            Self::Data(_) => "data",
        }
    }
}
