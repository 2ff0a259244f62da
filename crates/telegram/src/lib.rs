//! Telegram gateway for fleet sessions.
//!
//! - **Bot API client** (`api`) - `getMe`, `getUpdates` long-polling,
//!   `sendMessage` and file download over HTTPS
//! - **Updates** (`events`) - maps Bot API updates onto `InboundMessage`
//! - **Polling runner** (`polling`) - a session's receive loop with
//!   reconnect backoff and per-message failure isolation
//!
//! ```text
//! getUpdates → PollingRunner → InboundHandler (ConversationRouter) → sendMessage
//! ```

pub mod api;
pub mod events;
pub mod polling;

pub use api::{BotApiClient, BotApiSettings, TelegramGatewayFactory};
pub use polling::{PollingExit, PollingRunner, ReconnectPolicy};
