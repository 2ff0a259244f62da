use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use fleet_core::domain::message::InboundMessage;
use fleet_core::domain::tenant::TenantId;
use fleet_core::errors::GatewayError;
use fleet_core::ports::{Gateway, InboundHandler};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed polls tolerated before the loop gives up. `None`
    /// keeps retrying for the life of the process.
    pub max_retries: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: None, base_delay_ms: 500, max_delay_ms: 30_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollingExit {
    StreamClosed,
    Unauthorized,
    RetriesExhausted,
}

/// Receive loop for one tenant's gateway.
///
/// Messages are handled one at a time in arrival order. Each handler call runs
/// on its own task so a panic inside it is contained and logged.
pub struct PollingRunner {
    tenant_id: TenantId,
    gateway: Arc<dyn Gateway>,
    handler: Arc<dyn InboundHandler>,
    reconnect_policy: ReconnectPolicy,
}

impl PollingRunner {
    pub fn new(
        tenant_id: TenantId,
        gateway: Arc<dyn Gateway>,
        handler: Arc<dyn InboundHandler>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { tenant_id, gateway, handler, reconnect_policy }
    }

    pub async fn run(&self) -> PollingExit {
        let mut consecutive_failures: u32 = 0;
        info!(
            event_name = "gateway.polling.started",
            tenant_id = %self.tenant_id,
            "receive loop started"
        );

        loop {
            match self.gateway.next_batch().await {
                Ok(Some(batch)) => {
                    consecutive_failures = 0;
                    for message in batch {
                        self.dispatch(message).await;
                    }
                }
                Ok(None) => {
                    info!(
                        event_name = "gateway.polling.closed",
                        tenant_id = %self.tenant_id,
                        "gateway stream closed"
                    );
                    return PollingExit::StreamClosed;
                }
                Err(GatewayError::Unauthorized(reason)) => {
                    error!(
                        event_name = "gateway.polling.unauthorized",
                        tenant_id = %self.tenant_id,
                        reason = %reason,
                        "gateway rejected the tenant credential; receive loop stopped"
                    );
                    return PollingExit::Unauthorized;
                }
                Err(poll_error) => {
                    warn!(
                        event_name = "gateway.polling.failed",
                        tenant_id = %self.tenant_id,
                        attempt = consecutive_failures,
                        error = %poll_error,
                        "poll failed"
                    );

                    if let Some(max_retries) = self.reconnect_policy.max_retries {
                        if consecutive_failures >= max_retries {
                            warn!(
                                event_name = "gateway.polling.retries_exhausted",
                                tenant_id = %self.tenant_id,
                                max_retries,
                                "poll retries exhausted; continuing process without this loop"
                            );
                            return PollingExit::RetriesExhausted;
                        }
                    }

                    let delay = self.reconnect_policy.backoff(consecutive_failures);
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, message: InboundMessage) {
        let message_id = message.message_id.clone();
        debug!(
            event_name = "gateway.polling.message_received",
            tenant_id = %self.tenant_id,
            message_id = %message_id,
            "dispatching inbound message"
        );

        let handler = self.handler.clone();
        let outcome = tokio::spawn(async move { handler.handle(message).await }).await;
        if let Err(join_error) = outcome {
            error!(
                event_name = "gateway.polling.handler_crashed",
                tenant_id = %self.tenant_id,
                message_id = %message_id,
                error = %join_error,
                "message handler aborted; continuing receive loop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use fleet_core::domain::message::{ChatRef, InboundMessage};
    use fleet_core::domain::tenant::{TenantId, UserId};
    use fleet_core::errors::GatewayError;
    use fleet_core::ports::{InMemoryGateway, InboundHandler};

    use super::{PollingExit, PollingRunner, ReconnectPolicy};

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InboundHandler for RecordingHandler {
        async fn handle(&self, message: InboundMessage) {
            let text = message.text.unwrap_or_default();
            if text == "boom" {
                panic!("handler blew up");
            }
            self.seen.lock().await.push(text);
        }
    }

    fn message(id: &str, text: &str) -> InboundMessage {
        InboundMessage::text(id, ChatRef("1".to_owned()), UserId("1".to_owned()), text)
    }

    fn no_delay(max_retries: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[tokio::test]
    async fn recovers_from_transient_poll_failures() {
        let gateway = InMemoryGateway::default();
        gateway.push_error(GatewayError::Transport("network down".to_owned()));
        gateway.push_batch(vec![message("1", "first"), message("2", "second")]);
        let handler = Arc::new(RecordingHandler::default());

        let runner = PollingRunner::new(
            TenantId("t-1".to_owned()),
            Arc::new(gateway),
            handler.clone(),
            no_delay(Some(2)),
        );

        assert_eq!(runner.run().await, PollingExit::StreamClosed);
        assert_eq!(*handler.seen.lock().await, vec!["first".to_owned(), "second".to_owned()]);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let gateway = InMemoryGateway::default();
        for attempt in 0..3 {
            gateway.push_error(GatewayError::Transport(format!("fail-{attempt}")));
        }

        let runner = PollingRunner::new(
            TenantId("t-1".to_owned()),
            Arc::new(gateway),
            Arc::new(RecordingHandler::default()),
            no_delay(Some(2)),
        );

        assert_eq!(runner.run().await, PollingExit::RetriesExhausted);
    }

    #[tokio::test]
    async fn unauthorized_credential_stops_the_loop() {
        let gateway = InMemoryGateway::default();
        gateway.push_error(GatewayError::Unauthorized("revoked".to_owned()));
        gateway.push_batch(vec![message("1", "never delivered")]);
        let handler = Arc::new(RecordingHandler::default());

        let runner = PollingRunner::new(
            TenantId("t-1".to_owned()),
            Arc::new(gateway),
            handler.clone(),
            no_delay(None),
        );

        assert_eq!(runner.run().await, PollingExit::Unauthorized);
        assert!(handler.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn handler_panic_does_not_stop_the_loop() {
        let gateway = InMemoryGateway::default();
        gateway.push_batch(vec![message("1", "boom"), message("2", "after")]);
        let handler = Arc::new(RecordingHandler::default());

        let runner = PollingRunner::new(
            TenantId("t-1".to_owned()),
            Arc::new(gateway),
            handler.clone(),
            no_delay(None),
        );

        assert_eq!(runner.run().await, PollingExit::StreamClosed);
        assert_eq!(*handler.seen.lock().await, vec!["after".to_owned()]);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = ReconnectPolicy { max_retries: None, base_delay_ms: 250, max_delay_ms: 5_000 };
        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(2).as_millis(), 1_000);
        assert_eq!(policy.backoff(30).as_millis(), 5_000);
    }
}
