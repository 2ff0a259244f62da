//! Notify-once delivery of external events to a tenant's owner.
//!
//! The persisted `notified` flag decides delivery: an alert is sent only by
//! the caller whose conditional update flipped it. The in-process `seen` set
//! just saves store round-trips and starts empty after every restart.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use fleet_core::domain::event::{EventId, ExternalEvent};
use fleet_core::domain::message::ChatRef;
use fleet_core::domain::tenant::TenantId;
use fleet_core::errors::CoreError;
use fleet_core::ports::Gateway;
use fleet_db::ExternalEventRepository;

const ALERT_PREVIEW_CHARS: usize = 300;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotifierTick {
    pub delivered: usize,
    pub skipped: usize,
}

pub struct EventNotifier {
    tenant_id: TenantId,
    owner_chat: ChatRef,
    events: Arc<dyn ExternalEventRepository>,
    gateway: Arc<dyn Gateway>,
    seen: Mutex<HashSet<EventId>>,
}

impl EventNotifier {
    pub fn new(
        tenant_id: TenantId,
        owner_chat: ChatRef,
        events: Arc<dyn ExternalEventRepository>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        Self { tenant_id, owner_chat, events, gateway, seen: Mutex::new(HashSet::new()) }
    }

    /// Marks an id as seen; false when it already was.
    fn first_sighting(&self, id: &EventId) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.insert(id.clone())
    }

    fn forget(&self, id: &EventId) {
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.remove(id);
    }

    pub async fn tick(&self) -> Result<NotifierTick, CoreError> {
        let pending = self
            .events
            .list_unnotified(&self.tenant_id)
            .await
            .map_err(CoreError::from)?;

        let mut tick = NotifierTick::default();
        for event in pending {
            if !self.first_sighting(&event.id) {
                tick.skipped += 1;
                continue;
            }

            match self.events.mark_notified(&self.tenant_id, &event.id).await {
                Ok(true) => {
                    self.deliver(&event).await;
                    tick.delivered += 1;
                }
                Ok(false) => {
                    debug!(
                        event_name = "notifier.already_claimed",
                        tenant_id = %self.tenant_id,
                        event_id = %event.id,
                        "event was marked notified elsewhere; skipping"
                    );
                    tick.skipped += 1;
                }
                Err(error) => {
                    // Flag unchanged in the store; let a later tick try again.
                    self.forget(&event.id);
                    warn!(
                        event_name = "notifier.mark_failed",
                        tenant_id = %self.tenant_id,
                        event_id = %event.id,
                        error = %error,
                        "could not mark event notified; alert withheld"
                    );
                    tick.skipped += 1;
                }
            }
        }
        Ok(tick)
    }

    async fn deliver(&self, event: &ExternalEvent) {
        let alert = alert_text(event);
        match self.gateway.send_text(&self.owner_chat, &alert).await {
            Ok(()) => info!(
                event_name = "notifier.delivered",
                tenant_id = %self.tenant_id,
                event_id = %event.id,
                "owner alerted about new event"
            ),
            // At-most-once: the flag is already set, so the alert is not retried.
            Err(error) => warn!(
                event_name = "notifier.delivery_failed",
                tenant_id = %self.tenant_id,
                event_id = %event.id,
                error = %error,
                "alert could not be delivered"
            ),
        }
    }

    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            event_name = "notifier.started",
            tenant_id = %self.tenant_id,
            interval_secs = interval.as_secs(),
            "event notifier started"
        );

        loop {
            ticker.tick().await;
            if let Err(error) = self.tick().await {
                warn!(
                    event_name = "notifier.tick_failed",
                    tenant_id = %self.tenant_id,
                    error_class = error.class(),
                    error = %error,
                    "notifier tick failed; retrying next interval"
                );
            }
        }
    }
}

pub fn alert_text(event: &ExternalEvent) -> String {
    format!(
        "📧 New email from {}\nSubject: {}\n\n{}\n\nReply with: reply {} <message>",
        event.sender,
        event.subject_or_placeholder(),
        event.preview(ALERT_PREVIEW_CHARS),
        event.id
    )
}
