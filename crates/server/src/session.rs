//! Startup of one tenant session: gateway identity, router, receive loop and
//! event notifier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use fleet_agent::{ConversationRouter, RouterDeps, SessionProfile};
use fleet_core::domain::message::ChatRef;
use fleet_core::domain::tenant::{derive_reply_address, TenantConfig, TenantId};
use fleet_core::errors::{CoreError, GatewayError};
use fleet_core::ports::{GatewayFactory, InboundHandler};
use fleet_telegram::polling::{PollingExit, PollingRunner, ReconnectPolicy};

use crate::notifier::EventNotifier;

/// A running session. Dropping the handle detaches its tasks; they keep running.
pub struct SessionHandle {
    pub tenant_id: TenantId,
    pub reply_address: Option<String>,
    receive_loop: JoinHandle<PollingExit>,
    notifier: JoinHandle<()>,
}

impl SessionHandle {
    pub(crate) fn new(
        tenant_id: TenantId,
        reply_address: Option<String>,
        receive_loop: JoinHandle<PollingExit>,
        notifier: JoinHandle<()>,
    ) -> Self {
        Self { tenant_id, reply_address, receive_loop, notifier }
    }

    pub fn is_receiving(&self) -> bool {
        !self.receive_loop.is_finished()
    }

    pub fn is_notifying(&self) -> bool {
        !self.notifier.is_finished()
    }
}

#[async_trait]
pub trait SessionStarter: Send + Sync {
    async fn start_session(&self, tenant: TenantConfig) -> Result<SessionHandle, CoreError>;
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub address_domain: String,
    pub default_sender: String,
    pub history_limit: usize,
    pub notifier_interval: Duration,
    pub reconnect_policy: ReconnectPolicy,
}

pub struct SessionFactory {
    gateways: Arc<dyn GatewayFactory>,
    deps: RouterDeps,
    settings: SessionSettings,
}

impl SessionFactory {
    pub fn new(gateways: Arc<dyn GatewayFactory>, deps: RouterDeps, settings: SessionSettings) -> Self {
        Self { gateways, deps, settings }
    }
}

fn gateway_error(error: GatewayError) -> CoreError {
    match error {
        GatewayError::MissingCredential | GatewayError::Unauthorized(_) => {
            CoreError::Config(error.to_string())
        }
        other => CoreError::Gateway(other),
    }
}

#[async_trait]
impl SessionStarter for SessionFactory {
    async fn start_session(&self, tenant: TenantConfig) -> Result<SessionHandle, CoreError> {
        if tenant.credential.expose_secret().trim().is_empty() {
            return Err(gateway_error(GatewayError::MissingCredential));
        }

        let gateway = self.gateways.connect(&tenant.credential).await.map_err(gateway_error)?;
        let identity = gateway.resolve_identity().await.map_err(gateway_error)?;

        let reply_address =
            derive_reply_address(identity.username.as_deref(), &self.settings.address_domain);
        let display_name = tenant
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| identity.display_name.clone());

        let tenant_id = tenant.id.clone();
        let owner_chat = ChatRef(tenant.owner_id.0.clone());
        let profile = SessionProfile {
            tenant,
            display_name,
            reply_address: reply_address.clone(),
            default_sender: self.settings.default_sender.clone(),
        };
        let router = Arc::new(ConversationRouter::new(
            profile,
            self.settings.history_limit,
            self.deps.clone(),
            gateway.clone(),
        ));

        let runner = PollingRunner::new(
            tenant_id.clone(),
            gateway.clone(),
            router as Arc<dyn InboundHandler>,
            self.settings.reconnect_policy.clone(),
        );
        let loop_tenant = tenant_id.clone();
        let receive_loop = tokio::spawn(async move {
            let exit = runner.run().await;
            warn!(
                event_name = "session.receive_loop.exited",
                tenant_id = %loop_tenant,
                exit = ?exit,
                "receive loop stopped; session stays registered"
            );
            exit
        });

        let notifier = EventNotifier::new(
            tenant_id.clone(),
            owner_chat,
            self.deps.events.clone(),
            gateway,
        );
        let interval = self.settings.notifier_interval;
        let notifier = tokio::spawn(async move { notifier.run(interval).await });

        info!(
            event_name = "session.started",
            tenant_id = %tenant_id,
            gateway_user = %identity.username.as_deref().unwrap_or("-"),
            reply_address = reply_address.as_deref().unwrap_or("-"),
            "tenant session started"
        );
        Ok(SessionHandle::new(tenant_id, reply_address, receive_loop, notifier))
    }
}
