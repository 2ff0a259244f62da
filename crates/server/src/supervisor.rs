//! Reconciles running sessions against the active-tenant list.
//!
//! A tick starts a session for each active tenant that has none. Sessions are
//! never stopped here: a deactivated tenant keeps its session until restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use fleet_core::domain::tenant::TenantId;
use fleet_core::errors::CoreError;

use crate::registry::TenantRegistry;
use crate::session::{SessionHandle, SessionStarter};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<TenantId>,
    pub failed: Vec<TenantId>,
    pub already_running: usize,
    /// Registered sessions whose receive loop or notifier has exited.
    pub stalled: usize,
}

pub struct SessionSupervisor {
    registry: TenantRegistry,
    starter: Arc<dyn SessionStarter>,
    sessions: Mutex<HashMap<TenantId, SessionHandle>>,
    /// Size of `sessions`, readable while a reconcile pass holds the lock.
    running: AtomicUsize,
}

impl SessionSupervisor {
    pub fn new(registry: TenantRegistry, starter: Arc<dyn SessionStarter>) -> Self {
        Self {
            registry,
            starter,
            sessions: Mutex::new(HashMap::new()),
            running: AtomicUsize::new(0),
        }
    }

    /// One reconciliation pass. The session map stays locked for the whole
    /// pass so overlapping calls cannot start the same tenant twice.
    pub async fn reconcile(&self) -> Result<ReconcileReport, CoreError> {
        let mut sessions = self.sessions.lock().await;
        let tenants = self.registry.list_active_tenants().await?;

        let mut report = ReconcileReport::default();
        for tenant in tenants {
            if sessions.contains_key(&tenant.id) {
                report.already_running += 1;
                continue;
            }

            let tenant_id = tenant.id.clone();
            match self.starter.start_session(tenant).await {
                Ok(handle) => {
                    sessions.insert(tenant_id.clone(), handle);
                    self.running.store(sessions.len(), Ordering::Release);
                    report.started.push(tenant_id);
                }
                Err(error) => {
                    warn!(
                        event_name = "system.supervisor.session_start_failed",
                        tenant_id = %tenant_id,
                        error_class = error.class(),
                        error = %error,
                        "session start failed; retrying next tick"
                    );
                    report.failed.push(tenant_id);
                }
            }
        }

        report.stalled = sessions
            .values()
            .filter(|handle| !handle.is_receiving() || !handle.is_notifying())
            .count();
        if report.stalled > 0 {
            warn!(
                event_name = "system.supervisor.sessions_stalled",
                stalled = report.stalled,
                "stalled sessions stay registered until restart"
            );
        }

        if !report.started.is_empty() || !report.failed.is_empty() {
            info!(
                event_name = "system.supervisor.reconciled",
                started = report.started.len(),
                failed = report.failed.len(),
                running = sessions.len(),
                "reconcile pass completed"
            );
        }
        Ok(report)
    }

    /// Reconciles immediately, then once per `interval`, for the life of the process.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = self.reconcile().await {
                warn!(
                    event_name = "system.supervisor.reconcile_failed",
                    error_class = error.class(),
                    error = %error,
                    "reconcile pass failed; existing sessions untouched"
                );
            }
        }
    }

    /// Never waits on an in-progress reconcile pass.
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub async fn running_tenants(&self) -> Vec<TenantId> {
        let mut tenants = self.sessions.lock().await.keys().cloned().collect::<Vec<_>>();
        tenants.sort();
        tenants
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use fleet_core::domain::tenant::TenantId;
    use fleet_core::errors::CoreError;
    use fleet_db::repositories::InMemoryTenantRepository;
    use fleet_db::TenantRepository;

    use super::test_support::RecordingStarter;
    use super::SessionSupervisor;
    use crate::registry::test_support::{tenant, UnavailableTenantRepository};
    use crate::registry::TenantRegistry;

    fn id(value: &str) -> TenantId {
        TenantId(value.to_owned())
    }

    async fn supervisor_with(
        tenants: &[&str],
    ) -> (Arc<InMemoryTenantRepository>, Arc<RecordingStarter>, SessionSupervisor) {
        let repository = Arc::new(InMemoryTenantRepository::default());
        for tenant_id in tenants {
            repository.insert(tenant(tenant_id)).await.expect("insert");
        }
        let starter = Arc::new(RecordingStarter::default());
        let supervisor =
            SessionSupervisor::new(TenantRegistry::new(repository.clone()), starter.clone());
        (repository, starter, supervisor)
    }

    #[tokio::test]
    async fn repeated_ticks_start_each_tenant_once() {
        let (repository, starter, supervisor) = supervisor_with(&["t-1", "t-2"]).await;

        let first = supervisor.reconcile().await.expect("first tick");
        let second = supervisor.reconcile().await.expect("second tick");
        repository.insert(tenant("t-3")).await.expect("insert");
        let third = supervisor.reconcile().await.expect("third tick");

        assert_eq!(first.started, vec![id("t-1"), id("t-2")]);
        assert!(second.started.is_empty());
        assert_eq!(second.already_running, 2);
        assert_eq!(third.started, vec![id("t-3")]);
        assert_eq!(starter.attempts().len(), 3);
        assert_eq!(supervisor.running_count(), 3);
    }

    #[tokio::test]
    async fn overlapping_reconciles_do_not_duplicate_sessions() {
        let (_repository, starter, supervisor) = supervisor_with(&["t-1", "t-2"]).await;

        let (a, b) = tokio::join!(supervisor.reconcile(), supervisor.reconcile());
        a.expect("first");
        b.expect("second");

        assert_eq!(starter.attempts().len(), 2);
        assert_eq!(supervisor.running_tenants().await, vec![id("t-1"), id("t-2")]);
    }

    #[tokio::test]
    async fn failed_start_is_retried_next_tick_without_blocking_others() {
        let (_repository, starter, supervisor) = supervisor_with(&["t-1", "t-2"]).await;
        starter.fail("t-1");

        let first = supervisor.reconcile().await.expect("first tick");
        assert_eq!(first.failed, vec![id("t-1")]);
        assert_eq!(first.started, vec![id("t-2")]);

        starter.recover("t-1");
        let second = supervisor.reconcile().await.expect("second tick");
        assert_eq!(second.started, vec![id("t-1")]);
        assert_eq!(supervisor.running_count(), 2);
    }

    #[tokio::test]
    async fn unavailable_store_fails_the_tick_only() {
        let starter = Arc::new(RecordingStarter::default());
        let supervisor = SessionSupervisor::new(
            TenantRegistry::new(Arc::new(UnavailableTenantRepository)),
            starter.clone(),
        );

        let error = supervisor.reconcile().await.expect_err("store down");
        assert!(matches!(error, CoreError::StoreUnavailable(_)));
        assert!(starter.attempts().is_empty());
        assert_eq!(supervisor.running_count(), 0);
    }

    #[tokio::test]
    async fn deactivated_tenant_keeps_its_session() {
        let (repository, _starter, supervisor) = supervisor_with(&["t-1"]).await;
        supervisor.reconcile().await.expect("first tick");

        repository.set_active(&id("t-1"), false).await.expect("deactivate");
        let report = supervisor.reconcile().await.expect("second tick");

        assert_eq!(report.already_running, 0);
        assert_eq!(supervisor.running_tenants().await, vec![id("t-1")]);
    }

    #[tokio::test]
    async fn closed_receive_loop_is_reported_but_not_restarted() {
        let (_repository, starter, supervisor) = supervisor_with(&["t-1"]).await;
        starter.close_stream("t-1");

        supervisor.reconcile().await.expect("first tick");
        tokio::time::sleep(Duration::from_millis(20)).await;
        let report = supervisor.reconcile().await.expect("second tick");

        assert_eq!(report.stalled, 1);
        assert_eq!(report.already_running, 1);
        assert_eq!(starter.attempts().len(), 1);
    }

    #[tokio::test]
    async fn running_count_is_readable_during_a_slow_start() {
        let (repository, starter, supervisor) = supervisor_with(&["t-1", "t-2"]).await;
        let supervisor = Arc::new(supervisor);
        supervisor.reconcile().await.expect("first tick");
        repository.insert(tenant("t-3")).await.expect("insert");
        starter.hold_starts();

        let pass = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.reconcile().await }
        });
        starter.wait_until_start_begins().await;

        assert!(supervisor.sessions.try_lock().is_err(), "pass should hold the session lock");
        assert_eq!(supervisor.running_count(), 2);

        starter.release_starts();
        pass.await.expect("join").expect("second tick");
        assert_eq!(supervisor.running_count(), 3);
    }
}
