//! In-process orchestrator: one tokio task per service
//!
//! Each component gets a child of the orchestrator's root token. Tasks
//! remove their own entry when they finish, unless the id was re-submitted
//! in the meantime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tether_plugin_api::Service;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Orchestrator, OrchestratorPhase};
use crate::plugins::RuntimeError;

/// Handle to a running component
struct Component {
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    /// Submitted but not yet polled
    starting: usize,
    /// Not yet finished
    running: usize,
}

struct Inner {
    components: Mutex<HashMap<String, Component>>,
    counters: watch::Sender<Counters>,
    root: CancellationToken,
    next_generation: AtomicU64,
}

/// Orchestrator that runs components as tasks on the current tokio runtime
#[derive(Clone)]
pub struct LocalOrchestrator {
    inner: Arc<Inner>,
}

impl Default for LocalOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalOrchestrator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                components: Mutex::new(HashMap::new()),
                counters: watch::channel(Counters::default()).0,
                root: CancellationToken::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Sorted ids of running components
    pub fn list(&self) -> Vec<String> {
        let components = self.inner.components.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = components.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    fn generation(&self) -> u64 {
        self.inner.next_generation.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Orchestrator for LocalOrchestrator {
    fn add_component(&self, service: Arc<dyn Service>) -> Result<(), RuntimeError> {
        let id = service.id().to_string();
        let runtime = RuntimeHandle::try_current().map_err(|e| {
            RuntimeError::Orchestrator(format!("cannot start service '{id}': {e}"))
        })?;

        let mut components = self.inner.components.lock().unwrap_or_else(|e| e.into_inner());
        if components.contains_key(&id) {
            tracing::debug!(service = %id, "Service already running");
            return Ok(());
        }

        let generation = self.generation();
        let cancel = self.inner.root.child_token();
        self.inner.counters.send_modify(|c| {
            c.starting += 1;
            c.running += 1;
        });

        let inner = self.inner.clone();
        let token = cancel.clone();
        let task_id = id.clone();
        let join = runtime.spawn(async move {
            inner.counters.send_modify(|c| c.starting -= 1);
            tracing::debug!(service = %task_id, "Service started");
            match service.run(token).await {
                Ok(()) => tracing::debug!(service = %task_id, "Service stopped"),
                Err(e) => tracing::warn!(service = %task_id, error = %e, "Service failed"),
            }
            {
                let mut components = inner.components.lock().unwrap_or_else(|e| e.into_inner());
                if components
                    .get(&task_id)
                    .is_some_and(|c| c.generation == generation)
                {
                    components.remove(&task_id);
                }
            }
            inner.counters.send_modify(|c| c.running -= 1);
        });

        components.insert(
            id,
            Component {
                generation,
                cancel,
                join,
            },
        );
        Ok(())
    }

    fn remove_component(&self, id: &str) -> Option<JoinHandle<()>> {
        let component = {
            let mut components = self.inner.components.lock().unwrap_or_else(|e| e.into_inner());
            components.remove(id)?
        };
        tracing::debug!(service = %id, "Service withdrawn");
        component.cancel.cancel();
        Some(component.join)
    }

    fn contains(&self, id: &str) -> bool {
        let components = self.inner.components.lock().unwrap_or_else(|e| e.into_inner());
        components.contains_key(id)
    }

    fn shutdown(&self) {
        tracing::debug!("Orchestrator shutting down");
        self.inner.root.cancel();
    }

    async fn wait_for_phase(&self, phase: OrchestratorPhase) {
        let mut rx = self.inner.counters.subscribe();
        let root = self.inner.root.clone();
        loop {
            let counters = *rx.borrow_and_update();
            let reached = match phase {
                OrchestratorPhase::Prepared => counters.starting == 0,
                OrchestratorPhase::Finished => root.is_cancelled() && counters.running == 0,
            };
            if reached {
                return;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = root.cancelled(), if phase == OrchestratorPhase::Finished && !root.is_cancelled() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::testing::TestService;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn add_component_runs_service() {
        let orchestrator = LocalOrchestrator::new();
        let service = Arc::new(TestService::new("poller"));
        orchestrator.add_component(service.clone()).unwrap();

        timeout(WAIT, orchestrator.wait_for_phase(OrchestratorPhase::Prepared))
            .await
            .unwrap();
        assert_eq!(service.starts(), 1);
        assert!(orchestrator.contains("poller"));
        assert_eq!(orchestrator.list(), vec!["poller".to_string()]);
    }

    #[tokio::test]
    async fn add_component_twice_is_noop() {
        let orchestrator = LocalOrchestrator::new();
        let service = Arc::new(TestService::new("poller"));
        orchestrator.add_component(service.clone()).unwrap();
        orchestrator.add_component(service.clone()).unwrap();

        timeout(WAIT, orchestrator.wait_for_phase(OrchestratorPhase::Prepared))
            .await
            .unwrap();
        assert_eq!(service.starts(), 1);
    }

    #[tokio::test]
    async fn remove_component_stops_task() {
        let orchestrator = LocalOrchestrator::new();
        orchestrator
            .add_component(Arc::new(TestService::new("poller")))
            .unwrap();

        let handle = orchestrator.remove_component("poller").unwrap();
        timeout(WAIT, handle).await.unwrap().unwrap();
        assert!(!orchestrator.contains("poller"));
        assert!(orchestrator.remove_component("poller").is_none());
    }

    #[tokio::test]
    async fn readd_after_remove_restarts() {
        let orchestrator = LocalOrchestrator::new();
        let service = Arc::new(TestService::new("poller"));
        orchestrator.add_component(service.clone()).unwrap();
        orchestrator.wait_for_phase(OrchestratorPhase::Prepared).await;

        let handle = orchestrator.remove_component("poller").unwrap();
        orchestrator.add_component(service.clone()).unwrap();
        handle.await.unwrap();
        orchestrator.wait_for_phase(OrchestratorPhase::Prepared).await;

        assert_eq!(service.starts(), 2);
        assert!(orchestrator.contains("poller"));
    }

    #[tokio::test]
    async fn shutdown_reaches_finished() {
        let orchestrator = LocalOrchestrator::new();
        orchestrator
            .add_component(Arc::new(TestService::new("a")))
            .unwrap();
        orchestrator
            .add_component(Arc::new(TestService::new("b")))
            .unwrap();

        orchestrator.shutdown();
        timeout(WAIT, orchestrator.wait_for_phase(OrchestratorPhase::Finished))
            .await
            .unwrap();
        assert!(orchestrator.list().is_empty());
    }

    #[tokio::test]
    async fn finished_waits_for_shutdown() {
        let orchestrator = LocalOrchestrator::new();
        let pending = timeout(
            Duration::from_millis(50),
            orchestrator.wait_for_phase(OrchestratorPhase::Finished),
        )
        .await;
        assert!(pending.is_err());
    }

    #[test]
    fn add_component_outside_runtime_fails() {
        let orchestrator = LocalOrchestrator::new();
        assert!(
            orchestrator
                .add_component(Arc::new(TestService::new("poller")))
                .is_err()
        );
    }
}
