//! Task orchestrator boundary
//!
//! Services owned by units are long-running tasks. The manager never spawns
//! them itself: it submits them to an [`Orchestrator`] while serving and
//! withdraws them on disable/dispose. Withdrawal is non-blocking and yields
//! the task's `JoinHandle`; the caller decides whether to await it.

mod local;

use std::sync::Arc;

use async_trait::async_trait;
use tether_plugin_api::Service;
use tokio::task::JoinHandle;

use crate::plugins::RuntimeError;

pub use local::LocalOrchestrator;

/// Orchestrator phases the supervisor waits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorPhase {
    /// Every submitted component has started running
    Prepared,
    /// Shutdown was requested and every component has stopped
    Finished,
}

/// Runs services on behalf of the plugin manager
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Start running `service`. Submitting an id that is already running is
    /// a no-op.
    fn add_component(&self, service: Arc<dyn Service>) -> Result<(), RuntimeError>;

    /// Ask the component to stop; returns its task if it was running
    fn remove_component(&self, id: &str) -> Option<JoinHandle<()>>;

    /// Whether a component with `id` is running
    fn contains(&self, id: &str) -> bool;

    /// Stop every component
    fn shutdown(&self);

    /// Wait until the orchestrator reaches `phase`
    async fn wait_for_phase(&self, phase: OrchestratorPhase);
}

/// Withdrawal handles returned by disable/dispose
#[derive(Debug, Default)]
#[must_use = "a teardown should be awaited or explicitly detached"]
pub struct Teardown {
    handles: Vec<JoinHandle<()>>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn extend(&mut self, other: Teardown) {
        self.handles.extend(other.handles);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Let the withdrawn tasks finish on their own
    pub fn detach(self) {}

    /// Wait for every withdrawn task to finish
    pub async fn wait(self) {
        for handle in self.handles {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                tracing::warn!(error = %e, "Service task panicked during teardown");
            }
        }
    }
}
