//! Wait registry - named readiness signals
//!
//! Units use this to block until a service elsewhere becomes ready without
//! polling. Each resource id maps to a `watch` channel carrying its readiness
//! and a withdrawal epoch:
//!
//! - `assign` marks the resource ready; current and future waiters resolve.
//! - `clear` withdraws it; current waiters resolve with `Withdrawn` so nobody
//!   blocks forever on shutdown, later waiters block until the next `assign`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tether_plugin_api::WaitOutcome;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Readiness {
    ready: bool,
    epoch: u64,
}

/// Registry of named resources callers can wait on
#[derive(Debug, Default)]
pub struct WaitRegistry {
    slots: Mutex<HashMap<String, watch::Sender<Readiness>>>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slot<R>(&self, id: &str, f: impl FnOnce(&watch::Sender<Readiness>) -> R) -> R {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(Readiness::default()).0);
        f(slot)
    }

    /// Mark `id` ready. Idempotent.
    pub fn assign(&self, id: &str) {
        tracing::debug!(resource = %id, "Resource assigned");
        self.with_slot(id, |slot| {
            slot.send_if_modified(|r| {
                let changed = !r.ready;
                r.ready = true;
                changed
            });
        });
    }

    /// Withdraw `id`, waking everyone currently waiting on it
    pub fn clear(&self, id: &str) {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(id) {
            tracing::debug!(resource = %id, "Resource cleared");
            slot.send_modify(|r| {
                r.ready = false;
                r.epoch += 1;
            });
        }
    }

    /// Withdraw every resource
    pub fn clear_all(&self) {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for slot in slots.values() {
            slot.send_modify(|r| {
                r.ready = false;
                r.epoch += 1;
            });
        }
    }

    /// Whether `id` is currently assigned
    pub fn is_ready(&self, id: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(id).is_some_and(|slot| slot.borrow().ready)
    }

    /// Wait until `id` is assigned.
    ///
    /// The registry lock is only held while subscribing, never across the
    /// suspension.
    pub fn wait_for(&self, id: &str) -> impl Future<Output = WaitOutcome> + Send + 'static {
        let mut rx = self.with_slot(id, |slot| slot.subscribe());
        let start = *rx.borrow_and_update();
        async move {
            if start.ready {
                return WaitOutcome::Ready;
            }
            loop {
                if rx.changed().await.is_err() {
                    return WaitOutcome::Withdrawn;
                }
                let now = *rx.borrow_and_update();
                if now.ready {
                    return WaitOutcome::Ready;
                }
                if now.epoch != start.epoch {
                    return WaitOutcome::Withdrawn;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    const SHORT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn wait_before_assign_unblocks_on_assign() {
        let registry = Arc::new(WaitRegistry::new());
        let waiter = tokio::spawn(registry.wait_for("db"));

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        registry.assign("db");
        let outcome = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[tokio::test]
    async fn wait_after_assign_returns_immediately() {
        let registry = WaitRegistry::new();
        registry.assign("db");
        assert_eq!(registry.wait_for("db").await, WaitOutcome::Ready);
        assert!(registry.is_ready("db"));
    }

    #[tokio::test]
    async fn assign_is_idempotent() {
        let registry = WaitRegistry::new();
        registry.assign("db");
        registry.assign("db");
        assert!(registry.is_ready("db"));
        assert_eq!(registry.wait_for("db").await, WaitOutcome::Ready);
    }

    #[tokio::test]
    async fn wait_after_clear_blocks_until_next_assign() {
        let registry = Arc::new(WaitRegistry::new());
        registry.assign("db");
        registry.clear("db");
        assert!(!registry.is_ready("db"));

        let pending = timeout(SHORT, registry.wait_for("db")).await;
        assert!(pending.is_err(), "wait should block after clear");

        let waiter = tokio::spawn(registry.wait_for("db"));
        tokio::task::yield_now().await;
        registry.assign("db");
        let outcome = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Ready);
    }

    #[tokio::test]
    async fn clear_releases_current_waiters() {
        let registry = Arc::new(WaitRegistry::new());
        let waiter = tokio::spawn(registry.wait_for("db"));
        tokio::task::yield_now().await;

        registry.clear("db");
        let outcome = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(outcome, WaitOutcome::Withdrawn);
    }

    #[tokio::test]
    async fn clear_all_releases_every_resource() {
        let registry = Arc::new(WaitRegistry::new());
        let a = tokio::spawn(registry.wait_for("a"));
        let b = tokio::spawn(registry.wait_for("b"));
        tokio::task::yield_now().await;

        registry.clear_all();
        assert_eq!(a.await.unwrap(), WaitOutcome::Withdrawn);
        assert_eq!(b.await.unwrap(), WaitOutcome::Withdrawn);
    }

    #[test]
    fn clear_unknown_resource_is_noop() {
        let registry = WaitRegistry::new();
        registry.clear("nothing");
        assert!(!registry.is_ready("nothing"));
    }
}
