//! Long-lived components a unit hands to the task orchestrator

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::PluginError;

/// A long-lived component owned by a unit.
///
/// The host submits services to its orchestrator once the serving phase
/// starts (or immediately, for units loaded while serving) and withdraws them
/// when the owning unit is disabled or disposed. `run` should return promptly
/// once `shutdown` is cancelled.
#[async_trait]
pub trait Service: Send + Sync {
    /// Stable id, also the name it is announced under in the wait registry
    fn id(&self) -> &str;

    /// Run until completion or until `shutdown` fires
    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), PluginError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ticker;

    #[async_trait]
    impl Service for Ticker {
        fn id(&self) -> &str {
            "ticker"
        }

        async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), PluginError> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    #[test]
    fn test_service_is_object_safe() {
        let service: Arc<dyn Service> = Arc::new(Ticker);
        assert_eq!(service.id(), "ticker");
    }

    #[tokio::test]
    async fn test_service_stops_on_cancel() {
        let token = CancellationToken::new();
        let service: Arc<dyn Service> = Arc::new(Ticker);
        token.cancel();
        assert!(service.run(token).await.is_ok());
    }
}
