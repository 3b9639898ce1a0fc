//! ticker - a service that logs on an interval once the host is serving

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tether_plugin_api::{Plugin, PluginError, PluginMetadata, Service, UnitContext};
use tokio_util::sync::CancellationToken;

use super::storage::Storage;

const DEFAULT_INTERVAL_SECS: u64 = 60;

#[derive(Default)]
pub struct TickerUnit;

impl Plugin for TickerUnit {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("ticker")
            .version("0.1.0")
            .description("Periodic heartbeat")
    }

    fn on_load(&mut self, ctx: &mut UnitContext) -> Result<(), PluginError> {
        let secs: u64 = ctx
            .config_get("interval_secs")
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        if secs == 0 {
            return Err(PluginError::config("interval_secs must be positive"));
        }
        let storage = ctx.resolve("storage")?.and_then(|s| s.exports::<Storage>());
        ctx.service(Arc::new(Ticker {
            id: "ticker".to_string(),
            interval: Duration::from_secs(secs),
            storage,
        }))
    }
}

struct Ticker {
    id: String,
    interval: Duration,
    storage: Option<Arc<Storage>>,
}

#[async_trait]
impl Service for Ticker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), PluginError> {
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let ticks = self
                        .storage
                        .as_ref()
                        .map(|s| s.increment("ticker.ticks", 1))
                        .unwrap_or_default();
                    tracing::info!(service = %self.id, ticks, "tick");
                }
            }
        }
        Ok(())
    }
}
