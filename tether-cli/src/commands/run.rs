//! `tether run` - serve until interrupted

use anyhow::Result;
use clap::Args;
use std::path::Path;
use std::time::Duration;
use tether_core::HotReloadWatcher;
use tokio_util::sync::CancellationToken;

use super::{build_manager, open_config};

#[derive(Args)]
pub struct RunArgs {
    /// Reload units and config when watched files change
    #[arg(long)]
    pub watch: bool,
}

pub async fn run(args: RunArgs, config_path: &Path) -> Result<()> {
    let config = open_config(config_path)?;
    let basic = config.basic();
    let manager = build_manager(config);
    let shutdown = CancellationToken::new();

    let watcher = if args.watch || basic.watch {
        let debounce = Duration::from_millis(basic.reload_debounce_ms);
        Some(HotReloadWatcher::spawn(
            manager.clone(),
            debounce,
            shutdown.child_token(),
        )?)
    } else {
        None
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal.cancel(),
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    tracing::info!(config = %config_path.display(), "Starting tether");
    let report = manager.run(shutdown).await;

    if let Some(watcher) = watcher {
        watcher.join().await;
    }

    if !report.failed.is_empty() {
        for (id, error) in &report.failed {
            tracing::warn!(unit = %id, error = %error, "Unit failed during startup");
        }
    }
    tracing::info!(loaded = report.loaded.len(), "tether stopped");
    Ok(())
}
