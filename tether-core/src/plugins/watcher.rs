//! Hot-reload watcher with debouncing
//!
//! Watches the config file and every path a unit registered through
//! `ctx.watch_path`. After a quiet period the config file is re-read (the
//! manager's config listener applies the resulting changes) and units whose
//! watched paths changed are reloaded. Paths are forgotten once no loaded
//! unit watches them any more.

use notify::{RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::RuntimeError;
use super::manager::PluginManager;
use crate::events::{EventSeq, RuntimeEvent};

/// A unit asking to be reloaded when `path` changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    pub unit: String,
    pub path: PathBuf,
}

/// Handle to the running watcher task
pub struct HotReloadWatcher {
    task: JoinHandle<()>,
}

impl HotReloadWatcher {
    /// Start watching until `shutdown` fires
    pub fn spawn(
        manager: PluginManager,
        debounce: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self, RuntimeError> {
        let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>(100);
        let watcher = recommended_watcher(move |event| {
            // Runs on the notify thread
            let _ = tx.blocking_send(event);
        })?;

        // Subscribe before the snapshot so no registration falls in between
        let requests = manager.subscribe_watch_requests();
        let lifecycle = manager.events().subscribe();
        let mut state = WatchState::new(watcher);

        if let Some(config_path) = manager.config().path() {
            state.watch_config(config_path)?;
        }
        for request in manager.watch_paths() {
            state.add(request);
        }

        let channels = Channels {
            events: rx,
            requests,
            lifecycle,
        };
        let task = tokio::spawn(watch_loop(manager, state, channels, debounce, shutdown));
        Ok(Self { task })
    }

    /// Wait for the watcher task to end
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Watcher task ended abnormally");
        }
    }
}

struct WatchState {
    watcher: RecommendedWatcher,
    config: Option<PathBuf>,
    /// Watched path -> units to reload when something under it changes
    units: HashMap<PathBuf, BTreeSet<String>>,
    watched: HashSet<PathBuf>,
}

impl WatchState {
    fn new(watcher: RecommendedWatcher) -> Self {
        Self {
            watcher,
            config: None,
            units: HashMap::new(),
            watched: HashSet::new(),
        }
    }

    fn watch_config(&mut self, path: &Path) -> Result<(), RuntimeError> {
        let target = normalize(path);
        // Editors replace files, so watch the directory
        if let Some(dir) = target.parent()
            && dir.exists()
        {
            tracing::debug!(path = %target.display(), "Watching config file");
            self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
            self.watched.insert(dir.to_path_buf());
        }
        self.config = Some(target);
        Ok(())
    }

    fn add(&mut self, request: WatchRequest) {
        let path = normalize(&request.path);
        if !self.watched.contains(&path) {
            if !path.exists() {
                tracing::warn!(unit = %request.unit, path = %path.display(), "Watched path does not exist");
                return;
            }
            let mode = if path.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            if let Err(e) = self.watcher.watch(&path, mode) {
                tracing::warn!(unit = %request.unit, path = %path.display(), error = %e, "Failed to watch path");
                return;
            }
            self.watched.insert(path.clone());
        }
        tracing::debug!(unit = %request.unit, path = %path.display(), "Watching path for unit");
        self.units.entry(path).or_default().insert(request.unit);
    }

    /// Keep only the registrations in `current`, unwatching paths nobody needs
    fn prune(&mut self, current: &[WatchRequest]) {
        let live: HashSet<(PathBuf, String)> = current
            .iter()
            .map(|request| (normalize(&request.path), request.unit.clone()))
            .collect();
        self.units.retain(|path, units| {
            units.retain(|unit| live.contains(&(path.clone(), unit.clone())));
            !units.is_empty()
        });

        let config_dir = self.config.as_deref().and_then(Path::parent);
        let stale: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|path| !self.units.contains_key(*path) && Some(path.as_path()) != config_dir)
            .cloned()
            .collect();
        for path in stale {
            tracing::debug!(path = %path.display(), "No unit watches path any more");
            if let Err(e) = self.watcher.unwatch(&path) {
                tracing::debug!(path = %path.display(), error = %e, "Failed to unwatch path");
            }
            self.watched.remove(&path);
        }
    }

    fn classify(&self, changed: &HashSet<PathBuf>) -> (bool, BTreeSet<String>) {
        let config_changed = self
            .config
            .as_ref()
            .is_some_and(|config| changed.contains(config));
        let units = affected_units(&self.units, changed);
        (config_changed, units)
    }
}

/// Units whose watched path is, or contains, one of the changed paths
fn affected_units(
    watched: &HashMap<PathBuf, BTreeSet<String>>,
    changed: &HashSet<PathBuf>,
) -> BTreeSet<String> {
    watched
        .iter()
        .filter(|(root, _)| changed.iter().any(|path| path.starts_with(root)))
        .flat_map(|(_, units)| units.iter().cloned())
        .collect()
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn collect(changed: &mut HashSet<PathBuf>, event: notify::Result<notify::Event>) {
    match event {
        Ok(event) => changed.extend(event.paths.iter().map(|p| normalize(p))),
        Err(e) => tracing::warn!(error = %e, "File watcher reported an error"),
    }
}

struct Channels {
    events: mpsc::Receiver<notify::Result<notify::Event>>,
    requests: mpsc::UnboundedReceiver<WatchRequest>,
    lifecycle: broadcast::Receiver<(EventSeq, RuntimeEvent)>,
}

async fn watch_loop(
    manager: PluginManager,
    mut state: WatchState,
    channels: Channels,
    debounce: Duration,
    shutdown: CancellationToken,
) {
    let Channels {
        mut events,
        mut requests,
        mut lifecycle,
    } = channels;
    loop {
        let first = tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(request) = requests.recv() => {
                state.add(request);
                continue;
            }
            event = lifecycle.recv() => {
                match event {
                    Ok((_, RuntimeEvent::Unloaded { .. }))
                    | Err(broadcast::error::RecvError::Lagged(_)) => {
                        state.prune(&manager.watch_paths());
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                continue;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        tracing::debug!("File change detected, starting debounce");
        let mut changed = HashSet::new();
        collect(&mut changed, first);

        // Wait for a quiet period
        loop {
            match tokio::time::timeout(debounce, events.recv()).await {
                Ok(Some(event)) => collect(&mut changed, event),
                Ok(None) => return,
                Err(_) => break,
            }
        }

        let (config_changed, units) = state.classify(&changed);
        if config_changed {
            match manager.config().reload_file() {
                Ok(changes) => {
                    tracing::info!(changes = changes.len(), "Config file reloaded");
                }
                Err(e) => tracing::error!(error = %e, "Failed to reload config file"),
            }
        }

        for unit in units {
            if !manager.is_loaded(&unit) {
                continue;
            }
            tracing::info!(unit = %unit, "Watched file changed, reloading unit");
            if let Err(e) = manager.reload(&unit) {
                tracing::warn!(unit = %unit, error = %e, "Hot reload failed");
            }
        }
        state.prune(&manager.watch_paths());
    }
    tracing::debug!("Watcher stopped");
}
