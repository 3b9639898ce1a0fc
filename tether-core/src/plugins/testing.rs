//! Test doubles shared by the runtime's unit tests

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tether_plugin_api::{
    DisposeCallback, Exports, HandlerId, KeepDisposer, KeepInit, Kept, Plugin, PluginConfig,
    PluginError, PluginMetadata, Service, Subscription, UnitContext, UnitHost, UnitRef,
    WaitFuture, WaitOutcome,
};
use tokio_util::sync::CancellationToken;

/// Host that accepts everything and resolves nothing
pub struct NoopHost;

impl UnitHost for NoopHost {
    fn resolve(&self, _requester: &str, _name: &str) -> Result<Option<UnitRef>, PluginError> {
        Ok(None)
    }

    fn declare_subunit(&self, _owner: &str, _name: &str) -> Result<(), PluginError> {
        Ok(())
    }

    fn load_subunit(
        &self,
        _owner: &str,
        name: &str,
        _config: PluginConfig,
    ) -> Result<UnitRef, PluginError> {
        Err(PluginError::not_found(name))
    }

    fn export(&self, _unit: &str, _exports: Exports) -> Result<(), PluginError> {
        Ok(())
    }

    fn add_service(&self, _unit: &str, _service: Arc<dyn Service>) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_dispose(&self, _unit: &str, _callback: DisposeCallback) -> Result<(), PluginError> {
        Ok(())
    }

    fn register_handler(
        &self,
        _unit: &str,
        event_type: &str,
        name: &str,
    ) -> Result<Subscription, PluginError> {
        Ok(Subscription {
            id: HandlerId(0),
            event_type: event_type.to_string(),
            name: name.to_string(),
        })
    }

    fn keep(
        &self,
        _unit: &str,
        _key: &str,
        init: KeepInit,
        _disposer: Option<KeepDisposer>,
    ) -> Result<Kept, PluginError> {
        Ok(init())
    }

    fn watch_path(&self, _unit: &str, _path: PathBuf) -> Result<(), PluginError> {
        Ok(())
    }

    fn wait_for(&self, _resource: &str) -> WaitFuture {
        Box::pin(async { WaitOutcome::Ready })
    }
}

/// Unit with an empty body
pub struct TestPlugin {
    metadata: PluginMetadata,
    deferred: bool,
}

impl TestPlugin {
    pub fn with_metadata(metadata: PluginMetadata) -> Self {
        Self {
            metadata,
            deferred: false,
        }
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }
}

impl Plugin for TestPlugin {
    fn metadata(&self) -> PluginMetadata {
        self.metadata.clone()
    }

    fn on_load(&mut self, _ctx: &mut UnitContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn has_deferred_apply(&self) -> bool {
        self.deferred
    }
}

/// Service that runs until cancelled and counts its starts
pub struct TestService {
    id: String,
    pub starts: AtomicUsize,
}

impl TestService {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            starts: AtomicUsize::new(0),
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Service for TestService {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), PluginError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        shutdown.cancelled().await;
        Ok(())
    }
}
