//! tether-core: plugin runtime for the tether chat-bot host
//!
//! This crate provides the runtime that loads, wires and tears down units:
//!
//! - **Manager** - [`PluginManager`] owns the unit registry and drives the
//!   preparing, serving and cleanup phases
//! - **Resolver** - cross-unit references through `ctx.require`, recorded in
//!   the [`DependencyGraph`]
//! - **Wait registry** - [`WaitRegistry`] readiness signals for services
//! - **Orchestrator** - [`Orchestrator`] trait and [`LocalOrchestrator`]
//!   running each service as a tokio task
//! - **Config** - [`ConfigStore`] over `tether.toml` with change broadcasts
//! - **Events** - [`RuntimeEventBus`] log of lifecycle events
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tether_core::{ConfigStore, PluginCatalog, PluginManager};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Arc::new(ConfigStore::load("tether.toml")?);
//! let manager = PluginManager::builder(catalog).config(config).build();
//!
//! let shutdown = CancellationToken::new();
//! let report = manager.run(shutdown.clone()).await;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 PluginManager                    │
//! │  ┌───────────┐  ┌──────────────┐  ┌───────────┐  │
//! │  │ Registry  │  │ Dependency   │  │ Wait      │  │
//! │  │ (units)   │  │ Graph        │  │ Registry  │  │
//! │  └───────────┘  └──────────────┘  └───────────┘  │
//! └───────┬──────────────────┬───────────────┬───────┘
//!         │                  │               │
//!   HandlerRegistry     Orchestrator    RuntimeEventBus
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod plugins;

// Re-export key types for convenience
pub use config::{BasicConfig, ConfigError, ConfigReload, ConfigStore, HostConfig};
pub use error::TetherError;
pub use events::{EventSeq, MemoryEventBus, RuntimeEvent, RuntimeEventBus};
pub use orchestrator::{LocalOrchestrator, Orchestrator, OrchestratorPhase, Teardown};
pub use plugins::{
    DependencyGraph, FnPlugin, HandlerRegistry, HotReloadWatcher, LoadReport,
    MemoryHandlerRegistry, Phase, PluginCatalog, PluginManager, PluginManagerBuilder,
    RuntimeError, UnitInfo, UnitState, WaitRegistry,
};
