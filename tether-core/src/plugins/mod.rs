//! Plugin runtime for tether
//!
//! This module provides the infrastructure for loading and managing units:
//!
//! - [`PluginManager`]: owns the unit registry, drives the phases
//! - [`PluginCatalog`]: the compiled-in unit factories
//! - [`DependencyGraph`]: who references whom, keyed by unit path
//! - [`WaitRegistry`]: named readiness signals for services
//! - [`HotReloadWatcher`]: reloads units and config when files change
//!
//! # Example
//!
//! ```ignore
//! use tether_core::plugins::{FnPlugin, PluginCatalog, PluginManager};
//! use tether_plugin_api::PluginMetadata;
//!
//! let mut catalog = PluginCatalog::new();
//! catalog.register_fn(
//!     "greeter",
//!     FnPlugin::new(PluginMetadata::new("greeter"), |ctx| {
//!         ctx.dispatch("message", "greet")?;
//!         Ok(())
//!     }),
//! );
//!
//! let manager = PluginManager::new(catalog);
//! manager.load("greeter")?;
//! manager.serve().await;
//! manager.disable("greeter")?.detach();
//! manager.cleanup().await;
//! ```

mod catalog;
mod error;
mod graph;
mod handlers;
mod host;
mod keep;
mod manager;
mod resolver;
mod state;
mod unit;
mod waiter;
mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{FnPlugin, PluginCatalog, PluginFactory, UnitBody};
pub use error::RuntimeError;
pub use graph::DependencyGraph;
pub use handlers::{HandlerRegistry, MemoryHandlerRegistry, RegisteredHandler};
pub use keep::KeepStore;
pub use manager::{LoadReport, PluginManager, PluginManagerBuilder};
pub use state::{Phase, UnitState};
pub use unit::UnitInfo;
pub use waiter::WaitRegistry;
pub use watcher::{HotReloadWatcher, WatchRequest};
