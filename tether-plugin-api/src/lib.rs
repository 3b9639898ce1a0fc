//! tether-plugin-api - unit author API for the tether host
//!
//! A unit (plugin) is a named registration scope with its own configuration
//! and lifecycle. Units are compiled into the host and registered in its
//! catalog; the host materializes them by name, runs their load body with a
//! [`UnitContext`], and tears them down again when they are unloaded or
//! hot-reloaded.
//!
//! # Example
//!
//! ```ignore
//! use tether_plugin_api::{Plugin, PluginError, PluginMetadata, UnitContext};
//!
//! #[derive(Default)]
//! pub struct Greeter;
//!
//! impl Plugin for Greeter {
//!     fn metadata(&self) -> PluginMetadata {
//!         PluginMetadata::new("greeter").version("0.1.0")
//!     }
//!
//!     fn on_load(&mut self, ctx: &mut UnitContext) -> Result<(), PluginError> {
//!         let storage = ctx.require("storage")?;
//!         ctx.dispatch("message", "greet")?;
//!         ctx.log_info(&format!("using {}", storage.id()));
//!         Ok(())
//!     }
//! }
//! ```

pub mod context;
pub mod error;
pub mod service;
pub mod types;

pub use context::{
    ConfigMeta, DEFAULT_PRIORITY, DisposeCallback, KeepDisposer, KeepInit, Kept, PluginConfig,
    UnitContext, UnitHost, WaitFuture,
};
pub use error::PluginError;
pub use service::Service;
pub use types::*;

/// The unit trait - implement this to write a tether unit.
///
/// `on_load` is the unit's body: it runs when the unit is materialized, and
/// every registration it makes through the context is owned by the unit.
/// Units that must not run before the host is serving put that work in
/// `on_apply` and return `true` from `has_deferred_apply`.
pub trait Plugin: Send + Sync {
    /// Return unit metadata
    fn metadata(&self) -> PluginMetadata;

    /// Called when the unit is loaded.
    fn on_load(&mut self, ctx: &mut UnitContext) -> Result<(), PluginError>;

    /// Whether the unit has a body that must wait for the serving phase
    fn has_deferred_apply(&self) -> bool {
        false
    }

    /// Deferred body, run once the host is serving
    fn on_apply(&mut self, _ctx: &mut UnitContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called when the unit is disposed, after its dispose callbacks ran.
    fn on_unload(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_trait_is_object_safe() {
        // This compiles only if Plugin is object-safe
        fn _takes_boxed_plugin(_: Box<dyn Plugin>) {}
    }

    #[test]
    fn test_default_hooks() {
        #[derive(Default)]
        struct Bare;

        impl Plugin for Bare {
            fn metadata(&self) -> PluginMetadata {
                PluginMetadata::new("bare")
            }

            fn on_load(&mut self, _ctx: &mut UnitContext) -> Result<(), PluginError> {
                Ok(())
            }
        }

        let mut bare = Bare;
        assert!(!bare.has_deferred_apply());
        assert!(bare.on_unload().is_ok());
        assert_eq!(bare.metadata().version, "0.0.1");
    }
}
