//! greeter - answers greetings, counting them in `storage`

use tether_plugin_api::{Plugin, PluginError, PluginMetadata, UnitContext};

use super::storage::Storage;

#[derive(Default)]
pub struct Greeter;

impl Plugin for Greeter {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("greeter")
            .version("0.1.0")
            .description("Replies to greetings")
    }

    fn on_load(&mut self, ctx: &mut UnitContext) -> Result<(), PluginError> {
        let storage = ctx.require_exports::<Storage>("storage")?;
        let greeting: String = ctx.config_get("greeting").unwrap_or_else(|| "hello".into());
        storage.set("greeter.greeting", greeting);
        let loads = storage.increment("greeter.loads", 1);

        ctx.dispatch("message", "greet")?;
        ctx.log_info(&format!("ready (load #{loads})"));
        Ok(())
    }
}
