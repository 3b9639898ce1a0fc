//! echo - repeats messages; reusable as `echo#<key>`

use tether_plugin_api::{Plugin, PluginError, PluginMetadata, UnitContext};

#[derive(Default)]
pub struct Echo;

impl Plugin for Echo {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("echo")
            .version("0.1.0")
            .description("Repeats messages back, one instance per channel")
            .reusable()
    }

    fn on_load(&mut self, ctx: &mut UnitContext) -> Result<(), PluginError> {
        let event_type: String = ctx.config_get("event").unwrap_or_else(|| "message".into());
        ctx.dispatch(&event_type, "echo")?;
        if let Some(key) = ctx.instance_key() {
            ctx.log_debug(&format!("instance {key} listening on {event_type}"));
        }
        Ok(())
    }
}
