//! settings - static unit exposing its config table to other units

use tether_plugin_api::{Plugin, PluginConfig, PluginError, PluginMetadata, UnitContext};

#[derive(Default)]
pub struct Settings;

impl Plugin for Settings {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new("settings")
            .version("0.1.0")
            .description("Shared settings")
            .static_unit()
    }

    fn on_load(&mut self, ctx: &mut UnitContext) -> Result<(), PluginError> {
        let config: PluginConfig = ctx.config().clone();
        ctx.export(config)
    }
}
