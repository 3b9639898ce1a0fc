use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use std::path::Path;

use super::open_config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the configured units in load order
    Show,
    /// Show the configuration file path
    Path,
}

pub fn run(args: ConfigArgs, config_path: &Path) -> Result<()> {
    match args.command {
        ConfigCommands::Show => show_config(config_path),
        ConfigCommands::Path => {
            println!("Config file: {}", config_path.display());
            Ok(())
        }
    }
}

fn show_config(config_path: &Path) -> Result<()> {
    let config = open_config(config_path)?.snapshot();

    println!("Config file: {}", config_path.display());
    println!("Log level:   {}", config.basic.log_level);
    println!(
        "Watch:       {} (debounce {}ms)",
        if config.basic.watch { "on" } else { "off" },
        config.basic.reload_debounce_ms
    );
    if !config.basic.unit_allowlist.is_empty() {
        println!("Allow-list:  {}", config.basic.unit_allowlist.join(", "));
    }
    println!();

    let order = config.load_order();
    if order.is_empty() {
        println!("No units configured.");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Unit").fg(Color::Cyan),
            Cell::new("Priority").fg(Color::Cyan),
            Cell::new("Flags").fg(Color::Cyan),
            Cell::new("Keys").fg(Color::Cyan),
        ]);
        for key in order {
            let Some(unit) = config.plugin(&key) else {
                continue;
            };
            let meta = unit.meta();
            let flags: Vec<&str> = [
                (meta.disable, "disabled"),
                (meta.is_static, "static"),
                (meta.optional, "optional"),
            ]
            .into_iter()
            .filter_map(|(set, name)| set.then_some(name))
            .collect();
            table.add_row(vec![
                Cell::new(&key),
                Cell::new(meta.priority),
                Cell::new(flags.join(", ")),
                Cell::new(unit.keys().collect::<Vec<_>>().join(", ")),
            ]);
        }
        println!("{table}");
    }

    let disabled: Vec<&str> = config.disabled_keys().collect();
    if !disabled.is_empty() {
        println!();
        println!("Skipped (~): {}", disabled.join(", "));
    }
    Ok(())
}
