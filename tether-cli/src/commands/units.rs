//! `tether units` - list units

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use std::path::Path;

use super::{build_manager, open_config};

#[derive(Args)]
pub struct UnitsArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: UnitsArgs, config_path: &Path) -> Result<()> {
    let manager = build_manager(open_config(config_path)?);
    manager.load_configured();
    let units = manager.units();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&units)?);
    } else if units.is_empty() {
        println!("No units loaded.");
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            Cell::new("Unit").fg(Color::Cyan),
            Cell::new("State").fg(Color::Cyan),
            Cell::new("Version").fg(Color::Cyan),
            Cell::new("Services").fg(Color::Cyan),
            Cell::new("Handlers").fg(Color::Cyan),
            Cell::new("Description").fg(Color::Cyan),
        ]);
        for unit in &units {
            let mut id = unit.id.clone();
            if unit.is_static {
                id.push_str(" (static)");
            }
            let (version, description) = unit
                .metadata
                .as_ref()
                .map(|m| (m.version.clone(), m.description.clone()))
                .unwrap_or_default();
            table.add_row(vec![
                Cell::new(id),
                Cell::new(unit.state),
                Cell::new(version),
                Cell::new(unit.services.join(", ")),
                Cell::new(unit.handlers),
                Cell::new(description),
            ]);
        }
        println!("{table}");
    }

    if !args.json {
        let loaded: Vec<&str> = units.iter().map(|u| u.path.as_str()).collect();
        let available: Vec<&str> = manager
            .catalog()
            .names()
            .filter(|name| !loaded.contains(name))
            .collect();
        if !available.is_empty() {
            println!();
            println!("Available: {}", available.join(", "));
        }
    }

    manager.cleanup().await;
    Ok(())
}
