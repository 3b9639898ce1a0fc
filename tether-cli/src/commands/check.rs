//! `tether check` - load the configured units once and report

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use std::path::Path;

use super::{build_manager, open_config};

pub async fn run(config_path: &Path) -> Result<()> {
    let manager = build_manager(open_config(config_path)?);
    let report = manager.load_configured();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Unit").fg(Color::Cyan),
        Cell::new("Result").fg(Color::Cyan),
        Cell::new("Detail").fg(Color::Cyan),
    ]);
    for id in &report.loaded {
        let state = manager
            .state(id)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unloaded".to_string());
        table.add_row(vec![
            Cell::new(id),
            Cell::new("ok").fg(Color::Green),
            Cell::new(state),
        ]);
    }
    for (id, error) in &report.failed {
        table.add_row(vec![
            Cell::new(id),
            Cell::new("failed").fg(Color::Red),
            Cell::new(error),
        ]);
    }
    for id in &report.skipped {
        table.add_row(vec![
            Cell::new(id),
            Cell::new("skipped").fg(Color::Yellow),
            Cell::new("disabled with ~"),
        ]);
    }
    println!("{table}");

    manager.cleanup().await;

    if !report.failed.is_empty() {
        bail!("{} unit(s) failed to load", report.failed.len());
    }
    Ok(())
}
