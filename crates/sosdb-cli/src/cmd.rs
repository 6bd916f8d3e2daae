//! Subcommand implementations

pub mod delete;
pub mod export;
pub mod query;
pub mod upload;

use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use sosdb_store::TagField;

use crate::config::{Config, Environment};

/// clap value parser for tag-field arguments.
pub fn parse_tag(s: &str) -> Result<TagField, String> {
    s.parse().map_err(|e: sosdb_store::StoreError| e.to_string())
}

pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    table
}

pub fn show_config(config: &Config, env: Environment) {
    let mut table = table(&["Setting", "Value"]);
    table.add_row(vec!["Environment", env.as_str()]);
    table.add_row(vec![
        "Data root",
        &config.data_root(env).display().to_string(),
    ]);
    table.add_row(vec![
        "Export directory",
        &config.export_dir(env).display().to_string(),
    ]);
    table.add_row(vec!["Database", &config.database_uri(env)]);
    table.add_row(vec![
        "Large-object collections",
        &config.storage.large_object_collections.join(", "),
    ]);
    table.add_row(vec![
        "S2 API key",
        if config.s2.api_key.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    eprintln!("\n{table}");
}
