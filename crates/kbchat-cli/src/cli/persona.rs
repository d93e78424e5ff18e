//! Persona listing, for picking one when starting a conversation.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use crate::cli::chat::renderer::truncate;
use crate::state::AppState;

/// List personas known to the back-end.
///
/// # Examples
///
/// ```bash
/// kbchat personas
/// kbchat new --persona <id>
/// ```
pub async fn list_personas(state: &AppState, json: bool) -> Result<()> {
    let personas = state
        .backend
        .list_personas()
        .await
        .context("Failed to load personas")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&personas)?);
        return Ok(());
    }

    if personas.is_empty() {
        println!();
        println!("  {} No personas configured.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Description").fg(Color::White),
        Cell::new("Default").fg(Color::White),
    ]);

    for persona in &personas {
        let default_cell = if persona.is_default {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(persona.id).fg(Color::DarkGrey),
            Cell::new(&persona.name).fg(Color::Cyan),
            Cell::new(truncate(persona.description.as_deref().unwrap_or(""), 60))
                .fg(Color::White),
            default_cell,
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}
