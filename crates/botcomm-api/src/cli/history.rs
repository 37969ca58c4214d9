//! `bcp history`: show the persisted message history.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use botcomm_types::config::StoreBackend;
use botcomm_types::message::{Envelope, MessageType, Priority};

use crate::state::AppState;

const DATA_PREVIEW_CHARS: usize = 60;

/// The last `limit` entries, optionally restricted to one type, oldest first.
fn select_entries(
    entries: Vec<Envelope>,
    message_type: Option<MessageType>,
    limit: usize,
) -> Vec<Envelope> {
    let mut selected: Vec<Envelope> = entries
        .into_iter()
        .filter(|e| message_type.is_none_or(|t| e.message_type == t))
        .collect();
    let skip = selected.len().saturating_sub(limit);
    selected.drain(..skip);
    selected
}

fn preview(data: &serde_json::Value) -> String {
    if data.is_null() {
        return String::new();
    }
    let text = data.to_string();
    if text.chars().count() > DATA_PREVIEW_CHARS {
        let cut: String = text.chars().take(DATA_PREVIEW_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn type_cell(message_type: MessageType) -> Cell {
    let cell = Cell::new(message_type.as_str());
    match message_type {
        MessageType::Error => cell.fg(Color::Red),
        MessageType::Heartbeat => cell.fg(Color::DarkGrey),
        MessageType::Request | MessageType::Response => cell.fg(Color::Cyan),
        MessageType::Notification | MessageType::Broadcast => cell.fg(Color::White),
    }
}

fn priority_cell(priority: Priority) -> Cell {
    let cell = Cell::new(priority.as_str());
    match priority {
        Priority::Critical => cell.fg(Color::Red),
        Priority::High => cell.fg(Color::Yellow),
        Priority::Medium => cell,
        Priority::Low => cell.fg(Color::DarkGrey),
    }
}

pub async fn history(
    state: &AppState,
    limit: usize,
    message_type: Option<MessageType>,
    store: Option<StoreBackend>,
    json: bool,
) -> Result<()> {
    let entries = state.load_history(state.backend(store)).await?;
    let entries = select_entries(entries, message_type, limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!(
            "  {} No persisted history. Record some with: {}",
            style("i").blue().bold(),
            style("bcp run").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Time").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Priority").fg(Color::White),
        Cell::new("From").fg(Color::White),
        Cell::new("To").fg(Color::White),
        Cell::new("Data").fg(Color::White),
    ]);

    for envelope in &entries {
        table.add_row(vec![
            Cell::new(envelope.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
                .fg(Color::DarkGrey),
            type_cell(envelope.message_type),
            priority_cell(envelope.priority),
            Cell::new(&envelope.from).fg(Color::Cyan),
            Cell::new(&envelope.to),
            Cell::new(preview(&envelope.data)),
        ]);
    }

    println!();
    println!("{table}");
    println!(
        "  {} entries shown",
        style(entries.len()).bold()
    );
    println!();

    Ok(())
}
