//! `bcp insights`: aggregate counters over the persisted history.

use anyhow::Result;
use console::style;

use botcomm_types::config::StoreBackend;
use botcomm_types::insights::Insights;
use botcomm_types::message::{MessageType, Priority};

use crate::state::AppState;

pub async fn insights(state: &AppState, store: Option<StoreBackend>, json: bool) -> Result<()> {
    let entries = state.load_history(state.backend(store)).await?;
    let insights = Insights::from_history(&entries);

    if json {
        println!("{}", serde_json::to_string_pretty(&insights)?);
        return Ok(());
    }

    print_insights(&insights);
    Ok(())
}

/// Styled dump of `insights`, shared with `bcp run`.
pub fn print_insights(insights: &Insights) {
    if insights.registered_bots > 0 {
        println!("  {}", style("── Registry ──").dim());
        println!("  Registered: {}", style(insights.registered_bots).bold());
        println!("  Active:     {}", style(insights.active_bots).green());
        if insights.inactive_bots > 0 {
            println!("  Inactive:   {}", style(insights.inactive_bots).yellow());
        }
        println!("  Queue:      {}", insights.queue_depth);
        println!("  Pending:    {}", insights.pending_requests);
        println!("  Subscribed: {}", insights.subscriptions);
        println!();
    }

    println!("  {}", style("── History ──").dim());
    println!("  Entries: {}", style(insights.history_size).bold());
    if insights.error_messages > 0 {
        println!("  Errors:  {}", style(insights.error_messages).red());
    }
    println!();

    println!("  {}", style("── By type ──").dim());
    for message_type in MessageType::ALL {
        let count = insights.count_for_type(message_type);
        if count > 0 {
            println!("  {:<13} {count}", message_type.as_str());
        }
    }
    println!();

    println!("  {}", style("── By priority ──").dim());
    for priority in Priority::ALL {
        let count = insights.count_for_priority(priority);
        if count > 0 {
            println!("  {:<13} {count}", priority.as_str());
        }
    }
    println!();
}
