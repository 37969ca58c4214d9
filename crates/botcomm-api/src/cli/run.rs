//! `bcp run`: drive a live bus with the demo bots.

use std::time::Duration;

use anyhow::Result;
use console::style;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast::error::RecvError, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use botcomm_core::ProtocolBus;
use botcomm_types::config::StoreBackend;
use botcomm_types::event::BusEvent;
use botcomm_types::message::EnvelopeInput;

use crate::demo::{self, MONITOR_BOT, SEARCH_BOT};
use crate::state::AppState;

/// Bus events observed while the demo ran.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTally {
    pub registered: usize,
    pub delivered: usize,
    pub dropped: usize,
    pub failed: usize,
    pub inactive: usize,
    pub reactivated: usize,
    pub timed_out: usize,
    pub persisted: usize,
}

impl EventTally {
    fn record(&mut self, event: &BusEvent) {
        match event {
            BusEvent::BotRegistered { .. } => self.registered += 1,
            BusEvent::MessageDelivered { .. } => self.delivered += 1,
            BusEvent::MessageDropped { .. } => self.dropped += 1,
            BusEvent::DeliveryFailed { .. } => self.failed += 1,
            BusEvent::BotInactive { .. } => self.inactive += 1,
            BusEvent::BotReactivated { .. } => self.reactivated += 1,
            BusEvent::RequestTimedOut { .. } => self.timed_out += 1,
            BusEvent::HistoryPersisted { .. } => self.persisted += 1,
        }
    }
}

fn spawn_event_watcher(bus: &ProtocolBus, cancel: CancellationToken) -> JoinHandle<EventTally> {
    let mut events = bus.subscribe_events();
    tokio::spawn(async move {
        let mut tally = EventTally::default();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => tally.record(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event watcher lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        while let Ok(event) = events.try_recv() {
            tally.record(&event);
        }
        tally
    })
}

/// Start a bus with the demo bots, run it for `duration_secs`, then shut it
/// down and report what happened.
pub async fn run(
    state: &AppState,
    duration_secs: u64,
    store: Option<StoreBackend>,
    json: bool,
) -> Result<()> {
    let backend = state.backend(store);
    let store = state.open_store(backend).await?;
    let bus = ProtocolBus::init(state.config.bus.clone(), store).await;
    let restored = bus.insights().history_size;

    let cancel = CancellationToken::new();
    let watcher = spawn_event_watcher(&bus, cancel.clone());

    demo::register_demo_bots(&bus)?;
    bus.start();

    let (tx, mut metrics) = oneshot::channel();
    let correlation_id = bus.request(MONITOR_BOT, SEARCH_BOT, "metrics", move |result| {
        let _ = tx.send(result.map_err(|e| e.to_string()));
    })?;
    bus.send(EnvelopeInput::broadcast(
        MONITOR_BOT,
        json!({"status": "online", "watching": [SEARCH_BOT]}),
    ))?;

    if !json {
        println!();
        println!(
            "  {} Bus running for {}s with {} and {} ({} store)",
            style("⚡").bold(),
            duration_secs,
            style(SEARCH_BOT).cyan(),
            style(MONITOR_BOT).cyan(),
            backend
        );
        println!("  {}", style("Press Ctrl+C to stop").dim());
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!("failed to listen for Ctrl+C: {e}");
            }
        }
    }

    let insights = bus.insights();
    let registrations = bus.registrations();
    bus.shutdown().await;
    cancel.cancel();
    let events = watcher.await?;

    let metrics: Option<Result<Value, String>> = metrics.try_recv().ok();

    if json {
        let report = json!({
            "store": backend,
            "restoredEntries": restored,
            "metricsRequest": {
                "correlationId": correlation_id,
                "result": match &metrics {
                    Some(Ok(payload)) => json!({"ok": payload}),
                    Some(Err(e)) => json!({"error": e}),
                    None => Value::Null,
                },
            },
            "registrations": registrations,
            "events": events,
            "insights": insights,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("  {}", style("── Run ──").dim());
    println!("  Restored entries: {restored}");
    match &metrics {
        Some(Ok(payload)) => println!("  Metrics reply:    {}", style(payload).green()),
        Some(Err(e)) => println!("  Metrics reply:    {}", style(e).red()),
        None => println!("  Metrics reply:    {}", style("none").yellow()),
    }
    println!(
        "  Events:           {} delivered, {} dropped, {} failed, {} timed out",
        events.delivered, events.dropped, events.failed, events.timed_out
    );
    println!();

    println!("  {}", style("── Bots ──").dim());
    for registration in &registrations {
        println!(
            "  {:<14} {:<9} messages {:>4}  errors {:>3}",
            style(&registration.id).cyan(),
            registration.status.to_string(),
            registration.message_count,
            registration.error_count
        );
    }
    println!();

    super::insights::print_insights(&insights);
    Ok(())
}

#[cfg(test)]
mod tests {
    use botcomm_core::storage::{BoxStateStore, InMemoryStateStore};
    use botcomm_types::config::BusConfig;

    use super::*;

    #[test]
    fn tally_counts_each_kind() {
        let mut tally = EventTally::default();
        tally.record(&BusEvent::BotRegistered {
            bot_id: "a".into(),
        });
        tally.record(&BusEvent::MessageDropped {
            envelope_id: "m".into(),
            recipient: "ghost".into(),
            reason: "not_registered".into(),
        });
        tally.record(&BusEvent::HistoryPersisted { entries: 3 });
        assert_eq!(tally.registered, 1);
        assert_eq!(tally.dropped, 1);
        assert_eq!(tally.persisted, 1);
        assert_eq!(tally.delivered, 0);
    }

    #[tokio::test]
    async fn watcher_collects_events_published_before_cancel() {
        let bus = ProtocolBus::new(
            BusConfig::default(),
            BoxStateStore::new(InMemoryStateStore::new()),
        );
        let cancel = CancellationToken::new();
        let watcher = spawn_event_watcher(&bus, cancel.clone());

        demo::register_demo_bots(&bus).unwrap();
        bus.drain();
        cancel.cancel();

        let tally = watcher.await.unwrap();
        assert_eq!(tally.registered, 2);
        assert!(tally.delivered >= 2);
    }
}
