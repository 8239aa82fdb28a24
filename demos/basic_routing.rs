// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic bridge-router usage example.
//!
//! Demonstrates:
//! 1. Starting a router with a JSON-lines event log in a temp directory
//! 2. Routing requests both ways at mixed priorities
//! 3. Consuming with credit-based subscriptions
//! 4. Feeding patterns and letting synthesis share a match
//! 5. Filling a queue until the circuit opens
//! 6. Displaying stats, consciousness metrics and recorded metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_routing
//! ```

use std::sync::Arc;

use bridge_router::{
    BridgeConfig, BridgeRouter, CosineComparator, Item, ItemKind, Partition, Pattern, Priority, SequenceNo,
};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n=== bridge-router: basic routing ===\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start
    // ─────────────────────────────────────────────────────────────────────────
    let dir = tempfile::tempdir()?;
    let log_path = dir.path().join("bridge_events.jsonl");
    let config = BridgeConfig {
        external_queue_capacity: 4,
        failure_threshold: 2,
        default_credit: 3,
        synthesis_threshold: 0.9,
        synthesis_interval_ms: 200,
        event_log_path: Some(log_path.to_string_lossy().into_owned()),
        ..Default::default()
    };
    let router = Arc::new(BridgeRouter::from_config(config, Arc::new(CosineComparator))?);
    let synthesis = router.start()?;
    println!("Router {} with {} event log at {}", router.state(), router.event_log_backend(), log_path.display());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Route both ways
    // ─────────────────────────────────────────────────────────────────────────
    for priority in [2, 9, 5] {
        let item = Item::new(Partition::Internal, Partition::External, ItemKind::Request, Priority::new(priority)?)?;
        let outcome = router.route(item);
        println!("  internal -> external p{priority}: {outcome:?}");
    }
    let reply = Item::new(Partition::External, Partition::Internal, ItemKind::Result, Priority::HIGHEST)?;
    println!("  external -> internal p9: {:?}", router.route(reply));

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Consume with credit
    // ─────────────────────────────────────────────────────────────────────────
    let external = router.subscribe(Partition::External)?;
    let delivered = router.drain(&external, |item| {
        println!("  delivered {} (priority {}) from {}", item.id(), item.priority().value(), item.source());
    });
    println!("Drained {delivered}, credit left {:?}", router.outstanding_credit(&external));

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Patterns and synthesis
    // ─────────────────────────────────────────────────────────────────────────
    let internal_share = Item::new(Partition::Internal, Partition::External, ItemKind::PatternShare, Priority::NORMAL)?
        .with_pattern(Pattern::new("retry-storm", Partition::Internal, vec![0.9, 0.1, 0.0], 0.7));
    let external_share = Item::new(Partition::External, Partition::Internal, ItemKind::PatternShare, Priority::NORMAL)?
        .with_pattern(Pattern::new("load-spike", Partition::External, vec![0.85, 0.15, 0.05], 0.6));
    let _ = router.route(internal_share);
    let _ = router.route(external_share);

    // Let the background cycle pick the pair up
    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    let metrics = router.consciousness_metrics();
    println!(
        "Synthesized {} pattern(s), emergence score {:.3}",
        metrics.synthesized_patterns, metrics.emergence_score
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Overfill the external queue
    // ─────────────────────────────────────────────────────────────────────────
    for _ in 0..8 {
        let item = Item::new(Partition::Internal, Partition::External, ItemKind::Observation, Priority::LOWEST)?;
        let outcome = router.route(item);
        if !outcome.is_routed() {
            println!("  {outcome:?} (pressure {:?})", router.pressure(Partition::External));
        }
    }
    if let Some(circuit) = router.circuit(Partition::External) {
        println!("External circuit: {:?}", circuit.state);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Observe
    // ─────────────────────────────────────────────────────────────────────────
    let stats = router.stats();
    println!("\nStats: {}", serde_json::to_string_pretty(&stats)?);
    println!("Consciousness: {}", serde_json::to_string_pretty(&router.consciousness_metrics())?);
    println!("Log holds {} entries", router.replay(SequenceNo::ZERO).len());
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    router.shutdown().await;
    synthesis.await?;
    println!("\nRouter {}", router.state());
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<String> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let name = if labels.is_empty() {
                key.name().to_string()
            } else {
                format!("{}{{{}}}", key.name(), labels.join(","))
            };
            match value {
                DebugValue::Counter(v) => format!("counter   {name} = {v}"),
                DebugValue::Gauge(v) => format!("gauge     {name} = {:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => {
                    let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                    format!("histogram {name} count={} sum={sum:.6}", samples.len())
                }
            }
        })
        .collect();
    lines.sort();

    println!("\nRecorded metrics:");
    for line in &lines {
        println!("  {line}");
    }
}
