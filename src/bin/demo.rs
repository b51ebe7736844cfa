//! Walk through the registry: timers, a debounced field, a simulated drag
//! gesture and teardown.
//!
//! Logs go to stderr; set `RUST_LOG=task_registry=debug` to see every
//! schedule and clear. The final statistics are printed to stdout as JSON.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::json;
use task_registry::{EventBus, Join, Registry, RegistryConfig, Selector, TaskKind, TaskOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RegistryConfig::load(std::path::Path::new(&path))?,
        None => RegistryConfig::default(),
    };
    let registry = Registry::with_config(config)?;
    tracing::info!("demo starting");

    // Timers: a heartbeat interval and a labelled timeout that is replaced.
    let beats = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&beats);
    registry.set_interval(
        TaskOptions::new().group("heartbeat").callback(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }),
        Duration::from_millis(20),
    )?;

    let first = registry.sleep(
        Duration::from_millis(40),
        TaskOptions::new().label("save").callback(|_| json!("draft")),
    );
    let second = registry.sleep(
        Duration::from_millis(60),
        TaskOptions::new()
            .label("save")
            .join(Join::Replace)
            .callback(|_| json!("final")),
    );
    tracing::info!(
        first = %first.await?,
        second = %second.await?,
        "replace join settled both waiters"
    );

    // Debounced input: only the last keystroke is validated.
    let debounced = registry.debounce(
        |value| tracing::info!(%value, "validating field"),
        Duration::from_millis(30),
    );
    for text in ["t", "ta", "tas", "task"] {
        debounced.call(json!(text))?;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    registry.wait(move || !debounced.is_pending(), TaskOptions::new()).await?;

    // Simulated drag: one group per gesture, dropped on pointerup.
    let surface = Arc::new(EventBus::new());
    let moves = Arc::new(AtomicUsize::new(0));
    let gesture = format!("gesture.{}", uuid::Uuid::new_v4());
    let seen = Arc::clone(&moves);
    registry.on(
        surface.clone(),
        "pointermove",
        TaskOptions::new().group(gesture.as_str()).callback(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        }),
    )?;
    let weak = registry.downgrade();
    let group = gesture.clone();
    registry.on(
        surface.clone(),
        "pointerup",
        TaskOptions::new()
            .group(gesture.as_str())
            .callback(move |_| {
                if let Some(registry) = weak.upgrade() {
                    registry.cancel(TaskKind::EventListener, Selector::group(group.as_str()));
                }
            }),
    )?;
    for x in 0..3 {
        surface.emit("pointermove", json!({ "x": x, "y": 0 }));
    }
    surface.emit("pointerup", json!({ "x": 3, "y": 0 }));
    tracing::info!(
        moves = moves.load(Ordering::Relaxed),
        listeners = surface.listener_count("pointermove") + surface.listener_count("pointerup"),
        "drag finished"
    );

    tracing::info!(
        heartbeats = beats.load(Ordering::Relaxed),
        "tearing down"
    );
    println!("{}", serde_json::to_string(&registry.stats())?);
    registry.destroy();
    println!("{}", serde_json::to_string(&registry.stats())?);

    tracing::info!("demo finished");
    Ok(())
}
