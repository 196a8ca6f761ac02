//! Example: two devices edit offline, then reconnect
//!
//! Run with:
//! ```bash
//! cargo run --example offline_sync
//! ```

use std::sync::Arc;
use tidesync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use tidesync_core::{ConflictObserver, Entry, LoopbackTransport, SyncDriver, SyncEngine};
use tracing::info;

struct PrintConflicts;

impl ConflictObserver for PrintConflicts {
    fn on_conflict(&self, key: &str, losing: &Entry, winning: &Entry) {
        println!(
            "conflict on '{}': kept {}'s write, dropped {}'s",
            key, winning.writer, losing.writer
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging_with_config(LogConfig::new(LogLevel::Debug).with_target(false))?;

    let laptop = Arc::new(SyncEngine::new("laptop")?.with_observer(Arc::new(PrintConflicts)));
    let phone = Arc::new(SyncEngine::new("phone")?.with_observer(Arc::new(PrintConflicts)));

    let transport = Arc::new(LoopbackTransport::new());
    transport.attach(laptop.clone())?;
    transport.attach(phone.clone())?;

    // Both devices edit while disconnected
    laptop.set("title", "Draft")?;
    laptop.set("body", "Notes from the train")?;
    phone.set("title", "Final")?;
    phone.set("todo", "buy milk")?;
    phone.delete("todo")?;

    let summary = SyncDriver::new(laptop.clone(), transport).sync_peer("phone").await?;
    info!(sent = summary.sent, received = summary.received, conflicts = summary.conflicts, "reconnected");

    for engine in [&laptop, &phone] {
        let map = engine.map_snapshot()?;
        println!("{} at {}:", engine.device_id(), map.clock());
        for (key, value) in map.live() {
            println!("  {} = {}", key, String::from_utf8_lossy(value));
        }
    }

    Ok(())
}
