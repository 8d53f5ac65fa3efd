use anyhow::{Context, Result};
use async_trait::async_trait;
use event_trackers::{
    config::ProviderConfig,
    scheduler::{hook, Interval, TriggerHooks},
    EventStatus, EventTracker, EventTrackersProvider, FileStorage, NewEventTracker, StatusCheck,
    StatusCheckRegistry, TrackerId,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Reports a tracker as done after a fixed number of checks
struct CountdownCheck {
    checks_until_done: u32,
    checks: Mutex<BTreeMap<TrackerId, u32>>,
}

impl CountdownCheck {
    fn new(checks_until_done: u32) -> Self {
        Self {
            checks_until_done,
            checks: Mutex::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl StatusCheck for CountdownCheck {
    async fn check(&self, mut tracker: EventTracker) -> Result<EventTracker> {
        let count = {
            let mut checks = self.checks.lock();
            let count = checks.entry(tracker.id.clone()).or_default();
            *count += 1;
            *count
        };
        debug!(id = %tracker.id, count, "countdown check");
        if self.checks_until_done <= count {
            tracker.status = EventStatus::Done;
        }
        Ok(tracker)
    }

    fn on_expire(&self, tracker: &EventTracker) -> Result<()> {
        info!(id = %tracker.id, "demo tracker expired");
        Ok(())
    }

    fn on_max_time_in_progress(&self, tracker: &EventTracker) -> Result<()> {
        info!(id = %tracker.id, "demo tracker timed out");
        Ok(())
    }
}

async fn run(storage_path: String, config: ProviderConfig) -> Result<()> {
    let storage = FileStorage::open_shared(&storage_path)
        .with_context(|| format!("Failed to open storage at {storage_path}"))?;
    let registry = StatusCheckRegistry::new().register("countdown", CountdownCheck::new(3));
    let provider = EventTrackersProvider::builder(storage, registry)
        .config(config)
        .mount();

    if provider.events().is_empty() {
        provider.add_event_tracker(
            NewEventTracker::new("demo", "Demo operation", "countdown")
                .with_description("Completes after three status checks")
                .with_status_check_interval(1_000)
                .with_max_time_in_progress(60_000),
        );
    }

    let (stop_tx, mut stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        eprintln!("Stopping event trackers...");
        let _ = stop_tx.send(true);
    })?;

    let summary = Interval::new(
        Duration::from_secs(10),
        TriggerHooks::new(hook({
            let updates = provider.subscribe();
            move || {
                let snapshot = updates.borrow().clone();
                async move {
                    let in_progress = snapshot
                        .events
                        .iter()
                        .filter(|e| e.status == EventStatus::InProgress)
                        .count();
                    info!(total = snapshot.events.len(), in_progress, "trackers summary");
                }
            }
        })),
    );
    summary.start();

    let mut updates = provider.subscribe();
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                for event in &snapshot.events {
                    info!(id = %event.id, status = %event.status, "tracker");
                }
            }
            _ = stop_rx.changed() => break,
        }
    }

    summary.stop();
    provider.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let storage_path = args
        .next()
        .unwrap_or_else(|| "event-trackers.json".to_owned());
    let config = match args.next() {
        Some(path) => ProviderConfig::load(&path)
            .with_context(|| format!("Failed to load config from {path}"))?,
        None => ProviderConfig::default(),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(storage_path, config))
}
