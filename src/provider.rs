//! Event tracker provider
//!
//! Owns the tracker map, the seen/unseen maps and one poller per
//! in-progress tracker. All three maps live in one [`TrackerState`] behind
//! a single lock and are flushed to storage inside the same critical
//! section that mutates them. The lock is never held across an `.await`:
//! the only suspension point is the status check itself, see [`poller`].
//!
//! Nothing here returns an error to callers. Storage failures degrade to
//! "absent", status check failures are retried, and policy outcomes
//! (timeouts, expiry) show up as status changes or removals in the
//! published snapshot.
mod poller;
mod seen;
mod store;

use self::{
    poller::Pollers,
    seen::SeenUnseenTracker,
    store::EventTrackerStore,
};
use crate::{
    clock::{SharedClock, SystemClock},
    config::ProviderConfig,
    keyed_store::KeyedStore,
    scheduler::Schedule,
    storage::SharedStorage,
    tracker::*,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What subscribers observe after every change
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackerEvents {
    /// Ordered by creation time
    pub events: Vec<EventTracker>,
    pub seen: SeenEventsRecord,
}

pub(crate) struct TrackerState {
    events: EventTrackerStore,
    seen: SeenUnseenTracker,
    pollers: Pollers,
}

pub(crate) struct Inner {
    config: ProviderConfig,
    registry: StatusCheckRegistry,
    clock: SharedClock,
    state: Mutex<TrackerState>,
    notifier: watch::Sender<TrackerEvents>,
}

impl Inner {
    fn snapshot(state: &TrackerState) -> TrackerEvents {
        TrackerEvents {
            events: state.events.list(),
            seen: state.seen.seen().clone(),
        }
    }

    fn publish(&self, state: &TrackerState) {
        self.notifier.send_replace(Self::snapshot(state));
    }

    /// Stop polling `id` and drop it from all three maps
    fn delete_locked(&self, state: &mut TrackerState, id: TrackerIdRef) -> Option<EventTracker> {
        state.pollers.cancel(id);
        let removed = state.events.remove(id);
        state.seen.forget(id);
        if removed.is_some() {
            info!(%id, "tracker removed");
        }
        removed
    }

    /// Evict finished trackers beyond capacity, never the one just `added`
    fn evict_finished(&self, state: &mut TrackerState, added: TrackerIdRef) {
        let Some(max) = self.config.max_stored_event_trackers else {
            return;
        };
        let excess = state.events.len().saturating_sub(max);
        if excess == 0 {
            return;
        }

        let candidates: Vec<_> = state
            .events
            .eviction_candidates()
            .into_iter()
            .filter(|id| id.as_str() != added)
            .collect();
        if candidates.len() < excess {
            warn!(
                max,
                stored = state.events.len(),
                "tracker capacity exceeded with no finished tracker to evict"
            );
        }
        for id in candidates.into_iter().take(excess) {
            debug!(%id, "evicting finished tracker");
            self.delete_locked(state, &id);
        }
    }
}

/// Builder for [`EventTrackersProvider`]
pub struct ProviderBuilder {
    storage: SharedStorage,
    registry: StatusCheckRegistry,
    config: ProviderConfig,
    clock: SharedClock,
}

impl ProviderBuilder {
    pub fn config(self, config: ProviderConfig) -> Self {
        Self { config, ..self }
    }

    pub fn clock(self, clock: SharedClock) -> Self {
        Self { clock, ..self }
    }

    /// Load persisted state and resume polling
    ///
    /// Trackers already past `expires` are deleted; every other in-progress
    /// tracker gets its poller back. Must be called within a tokio runtime.
    pub fn mount(self) -> EventTrackersProvider {
        let keys = &self.config.storage_keys;
        let state = TrackerState {
            events: EventTrackerStore::load(self.storage.clone(), &keys.events),
            seen: SeenUnseenTracker::load(self.storage.clone(), &keys.seen, &keys.unseen),
            pollers: Pollers::default(),
        };
        let (notifier, _) = watch::channel(Inner::snapshot(&state));

        let inner = Arc::new(Inner {
            config: self.config,
            registry: self.registry,
            clock: self.clock,
            state: Mutex::new(state),
            notifier,
        });

        {
            let now = inner.clock.now_ms();
            let mut state = inner.state.lock();
            for tracker in state.events.list() {
                if tracker.is_expired(now) {
                    debug!(id = %tracker.id, "dropping tracker that expired while unmounted");
                    inner.delete_locked(&mut state, &tracker.id);
                } else {
                    inner.start_poller(&mut state, &tracker);
                }
            }
            info!(
                trackers = state.events.len(),
                polling = state.pollers.ids().len(),
                "event trackers mounted"
            );
            inner.publish(&state);
        }

        EventTrackersProvider { inner }
    }
}

/// Tracks long-running operations and polls their status
///
/// Dropping the provider stops every poller; persisted state stays in the
/// storage and is picked up by the next [`ProviderBuilder::mount`].
pub struct EventTrackersProvider {
    inner: Arc<Inner>,
}

impl EventTrackersProvider {
    pub fn builder(storage: SharedStorage, registry: StatusCheckRegistry) -> ProviderBuilder {
        ProviderBuilder {
            storage,
            registry,
            config: ProviderConfig::default(),
            clock: SystemClock::new_shared(),
        }
    }

    /// Mount with default config and the system clock
    pub fn mount(storage: SharedStorage, registry: StatusCheckRegistry) -> Self {
        Self::builder(storage, registry).mount()
    }

    /// Register a tracker, stamping its timestamps
    ///
    /// An existing tracker with the same id is replaced and its poller
    /// restarted.
    pub fn add_event_tracker(&self, new: NewEventTracker) -> EventTracker {
        let inner = &self.inner;
        let mut tracker = new.stamp(inner.clock.now_ms());
        if tracker.max_time_in_progress.is_none() {
            tracker.max_time_in_progress = inner.config.default_max_time_in_progress_ms;
        }

        let mut state = inner.state.lock();
        state.pollers.cancel(&tracker.id);
        state.events.put(tracker.clone());
        state.seen.mark_unseen(&tracker.id);
        info!(id = %tracker.id, status = %tracker.status, "tracker added");

        inner.start_poller(&mut state, &tracker);
        inner.evict_finished(&mut state, &tracker.id);
        inner.publish(&state);
        tracker
    }

    pub fn remove_event_tracker(&self, id: TrackerIdRef) -> Option<EventTracker> {
        let mut state = self.inner.state.lock();
        if !state.events.contains(id) {
            return None;
        }
        let removed = self.inner.delete_locked(&mut state, id);
        self.inner.publish(&state);
        removed
    }

    pub fn delete_event(&self, tracker: &EventTracker) {
        let mut state = self.inner.state.lock();
        self.inner.delete_locked(&mut state, &tracker.id);
        self.inner.publish(&state);
    }

    /// Stop all pollers and wipe all three persisted maps
    pub fn clear_events(&self) {
        let mut state = self.inner.state.lock();
        state.pollers.cancel_all();
        state.events.clear();
        state.seen.clear();
        info!("trackers cleared");
        self.inner.publish(&state);
    }

    pub fn mark_events_as_seen(&self) {
        let mut state = self.inner.state.lock();
        state.seen.mark_all_seen();
        self.inner.publish(&state);
    }

    pub fn get(&self, id: TrackerIdRef) -> Option<EventTracker> {
        self.inner.state.lock().events.get(id).cloned()
    }

    pub fn events(&self) -> Vec<EventTracker> {
        self.inner.state.lock().events.list()
    }

    pub fn record(&self) -> EventTrackersRecord {
        self.inner.state.lock().events.snapshot()
    }

    pub fn seen(&self) -> SeenEventsRecord {
        self.inner.state.lock().seen.seen().clone()
    }

    pub fn unseen(&self) -> UnSeenEventsRecord {
        self.inner.state.lock().seen.unseen().clone()
    }

    pub fn unseen_count(&self) -> usize {
        self.inner.state.lock().seen.unseen_count()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerEvents> {
        self.inner.notifier.subscribe()
    }

    pub fn is_polling(&self, id: TrackerIdRef) -> bool {
        self.inner.state.lock().pollers.contains(id)
    }

    pub fn active_pollers(&self) -> Vec<TrackerId> {
        self.inner.state.lock().pollers.ids()
    }

    /// Stop every poller, keeping all persisted state
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.pollers.cancel_all();
        debug!("event trackers provider shut down");
    }
}

impl Drop for EventTrackersProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}
