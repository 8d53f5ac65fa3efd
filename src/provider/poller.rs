//! Per-tracker polling
//!
//! Each in-progress tracker gets one [`Schedule`] whose ticks run
//! [`Inner::tick`]. Handles carry a generation number: a tick only writes
//! while its generation is still the installed one, so a tick that was
//! awaiting its status check when the tracker got removed (or replaced, or
//! cleared) can't bring it back.
use super::*;
use futures::FutureExt;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub(crate) type Generation = u64;

pub(crate) struct PollerHandle {
    generation: Generation,
    schedule: Schedule,
}

impl PollerHandle {
    fn cancel(self) {
        self.schedule.stop();
    }
}

#[derive(Default)]
pub(crate) struct Pollers {
    handles: BTreeMap<TrackerId, PollerHandle>,
    next_generation: Generation,
}

impl Pollers {
    fn next_generation(&mut self) -> Generation {
        self.next_generation += 1;
        self.next_generation
    }

    fn install(&mut self, id: TrackerId, handle: PollerHandle) {
        if let Some(previous) = self.handles.insert(id, handle) {
            previous.cancel();
        }
    }

    pub(crate) fn cancel(&mut self, id: TrackerIdRef) -> bool {
        match self.handles.remove(id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, handle) in std::mem::take(&mut self.handles) {
            handle.cancel();
        }
    }

    pub(crate) fn is_current(&self, id: TrackerIdRef, generation: Generation) -> bool {
        self.handles
            .get(id)
            .map(|handle| handle.generation == generation)
            .unwrap_or(false)
    }

    pub(crate) fn contains(&self, id: TrackerIdRef) -> bool {
        self.handles.contains_key(id)
    }

    pub(crate) fn ids(&self) -> Vec<TrackerId> {
        self.handles.keys().cloned().collect()
    }
}

/// What the time policy did to a tracker, decided under the state lock
enum Policy {
    Keep,
    TimedOut(EventTracker),
    Expired(EventTracker),
}

fn call_hook(id: TrackerIdRef, hook: &str, f: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%id, hook, error = %e, "tracker hook failed"),
        Err(_) => warn!(%id, hook, "tracker hook panicked"),
    }
}

impl Inner {
    /// Start polling `tracker` if it is in progress
    ///
    /// Replaces (and stops) any poller already running for the same id.
    pub(crate) fn start_poller(self: &Arc<Self>, state: &mut TrackerState, tracker: &EventTracker) {
        if tracker.status != EventStatus::InProgress {
            return;
        }

        let generation = state.pollers.next_generation();
        let period = self
            .config
            .status_check_interval(tracker.status_check_interval);
        let schedule = Schedule::new(period, {
            let inner = Arc::downgrade(self);
            let id = tracker.id.clone();
            move || {
                let inner = inner.clone();
                let id = id.clone();
                async move {
                    if let Some(inner) = inner.upgrade() {
                        inner.tick(&id, generation).await;
                    }
                }
            }
        });
        schedule.start();

        debug!(id = %tracker.id, generation, ?period, "poller started");
        state
            .pollers
            .install(tracker.id.clone(), PollerHandle { generation, schedule });
    }

    async fn tick(&self, id: TrackerIdRef<'_>, generation: Generation) {
        let current = {
            let mut state = self.state.lock();
            if !state.pollers.is_current(id, generation) {
                return;
            }
            match state.events.get(id).cloned() {
                Some(tracker) => tracker,
                None => {
                    state.pollers.cancel(id);
                    return;
                }
            }
        };

        let Some(check) = self.registry.get(&current.status_check_fn_id) else {
            let err = TrackerError::MissingStatusCheck {
                id: id.to_owned(),
                fn_id: current.status_check_fn_id.clone(),
            };
            error!(%id, error = %err, "deleting tracker with no status check");
            let mut state = self.state.lock();
            if state.pollers.is_current(id, generation) {
                self.delete_locked(&mut state, id);
                self.publish(&state);
            }
            return;
        };

        debug!(%id, generation, "checking status");
        let update = match AssertUnwindSafe(check.check(current.clone()))
            .catch_unwind()
            .await
        {
            Ok(Ok(update)) => Some(update),
            Ok(Err(e)) => {
                warn!(%id, error = %e, "status check failed, will retry");
                None
            }
            Err(_) => {
                warn!(%id, "status check panicked, will retry");
                None
            }
        };

        match self.settle(id, generation, update) {
            Policy::Keep => {}
            Policy::TimedOut(failed) => call_hook(id, "on_max_time_in_progress", || {
                check.on_max_time_in_progress(&failed)
            }),
            Policy::Expired(expired) => call_hook(id, "on_expire", || check.on_expire(&expired)),
        }
    }

    /// Apply a check result and the time policy in one critical section
    ///
    /// Ownership is decided once, up front: a tick whose check just finished
    /// the tracker (and so stopped its own poller) still applies expiry.
    fn settle(&self, id: TrackerIdRef, generation: Generation, update: Option<EventTracker>) -> Policy {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        if !state.pollers.is_current(id, generation) {
            debug!(%id, generation, "discarding result of a stale status check");
            return Policy::Keep;
        }
        let Some(mut tracker) = state.events.get(id).cloned() else {
            state.pollers.cancel(id);
            return Policy::Keep;
        };

        let mut changed = false;
        if let Some(mut update) = update.filter(|u| u.status != tracker.status) {
            if update.id != id {
                warn!(%id, returned = %update.id, "status check changed the tracker id, ignoring");
                update.id = id.to_owned();
            }
            update.created_at = tracker.created_at;
            update.updated_at = now;

            info!(%id, from = %tracker.status, to = %update.status, "tracker status changed");
            if update.status.is_terminal() {
                state.pollers.cancel(id);
            }
            state.events.put(update.clone());
            state.seen.mark_unseen(id);
            tracker = update;
            changed = true;
        }

        let policy = if tracker.is_over_time(now) {
            info!(%id, max_time_in_progress = ?tracker.max_time_in_progress, "tracker ran too long, failing");
            state.pollers.cancel(id);
            let failed = EventTracker {
                status: EventStatus::Failed,
                updated_at: now,
                ..tracker
            };
            state.events.put(failed.clone());
            state.seen.mark_unseen(id);
            Policy::TimedOut(failed)
        } else if tracker.is_expired(now) {
            info!(%id, expires = ?tracker.expires, "tracker expired, removing");
            self.delete_locked(&mut state, id);
            Policy::Expired(tracker)
        } else {
            Policy::Keep
        };

        if changed || !matches!(policy, Policy::Keep) {
            self.publish(&state);
        }
        policy
    }
}
