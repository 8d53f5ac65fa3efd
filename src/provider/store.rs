use super::*;

/// The tracker map plus the accessor it is flushed through
///
/// Every mutation rewrites the persisted record before returning, so the
/// in-memory copy and the backend never disagree.
pub(crate) struct EventTrackerStore {
    record: EventTrackersRecord,
    store: KeyedStore<EventTrackersRecord>,
}

impl EventTrackerStore {
    pub(crate) fn load(storage: SharedStorage, key: &str) -> Self {
        let store = KeyedStore::new(storage, key);
        Self {
            record: store.retrieve().unwrap_or_default(),
            store,
        }
    }

    fn flush(&self) {
        self.store.store(&self.record);
    }

    pub(crate) fn get(&self, id: TrackerIdRef) -> Option<&EventTracker> {
        self.record.get(id)
    }

    pub(crate) fn contains(&self, id: TrackerIdRef) -> bool {
        self.record.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.record.len()
    }

    pub(crate) fn put(&mut self, tracker: EventTracker) {
        self.record.insert(tracker.id.clone(), tracker);
        self.flush();
    }

    pub(crate) fn remove(&mut self, id: TrackerIdRef) -> Option<EventTracker> {
        let removed = self.record.remove(id);
        if removed.is_some() {
            self.flush();
        }
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.record.clear();
        self.store.remove();
    }

    /// Ordered by creation time, then id
    pub(crate) fn list(&self) -> Vec<EventTracker> {
        let mut events: Vec<_> = self.record.values().cloned().collect();
        events.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        events
    }

    /// Finished trackers, oldest first
    pub(crate) fn eviction_candidates(&self) -> Vec<TrackerId> {
        let mut finished: Vec<_> = self
            .record
            .values()
            .filter(|t| t.status.is_terminal())
            .collect();
        finished.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        finished.into_iter().map(|t| t.id.clone()).collect()
    }

    pub(crate) fn snapshot(&self) -> EventTrackersRecord {
        self.record.clone()
    }
}
