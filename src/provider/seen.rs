use super::*;

/// Acknowledgement state of trackers, independent of their lifecycle
///
/// A tracker becomes unseen whenever it is created or updated and stays
/// so until `mark_all_seen`.
pub(crate) struct SeenUnseenTracker {
    seen: SeenEventsRecord,
    unseen: UnSeenEventsRecord,
    seen_store: KeyedStore<SeenEventsRecord>,
    unseen_store: KeyedStore<UnSeenEventsRecord>,
}

impl SeenUnseenTracker {
    pub(crate) fn load(storage: SharedStorage, seen_key: &str, unseen_key: &str) -> Self {
        let seen_store = KeyedStore::new(storage.clone(), seen_key);
        let unseen_store = KeyedStore::new(storage, unseen_key);
        Self {
            seen: seen_store.retrieve().unwrap_or_default(),
            unseen: unseen_store.retrieve().unwrap_or_default(),
            seen_store,
            unseen_store,
        }
    }

    fn flush(&self) {
        self.seen_store.store(&self.seen);
        self.unseen_store.store(&self.unseen);
    }

    pub(crate) fn mark_unseen(&mut self, id: TrackerIdRef) {
        self.unseen.insert(id.to_owned(), true);
        self.seen.insert(id.to_owned(), false);
        self.flush();
    }

    /// Every id in the unseen map becomes seen, in one write per map
    pub(crate) fn mark_all_seen(&mut self) {
        for (id, unseen) in self.unseen.iter_mut() {
            *unseen = false;
            self.seen.insert(id.clone(), true);
        }
        self.flush();
    }

    pub(crate) fn forget(&mut self, id: TrackerIdRef) {
        let had_seen = self.seen.remove(id).is_some();
        let had_unseen = self.unseen.remove(id).is_some();
        if had_seen || had_unseen {
            self.flush();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.seen.clear();
        self.unseen.clear();
        self.seen_store.remove();
        self.unseen_store.remove();
    }

    pub(crate) fn seen(&self) -> &SeenEventsRecord {
        &self.seen
    }

    pub(crate) fn unseen(&self) -> &UnSeenEventsRecord {
        &self.unseen
    }

    pub(crate) fn unseen_count(&self) -> usize {
        self.unseen.values().filter(|unseen| **unseen).count()
    }
}
