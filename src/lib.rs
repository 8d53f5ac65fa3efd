//! Persistent tracking of long-running operations
//!
//! Consumers register [`EventTracker`]s with an [`EventTrackersProvider`];
//! every in-progress tracker is polled through a [`StatusCheck`] handler
//! until it finishes, runs out of time or expires. Trackers, along with a
//! seen/unseen flag per tracker, are persisted through a [`StorageBackend`]
//! and picked up again on the next mount.
pub mod clock;
pub mod config;
pub mod keyed_store;
pub mod provider;
pub mod scheduler;
pub mod storage;
pub mod tracker;

pub use self::{
    clock::{Clock, RuntimeClock, SystemClock, Timestamp},
    config::ProviderConfig,
    keyed_store::{KeyedCollection, KeyedStore},
    provider::{EventTrackersProvider, ProviderBuilder, TrackerEvents},
    storage::{FileStorage, InMemoryStorage, SharedStorage, StorageBackend, StoredValue},
    tracker::{
        EventStatus, EventTracker, NewEventTracker, StatusCheck, StatusCheckRegistry, TrackerId,
    },
};
