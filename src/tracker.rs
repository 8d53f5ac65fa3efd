use crate::clock::Timestamp;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, sync::Arc};
use thiserror::Error;

pub type TrackerId = String;
pub type TrackerIdRef<'a> = &'a str;
pub type StatusCheckFnId = String;

pub const DEFAULT_STATUS_CHECK_INTERVAL_MS: u64 = 30_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    InProgress,
    Done,
    Failed,
    Cancelled,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        self != EventStatus::InProgress
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventStatus::InProgress => "in_progress",
            EventStatus::Done => "done",
            EventStatus::Failed => "failed",
            EventStatus::Cancelled => "cancelled",
        })
    }
}

/// A tracked long-running operation, as persisted
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTracker {
    pub id: TrackerId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: EventStatus,
    pub status_check_fn_id: StatusCheckFnId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<Timestamp>,
    /// Milliseconds after `created_at` the tracker may stay in progress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time_in_progress: Option<u64>,
    /// Polling period in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_check_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl EventTracker {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires.map(|expires| now > expires).unwrap_or(false)
    }

    pub fn is_over_time(&self, now: Timestamp) -> bool {
        self.status == EventStatus::InProgress
            && self
                .max_time_in_progress
                .map(|max| now.saturating_sub(self.created_at) > max)
                .unwrap_or(false)
    }
}

/// Input to `add_event_tracker`: everything but the timestamps
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEventTracker {
    pub id: TrackerId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: EventStatus,
    pub status_check_fn_id: StatusCheckFnId,
    #[serde(default)]
    pub expires: Option<Timestamp>,
    #[serde(default)]
    pub max_time_in_progress: Option<u64>,
    #[serde(default)]
    pub status_check_interval: Option<u64>,
    #[serde(default)]
    pub extra_data: Option<serde_json::Value>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl NewEventTracker {
    pub fn new(
        id: impl Into<TrackerId>,
        name: impl Into<String>,
        status_check_fn_id: impl Into<StatusCheckFnId>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            status: EventStatus::InProgress,
            status_check_fn_id: status_check_fn_id.into(),
            expires: None,
            max_time_in_progress: None,
            status_check_interval: None,
            extra_data: None,
            image: None,
            kind: None,
            url: None,
        }
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..self
        }
    }

    pub fn with_status(self, status: EventStatus) -> Self {
        Self { status, ..self }
    }

    pub fn with_expires(self, expires: Timestamp) -> Self {
        Self {
            expires: Some(expires),
            ..self
        }
    }

    pub fn with_max_time_in_progress(self, ms: u64) -> Self {
        Self {
            max_time_in_progress: Some(ms),
            ..self
        }
    }

    pub fn with_status_check_interval(self, ms: u64) -> Self {
        Self {
            status_check_interval: Some(ms),
            ..self
        }
    }

    pub fn with_extra_data(self, extra_data: serde_json::Value) -> Self {
        Self {
            extra_data: Some(extra_data),
            ..self
        }
    }

    pub(crate) fn stamp(self, now: Timestamp) -> EventTracker {
        EventTracker {
            id: self.id,
            name: self.name,
            description: self.description,
            status: self.status,
            status_check_fn_id: self.status_check_fn_id,
            created_at: now,
            updated_at: now,
            expires: self.expires,
            max_time_in_progress: self.max_time_in_progress,
            status_check_interval: self.status_check_interval,
            extra_data: self.extra_data,
            image: self.image,
            kind: self.kind,
            url: self.url,
        }
    }
}

pub type EventTrackersRecord = BTreeMap<TrackerId, EventTracker>;
pub type SeenEventsRecord = BTreeMap<TrackerId, bool>;
pub type UnSeenEventsRecord = BTreeMap<TrackerId, bool>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("no status check registered as {fn_id:?} (tracker {id})")]
    MissingStatusCheck { id: TrackerId, fn_id: StatusCheckFnId },
}

/// Decides what "checking the status" of a tracker means
///
/// `check` receives a snapshot of the tracker and returns its updated
/// state. Errors are treated as transient: the poller logs them and tries
/// again on the next tick.
#[async_trait]
pub trait StatusCheck: Send + Sync {
    async fn check(&self, tracker: EventTracker) -> Result<EventTracker>;

    /// Called when a tracker is removed for being past `expires`
    fn on_expire(&self, _tracker: &EventTracker) -> Result<()> {
        Ok(())
    }

    /// Called when a tracker is failed for staying in progress too long
    fn on_max_time_in_progress(&self, _tracker: &EventTracker) -> Result<()> {
        Ok(())
    }
}

pub type SharedStatusCheck = Arc<dyn StatusCheck + 'static>;

/// Status checks by id, injected into the provider at construction
#[derive(Clone, Default)]
pub struct StatusCheckRegistry(BTreeMap<StatusCheckFnId, SharedStatusCheck>);

impl StatusCheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        fn_id: impl Into<StatusCheckFnId>,
        check: impl StatusCheck + 'static,
    ) -> Self {
        self.0.insert(fn_id.into(), Arc::new(check));
        self
    }

    pub fn register_shared(mut self, fn_id: impl Into<StatusCheckFnId>, check: SharedStatusCheck) -> Self {
        self.0.insert(fn_id.into(), check);
        self
    }

    pub fn get(&self, fn_id: &str) -> Option<SharedStatusCheck> {
        self.0.get(fn_id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl fmt::Debug for StatusCheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.keys()).finish()
    }
}
