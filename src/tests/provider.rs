use super::*;
use crate::{
    clock::SharedClock,
    keyed_store::KeyedStore,
    storage::StorageBackend,
    tracker::{EventTrackersRecord, NewEventTracker, SeenEventsRecord},
};
use std::collections::BTreeMap;
use tokio::time::sleep;

fn persisted(storage: &InMemoryStorage) -> EventTrackersRecord {
    KeyedStore::<EventTrackersRecord>::new(shared(storage), "events-trackers")
        .retrieve()
        .unwrap_or_default()
}

fn job(id: &str) -> NewEventTracker {
    NewEventTracker::new(id, format!("Job {id}"), "scripted")
}

#[tokio::test(start_paused = true)]
async fn stops_polling_once_check_reports_done() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::Done);
    let provider = mount(&storage, &check);

    let added = provider.add_event_tracker(job("upload"));
    assert_eq!(added.created_at, START_MS);
    assert_eq!(added.updated_at, START_MS);
    assert!(provider.is_polling("upload"));

    sleep(ms(30_001)).await;

    assert_eq!(check.calls(), 1);
    let stored = provider.get("upload").expect("still stored");
    assert_eq!(stored.status, EventStatus::Done);
    assert_eq!(stored.created_at, START_MS);
    assert_eq!(stored.updated_at, START_MS + 30_000);
    assert!(!provider.is_polling("upload"));
    assert_eq!(persisted(&storage)["upload"].status, EventStatus::Done);

    sleep(ms(120_000)).await;
    assert_eq!(check.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn keeps_only_one_poller_per_id() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let provider = mount(&storage, &check);

    provider.add_event_tracker(job("sync"));
    provider.add_event_tracker(job("sync"));
    assert_eq!(provider.active_pollers(), vec!["sync".to_owned()]);

    sleep(ms(30_001)).await;
    assert_eq!(check.calls(), 1);

    sleep(ms(30_000)).await;
    assert_eq!(check.calls(), 2);
    assert_eq!(provider.events().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fails_tracker_that_stays_in_progress_too_long() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let provider = mount(&storage, &check);

    provider.add_event_tracker(
        job("render")
            .with_status_check_interval(50)
            .with_max_time_in_progress(100),
    );

    sleep(ms(101)).await;
    assert_eq!(provider.get("render").map(|t| t.status), Some(EventStatus::InProgress));

    sleep(ms(100)).await;
    let stored = provider.get("render").expect("kept after timing out");
    assert_eq!(stored.status, EventStatus::Failed);
    assert!(!provider.is_polling("render"));
    assert_eq!(check.timed_out(), 1);
    assert_eq!(persisted(&storage)["render"].status, EventStatus::Failed);

    let calls = check.calls();
    sleep(ms(1_000)).await;
    assert_eq!(check.calls(), calls);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn removes_tracker_once_expired() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let provider = mount(&storage, &check);

    provider.add_event_tracker(
        job("export")
            .with_status_check_interval(20)
            .with_expires(START_MS + 50),
    );

    sleep(ms(100)).await;

    assert!(provider.get("export").is_none());
    assert!(!persisted(&storage).contains_key("export"));
    assert!(!provider.is_polling("export"));
    assert!(!provider.seen().contains_key("export"));
    // the hook's error is swallowed
    assert_eq!(check.expired(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn removes_tracker_that_finishes_after_expiring() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::Done);
    let provider = mount(&storage, &check);

    provider.add_event_tracker(
        job("report")
            .with_status_check_interval(100)
            .with_expires(START_MS + 50),
    );
    let mut updates = provider.subscribe();

    sleep(ms(150)).await;

    assert_eq!(check.calls(), 1);
    assert_eq!(check.expired(), 1);
    assert!(provider.get("report").is_none());
    assert!(!persisted(&storage).contains_key("report"));
    assert!(!provider.seen().contains_key("report"));
    assert!(!provider.is_polling("report"));
    assert!(updates.has_changed()?);
    assert!(updates.borrow_and_update().events.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn removal_during_a_check_is_not_undone() -> Result<()> {
    let storage = InMemoryStorage::new();
    let gate = Arc::new(Notify::new());
    let check = ScriptedCheck::replying(EventStatus::Done).gated(gate.clone());
    let provider = mount(&storage, &check);

    provider.add_event_tracker(job("backup").with_status_check_interval(10));

    sleep(ms(11)).await;
    assert_eq!(check.calls(), 1);

    assert!(provider.remove_event_tracker("backup").is_some());
    gate.notify_one();
    sleep(ms(100)).await;

    assert!(provider.get("backup").is_none());
    assert!(!persisted(&storage).contains_key("backup"));
    assert!(provider.active_pollers().is_empty());
    assert_eq!(check.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn check_errors_are_retried() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::new(Reply::Fail);
    let provider = mount(&storage, &check);

    provider.add_event_tracker(job("deploy").with_status_check_interval(1_000));
    sleep(ms(3_001)).await;

    assert_eq!(check.calls(), 3);
    assert!(provider.is_polling("deploy"));
    assert_eq!(
        provider.get("deploy").map(|t| t.status),
        Some(EventStatus::InProgress)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn deletes_tracker_without_registered_check() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::Done);
    let provider = mount(&storage, &check);

    provider.add_event_tracker(NewEventTracker::new("orphan", "Orphan", "unknown-check"));
    assert!(provider.get("orphan").is_some());

    sleep(ms(30_001)).await;
    assert!(provider.get("orphan").is_none());
    assert!(provider.active_pollers().is_empty());
    assert_eq!(check.calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn clear_stops_pollers_and_wipes_storage() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let provider = mount(&storage, &check);

    provider.add_event_tracker(job("a"));
    provider.add_event_tracker(job("b"));
    provider.add_event_tracker(job("c").with_status(EventStatus::Done));
    provider.mark_events_as_seen();
    assert_eq!(provider.active_pollers().len(), 2);
    assert!(!storage.is_empty());

    provider.clear_events();

    assert!(provider.active_pollers().is_empty());
    assert!(provider.events().is_empty());
    assert!(provider.seen().is_empty());
    assert!(storage.get("events-trackers")?.is_none());
    assert!(storage.get("seen-events")?.is_none());
    assert!(storage.get("un-seen-events")?.is_none());

    sleep(ms(60_001)).await;
    assert_eq!(check.calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn marking_as_seen_is_idempotent() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let provider = mount(&storage, &check);

    provider.add_event_tracker(job("a"));
    provider.add_event_tracker(job("b").with_status(EventStatus::Cancelled));
    assert_eq!(provider.unseen_count(), 2);
    assert_eq!(provider.seen().get("a"), Some(&false));

    provider.mark_events_as_seen();
    let seen_once = provider.seen();
    let unseen_once = provider.unseen();

    provider.mark_events_as_seen();
    assert_eq!(provider.seen(), seen_once);
    assert_eq!(provider.unseen(), unseen_once);

    let expected: SeenEventsRecord =
        BTreeMap::from([("a".to_owned(), true), ("b".to_owned(), true)]);
    assert_eq!(seen_once, expected);
    assert_eq!(provider.unseen_count(), 0);
    assert_eq!(
        KeyedStore::<SeenEventsRecord>::new(shared(&storage), "seen-events").retrieve(),
        Some(expected)
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn status_change_marks_tracker_unseen_again() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::Done);
    let provider = mount(&storage, &check);

    provider.add_event_tracker(job("a"));
    provider.mark_events_as_seen();
    assert_eq!(provider.unseen_count(), 0);

    sleep(ms(30_001)).await;
    assert_eq!(provider.unseen_count(), 1);
    assert_eq!(provider.seen().get("a"), Some(&false));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn mount_resumes_polling_and_drops_expired() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let clock: SharedClock = Arc::new(RuntimeClock::starting_at(START_MS));
    let mount = |storage: &InMemoryStorage| {
        EventTrackersProvider::builder(
            shared(storage),
            StatusCheckRegistry::new().register("scripted", check.clone()),
        )
        .clock(clock.clone())
        .mount()
    };

    {
        let provider = mount(&storage);
        provider.add_event_tracker(job("long").with_status_check_interval(60_000));
        provider.add_event_tracker(job("short-lived").with_expires(START_MS + 10));
        provider.add_event_tracker(job("finished").with_status(EventStatus::Done));
        provider.mark_events_as_seen();
    }
    assert_eq!(persisted(&storage).len(), 3);

    sleep(ms(100)).await;
    let provider = mount(&storage);

    assert!(provider.get("short-lived").is_none());
    assert!(!persisted(&storage).contains_key("short-lived"));
    assert_eq!(provider.active_pollers(), vec!["long".to_owned()]);
    assert_eq!(provider.seen().get("long"), Some(&true));
    assert_eq!(provider.subscribe().borrow().events.len(), 2);

    sleep(ms(60_001)).await;
    assert_eq!(check.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_every_change() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::Done);
    let provider = mount(&storage, &check);
    let mut updates = provider.subscribe();

    provider.add_event_tracker(job("first"));
    updates.changed().await?;
    {
        let snapshot = updates.borrow_and_update();
        assert_eq!(snapshot.events.len(), 1);
        assert_eq!(snapshot.events[0].status, EventStatus::InProgress);
        assert_eq!(snapshot.seen.get("first"), Some(&false));
    }

    updates.changed().await?;
    assert_eq!(updates.borrow_and_update().events[0].status, EventStatus::Done);

    provider.remove_event_tracker("first");
    updates.changed().await?;
    assert!(updates.borrow_and_update().events.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn evicts_oldest_finished_trackers_beyond_capacity() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let provider = mount_with(
        &storage,
        StatusCheckRegistry::new().register("scripted", check.clone()),
        ProviderConfig {
            max_stored_event_trackers: Some(2),
            ..ProviderConfig::default()
        },
    );

    provider.add_event_tracker(job("old").with_status(EventStatus::Done));
    sleep(ms(1)).await;
    provider.add_event_tracker(job("newer").with_status(EventStatus::Failed));
    sleep(ms(1)).await;
    provider.add_event_tracker(job("running"));

    let ids: Vec<_> = provider.events().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["newer".to_owned(), "running".to_owned()]);
    assert!(!provider.seen().contains_key("old"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn never_evicts_the_tracker_being_added() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let provider = mount_with(
        &storage,
        StatusCheckRegistry::new().register("scripted", check.clone()),
        ProviderConfig {
            max_stored_event_trackers: Some(1),
            ..ProviderConfig::default()
        },
    );

    provider.add_event_tracker(job("running"));
    sleep(ms(1)).await;
    let added = provider.add_event_tracker(job("finished").with_status(EventStatus::Done));

    assert_eq!(provider.get("finished"), Some(added));
    assert_eq!(provider.events().len(), 2);
    assert!(persisted(&storage).contains_key("finished"));
    assert_eq!(provider.seen().get("finished"), Some(&false));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn keeps_tracking_in_memory_when_storage_fails() -> Result<()> {
    let check = ScriptedCheck::replying(EventStatus::Done);
    let provider = EventTrackersProvider::builder(
        Arc::new(BrokenStorage),
        StatusCheckRegistry::new().register("scripted", check.clone()),
    )
    .clock(Arc::new(RuntimeClock::starting_at(START_MS)))
    .mount();

    assert!(provider.events().is_empty());
    assert!(provider.subscribe().borrow().events.is_empty());

    provider.add_event_tracker(job("a").with_status_check_interval(100));
    assert!(provider.is_polling("a"));
    assert_eq!(provider.unseen_count(), 1);

    sleep(ms(101)).await;
    assert_eq!(check.calls(), 1);
    assert_eq!(provider.get("a").map(|t| t.status), Some(EventStatus::Done));
    assert!(!provider.is_polling("a"));

    provider.mark_events_as_seen();
    assert_eq!(provider.unseen_count(), 0);

    provider.clear_events();
    assert!(provider.events().is_empty());
    assert!(provider.seen().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn applies_configured_defaults() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let provider = mount_with(
        &storage,
        StatusCheckRegistry::new().register("scripted", check.clone()),
        ProviderConfig {
            default_status_check_interval_ms: 1_000,
            default_max_time_in_progress_ms: Some(2_500),
            ..ProviderConfig::default()
        },
    );

    let added = provider.add_event_tracker(job("a"));
    assert_eq!(added.max_time_in_progress, Some(2_500));

    sleep(ms(2_001)).await;
    assert_eq!(check.calls(), 2);
    sleep(ms(1_000)).await;
    assert_eq!(provider.get("a").map(|t| t.status), Some(EventStatus::Failed));
    assert_eq!(check.timed_out(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn dropping_the_provider_stops_polling() -> Result<()> {
    let storage = InMemoryStorage::new();
    let check = ScriptedCheck::replying(EventStatus::InProgress);
    let provider = mount(&storage, &check);
    provider.add_event_tracker(job("a").with_status_check_interval(10));

    sleep(ms(15)).await;
    assert_eq!(check.calls(), 1);

    drop(provider);
    sleep(ms(100)).await;
    assert_eq!(check.calls(), 1);
    assert_eq!(
        persisted(&storage).get("a").map(|t| t.status),
        Some(EventStatus::InProgress)
    );
    Ok(())
}
