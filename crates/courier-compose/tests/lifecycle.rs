//! End-to-end lifecycle: compose through the session, persist in SQLite,
//! reconcile with the dispatcher against a recording gateway.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::Connection;

use courier_compose::{
    ComposeError, Composer, CompositionEvent, CompositionState, IncomingContent, Reply, TimeChoice,
};
use courier_core::config::DispatcherConfig;
use courier_core::{DeliveryError, DeliveryGateway, DeliveryReference, MessageKind, OwnerId, TargetId};
use courier_scheduler::{Dispatcher, JobStore, ScheduledJob, SqliteJobStore};
use courier_users::{Capability, GroupStore, OperatorStore};

const ADMIN: OwnerId = OwnerId(1001);
const STRANGER: OwnerId = OwnerId(2002);
const GROUP: TargetId = TargetId(-100_555);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Send(TargetId, String, MessageKind),
    Delete(TargetId, String),
}

#[derive(Default)]
struct RecordingGateway {
    calls: Mutex<Vec<Call>>,
    fail_sends: Mutex<bool>,
}

impl RecordingGateway {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryGateway for RecordingGateway {
    async fn send(
        &self,
        target: TargetId,
        content: &str,
        kind: MessageKind,
    ) -> Result<DeliveryReference, DeliveryError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Call::Send(target, content.to_string(), kind));
        if *self.fail_sends.lock().unwrap() {
            return Err(DeliveryError::Transport("network unreachable".into()));
        }
        Ok(DeliveryReference::new(format!("{}", 500 + calls.len())))
    }

    async fn delete(
        &self,
        target: TargetId,
        reference: &DeliveryReference,
    ) -> Result<(), DeliveryError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Delete(target, reference.as_str().to_string()));
        Ok(())
    }
}

struct Harness {
    composer: Composer,
    operators: OperatorStore,
    jobs: Arc<SqliteJobStore>,
    gateway: Arc<RecordingGateway>,
    dispatcher: Dispatcher,
}

fn harness() -> Harness {
    let operators = OperatorStore::new(Connection::open_in_memory().unwrap()).unwrap();
    operators.ensure_admin(ADMIN).unwrap();
    let groups = GroupStore::new(Connection::open_in_memory().unwrap()).unwrap();
    groups.register(GROUP, "announcements", Some(ADMIN)).unwrap();
    let jobs = Arc::new(SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap());
    let gateway = Arc::new(RecordingGateway::default());

    let composer = Composer::new(Arc::new(operators.clone()), jobs.clone(), Arc::new(groups));
    let dispatcher = Dispatcher::new(jobs.clone(), gateway.clone(), &DispatcherConfig::default());
    Harness {
        composer,
        operators,
        jobs,
        gateway,
        dispatcher,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
}

fn text(s: &str) -> CompositionEvent {
    CompositionEvent::Content(IncomingContent::Text(s.into()))
}

fn photo(file: &str) -> CompositionEvent {
    CompositionEvent::Content(IncomingContent::Photo(file.into()))
}

fn video(file: &str) -> CompositionEvent {
    CompositionEvent::Content(IncomingContent::Video(file.into()))
}

/// Feed events as `owner` at `now`; every one must be accepted.
async fn compose(h: &Harness, owner: OwnerId, now: DateTime<Utc>, events: Vec<CompositionEvent>) -> Reply {
    let mut last = None;
    for event in events {
        let shown = format!("{event:?}");
        let reply = h
            .composer
            .handle_at(owner, event, now)
            .await
            .unwrap_or_else(|e| panic!("{shown} rejected: {e}"));
        last = Some(reply);
    }
    last.expect("at least one event")
}

fn scheduled(reply: Reply) -> Vec<ScheduledJob> {
    match reply {
        Reply::Scheduled { jobs } => jobs,
        other => panic!("expected Scheduled, got {other:?}"),
    }
}

#[tokio::test]
async fn scenario_a_two_texts_sent_once_and_removed() {
    let h = harness();
    let reply = compose(
        &h,
        ADMIN,
        t0(),
        vec![
            CompositionEvent::Start,
            text("first"),
            text("second"),
            CompositionEvent::EndOfInput,
            CompositionEvent::SelectTarget(GROUP),
            CompositionEvent::SelectScheduleTime(TimeChoice::In30Seconds),
            CompositionEvent::ConfirmAutoDelete(false),
        ],
    )
    .await;
    assert_eq!(scheduled(reply).len(), 2);

    // Not yet due.
    assert!(h.dispatcher.tick_at(t0() + Duration::seconds(29)).await.is_idle());
    assert!(h.gateway.calls().is_empty());

    let report = h.dispatcher.tick_at(t0() + Duration::seconds(30)).await;
    assert_eq!(report.sent_once, 2);
    assert_eq!(
        h.gateway.calls(),
        vec![
            Call::Send(GROUP, "first".into(), MessageKind::Text),
            Call::Send(GROUP, "second".into(), MessageKind::Text),
        ]
    );
    assert!(h.jobs.list_for_owner(ADMIN).unwrap().is_empty());
}

#[tokio::test]
async fn scenario_b_photo_sent_now_then_deleted_after_30s() {
    let h = harness();
    let jobs = scheduled(
        compose(
            &h,
            ADMIN,
            t0(),
            vec![
                CompositionEvent::Start,
                photo("AgADphoto"),
                CompositionEvent::EndOfInput,
                CompositionEvent::SelectTarget(GROUP),
                CompositionEvent::SelectScheduleTime(TimeChoice::At(t0())),
                CompositionEvent::ConfirmAutoDelete(true),
                CompositionEvent::SelectDeleteTime(TimeChoice::In30Seconds),
            ],
        )
        .await,
    );
    let id = jobs[0].id.clone();
    assert_eq!(jobs[0].delete_time, Some(t0() + Duration::seconds(30)));

    let first = h.dispatcher.tick_at(t0()).await;
    assert_eq!(first.sent_awaiting_delete, 1);
    let kept = h.jobs.get(&id).unwrap().expect("retained until delete time");
    assert_eq!(kept.delivery_reference, Some(DeliveryReference::new("501")));

    let second = h.dispatcher.tick_at(t0() + Duration::seconds(30)).await;
    assert_eq!(second.deleted, 1);
    assert_eq!(
        h.gateway.calls(),
        vec![
            Call::Send(GROUP, "AgADphoto".into(), MessageKind::Photo),
            Call::Delete(GROUP, "501".into()),
        ]
    );
    assert!(h.jobs.get(&id).unwrap().is_none());
}

#[tokio::test]
async fn scenario_c_denied_start_leaves_no_residue() {
    let h = harness();
    let err = h
        .composer
        .handle_at(STRANGER, CompositionEvent::Start, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, ComposeError::PermissionDenied { owner } if owner == STRANGER));
    assert_eq!(h.composer.state_of(STRANGER).await, CompositionState::Idle);

    // Content without a session is not silently attached to anything.
    let err = h
        .composer
        .handle_at(STRANGER, text("sneaky"), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, ComposeError::NotFound(_)));

    // Once granted, the next start is a fresh draft.
    h.operators.add(STRANGER).unwrap();
    h.operators
        .set_capability(STRANGER, Capability::CanSchedule, true)
        .unwrap();
    let reply = compose(&h, STRANGER, t0(), vec![CompositionEvent::Start]).await;
    assert_eq!(reply, Reply::Started);
    assert_eq!(h.composer.items_of(STRANGER).await, Some(vec![]));
}

#[tokio::test]
async fn scenario_d_cancel_while_choosing_time_persists_nothing() {
    let h = harness();
    let reply = compose(
        &h,
        ADMIN,
        t0(),
        vec![
            CompositionEvent::Start,
            text("draft one"),
            video("BAADvideo"),
            CompositionEvent::EndOfInput,
            CompositionEvent::SelectTarget(GROUP),
            CompositionEvent::Cancel,
        ],
    )
    .await;
    assert_eq!(reply, Reply::Cancelled);
    assert_eq!(h.composer.state_of(ADMIN).await, CompositionState::Idle);
    assert!(h.jobs.list_for_owner(ADMIN).unwrap().is_empty());

    assert!(h.dispatcher.tick_at(t0() + Duration::days(1)).await.is_idle());
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn fan_out_round_trips_every_item_in_order() {
    let h = harness();
    let send_at = Utc.with_ymd_and_hms(2026, 10, 18, 14, 0, 0).unwrap();
    let jobs = scheduled(
        compose(
            &h,
            ADMIN,
            t0(),
            vec![
                CompositionEvent::Start,
                text("caption"),
                photo("AgADp"),
                video("BAADv"),
                CompositionEvent::EndOfInput,
                CompositionEvent::SelectTarget(GROUP),
                CompositionEvent::SelectScheduleTime(TimeChoice::At(send_at)),
                CompositionEvent::ConfirmAutoDelete(true),
                CompositionEvent::SelectDeleteTime(TimeChoice::In1Hour),
            ],
        )
        .await,
    );

    let expected = [
        ("caption", MessageKind::Text),
        ("AgADp", MessageKind::Photo),
        ("BAADv", MessageKind::Video),
    ];
    assert_eq!(jobs.len(), expected.len());
    for (job, (content, kind)) in jobs.iter().zip(expected) {
        let stored = h.jobs.get(&job.id).unwrap().expect("persisted");
        assert_eq!(&stored, job);
        assert_eq!(stored.owner, ADMIN);
        assert_eq!(stored.target, GROUP);
        assert_eq!(stored.content, content);
        assert_eq!(stored.kind, kind);
        assert_eq!(stored.schedule_time, send_at);
        assert_eq!(stored.delete_time, Some(send_at + Duration::hours(1)));
        assert!(stored.delivery_reference.is_none());
        assert!(stored.recurrence.is_none());
    }

    let listed: Vec<_> = h
        .jobs
        .list_for_owner(ADMIN)
        .unwrap()
        .into_iter()
        .map(|j| j.content)
        .collect();
    assert_eq!(listed, vec!["caption", "AgADp", "BAADv"]);
}

#[tokio::test]
async fn empty_draft_never_finalizes() {
    let h = harness();
    let reply = compose(
        &h,
        ADMIN,
        t0(),
        vec![CompositionEvent::Start, CompositionEvent::EndOfInput],
    )
    .await;
    assert_eq!(reply, Reply::NothingCollected);
    assert_eq!(h.composer.state_of(ADMIN).await, CompositionState::Idle);
    assert!(h.jobs.list_for_owner(ADMIN).unwrap().is_empty());
}

#[tokio::test]
async fn past_custom_time_is_delivered_on_next_tick() {
    let h = harness();
    compose(
        &h,
        ADMIN,
        t0(),
        vec![
            CompositionEvent::Start,
            text("late"),
            CompositionEvent::EndOfInput,
            CompositionEvent::SelectTarget(GROUP),
            CompositionEvent::SelectScheduleTime(TimeChoice::At(t0() - Duration::hours(3))),
            CompositionEvent::ConfirmAutoDelete(false),
        ],
    )
    .await;

    let report = h.dispatcher.tick_at(t0()).await;
    assert_eq!(report.sent_once, 1);
    assert_eq!(
        h.gateway.calls(),
        vec![Call::Send(GROUP, "late".into(), MessageKind::Text)]
    );
}

#[tokio::test]
async fn failed_sends_never_lead_to_deletes() {
    let h = harness();
    *h.gateway.fail_sends.lock().unwrap() = true;
    compose(
        &h,
        ADMIN,
        t0(),
        vec![
            CompositionEvent::Start,
            text("flaky"),
            CompositionEvent::EndOfInput,
            CompositionEvent::SelectTarget(GROUP),
            CompositionEvent::SelectScheduleTime(TimeChoice::At(t0())),
            CompositionEvent::ConfirmAutoDelete(true),
            CompositionEvent::SelectDeleteTime(TimeChoice::In30Seconds),
        ],
    )
    .await;

    for minutes in 0..3 {
        let report = h.dispatcher.tick_at(t0() + Duration::minutes(minutes)).await;
        assert_eq!(report.send_failures, 1);
        assert_eq!(report.deleted, 0);
    }
    assert!(h
        .gateway
        .calls()
        .iter()
        .all(|c| matches!(c, Call::Send(..))));
    assert_eq!(h.jobs.list_for_owner(ADMIN).unwrap().len(), 1);

    // Recovery: the retained job goes out and is then deleted.
    *h.gateway.fail_sends.lock().unwrap() = false;
    let report = h.dispatcher.tick_at(t0() + Duration::minutes(5)).await;
    assert_eq!(report.sent_awaiting_delete, 1);
    assert_eq!(report.deleted, 1);
    assert!(h.jobs.list_for_owner(ADMIN).unwrap().is_empty());
}

#[tokio::test]
async fn idle_tick_changes_nothing() {
    let h = harness();
    compose(
        &h,
        ADMIN,
        t0(),
        vec![
            CompositionEvent::Start,
            text("tomorrow"),
            CompositionEvent::EndOfInput,
            CompositionEvent::SelectTarget(GROUP),
            CompositionEvent::SelectScheduleTime(TimeChoice::At(t0() + Duration::days(1))),
            CompositionEvent::ConfirmAutoDelete(false),
        ],
    )
    .await;
    let before = h.jobs.list_for_owner(ADMIN).unwrap();

    for _ in 0..3 {
        assert!(h.dispatcher.tick_at(t0()).await.is_idle());
    }
    assert!(h.gateway.calls().is_empty());
    assert_eq!(h.jobs.list_for_owner(ADMIN).unwrap(), before);
}

#[tokio::test]
async fn owners_compose_concurrently_without_interference() {
    let h = Arc::new(harness());
    h.operators.add(STRANGER).unwrap();
    h.operators
        .set_capability(STRANGER, Capability::CanSchedule, true)
        .unwrap();

    let mut tasks = Vec::new();
    for (owner, word) in [(ADMIN, "alpha"), (STRANGER, "beta")] {
        let h = Arc::clone(&h);
        tasks.push(tokio::spawn(async move {
            let mut events = vec![CompositionEvent::Start];
            events.extend((0..5).map(|i| text(&format!("{word}-{i}"))));
            events.extend([
                CompositionEvent::EndOfInput,
                CompositionEvent::SelectTarget(GROUP),
                CompositionEvent::SelectScheduleTime(TimeChoice::In5Minutes),
                CompositionEvent::ConfirmAutoDelete(false),
            ]);
            for event in events {
                h.composer.handle_at(owner, event, t0()).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for (owner, word) in [(ADMIN, "alpha"), (STRANGER, "beta")] {
        let contents: Vec<_> = h
            .jobs
            .list_for_owner(owner)
            .unwrap()
            .into_iter()
            .map(|j| j.content)
            .collect();
        let expected: Vec<_> = (0..5).map(|i| format!("{word}-{i}")).collect();
        assert_eq!(contents, expected);
    }
}
