use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use courier_core::config::DispatcherConfig;
use courier_core::{DeliveryError, DeliveryGateway, DeliveryReference};

use crate::{store::JobStore, types::ScheduledJob};

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Sent and removed (no deletion planned).
    pub sent_once: usize,
    /// Sent and kept until `delete_time`.
    pub sent_awaiting_delete: usize,
    pub deleted: usize,
    pub send_failures: usize,
    pub delete_failures: usize,
    /// Gateway call succeeded but the follow-up store write failed.
    pub store_failures: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        *self == TickReport::default()
    }
}

/// Periodic reconciler: performs due sends, then due deletes.
///
/// Assumes it is the only dispatcher running against its store; two
/// instances would both pick up the same due jobs.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    gateway: Arc<dyn DeliveryGateway>,
    poll_interval: Duration,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        gateway: Arc<dyn DeliveryGateway>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            call_timeout: Duration::from_secs(config.gateway_timeout_secs),
        }
    }

    /// Main loop. Ticks every `poll_interval` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.poll_interval.as_secs(), "dispatcher started");
        self.log_overdue_on_startup();

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = self.tick().await;
                    if !report.is_idle() {
                        info!(?report, "dispatcher tick");
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("dispatcher shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// One reconciliation pass evaluated at `now`.
    ///
    /// The delete query runs after every send of this pass has been
    /// recorded, so a job whose `delete_time` has also passed is sent and
    /// deleted in the same pass. Per-job failures are logged and counted;
    /// they never stop the pass.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        self.send_due(now, &mut report).await;
        self.delete_due(now, &mut report).await;
        report
    }

    // --- private helpers ---------------------------------------------------

    /// Overdue jobs are delivered on the first tick, not skipped.
    fn log_overdue_on_startup(&self) {
        match self.store.due_for_send(Utc::now()) {
            Ok(jobs) if !jobs.is_empty() => {
                warn!(count = jobs.len(), "overdue jobs found on startup; sending now")
            }
            Err(e) => error!("overdue-on-startup query failed: {e}"),
            _ => {}
        }
    }

    async fn send_due(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let due = match self.store.due_for_send(now) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("due-for-send query failed: {e}");
                return;
            }
        };

        for job in due {
            match self.store.claim(&job.id, now) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(job_id = %job.id, "job cancelled before send");
                    continue;
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "failed to claim job");
                    report.store_failures += 1;
                    continue;
                }
            }

            let reference = match self.send_one(&job).await {
                Ok(reference) => reference,
                Err(e) => {
                    // At-least-once: released, retried next tick.
                    warn!(job_id = %job.id, target = %job.target, error = %e, "send failed");
                    report.send_failures += 1;
                    if let Err(e) = self.store.release(&job.id) {
                        error!(job_id = %job.id, error = %e, "failed to release job");
                    }
                    continue;
                }
            };

            let outcome = if job.delete_time.is_some() {
                self.store
                    .mark_delivered(&job.id, &reference)
                    .map(|_| report.sent_awaiting_delete += 1)
            } else {
                self.store.remove(&job.id).map(|_| report.sent_once += 1)
            };

            match outcome {
                Ok(()) => debug!(job_id = %job.id, %reference, "job sent"),
                Err(e) => {
                    // The content is out; the job will be sent again next tick.
                    error!(job_id = %job.id, error = %e, "failed to record delivery");
                    report.store_failures += 1;
                }
            }
        }
    }

    async fn delete_due(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let due = match self.store.due_for_delete(now) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("due-for-delete query failed: {e}");
                return;
            }
        };

        for job in due {
            let Some(reference) = job.delivery_reference.as_ref() else {
                continue;
            };
            if let Err(e) = self.delete_one(&job, reference).await {
                warn!(job_id = %job.id, target = %job.target, error = %e, "delete failed");
                report.delete_failures += 1;
                continue;
            }
            match self.store.remove(&job.id) {
                Ok(()) => {
                    debug!(job_id = %job.id, "job deleted");
                    report.deleted += 1;
                }
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "failed to remove deleted job");
                    report.store_failures += 1;
                }
            }
        }
    }

    async fn send_one(&self, job: &ScheduledJob) -> Result<DeliveryReference, DeliveryError> {
        tokio::time::timeout(
            self.call_timeout,
            self.gateway.send(job.target, &job.content, job.kind),
        )
        .await
        .map_err(|_| DeliveryError::Timeout {
            secs: self.call_timeout.as_secs(),
        })?
    }

    async fn delete_one(
        &self,
        job: &ScheduledJob,
        reference: &DeliveryReference,
    ) -> Result<(), DeliveryError> {
        tokio::time::timeout(self.call_timeout, self.gateway.delete(job.target, reference))
            .await
            .map_err(|_| DeliveryError::Timeout {
                secs: self.call_timeout.as_secs(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rusqlite::Connection;

    use courier_core::{MessageItem, MessageKind, OwnerId, TargetId};

    use crate::store::SqliteJobStore;
    use crate::types::NewJob;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Send(TargetId, String, MessageKind),
        Delete(TargetId, String),
    }

    /// Records calls; hands out sequential message ids.
    #[derive(Default)]
    struct RecordingGateway {
        calls: Mutex<Vec<Call>>,
        fail_sends_of: Mutex<Vec<String>>,
        fail_deletes: Mutex<bool>,
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
            if self.fail_sends_of.lock().unwrap().iter().any(|c| c == content) {
                return Err(DeliveryError::Transport("connection reset".into()));
            }
            Ok(DeliveryReference::new(format!("m{}", calls.len())))
        }

        async fn delete(
            &self,
            target: TargetId,
            reference: &DeliveryReference,
        ) -> Result<(), DeliveryError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Delete(target, reference.to_string()));
            if *self.fail_deletes.lock().unwrap() {
                return Err(DeliveryError::Rejected("message can't be deleted".into()));
            }
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<SqliteJobStore>, Arc<RecordingGateway>, Dispatcher) {
        let store = Arc::new(SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let gateway = Arc::new(RecordingGateway::default());
        let dispatcher = Dispatcher::new(
            store.clone(),
            gateway.clone(),
            &DispatcherConfig::default(),
        );
        (store, gateway, dispatcher)
    }

    fn job(text: &str, at: DateTime<Utc>, delete_at: Option<DateTime<Utc>>) -> NewJob {
        NewJob::from_item(OwnerId(1), TargetId(-100), &MessageItem::text(text), at, delete_at)
    }

    /// Gateway whose send races an owner's cancel of the same job.
    struct CancellingGateway {
        store: Arc<SqliteJobStore>,
        job_id: Mutex<Option<String>>,
        cancel_result: Mutex<Option<crate::error::Result<()>>>,
        deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeliveryGateway for CancellingGateway {
        async fn send(
            &self,
            _target: TargetId,
            _content: &str,
            _kind: MessageKind,
        ) -> Result<DeliveryReference, DeliveryError> {
            if let Some(id) = self.job_id.lock().unwrap().clone() {
                let result = self.store.cancel_pending(OwnerId(1), &id);
                *self.cancel_result.lock().unwrap() = Some(result);
            }
            Ok(DeliveryReference::new("77"))
        }

        async fn delete(
            &self,
            _target: TargetId,
            reference: &DeliveryReference,
        ) -> Result<(), DeliveryError> {
            self.deletes.lock().unwrap().push(reference.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancel_during_send_is_refused_and_delete_still_happens() {
        let store = Arc::new(SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let gateway = Arc::new(CancellingGateway {
            store: store.clone(),
            job_id: Mutex::new(None),
            cancel_result: Mutex::new(None),
            deletes: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(
            store.clone(),
            gateway.clone(),
            &DispatcherConfig::default(),
        );
        let stored = store
            .insert(job("racy", t0(), Some(t0() + ChronoDuration::seconds(30))))
            .unwrap();
        *gateway.job_id.lock().unwrap() = Some(stored.id.clone());

        let report = dispatcher.tick_at(t0()).await;
        assert!(matches!(
            gateway.cancel_result.lock().unwrap().take(),
            Some(Err(crate::error::SchedulerError::JobInFlight { .. }))
        ));
        assert_eq!(report.sent_awaiting_delete, 1);
        assert_eq!(report.store_failures, 0);
        let kept = store.get(&stored.id).unwrap().expect("still tracked");
        assert_eq!(kept.delivery_reference, Some(DeliveryReference::new("77")));

        let report = dispatcher.tick_at(t0() + ChronoDuration::hours(1)).await;
        assert_eq!(report.deleted, 1);
        assert_eq!(*gateway.deletes.lock().unwrap(), vec!["77".to_string()]);
        assert!(store.get(&stored.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn idle_tick_touches_nothing() {
        let (store, gateway, dispatcher) = setup();
        store.insert(job("future", t0() + ChronoDuration::minutes(5), None)).unwrap();

        let report = dispatcher.tick_at(t0()).await;
        assert!(report.is_idle());
        assert!(gateway.calls().is_empty());
        assert_eq!(store.list_for_owner(OwnerId(1)).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_shot_job_is_sent_then_removed() {
        let (store, gateway, dispatcher) = setup();
        store.insert(job("hello", t0(), None)).unwrap();

        let report = dispatcher.tick_at(t0()).await;
        assert_eq!(report.sent_once, 1);
        assert_eq!(
            gateway.calls(),
            vec![Call::Send(TargetId(-100), "hello".into(), MessageKind::Text)]
        );
        assert!(store.list_for_owner(OwnerId(1)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn job_with_delete_time_is_retained_until_deleted() {
        let (store, gateway, dispatcher) = setup();
        let delete_at = t0() + ChronoDuration::seconds(30);
        let stored = store.insert(job("bye", t0(), Some(delete_at))).unwrap();

        let report = dispatcher.tick_at(t0()).await;
        assert_eq!(report.sent_awaiting_delete, 1);
        let kept = store.get(&stored.id).unwrap().expect("retained");
        assert_eq!(kept.delivery_reference, Some(DeliveryReference::new("m1")));

        // Not yet time to delete.
        assert!(dispatcher.tick_at(t0() + ChronoDuration::seconds(10)).await.is_idle());

        let report = dispatcher.tick_at(delete_at).await;
        assert_eq!(report.deleted, 1);
        assert_eq!(
            gateway.calls().last(),
            Some(&Call::Delete(TargetId(-100), "m1".into()))
        );
        assert!(store.get(&stored.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_send_is_retried_next_tick() {
        let (store, gateway, dispatcher) = setup();
        store.insert(job("flaky", t0(), None)).unwrap();
        gateway.fail_sends_of.lock().unwrap().push("flaky".into());

        let report = dispatcher.tick_at(t0()).await;
        assert_eq!(report.send_failures, 1);
        assert_eq!(store.due_for_send(t0()).unwrap().len(), 1);

        gateway.fail_sends_of.lock().unwrap().clear();
        let report = dispatcher.tick_at(t0() + ChronoDuration::seconds(30)).await;
        assert_eq!(report.sent_once, 1);
        assert_eq!(gateway.calls().len(), 2);
        assert!(store.list_for_owner(OwnerId(1)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_send_releases_the_job_for_cancel() {
        let (store, gateway, dispatcher) = setup();
        let stored = store.insert(job("flaky", t0(), None)).unwrap();
        gateway.fail_sends_of.lock().unwrap().push("flaky".into());

        dispatcher.tick_at(t0()).await;
        store
            .cancel_pending(OwnerId(1), &stored.id)
            .expect("released job is cancellable");
        assert!(store.get(&stored.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_tick() {
        let (store, gateway, dispatcher) = setup();
        store.insert(job("a", t0(), None)).unwrap();
        store.insert(job("b", t0(), None)).unwrap();
        store.insert(job("c", t0(), None)).unwrap();
        gateway.fail_sends_of.lock().unwrap().push("b".into());

        let report = dispatcher.tick_at(t0()).await;
        assert_eq!(report.sent_once, 2);
        assert_eq!(report.send_failures, 1);
        let left: Vec<_> = store
            .list_for_owner(OwnerId(1))
            .unwrap()
            .into_iter()
            .map(|j| j.content)
            .collect();
        assert_eq!(left, vec!["b"]);
    }

    #[tokio::test]
    async fn failed_delete_keeps_job_for_retry() {
        let (store, gateway, dispatcher) = setup();
        let delete_at = t0() + ChronoDuration::seconds(30);
        let stored = store.insert(job("x", t0(), Some(delete_at))).unwrap();
        dispatcher.tick_at(t0()).await;

        *gateway.fail_deletes.lock().unwrap() = true;
        let report = dispatcher.tick_at(delete_at).await;
        assert_eq!(report.delete_failures, 1);
        assert!(store.get(&stored.id).unwrap().is_some());

        *gateway.fail_deletes.lock().unwrap() = false;
        let report = dispatcher.tick_at(delete_at + ChronoDuration::seconds(30)).await;
        assert_eq!(report.deleted, 1);
        assert!(store.get(&stored.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn overdue_send_and_delete_happen_in_one_pass_in_order() {
        let (store, gateway, dispatcher) = setup();
        store
            .insert(job("late", t0(), Some(t0() + ChronoDuration::seconds(30))))
            .unwrap();

        let report = dispatcher.tick_at(t0() + ChronoDuration::minutes(5)).await;
        assert_eq!(report.sent_awaiting_delete, 1);
        assert_eq!(report.deleted, 1);
        assert_eq!(
            gateway.calls(),
            vec![
                Call::Send(TargetId(-100), "late".into(), MessageKind::Text),
                Call::Delete(TargetId(-100), "m1".into()),
            ]
        );
        assert!(store.list_for_owner(OwnerId(1)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_never_attempted_before_a_successful_send() {
        let (store, gateway, dispatcher) = setup();
        store
            .insert(job("never", t0(), Some(t0() + ChronoDuration::seconds(1))))
            .unwrap();
        gateway.fail_sends_of.lock().unwrap().push("never".into());

        for step in 0..5 {
            dispatcher.tick_at(t0() + ChronoDuration::seconds(step * 30)).await;
        }
        assert!(gateway
            .calls()
            .iter()
            .all(|c| matches!(c, Call::Send(..))));
        assert_eq!(gateway.calls().len(), 5);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let (_store, _gateway, dispatcher) = setup();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(dispatcher.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dispatcher did not stop")
            .expect("dispatcher task panicked");
    }
}
