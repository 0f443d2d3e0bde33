//! The sync queue: admission, durable bookkeeping and dispatch cycles.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use fieldsync_common::{Error, QueueItemId, Result, SurveyId};
use fieldsync_storage::{
    FreeSpaceProbe, RecordStore, RemoteError, RemoteStore, StorageGuard, StorageWarning,
};
use fieldsync_validation::{Survey, SurveyViolation, Validator};

use crate::config::{FieldSyncConfig, SyncConfig};
use crate::network::{should_attempt_sync, NetworkMonitor, NetworkSource};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state::{ItemStatus, QueueItem};

/// Why a survey was not admitted to the queue.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The survey failed one or more completeness rules.
    #[error("Survey failed validation: {}", join_violations(.0))]
    ValidationFailed(Vec<SurveyViolation>),

    /// Free space is below the hard floor.
    #[error("Storage exhausted: {free_bytes} bytes free, at least {hard_floor} required")]
    StorageExhausted { free_bytes: u64, hard_floor: u64 },

    /// A queue item for this survey already exists.
    #[error("Survey {0} is already queued")]
    Duplicate(SurveyId),

    /// The durable store or free-space probe failed.
    #[error(transparent)]
    Store(#[from] Error),
}

fn join_violations(violations: &[SurveyViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// How a dispatch cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Every pending item was considered.
    Completed,
    /// The network gate was closed; nothing was attempted.
    NetworkUnavailable,
    /// Another cycle was in flight; this trigger was dropped.
    AlreadyRunning,
}

/// Summary of one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub status: CycleStatus,
    /// Remote upserts issued.
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Pending items still inside their backoff window.
    pub deferred: usize,
    /// Items moved to `Exhausted` by this cycle.
    pub exhausted: usize,
    pub duration: Duration,
}

impl DispatchReport {
    fn new(status: CycleStatus) -> Self {
        Self {
            status,
            attempted: 0,
            delivered: 0,
            failed: 0,
            deferred: 0,
            exhausted: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Collaborators the queue is wired to.
#[derive(Clone)]
pub struct QueueBackends {
    pub store: Arc<dyn RecordStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub network: Arc<dyn NetworkSource>,
    pub free_space: Arc<dyn FreeSpaceProbe>,
}

enum AttemptOutcome {
    Delivered,
    Failed,
    /// The item left `Pending` before the attempt could start.
    Skipped,
}

/// Clears the in-progress flag when the cycle ends or its future is dropped.
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct QueueState {
    /// Items in insertion order.
    items: Vec<QueueItem>,
    next_sequence: u64,
}

impl QueueState {
    fn position(&self, id: QueueItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }
}

/// Offline-first queue of surveys awaiting delivery.
///
/// `enqueue` and `run_dispatch_cycle` are the only mutators besides the
/// operator actions. Queue membership sits behind one lock; remote calls
/// are made without holding it.
pub struct SyncQueue {
    state: RwLock<QueueState>,
    store: Arc<dyn RecordStore>,
    remote: Arc<dyn RemoteStore>,
    network: NetworkMonitor,
    free_space: Arc<dyn FreeSpaceProbe>,
    validator: Validator,
    guard: StorageGuard,
    retry_policy: RetryPolicy,
    config: SyncConfig,
    cycle_in_progress: AtomicBool,
}

impl SyncQueue {
    /// Open the queue, reloading every item persisted in the store.
    ///
    /// Items left in `Attempting` by an interrupted cycle are returned to
    /// `Pending` without consuming a retry.
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Store listing failed
    pub async fn open(backends: QueueBackends, config: FieldSyncConfig) -> Result<Self> {
        config.validate()?;

        let mut items = Vec::new();
        for (key, bytes) in backends.store.list_all().await? {
            match QueueItem::from_bytes(&bytes) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping unreadable queue record {}: {}", key, e),
            }
        }
        items.sort_by_key(QueueItem::sequence);

        for item in items.iter_mut().filter(|i| i.status() == ItemStatus::Attempting) {
            item.recover()?;
            backends.store.put(&item.store_key(), item.to_bytes()?).await?;
            info!("Recovered interrupted delivery of survey {}", item.survey_id());
        }

        let next_sequence = items.last().map(|i| i.sequence() + 1).unwrap_or(0);
        info!(
            "Sync queue opened with {} items (store: {}, remote: {})",
            items.len(),
            backends.store.name(),
            backends.remote.name()
        );

        Ok(Self {
            state: RwLock::new(QueueState {
                items,
                next_sequence,
            }),
            store: backends.store,
            remote: backends.remote,
            network: NetworkMonitor::new(backends.network),
            free_space: backends.free_space,
            validator: Validator::new(config.validation),
            guard: StorageGuard::new(config.storage),
            retry_policy: RetryPolicy::from_config(&config.sync),
            config: config.sync,
            cycle_in_progress: AtomicBool::new(false),
        })
    }

    /// The validator used at admission.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Admit a survey.
    ///
    /// Runs validation, then the storage guard, then persists a new
    /// `Pending` item. Nothing is mutated when any step fails. Never
    /// touches the network.
    pub async fn enqueue(&self, survey: Survey) -> std::result::Result<QueueItemId, EnqueueError> {
        let report = self.validator.validate_survey(&survey);
        if !report.is_valid() {
            warn!(
                "Rejected survey {}: {}",
                survey.id,
                report.messages().join("; ")
            );
            return Err(EnqueueError::ValidationFailed(report.into_violations()));
        }

        let free_bytes = self.free_space.free_bytes().await?;
        let check = self.guard.check_storage_space(free_bytes);
        if !check.ok {
            warn!(
                "Rejected survey {}: {} ({} bytes free)",
                survey.id,
                StorageWarning::CriticallyLow,
                free_bytes
            );
            return Err(EnqueueError::StorageExhausted {
                free_bytes,
                hard_floor: self.guard.thresholds().hard_floor_bytes,
            });
        }
        if let Some(warning) = check.warning {
            warn!("{} ({} bytes free)", warning, free_bytes);
        }

        let mut state = self.state.write().await;
        if state.items.iter().any(|item| item.survey_id() == &survey.id) {
            return Err(EnqueueError::Duplicate(survey.id));
        }

        let item = QueueItem::new(survey, self.config.default_max_retries, state.next_sequence);
        self.store.put(&item.store_key(), item.to_bytes()?).await?;

        let id = item.id();
        info!("Queued survey {} as {}", item.survey_id(), id);
        state.next_sequence += 1;
        state.items.push(item);
        Ok(id)
    }

    /// Run one dispatch cycle now.
    pub async fn run_dispatch_cycle(&self) -> DispatchReport {
        self.run_dispatch_cycle_at(Utc::now()).await
    }

    /// Run one dispatch cycle, judging backoff windows against `now`.
    ///
    /// The network is consulted once for the whole cycle. Eligible items
    /// are attempted oldest first; individual delivery failures are recorded
    /// on the item and never abort the cycle. Overlapping calls return
    /// immediately with `CycleStatus::AlreadyRunning`.
    pub async fn run_dispatch_cycle_at(&self, now: DateTime<Utc>) -> DispatchReport {
        let start = Instant::now();
        let Some(_guard) = CycleGuard::acquire(&self.cycle_in_progress) else {
            debug!("Dispatch cycle already in progress, dropping trigger");
            return DispatchReport::new(CycleStatus::AlreadyRunning);
        };

        self.recover_interrupted().await;

        let network = self.network.snapshot().await;
        if !should_attempt_sync(&network) {
            debug!("Network not ready, skipping dispatch cycle");
            let mut report = DispatchReport::new(CycleStatus::NetworkUnavailable);
            report.duration = start.elapsed();
            return report;
        }

        let mut report = DispatchReport::new(CycleStatus::Completed);

        let pending: Vec<QueueItem> = {
            let state = self.state.read().await;
            state
                .items
                .iter()
                .filter(|item| item.status() == ItemStatus::Pending)
                .cloned()
                .collect()
        };

        let mut eligible = Vec::new();
        for item in pending {
            match self.retry_policy.decide(&item, now) {
                RetryDecision::Eligible => eligible.push(item.id()),
                RetryDecision::TooSoon { wait } => {
                    debug!("Survey {} not due for {:?}", item.survey_id(), wait);
                    report.deferred += 1;
                }
                RetryDecision::Exhausted => {
                    match self.transition(item.id(), QueueItem::mark_exhausted).await {
                        Ok(_) => {
                            error!(
                                "Survey {} exhausted after {} attempts: {}",
                                item.survey_id(),
                                item.retry_count(),
                                item.last_error().unwrap_or("unknown error")
                            );
                            report.exhausted += 1;
                        }
                        Err(e) => error!("Failed to mark {} exhausted: {}", item.id(), e),
                    }
                }
            }
        }

        let outcomes: Vec<AttemptOutcome> = stream::iter(eligible)
            .map(|id| self.attempt(id, now))
            .buffered(self.config.dispatch_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                AttemptOutcome::Delivered => {
                    report.attempted += 1;
                    report.delivered += 1;
                }
                AttemptOutcome::Failed => {
                    report.attempted += 1;
                    report.failed += 1;
                }
                AttemptOutcome::Skipped => {}
            }
        }

        report.duration = start.elapsed();
        info!(
            "Dispatch cycle completed in {:?}: {} attempted, {} delivered, {} failed, {} deferred, {} exhausted",
            report.duration,
            report.attempted,
            report.delivered,
            report.failed,
            report.deferred,
            report.exhausted
        );
        report
    }

    /// Deliver one item and record the outcome.
    async fn attempt(&self, id: QueueItemId, now: DateTime<Utc>) -> AttemptOutcome {
        let item = match self.transition(id, QueueItem::begin_attempt).await {
            Ok(item) => item,
            Err(e) => {
                debug!("Skipping {}: {}", id, e);
                return AttemptOutcome::Skipped;
            }
        };

        let result = match item.survey().to_payload() {
            Ok(payload) => {
                let timeout = self.config.remote_timeout();
                match tokio::time::timeout(timeout, self.remote.upsert(item.survey_id(), &payload))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Timeout(timeout)),
                }
            }
            Err(e) => Err(RemoteError::Encoding(e.to_string())),
        };

        match result {
            Ok(ack) => {
                debug!("Remote accepted {} at {}", ack.record_id, ack.accepted_at);
                self.complete(id).await;
                AttemptOutcome::Delivered
            }
            Err(err) => {
                warn!(
                    "Delivery of survey {} failed (attempt {}): {}",
                    item.survey_id(),
                    item.retry_count() + 1,
                    err
                );
                let message = err.to_string();
                if let Err(e) = self
                    .transition(id, |item| item.record_failure(now, message))
                    .await
                {
                    error!("Failed to record delivery failure for {}: {}", id, e);
                }
                AttemptOutcome::Failed
            }
        }
    }

    /// Remove a delivered item from memory and the store.
    async fn complete(&self, id: QueueItemId) {
        let mut state = self.state.write().await;
        let Some(pos) = state.position(id) else {
            return;
        };

        if let Err(e) = state.items[pos].record_success() {
            error!("Cannot mark {} delivered: {}", id, e);
            return;
        }
        let item = state.items.remove(pos);
        info!("Delivered survey {}", item.survey_id());

        // A leftover record is re-upserted after restart.
        if let Err(e) = self.store.delete(&item.store_key()).await {
            error!("Failed to delete delivered item {}: {}", id, e);
        }
    }

    /// Return items stranded in `Attempting` to `Pending`.
    ///
    /// Only called while holding the cycle guard, so no attempt is in flight.
    async fn recover_interrupted(&self) {
        let stranded: Vec<QueueItemId> = {
            let state = self.state.read().await;
            state
                .items
                .iter()
                .filter(|item| item.status() == ItemStatus::Attempting)
                .map(QueueItem::id)
                .collect()
        };

        for id in stranded {
            match self.transition(id, QueueItem::recover).await {
                Ok(item) => info!("Recovered interrupted delivery of survey {}", item.survey_id()),
                Err(e) => error!("Failed to recover {}: {}", id, e),
            }
        }
    }

    /// Apply `f` to a copy of an item and write it through to the store.
    ///
    /// The in-memory item is only replaced once the store accepted the write.
    async fn transition<F>(&self, id: QueueItemId, f: F) -> Result<QueueItem>
    where
        F: FnOnce(&mut QueueItem) -> Result<()>,
    {
        let mut state = self.state.write().await;
        let pos = state
            .position(id)
            .ok_or_else(|| Error::NotFound(format!("Queue item {}", id)))?;

        let mut updated = state.items[pos].clone();
        f(&mut updated)?;
        self.store
            .put(&updated.store_key(), updated.to_bytes()?)
            .await?;

        state.items[pos] = updated.clone();
        Ok(updated)
    }

    /// All items in insertion order.
    pub async fn items(&self) -> Vec<QueueItem> {
        self.state.read().await.items.clone()
    }

    pub async fn get(&self, id: QueueItemId) -> Option<QueueItem> {
        let state = self.state.read().await;
        state.position(id).map(|pos| state.items[pos].clone())
    }

    /// Status of an item; `None` once delivered or discarded.
    pub async fn status(&self, id: QueueItemId) -> Option<ItemStatus> {
        self.get(id).await.map(|item| item.status())
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pending_count(&self) -> usize {
        let state = self.state.read().await;
        state
            .items
            .iter()
            .filter(|item| item.status() == ItemStatus::Pending)
            .count()
    }

    /// Items that ran out of retries and need an operator.
    pub async fn exhausted_items(&self) -> Vec<QueueItem> {
        let state = self.state.read().await;
        state
            .items
            .iter()
            .filter(|item| item.status() == ItemStatus::Exhausted)
            .cloned()
            .collect()
    }

    /// Drop an exhausted item for good.
    ///
    /// # Errors
    /// - Item not found
    /// - Item is not exhausted
    /// - Store deletion failed
    pub async fn discard(&self, id: QueueItemId) -> Result<QueueItem> {
        let mut state = self.state.write().await;
        let pos = state
            .position(id)
            .ok_or_else(|| Error::NotFound(format!("Queue item {}", id)))?;

        let status = state.items[pos].status();
        if status != ItemStatus::Exhausted {
            return Err(Error::InvalidInput(format!(
                "Only exhausted items can be discarded; {} is {}",
                id, status
            )));
        }

        self.store.delete(&state.items[pos].store_key()).await?;
        let item = state.items.remove(pos);
        warn!("Discarded survey {} after {} attempts", item.survey_id(), item.retry_count());
        Ok(item)
    }

    /// Give an exhausted item a fresh retry budget.
    pub async fn requeue(&self, id: QueueItemId) -> Result<()> {
        let item = self.transition(id, QueueItem::requeue).await?;
        info!("Requeued survey {}", item.survey_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetworkState, Reachability, StaticNetworkSource, WatchNetworkSource};
    use chrono::Duration as ChronoDuration;
    use fieldsync_storage::{FixedFreeSpace, MemoryRemote, MemoryStore, MIB};

    fn survey(id: &str) -> Survey {
        Survey::new(SurveyId::new(id).unwrap())
            .with_location(10.77, 106.70)
            .with_photo("photo-1.jpg")
            .with_location_name("Plot 12")
            .with_land_use_type("ONT")
    }

    fn backends(
        store: MemoryStore,
        remote: MemoryRemote,
        network: NetworkState,
        free_bytes: u64,
    ) -> QueueBackends {
        QueueBackends {
            store: Arc::new(store),
            remote: Arc::new(remote),
            network: Arc::new(StaticNetworkSource(network)),
            free_space: Arc::new(FixedFreeSpace(free_bytes)),
        }
    }

    async fn online_queue(store: MemoryStore, remote: MemoryRemote) -> SyncQueue {
        SyncQueue::open(
            backends(store, remote, NetworkState::online(), 100 * MIB),
            FieldSyncConfig::default(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_persists_pending_item() {
        let store = MemoryStore::new();
        let queue = online_queue(store.clone(), MemoryRemote::new()).await;

        let id = queue.enqueue(survey("s-1")).await.unwrap();
        assert_eq!(queue.status(id).await, Some(ItemStatus::Pending));
        assert_eq!(store.len(), 1);
        assert!(store.get(&id.to_string()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_survey_without_mutation() {
        let store = MemoryStore::new();
        let queue = online_queue(store.clone(), MemoryRemote::new()).await;

        let err = queue
            .enqueue(Survey::new(SurveyId::new("bad").unwrap()))
            .await
            .unwrap_err();
        match err {
            EnqueueError::ValidationFailed(violations) => assert_eq!(violations.len(), 4),
            other => panic!("unexpected error: {other}"),
        }
        assert!(queue.is_empty().await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_when_storage_exhausted() {
        let store = MemoryStore::new();
        let queue = SyncQueue::open(
            backends(store.clone(), MemoryRemote::new(), NetworkState::online(), 5 * MIB),
            FieldSyncConfig::default(),
        )
        .await
        .unwrap();

        let err = queue.enqueue(survey("s-1")).await.unwrap_err();
        assert!(matches!(
            err,
            EnqueueError::StorageExhausted { free_bytes, hard_floor }
                if free_bytes == 5 * MIB && hard_floor == 10 * MIB
        ));
        assert!(queue.is_empty().await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_with_low_storage_proceeds() {
        let queue = SyncQueue::open(
            backends(MemoryStore::new(), MemoryRemote::new(), NetworkState::online(), 30 * MIB),
            FieldSyncConfig::default(),
        )
        .await
        .unwrap();
        assert!(queue.enqueue(survey("s-1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_enqueue_rejects_duplicate_survey() {
        let queue = online_queue(MemoryStore::new(), MemoryRemote::new()).await;
        queue.enqueue(survey("s-1")).await.unwrap();
        assert!(matches!(
            queue.enqueue(survey("s-1")).await,
            Err(EnqueueError::Duplicate(_))
        ));
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_successful_cycle_removes_items() {
        let store = MemoryStore::new();
        let remote = MemoryRemote::new();
        let queue = online_queue(store.clone(), remote.clone()).await;

        let a = queue.enqueue(survey("s-1")).await.unwrap();
        queue.enqueue(survey("s-2")).await.unwrap();

        let report = queue.run_dispatch_cycle().await;
        assert_eq!(report.status, CycleStatus::Completed);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);
        assert!(queue.is_empty().await);
        assert!(store.is_empty());
        assert!(queue.status(a).await.is_none());
        assert_eq!(remote.record_count(), 2);
        assert_eq!(remote.record("s-1").unwrap()["location_name"], "Plot 12");
    }

    #[tokio::test]
    async fn test_offline_cycle_is_noop() {
        for network in [
            NetworkState::offline(),
            NetworkState::new(true, Reachability::Unknown),
            NetworkState::new(true, Reachability::Unreachable),
        ] {
            let remote = MemoryRemote::new();
            let queue = SyncQueue::open(
                backends(MemoryStore::new(), remote.clone(), network, 100 * MIB),
                FieldSyncConfig::default(),
            )
            .await
            .unwrap();
            queue.enqueue(survey("s-1")).await.unwrap();

            let report = queue.run_dispatch_cycle().await;
            assert_eq!(report.status, CycleStatus::NetworkUnavailable);
            assert_eq!(report.attempted, 0);
            assert_eq!(remote.call_count(), 0);
            assert_eq!(queue.pending_count().await, 1);
        }
    }

    #[tokio::test]
    async fn test_failure_consumes_retry_and_backs_off() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteError::Unavailable("503".to_string()));
        let queue = online_queue(MemoryStore::new(), remote.clone()).await;
        let id = queue.enqueue(survey("s-1")).await.unwrap();

        let now = Utc::now();
        let report = queue.run_dispatch_cycle_at(now).await;
        assert_eq!(report.failed, 1);

        let item = queue.get(id).await.unwrap();
        assert_eq!(item.status(), ItemStatus::Pending);
        assert_eq!(item.retry_count(), 1);
        assert_eq!(item.last_attempt(), Some(now));
        assert!(item.last_error().unwrap().contains("503"));

        // One minute later the two-minute backoff has not elapsed.
        let report = queue
            .run_dispatch_cycle_at(now + ChronoDuration::minutes(1))
            .await;
        assert_eq!(report.attempted, 0);
        assert_eq!(report.deferred, 1);

        let report = queue
            .run_dispatch_cycle_at(now + ChronoDuration::minutes(2))
            .await;
        assert_eq!(report.delivered, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_remote_timeout_counts_as_failure() {
        let remote = MemoryRemote::new().with_latency(Duration::from_secs(5));
        let mut config = FieldSyncConfig::default();
        config.sync.remote_timeout_secs = 1;
        let queue = SyncQueue::open(
            backends(MemoryStore::new(), remote, NetworkState::online(), 100 * MIB),
            config,
        )
        .await
        .unwrap();
        let id = queue.enqueue(survey("s-1")).await.unwrap();

        let report = queue.run_dispatch_cycle().await;
        assert_eq!(report.failed, 1);

        let item = queue.get(id).await.unwrap();
        assert_eq!(item.retry_count(), 1);
        assert!(item.last_error().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_exhaustion_and_operator_actions() {
        let remote = MemoryRemote::new();
        remote.set_failing(Some(RemoteError::Unavailable("down".to_string())));
        let mut config = FieldSyncConfig::default();
        config.sync.default_max_retries = 2;
        let store = MemoryStore::new();
        let queue = SyncQueue::open(
            backends(store.clone(), remote.clone(), NetworkState::online(), 100 * MIB),
            config,
        )
        .await
        .unwrap();
        let id = queue.enqueue(survey("s-1")).await.unwrap();

        let mut now = Utc::now();
        for _ in 0..2 {
            queue.run_dispatch_cycle_at(now).await;
            now += ChronoDuration::hours(1);
        }
        assert_eq!(queue.get(id).await.unwrap().retry_count(), 2);
        assert!(queue.exhausted_items().await.is_empty());

        let report = queue.run_dispatch_cycle_at(now).await;
        assert_eq!(report.exhausted, 1);
        assert_eq!(report.attempted, 0);
        let exhausted = queue.exhausted_items().await;
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].id(), id);

        // Never auto-retried again.
        let calls = remote.call_count();
        queue
            .run_dispatch_cycle_at(now + ChronoDuration::days(30))
            .await;
        assert_eq!(remote.call_count(), calls);

        remote.set_failing(None);
        queue.requeue(id).await.unwrap();
        assert_eq!(queue.status(id).await, Some(ItemStatus::Pending));
        assert_eq!(queue.get(id).await.unwrap().retry_count(), 0);

        let report = queue.run_dispatch_cycle_at(now).await;
        assert_eq!(report.delivered, 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_discard_only_exhausted() {
        let remote = MemoryRemote::new();
        remote.set_failing(Some(RemoteError::Unavailable("down".to_string())));
        let mut config = FieldSyncConfig::default();
        config.sync.default_max_retries = 1;
        let store = MemoryStore::new();
        let queue = SyncQueue::open(
            backends(store.clone(), remote, NetworkState::online(), 100 * MIB),
            config,
        )
        .await
        .unwrap();
        let id = queue.enqueue(survey("s-1")).await.unwrap();

        assert!(queue.discard(id).await.is_err());

        let now = Utc::now();
        queue.run_dispatch_cycle_at(now).await;
        queue.run_dispatch_cycle_at(now + ChronoDuration::hours(1)).await;
        assert_eq!(queue.status(id).await, Some(ItemStatus::Exhausted));

        let discarded = queue.discard(id).await.unwrap();
        assert_eq!(discarded.survey_id().as_str(), "s-1");
        assert!(queue.is_empty().await);
        assert!(store.is_empty());
        assert!(matches!(queue.discard(id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_dispatch_in_insertion_order() {
        let remote = MemoryRemote::new();
        let mut config = FieldSyncConfig::default();
        config.sync.dispatch_concurrency = 1;
        let queue = SyncQueue::open(
            backends(MemoryStore::new(), remote.clone(), NetworkState::online(), 100 * MIB),
            config,
        )
        .await
        .unwrap();

        for id in ["c", "a", "b"] {
            queue.enqueue(survey(id)).await.unwrap();
        }
        let order: Vec<String> = queue
            .items()
            .await
            .iter()
            .map(|i| i.survey_id().to_string())
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);

        remote.fail_next(RemoteError::Unavailable("first call".to_string()));
        queue.run_dispatch_cycle().await;

        // Only the oldest item absorbed the scripted failure.
        let remaining = queue.items().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].survey_id().as_str(), "c");
    }

    #[tokio::test]
    async fn test_delivered_item_not_redispatched() {
        let remote = MemoryRemote::new();
        let queue = online_queue(MemoryStore::new(), remote.clone()).await;
        queue.enqueue(survey("s-1")).await.unwrap();

        queue.run_dispatch_cycle().await;
        let report = queue.run_dispatch_cycle().await;
        assert_eq!(report.attempted, 0);
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_dropped() {
        let remote = MemoryRemote::new().with_latency(Duration::from_millis(200));
        let queue = Arc::new(online_queue(MemoryStore::new(), remote.clone()).await);
        queue.enqueue(survey("s-1")).await.unwrap();

        let first = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.run_dispatch_cycle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = queue.run_dispatch_cycle().await;
        assert_eq!(second.status, CycleStatus::AlreadyRunning);

        let first = first.await.unwrap();
        assert_eq!(first.delivered, 1);
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_during_cycle_is_kept() {
        let remote = MemoryRemote::new().with_latency(Duration::from_millis(200));
        let store = MemoryStore::new();
        let queue = Arc::new(online_queue(store.clone(), remote.clone()).await);
        queue.enqueue(survey("s-1")).await.unwrap();

        let cycle = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.run_dispatch_cycle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let late = queue.enqueue(survey("s-2")).await.unwrap();

        let report = cycle.await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.status(late).await, Some(ItemStatus::Pending));
        assert_eq!(store.len(), 1);

        let report = queue.run_dispatch_cycle().await;
        assert_eq!(report.delivered, 1);
        assert!(queue.is_empty().await);
        assert!(store.is_empty());
        assert!(remote.record("s-2").is_some());
    }

    #[tokio::test]
    async fn test_cancelled_cycle_leaves_item_recoverable() {
        let (network, tx) = WatchNetworkSource::new(NetworkState::online());
        let queue = SyncQueue::open(
            QueueBackends {
                store: Arc::new(MemoryStore::new()),
                remote: Arc::new(MemoryRemote::new().with_latency(Duration::from_secs(10))),
                network: Arc::new(network),
                free_space: Arc::new(FixedFreeSpace(100 * MIB)),
            },
            FieldSyncConfig::default(),
        )
        .await
        .unwrap();
        let id = queue.enqueue(survey("s-1")).await.unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), queue.run_dispatch_cycle()).await;
        assert!(cancelled.is_err());
        assert_eq!(queue.status(id).await, Some(ItemStatus::Attempting));

        // The next cycle starts by returning the item to Pending.
        tx.send(NetworkState::offline()).unwrap();
        let report = queue.run_dispatch_cycle().await;
        assert_eq!(report.status, CycleStatus::NetworkUnavailable);

        let item = queue.get(id).await.unwrap();
        assert_eq!(item.status(), ItemStatus::Pending);
        assert_eq!(item.retry_count(), 0);
    }

    #[tokio::test]
    async fn test_reopen_restores_order_and_recovers_attempting() {
        let store = MemoryStore::new();
        let (a, b) = {
            let queue = online_queue(store.clone(), MemoryRemote::new()).await;
            let a = queue.enqueue(survey("s-1")).await.unwrap();
            let b = queue.enqueue(survey("s-2")).await.unwrap();
            queue.transition(b, QueueItem::begin_attempt).await.unwrap();
            (a, b)
        };

        let queue = online_queue(store.clone(), MemoryRemote::new()).await;
        let items = queue.items().await;
        assert_eq!(items.iter().map(QueueItem::id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(queue.status(b).await, Some(ItemStatus::Pending));

        let c = queue.enqueue(survey("s-3")).await.unwrap();
        assert_eq!(queue.get(c).await.unwrap().sequence(), 2);
    }
}
