//! End-to-end queue behaviour against durable stores.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use fieldsync_common::SurveyId;
use fieldsync_storage::{
    FixedFreeSpace, MemoryRemote, RecordStore, RemoteError, SqliteStore, MIB,
};
use fieldsync_sync::{
    CycleStatus, FieldSyncConfig, ItemStatus, NetworkState, QueueBackends, SyncQueue,
    WatchNetworkSource,
};
use fieldsync_validation::{Survey, Vertex};
use tempfile::TempDir;
use tokio::sync::watch;

fn survey(id: &str) -> Survey {
    Survey::new(SurveyId::new(id).unwrap())
        .with_location(21.03, 105.85)
        .with_photo("front.jpg")
        .with_photo("back.jpg")
        .with_location_name("Ba Dinh")
        .with_land_use_type("ODT")
}

struct Harness {
    queue: SyncQueue,
    remote: MemoryRemote,
    network: watch::Sender<NetworkState>,
}

async fn open(store: Arc<dyn RecordStore>, remote: MemoryRemote, config: FieldSyncConfig) -> Harness {
    let (source, network) = WatchNetworkSource::new(NetworkState::offline());
    let queue = SyncQueue::open(
        QueueBackends {
            store,
            remote: Arc::new(remote.clone()),
            network: Arc::new(source),
            free_space: Arc::new(FixedFreeSpace(200 * MIB)),
        },
        config,
    )
    .await
    .unwrap();

    Harness {
        queue,
        remote,
        network,
    }
}

#[tokio::test]
async fn test_offline_capture_then_sync() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("queue.db");
    let remote = MemoryRemote::new();

    // Captured offline across two app sessions.
    {
        let h = open(
            Arc::new(SqliteStore::open(&db).unwrap()),
            remote.clone(),
            FieldSyncConfig::default(),
        )
        .await;
        h.queue.enqueue(survey("s-1")).await.unwrap();
        h.queue.enqueue(survey("s-2")).await.unwrap();

        let report = h.queue.run_dispatch_cycle().await;
        assert_eq!(report.status, CycleStatus::NetworkUnavailable);
    }

    let h = open(
        Arc::new(SqliteStore::open(&db).unwrap()),
        remote.clone(),
        FieldSyncConfig::default(),
    )
    .await;
    h.queue.enqueue(survey("s-3")).await.unwrap();
    let order: Vec<String> = h
        .queue
        .items()
        .await
        .iter()
        .map(|item| item.survey_id().to_string())
        .collect();
    assert_eq!(order, vec!["s-1", "s-2", "s-3"]);

    h.network.send(NetworkState::online()).unwrap();
    let report = h.queue.run_dispatch_cycle().await;
    assert_eq!(report.status, CycleStatus::Completed);
    assert_eq!(report.delivered, 3);
    assert_eq!(h.remote.record_count(), 3);
    assert_eq!(h.remote.record("s-2").unwrap()["photos"][1], "back.jpg");

    drop(h);
    let store = SqliteStore::open(&db).unwrap();
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_bookkeeping_survives_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("queue.db");
    let remote = MemoryRemote::new();
    remote.set_failing(Some(RemoteError::Rejected {
        status: 500,
        message: "internal".to_string(),
    }));

    let mut config = FieldSyncConfig::default();
    config.sync.default_max_retries = 2;

    let now = Utc::now();
    let id = {
        let h = open(
            Arc::new(SqliteStore::open(&db).unwrap()),
            remote.clone(),
            config.clone(),
        )
        .await;
        h.network.send(NetworkState::online()).unwrap();
        let id = h.queue.enqueue(survey("s-1")).await.unwrap();
        h.queue.run_dispatch_cycle_at(now).await;
        id
    };

    let h = open(
        Arc::new(SqliteStore::open(&db).unwrap()),
        remote.clone(),
        config.clone(),
    )
    .await;
    h.network.send(NetworkState::online()).unwrap();

    let item = h.queue.get(id).await.unwrap();
    assert_eq!(item.retry_count(), 1);
    assert_eq!(item.last_attempt(), Some(now));
    assert_eq!(item.last_error(), Some("Remote rejected record (500): internal"));

    // Still inside the backoff window after the restart.
    let report = h.queue.run_dispatch_cycle_at(now + ChronoDuration::seconds(30)).await;
    assert_eq!(report.deferred, 1);

    h.queue
        .run_dispatch_cycle_at(now + ChronoDuration::minutes(5))
        .await;
    let report = h
        .queue
        .run_dispatch_cycle_at(now + ChronoDuration::hours(1))
        .await;
    assert_eq!(report.exhausted, 1);
    drop(h);

    let h = open(
        Arc::new(SqliteStore::open(&db).unwrap()),
        remote.clone(),
        config,
    )
    .await;
    let exhausted = h.queue.exhausted_items().await;
    assert_eq!(exhausted.len(), 1);
    assert_eq!(exhausted[0].status(), ItemStatus::Exhausted);
    assert_eq!(h.queue.pending_count().await, 0);
}

#[tokio::test]
async fn test_unreadable_records_are_skipped() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    store.put("garbage", b"not json".to_vec()).await.unwrap();

    let h = open(store.clone(), MemoryRemote::new(), FieldSyncConfig::default()).await;
    assert!(h.queue.is_empty().await);
    h.queue.enqueue(survey("s-1")).await.unwrap();
    assert_eq!(h.queue.len().await, 1);
}

#[tokio::test]
async fn test_geometry_checks_are_independent_of_admission() {
    let h = open(
        Arc::new(SqliteStore::in_memory().unwrap()),
        MemoryRemote::new(),
        FieldSyncConfig::default(),
    )
    .await;

    // Outside the configured region and with a degenerate polygon.
    let survey = survey("s-1")
        .with_location(48.85, 2.35)
        .with_polygon(vec![Vertex::new(48.85, 2.35), Vertex::new(48.86, 2.36)]);

    let validator = h.queue.validator();
    assert!(!validator.is_valid_region(48.85, 2.35));
    assert!(validator.validate_polygon(&survey.polygon).is_err());

    assert!(h.queue.enqueue(survey).await.is_ok());
}
