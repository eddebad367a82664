//! End-to-end tests of the orchestrator, strategy and batch worker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio::sync::Semaphore;

use crate::integration::common::{
    MemoryConnector, MockConfigStore, MockItemSource, MockJobStore, MockRemoteClient,
    fast_pipeline, feed_config, indexer,
};
use feedsync_core::executor::BatchHandler;
use feedsync_core::job::JobResult;
use feedsync_core::{
    AppError, Batch, BatchWorker, IndexRunConfig, IndexerJob, IndexerService, IndexingStrategy,
    JobState, LocalExecutor, PipelineEvent, PipelineReporter, PropertyBinding, RunContext,
    RunStatus, SystemState,
};

type Worker = BatchWorker<MockConfigStore, MockItemSource, MemoryConnector>;
type Service = IndexerService<
    MockConfigStore,
    MockItemSource,
    LocalExecutor<Worker>,
    MockRemoteClient,
    MockJobStore,
>;

struct Harness {
    store: MockConfigStore,
    remote: MockRemoteClient,
    jobs: MockJobStore,
    connector: MemoryConnector,
    service: Service,
}

fn harness(config: IndexRunConfig, items: i64, remote: MockRemoteClient) -> Harness {
    let store = MockConfigStore::with(vec![config]);
    let items = MockItemSource::numbered(items);
    let jobs = MockJobStore::default();
    let connector = MemoryConnector::default();
    let system = SystemState::new();

    let indexer = indexer(connector.clone());
    let registry = indexer.registry().clone();
    let worker = BatchWorker::new(store.clone(), items.clone(), indexer);
    let executor = LocalExecutor::new(worker, system.clone(), 2);
    let strategy = IndexingStrategy::new(
        executor,
        remote.clone(),
        jobs.clone(),
        system.clone(),
        fast_pipeline(),
    );
    let service = IndexerService::new(store.clone(), items, strategy, registry, system);

    Harness {
        store,
        remote,
        jobs,
        connector,
        service,
    }
}

#[tokio::test]
async fn test_end_to_end_partitions_uploads_triggers_and_schedules() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        feed_config("products", dir.path(), 10, 1),
        25,
        MockRemoteClient::default(),
    );
    let config = h.store.get("products").unwrap();
    let before = Utc::now();

    // Act
    h.service.run(config).await.unwrap();

    // Assert: three batches of 10, 10 and 5 rows plus headers
    let mut line_counts: Vec<usize> = h
        .connector
        .uploads()
        .iter()
        .map(|u| u.content.lines().count())
        .collect();
    line_counts.sort_unstable();
    assert_eq!(line_counts, vec![6, 11, 11]);

    assert_eq!(h.remote.trigger_calls(), vec!["http://search.test/sync"]);

    let jobs = h.jobs.all();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.config_name, "products");
    assert_eq!(job.state, JobState::Scheduled);
    let activation = job.trigger.as_ref().unwrap().activation_time;
    assert!(activation >= before + TimeDelta::hours(2));
    assert!(activation <= Utc::now() + TimeDelta::hours(2));

    let config = h.store.get("products").unwrap();
    assert_eq!(config.status, RunStatus::Running, "stays RUNNING until the swap is observed");
    assert_eq!(h.store.saved_statuses(), vec![RunStatus::Running]);
}

#[tokio::test]
async fn test_run_rejected_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = feed_config("products", dir.path(), 10, 0);
    config.status = RunStatus::Running;
    let h = harness(config.clone(), 5, MockRemoteClient::default());

    let err = h.service.run(config.clone()).await.unwrap_err();

    assert!(matches!(err, AppError::AlreadyRunning(name) if name == "products"));
    assert!(h.store.saved_statuses().is_empty());
    assert_eq!(h.store.get("products").unwrap(), config);
    assert!(h.connector.uploads().is_empty());
}

#[tokio::test]
async fn test_stale_snapshot_is_rejected_by_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut stored = feed_config("products", dir.path(), 10, 0);
    stored.status = RunStatus::Running;
    let h = harness(stored.clone(), 5, MockRemoteClient::default());
    let stale = feed_config("products", dir.path(), 10, 0);

    let err = h.service.run(stale).await.unwrap_err();

    assert!(matches!(err, AppError::AlreadyRunning(_)));
    assert!(h.store.saved_statuses().is_empty());
    assert_eq!(h.store.get("products").unwrap(), stored);
}

#[tokio::test]
async fn test_concurrent_runs_dispatch_once() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        feed_config("products", dir.path(), 10, 0),
        5,
        MockRemoteClient::default(),
    );
    let config = h.store.get("products").unwrap();

    let (first, second) = tokio::join!(h.service.run(config.clone()), h.service.run(config));

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(AppError::AlreadyRunning(_))))
            .count(),
        1
    );
    assert_eq!(h.connector.uploads().len(), 1);
    assert_eq!(h.remote.trigger_calls().len(), 1);
}

#[tokio::test]
async fn test_failed_batch_marks_failure_and_skips_trigger() {
    // Arrange: every upload fails
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        feed_config("products", dir.path(), 10, 0),
        25,
        MockRemoteClient::default(),
    );
    h.connector.fail_next(usize::MAX);
    let config = h.store.get("products").unwrap();

    // Act
    let err = h.service.run(config).await.unwrap_err();

    // Assert
    assert!(matches!(err, AppError::IndexingFailed(_)));
    assert_eq!(h.store.get("products").unwrap().status, RunStatus::Failure);
    assert_eq!(
        h.store.saved_statuses(),
        vec![RunStatus::Running, RunStatus::Failure]
    );
    assert!(h.remote.trigger_calls().is_empty());
    assert!(h.jobs.all().is_empty());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "feed files left behind: {:?}", leftovers);
}

#[tokio::test]
async fn test_trigger_failure_marks_failure_without_poller() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        feed_config("products", dir.path(), 10, 0),
        5,
        MockRemoteClient::failing_trigger(),
    );
    let config = h.store.get("products").unwrap();

    let err = h.service.run(config).await.unwrap_err();

    assert!(matches!(err, AppError::SyncTriggerFailed(_)));
    assert_eq!(h.connector.uploads().len(), 1);
    assert_eq!(h.store.get("products").unwrap().status, RunStatus::Failure);
    assert!(h.jobs.all().is_empty());
}

#[tokio::test]
async fn test_unknown_resolver_marks_failure_before_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = feed_config("products", dir.path(), 10, 0);
    config
        .plan
        .properties
        .push(PropertyBinding::new("x", "X", "doesNotExist"));
    let h = harness(config.clone(), 5, MockRemoteClient::default());

    let err = h.service.run(config).await.unwrap_err();

    assert!(matches!(err, AppError::InvalidResolver(_)));
    assert_eq!(h.store.get("products").unwrap().status, RunStatus::Failure);
    assert!(h.connector.uploads().is_empty());
}

#[tokio::test]
async fn test_indexer_job_perform() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(
        feed_config("products", dir.path(), 10, 0),
        3,
        MockRemoteClient::default(),
    );
    let job = IndexerJob::new(h.service);

    let missing = job.perform("unknown").await;
    assert_eq!(missing.result, JobResult::Failure);

    let ok = job.perform("products").await;
    assert_eq!(ok.result, JobResult::Success);

    // The configuration is now RUNNING, so a second launch is refused.
    let again = job.perform("products").await;
    assert_eq!(again.result, JobResult::Failure);
}

// =============================================================================
// Suspend during the wait loop
// =============================================================================

/// Batch handler blocked until the test releases permits.
#[derive(Clone)]
struct GatedHandler {
    gate: Arc<Semaphore>,
}

impl BatchHandler for GatedHandler {
    async fn process(&self, _context: &RunContext, _batch: &Batch) -> Result<(), AppError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| AppError::Generic(e.to_string()))?;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingReporter {
    suspended_waits: Mutex<usize>,
}

impl PipelineReporter for RecordingReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        if let PipelineEvent::WaitSuspended { .. } = event {
            *self.suspended_waits.lock().unwrap() += 1;
        }
    }
}

#[tokio::test]
async fn test_system_can_suspend_while_run_waits() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 2, 0);
    let store = MockConfigStore::with(vec![config.clone()]);
    let items = MockItemSource::numbered(4);
    let remote = MockRemoteClient::default();
    let system = SystemState::new();
    let gate = Arc::new(Semaphore::new(0));
    let reporter = Arc::new(RecordingReporter::default());

    let executor = LocalExecutor::new(
        GatedHandler {
            gate: Arc::clone(&gate),
        },
        system.clone(),
        2,
    );
    let strategy = IndexingStrategy::new(
        executor,
        remote.clone(),
        MockJobStore::default(),
        system.clone(),
        fast_pipeline(),
    )
    .with_reporter(reporter.clone());
    let registry = indexer(MemoryConnector::default()).registry().clone();
    let service = IndexerService::new(store.clone(), items, strategy, registry, system.clone());

    // Act
    let run = tokio::spawn(async move { service.run(config).await });

    let mut suspended = false;
    for _ in 0..200 {
        if system.suspend().is_ok() {
            suspended = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(suspended, "run waiting on batches should be suspendable");
    tokio::time::sleep(Duration::from_millis(50)).await;
    system.resume();
    gate.add_permits(10);

    // Assert
    run.await.unwrap().unwrap();
    assert!(*reporter.suspended_waits.lock().unwrap() >= 1);
    assert_eq!(remote.trigger_calls().len(), 1);
    assert_eq!(system.running_operations(), 0);
    assert!(system.suspend().is_ok(), "operation must be released after the run");
}
