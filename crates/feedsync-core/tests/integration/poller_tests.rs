//! Integration tests for the sync-status poller and its scheduler.

use std::time::Duration;

use chrono::{TimeDelta, Utc};

use crate::integration::common::{
    MockConfigStore, MockJobStore, MockRemoteClient, feed_config, generation, status_response,
};
use feedsync_core::job::JobResult;
use feedsync_core::{
    JobState, PollerJob, PollerScheduler, RunStatus, SyncInfo, SyncStatusPoller, SyncStatusResponse,
};

const POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);

struct Fixture {
    store: MockConfigStore,
    remote: MockRemoteClient,
    jobs: MockJobStore,
    poller: SyncStatusPoller<MockConfigStore, MockRemoteClient, MockJobStore>,
}

fn fixture(last_generation: Option<&str>) -> Fixture {
    let dir = std::env::temp_dir();
    let mut config = feed_config("products", &dir, 10, 0);
    config.status = RunStatus::Running;
    config.last_sync_generation = last_generation.map(generation);
    config.last_index_name = last_generation.map(|_| "idx_a".to_string());

    let store = MockConfigStore::with(vec![config]);
    let remote = MockRemoteClient::default();
    let jobs = MockJobStore::default();
    let poller = SyncStatusPoller::new(store.clone(), remote.clone(), jobs.clone(), POLL_INTERVAL);
    Fixture {
        store,
        remote,
        jobs,
        poller,
    }
}

fn due_job() -> PollerJob {
    PollerJob::scheduled("products", Utc::now() - TimeDelta::hours(3), TimeDelta::hours(2))
}

#[tokio::test]
async fn test_first_observation_stores_generation_and_reschedules() {
    // Arrange
    let f = fixture(None);
    f.remote.set_status(status_response("idx_a", "2024-01-01 10:00:00"));
    let mut job = due_job();
    let now = Utc::now();

    // Act
    let result = f.poller.fire(&mut job, now).await;

    // Assert
    assert_eq!(result.result, JobResult::Unknown);
    let config = f.store.get("products").unwrap();
    assert_eq!(config.last_sync_generation, Some(generation("2024-01-01 10:00:00")));
    assert_eq!(config.last_index_name.as_deref(), Some("idx_a"));
    assert_eq!(config.status, RunStatus::Running, "first observation is not a swap");

    assert_eq!(job.state, JobState::Polling);
    assert!(job.active);
    let trigger = job.trigger.as_ref().unwrap();
    assert!(trigger.active);
    assert_eq!(trigger.activation_time, now + TimeDelta::minutes(15));
    assert_eq!(f.jobs.get(&job.code).unwrap(), job);
}

#[tokio::test]
async fn test_unchanged_generation_reschedules_without_changes() {
    let f = fixture(Some("2024-01-01 10:00:00"));
    f.remote.set_status(status_response("idx_a", "2024-01-01 10:00:00.123"));
    let mut job = due_job();
    let now = Utc::now();
    let before = f.store.get("products").unwrap();

    let result = f.poller.fire(&mut job, now).await;

    assert_eq!(result.result, JobResult::Unknown);
    assert_eq!(f.store.get("products").unwrap(), before);
    assert!(f.store.saved_statuses().is_empty());
    assert_eq!(
        job.trigger.as_ref().unwrap().activation_time,
        now + TimeDelta::minutes(15)
    );
}

#[tokio::test]
async fn test_changed_generation_finishes_job() {
    let f = fixture(Some("2024-01-01 10:00:00"));
    f.remote.set_status(status_response("idx_b", "2024-01-01 12:30:00"));
    let mut job = due_job();

    let result = f.poller.fire(&mut job, Utc::now()).await;

    assert_eq!(result.result, JobResult::Success);
    let config = f.store.get("products").unwrap();
    assert_eq!(config.status, RunStatus::Success);
    assert_eq!(config.last_sync_generation, Some(generation("2024-01-01 12:30:00")));
    assert_eq!(config.last_index_name.as_deref(), Some("idx_b"));

    assert_eq!(job.state, JobState::Done);
    assert!(!job.active);
    assert!(job.remove_on_exit);
}

#[tokio::test]
async fn test_unparseable_generation_after_known_one_finishes_job() {
    let f = fixture(Some("2024-01-01 10:00:00"));
    let body = r#"{"current":{"index_name":"idx_b","sync_time":"garbage"}}"#;
    let response: SyncStatusResponse = serde_json::from_str(body).unwrap();
    assert_eq!(
        response.current,
        SyncInfo {
            index_name: Some("idx_b".to_string()),
            sync_time: None,
        }
    );
    f.remote.set_status(response);
    let mut job = due_job();

    let result = f.poller.fire(&mut job, Utc::now()).await;

    assert_eq!(result.result, JobResult::Success);
    let config = f.store.get("products").unwrap();
    assert_eq!(config.status, RunStatus::Success);
    assert!(config.last_sync_generation.is_none());
    assert_eq!(config.last_index_name.as_deref(), Some("idx_b"));
    assert_eq!(job.state, JobState::Done);
    assert!(!job.active);
}

#[tokio::test]
async fn test_status_check_failure_aborts_without_reschedule() {
    let f = fixture(Some("2024-01-01 10:00:00"));
    let mut job = due_job();
    let original_trigger = job.trigger.clone();

    let result = f.poller.fire(&mut job, Utc::now()).await;

    assert_eq!(result.result, JobResult::Failure);
    assert_eq!(f.remote.status_calls(), 1);
    assert_eq!(job.trigger, original_trigger);
    assert!(f.jobs.all().is_empty());
}

#[tokio::test]
async fn test_scheduler_fires_due_jobs_and_removes_finished() {
    // Arrange
    let f = fixture(Some("2024-01-01 10:00:00"));
    f.remote.set_status(status_response("idx_b", "2024-01-02 09:00:00"));
    let due = due_job();
    let mut later = PollerJob::scheduled("products", Utc::now(), TimeDelta::hours(2));
    later.code = "sync-status-later".to_string();
    f.jobs.insert(due.clone());
    f.jobs.insert(later.clone());
    let scheduler = PollerScheduler::new(f.poller, Duration::from_millis(10));

    // Act
    let summary = scheduler.run_once().await.unwrap();

    // Assert
    assert_eq!(summary.fired, 1);
    assert_eq!(summary.finished, 1);
    assert!(f.jobs.get(&due.code).is_none(), "finished job should be removed");
    assert!(f.jobs.get(&later.code).is_some());
}

#[tokio::test]
async fn test_scheduler_parks_job_after_failed_firing() {
    let f = fixture(Some("2024-01-01 10:00:00"));
    let due = due_job();
    f.jobs.insert(due.clone());
    let scheduler = PollerScheduler::new(f.poller, Duration::from_millis(10));

    let first = scheduler.run_once().await.unwrap();
    let second = scheduler.run_once().await.unwrap();

    assert_eq!(first.failed, 1);
    assert_eq!(second.fired, 0);
    let parked = f.jobs.get(&due.code).unwrap();
    assert!(!parked.trigger.unwrap().active);
}

#[tokio::test]
async fn test_scheduler_stops_on_cancel() {
    let f = fixture(None);
    let scheduler = PollerScheduler::new(f.poller, Duration::from_secs(60));
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(1), scheduler.run(cancel))
        .await
        .unwrap()
        .unwrap();
}
