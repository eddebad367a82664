//! Integration tests for the PostgreSQL repositories.

use chrono::{NaiveDate, TimeDelta, Utc};
use feedsync_core::job::{JobState, PollerJob};
use feedsync_core::models::{Item, RunStatus};
use feedsync_core::traits::{ConfigStore, ItemSource, PollerJobStore};
use feedsync_db::{PgConfigStore, PgItemSource, PgPollerJobStore};

use crate::integration::common::{sample_config, setup_test_db};

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_config_upsert_and_find() {
    let (pool, _container) = setup_test_db().await;
    let store = PgConfigStore::new(pool);
    let config = sample_config("products");

    store.upsert(&config).await.unwrap();
    let found = store.find_by_name("products").await.unwrap();

    assert_eq!(found, vec![config]);
    assert!(store.find_by_name("missing").await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_save_updates_status_and_generation() {
    let (pool, _container) = setup_test_db().await;
    let store = PgConfigStore::new(pool);
    let mut config = sample_config("products");
    store.upsert(&config).await.unwrap();

    config.status = RunStatus::Success;
    config.last_sync_generation = NaiveDate::from_ymd_opt(2024, 5, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0);
    config.last_index_name = Some("idx_b".to_string());
    store.save(&config).await.unwrap();

    let found = store.find_by_name("products").await.unwrap();
    assert_eq!(found[0].status, RunStatus::Success);
    assert_eq!(found[0].last_sync_generation, config.last_sync_generation);
    assert_eq!(found[0].last_index_name.as_deref(), Some("idx_b"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_import_preserves_status() {
    let (pool, _container) = setup_test_db().await;
    let store = PgConfigStore::new(pool);
    let mut config = sample_config("products");
    config.status = RunStatus::Running;
    store.save(&config).await.unwrap();

    let mut redefined = sample_config("products");
    redefined.plan.batch_size = 10;
    store.upsert(&redefined).await.unwrap();

    let found = store.find_by_name("products").await.unwrap();
    assert_eq!(found[0].status, RunStatus::Running);
    assert_eq!(found[0].plan.batch_size, 10);

    assert!(store.reset_status("products").await.unwrap());
    assert!(!store.reset_status("products").await.unwrap());
    let found = store.find_by_name("products").await.unwrap();
    assert_eq!(found[0].status, RunStatus::None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_poller_job_lifecycle() {
    let (pool, _container) = setup_test_db().await;
    PgConfigStore::new(pool.clone())
        .upsert(&sample_config("products"))
        .await
        .unwrap();
    let jobs = PgPollerJobStore::new(pool);
    let now = Utc::now();
    let mut job = PollerJob::scheduled("products", now - TimeDelta::hours(3), TimeDelta::hours(2));

    jobs.create_job(&job).await.unwrap();
    let due = jobs.due_jobs(now).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].code, job.code);

    job.reschedule(now + TimeDelta::minutes(15));
    jobs.save_job(&job).await.unwrap();
    assert!(jobs.due_jobs(now).await.unwrap().is_empty());
    let stored = jobs.get(&job.code).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Polling);

    jobs.remove_job(&job.code).await.unwrap();
    assert!(jobs.get(&job.code).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_item_query_binds_scope() {
    let (pool, _container) = setup_test_db().await;
    let items = PgItemSource::new(pool);
    for id in 1..=3 {
        items
            .upsert(&Item::new(id).with_attribute("code", format!("P{}", id)), "online")
            .await
            .unwrap();
    }
    items
        .upsert(&Item::new(99).with_attribute("code", "HIDDEN"), "staged")
        .await
        .unwrap();
    let plan = sample_config("products").plan;

    let ids = items.resolve_item_ids(&plan).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3]);

    let fetched = items.fetch_items(&plan, &[3, 99, 1]).await.unwrap();
    let fetched_ids: Vec<i64> = fetched.iter().map(|i| i.id).collect();
    assert_eq!(fetched_ids, vec![1, 3]);
    assert_eq!(fetched[0].attribute("code").unwrap(), "P1");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_claim_run_is_exclusive() {
    let (pool, _container) = setup_test_db().await;
    let store = PgConfigStore::new(pool);
    store.upsert(&sample_config("products")).await.unwrap();

    assert!(store.claim_run("products").await.unwrap());
    assert!(!store.claim_run("products").await.unwrap());
    assert!(!store.claim_run("missing").await.unwrap());

    let found = store.find_by_name("products").await.unwrap();
    assert_eq!(found[0].status, RunStatus::Running);
}
