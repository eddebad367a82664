//! Integration tests for feed generation and the batch worker.

use std::path::PathBuf;

use crate::integration::common::{
    MemoryConnector, MockConfigStore, MockItemSource, feed_config, indexer, item,
};
use feedsync_core::executor::BatchHandler;
use feedsync_core::resolver::IMAGE_URL_RESOLVER;
use feedsync_core::{AppError, BatchWorker, Batch, PropertyBinding, RunContext};
use serde_json::json;

fn context(export_path: PathBuf) -> RunContext {
    RunContext {
        code: "products-1".to_string(),
        run_id: 1,
        config_name: "products".to_string(),
        export_path,
    }
}

fn batch(ids: &[i64]) -> Batch {
    Batch {
        items: ids.to_vec(),
    }
}

fn csv_files(dir: &std::path::Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect()
}

#[test]
fn test_generated_feed_has_header_and_one_row_per_item() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 10, 0);
    let items = vec![item(1), item(2), item(3)];
    let path = dir.path().join("feed_1_1.csv");

    // Act
    indexer(MemoryConnector::default())
        .generate_data_feed(&items, &config.plan, &path)
        .unwrap();

    // Assert
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), items.len() + 1);
    assert_eq!(lines[0], "Code;Tags;Color;");
    assert_eq!(lines[1], "P1;a,b;;");
    assert!(content.ends_with(";\n"));
}

#[cfg(unix)]
#[test]
fn test_generated_feed_is_readable_and_executable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 10, 0);
    let path = dir.path().join("feed_1_1.csv");

    indexer(MemoryConnector::default())
        .generate_data_feed(&[item(1)], &config.plan, &path)
        .unwrap();

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o555, 0o555);
}

#[test]
fn test_generation_appends_to_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 10, 0);
    let path = dir.path().join("feed_1_1.csv");
    let indexer = indexer(MemoryConnector::default());

    indexer.generate_data_feed(&[item(1)], &config.plan, &path).unwrap();
    indexer.generate_data_feed(&[item(2)], &config.plan, &path).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 4);
}

#[test]
fn test_unknown_resolver_fails_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = feed_config("products", dir.path(), 10, 0);
    config
        .plan
        .properties
        .push(PropertyBinding::new("x", "X", "doesNotExist"));
    let path = dir.path().join("feed_1_1.csv");

    let err = indexer(MemoryConnector::default())
        .generate_data_feed(&[item(1)], &config.plan, &path)
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidResolver(id) if id == "doesNotExist"));
    assert!(!path.exists());
}

#[tokio::test]
async fn test_upload_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 10, 0);

    let err = indexer(MemoryConnector::default())
        .upload_data_feed(&dir.path().join("nope.csv"), &config.endpoint)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::FileNotFound(_)));
}

#[tokio::test]
async fn test_batch_uploads_file_to_destination_and_cleans_up() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 10, 0);
    let connector = MemoryConnector::default();
    let worker = BatchWorker::new(
        MockConfigStore::with(vec![config]),
        MockItemSource::numbered(5),
        indexer(connector.clone()),
    );

    // Act
    worker
        .process(&context(dir.path().to_path_buf()), &batch(&[1, 2, 3]))
        .await
        .unwrap();

    // Assert
    let uploads = connector.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].name, "feed_1_1.csv");
    assert_eq!(uploads[0].directory, "incoming");
    assert_eq!(uploads[0].content.lines().count(), 4);
    assert!(csv_files(dir.path()).is_empty(), "local file should be deleted");
}

#[tokio::test]
async fn test_file_counter_is_per_worker_and_starts_at_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 10, 0);
    let connector = MemoryConnector::default();
    let worker = BatchWorker::new(
        MockConfigStore::with(vec![config]),
        MockItemSource::numbered(5),
        indexer(connector.clone()),
    );
    let ctx = context(dir.path().to_path_buf());

    worker.process(&ctx, &batch(&[1])).await.unwrap();
    worker.process(&ctx, &batch(&[2])).await.unwrap();

    let names: Vec<String> = connector.uploads().into_iter().map(|u| u.name).collect();
    assert_eq!(names, vec!["feed_1_1.csv", "feed_1_2.csv"]);
}

#[tokio::test]
async fn test_upload_retry_exhausted() {
    // Arrange: every attempt fails
    let dir = tempfile::tempdir().unwrap();
    let retries = 2;
    let config = feed_config("products", dir.path(), 10, retries);
    let connector = MemoryConnector::default();
    connector.fail_next(retries as usize + 1);
    let worker = BatchWorker::new(
        MockConfigStore::with(vec![config]),
        MockItemSource::numbered(5),
        indexer(connector.clone()),
    );

    // Act
    let err = worker
        .process(&context(dir.path().to_path_buf()), &batch(&[1, 2]))
        .await
        .unwrap_err();

    // Assert
    match err {
        AppError::UploadExhausted {
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(attempts, retries + 1);
            assert!(last_error.to_string().contains("connection reset"));
        }
        other => panic!("expected UploadExhausted, got {:?}", other),
    }
    assert_eq!(connector.put_attempts(), retries as usize + 1);
    assert!(connector.uploads().is_empty());
    assert!(csv_files(dir.path()).is_empty(), "local file should be deleted");
}

#[tokio::test]
async fn test_upload_succeeds_on_last_retry() {
    let dir = tempfile::tempdir().unwrap();
    let retries = 2;
    let config = feed_config("products", dir.path(), 10, retries);
    let connector = MemoryConnector::default();
    connector.fail_next(retries as usize);
    let worker = BatchWorker::new(
        MockConfigStore::with(vec![config]),
        MockItemSource::numbered(5),
        indexer(connector.clone()),
    );

    worker
        .process(&context(dir.path().to_path_buf()), &batch(&[1, 2]))
        .await
        .unwrap();

    assert_eq!(connector.put_attempts(), retries as usize + 1);
    assert_eq!(connector.uploads().len(), 1);
    assert!(csv_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_zero_retries_means_single_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 10, 0);
    let connector = MemoryConnector::default();
    connector.fail_next(1);
    let worker = BatchWorker::new(
        MockConfigStore::with(vec![config]),
        MockItemSource::numbered(5),
        indexer(connector.clone()),
    );

    let err = worker
        .process(&context(dir.path().to_path_buf()), &batch(&[1]))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UploadExhausted { attempts: 1, .. }));
    assert_eq!(connector.put_attempts(), 1);
}

#[tokio::test]
async fn test_missing_config_is_integrity_error() {
    let dir = tempfile::tempdir().unwrap();
    let worker = BatchWorker::new(
        MockConfigStore::default(),
        MockItemSource::numbered(5),
        indexer(MemoryConnector::default()),
    );

    let err = worker
        .process(&context(dir.path().to_path_buf()), &batch(&[1]))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ConfigNotFound { matches: 0, .. }));
}

#[tokio::test]
async fn test_duplicate_config_is_integrity_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = feed_config("products", dir.path(), 10, 0);
    let worker = BatchWorker::new(
        MockConfigStore::with(vec![config.clone(), config]),
        MockItemSource::numbered(5),
        indexer(MemoryConnector::default()),
    );

    let err = worker
        .process(&context(dir.path().to_path_buf()), &batch(&[1]))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ConfigNotFound { matches: 2, .. }));
}

#[tokio::test]
async fn test_generation_failure_is_not_retried() {
    // Arrange: imageUrl needs a picture the items do not have
    let dir = tempfile::tempdir().unwrap();
    let mut config = feed_config("products", dir.path(), 10, 3);
    config
        .plan
        .properties
        .push(PropertyBinding::new("picture", "Image", IMAGE_URL_RESOLVER));
    let connector = MemoryConnector::default();
    let worker = BatchWorker::new(
        MockConfigStore::with(vec![config]),
        MockItemSource::with_items(vec![item(1).with_attribute("other", json!(1))]),
        indexer(connector.clone()),
    );

    // Act
    let err = worker
        .process(&context(dir.path().to_path_buf()), &batch(&[1]))
        .await
        .unwrap_err();

    // Assert
    assert!(matches!(err, AppError::GenerationFailed { .. }));
    assert_eq!(connector.put_attempts(), 0);
    assert!(csv_files(dir.path()).is_empty(), "partial file should be deleted");
}
