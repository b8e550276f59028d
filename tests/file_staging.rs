use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use batchgate::config::FilesConfig;
use batchgate::core::FileStagingService;
use batchgate::core::models::FileInfo;
use batchgate::core::publish::{PublishChannel, Publisher};
use batchgate::error::{Error, UploadFailure};
use batchgate::store::{FileStore, LocalFileStore, StagePath, StagedWrite, StoredFile};
use tempfile::TempDir;
use tokio_util::io::StreamReader;
use tracing::Span;

/// Local store whose deletes of one particular path always fail.
struct FailingDeleteStore {
    inner: LocalFileStore,
    fail_on: String,
}

#[async_trait]
impl FileStore for FailingDeleteStore {
    async fn list(&self) -> io::Result<Vec<StoredFile>> {
        self.inner.list().await
    }

    async fn stat(&self, path: &StagePath) -> io::Result<Option<StoredFile>> {
        self.inner.stat(path).await
    }

    async fn create(&self, path: &StagePath) -> io::Result<StoredFile> {
        self.inner.create(path).await
    }

    async fn stage(&self, path: &StagePath) -> io::Result<Box<dyn StagedWrite>> {
        self.inner.stage(path).await
    }

    async fn delete(&self, path: &StagePath) -> io::Result<bool> {
        if path.as_str() == self.fail_on {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        self.inner.delete(path).await
    }
}

struct RejectingChannel {
    attempts: AtomicUsize,
}

#[async_trait]
impl PublishChannel for RejectingChannel {
    async fn publish(&self, _file: &FileInfo) -> anyhow::Result<()> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("downstream returned 503");
        }
        Ok(())
    }
}

fn service_with(store: Arc<dyn FileStore>, publisher: Publisher, config: FilesConfig) -> FileStagingService {
    FileStagingService::new(store, publisher, &config, Span::none())
}

fn local_service(config: FilesConfig) -> (TempDir, FileStagingService) {
    let temp = tempfile::tempdir().unwrap();
    let store = Arc::new(LocalFileStore::new(temp.path()));
    (temp, service_with(store, Publisher::default(), config))
}

fn leftover_entries(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_delete_skips_failures_and_counts_the_rest() {
    let temp = tempfile::tempdir().unwrap();
    let store = Arc::new(FailingDeleteStore {
        inner: LocalFileStore::new(temp.path()),
        fail_on: "bar/foo.txt".to_string(),
    });
    let service = service_with(store, Publisher::default(), FilesConfig::default());
    for path in ["foo.txt", "bar/foo.txt", "bar/baz.txt"] {
        service.create_file(path).await.unwrap();
    }

    assert_eq!(service.delete("*").await.unwrap(), 2);

    let (remaining, total) = service.list(0, 10).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(remaining[0].path, "bar/foo.txt");
}

#[tokio::test]
async fn test_delete_with_no_match_is_zero() {
    let (_temp, service) = local_service(FilesConfig::default());
    service.create_file("foo.txt").await.unwrap();

    assert_eq!(service.delete("*.csv").await.unwrap(), 0);
    assert!(matches!(service.delete("[oops").await, Err(Error::InvalidPattern(_))));
}

#[tokio::test]
async fn test_list_windows_are_ordered_by_path() {
    let (_temp, service) = local_service(FilesConfig::default());
    for path in ["c.txt", "a.txt", "b/a.txt"] {
        service.create_file(path).await.unwrap();
    }

    let (files, total) = service.list(1, 1).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].path, "b/a.txt");
}

#[tokio::test]
async fn test_short_path_drops_the_configured_root() {
    let config = FilesConfig {
        short_path_root: "input".to_string(),
        ..FilesConfig::default()
    };
    let (_temp, service) = local_service(config);

    let file = service.upload("input/daily/a.csv", &b"1,2"[..]).await.unwrap();
    assert_eq!(file.path, "input/daily/a.csv");
    assert_eq!(file.short_path, "daily/a.csv");
}

#[tokio::test]
async fn test_interrupted_upload_leaves_nothing_behind() {
    let (temp, service) = local_service(FilesConfig::default());
    let chunks: Vec<io::Result<&'static [u8]>> = vec![
        Ok(&b"first chunk"[..]),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ];
    let reader = StreamReader::new(futures::stream::iter(chunks));

    let err = service.upload("dir/data.csv", reader).await.unwrap_err();
    assert!(matches!(err, Error::Upload(UploadFailure::Transfer { .. })));
    assert_eq!(err.reason_code(), "file.upload.failed");

    assert_eq!(service.list(0, 10).await.unwrap().1, 0);
    assert_eq!(leftover_entries(&temp.path().join("dir")), 0);
}

#[tokio::test]
async fn test_empty_upload_touches_nothing() {
    let (temp, service) = local_service(FilesConfig::default());

    let err = service.upload("dir/empty.txt", &b""[..]).await.unwrap_err();
    assert!(matches!(err, Error::Upload(UploadFailure::Empty { ref filename }) if filename == "empty.txt"));
    assert!(!temp.path().join("dir").exists());
}

#[tokio::test]
async fn test_overwrite_can_be_refused() {
    let config = FilesConfig {
        allow_overwrite: false,
        ..FilesConfig::default()
    };
    let (_temp, service) = local_service(config);

    service.upload("a.txt", &b"one"[..]).await.unwrap();
    assert!(matches!(
        service.upload("a.txt", &b"two"[..]).await,
        Err(Error::PathConflict(_))
    ));
    assert!(matches!(service.create_file("a.txt").await, Err(Error::PathConflict(_))));
}

#[tokio::test]
async fn test_overwrite_replaces_content_by_default() {
    let (temp, service) = local_service(FilesConfig::default());

    service.upload("a.txt", &b"one"[..]).await.unwrap();
    service.upload("a.txt", &b"second"[..]).await.unwrap();

    assert_eq!(std::fs::read_to_string(temp.path().join("a.txt")).unwrap(), "second");
    assert_eq!(service.list(0, 10).await.unwrap().1, 1);
}

#[tokio::test]
async fn test_each_overwriting_upload_is_published() {
    let (_temp, service) = local_service(FilesConfig::default());
    let mut published = service.publisher().subscribe();

    service.upload_and_publish("inbox", "a.csv", &b"one"[..]).await.unwrap();
    service.upload_and_publish("inbox", "a.csv", &b"two"[..]).await.unwrap();

    assert_eq!(published.recv().await.unwrap().path, "inbox/a.csv");
    assert_eq!(published.recv().await.unwrap().path, "inbox/a.csv");
}

#[tokio::test]
async fn test_downstream_failure_keeps_the_file_and_allows_retry() {
    let temp = tempfile::tempdir().unwrap();
    let channel = Arc::new(RejectingChannel {
        attempts: AtomicUsize::new(0),
    });
    let service = service_with(
        Arc::new(LocalFileStore::new(temp.path())),
        Publisher::new(Some(channel.clone())),
        FilesConfig::default(),
    );
    let mut published = service.publisher().subscribe();

    let err = service
        .upload_and_publish("inbox", "data.csv", &b"a,b"[..])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Upload(UploadFailure::Downstream { .. })));
    assert!(published.try_recv().is_err());

    let (files, _) = service.list(0, 10).await.unwrap();
    assert_eq!(files.len(), 1);

    service.publish(&files[0]).await.unwrap();
    assert_eq!(published.recv().await.unwrap().path, "inbox/data.csv");

    // A second publish of the same file is a no-op
    service.publish(&files[0]).await.unwrap();
    assert!(published.try_recv().is_err());
    assert_eq!(channel.attempts.load(Ordering::SeqCst), 2);
}
