//! Streamed member-file download

use super::FetchError;
use crate::model::RemoteFile;
use crate::remote::{retry_with_backoff, RemoteStore, RetryPolicy};
use chartscan_common::events::{EventBus, IngestEvent};
use chrono::Utc;
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Progress events are throttled to one per this many bytes
const PROGRESS_STEP_BYTES: u64 = 256 * 1024;

/// Download `file` to `dest`. A failure mid-stream restarts the whole file
/// under `policy`.
pub async fn download_file(
    store: &dyn RemoteStore,
    file: &RemoteFile,
    dest: &Path,
    group_id: &str,
    events: &EventBus,
    policy: &RetryPolicy,
) -> Result<u64, FetchError> {
    events.emit_lossy(IngestEvent::FileDownloadStarted {
        group_id: group_id.to_string(),
        file_name: file.name.clone(),
        total_bytes: file.size_bytes,
        timestamp: Utc::now(),
    });

    let bytes = retry_with_backoff("download.file", policy, || {
        stream_to_disk(store, file, dest, group_id, events)
    })
    .await?;

    events.emit_lossy(IngestEvent::FileDownloadCompleted {
        group_id: group_id.to_string(),
        file_name: file.name.clone(),
        timestamp: Utc::now(),
    });
    tracing::debug!(
        file = %file.name,
        bytes,
        path = %dest.display(),
        "Download complete"
    );
    Ok(bytes)
}

async fn stream_to_disk(
    store: &dyn RemoteStore,
    file: &RemoteFile,
    dest: &Path,
    group_id: &str,
    events: &EventBus,
) -> Result<u64, FetchError> {
    let mut stream = store.open_download_stream(&file.id).await?;
    let mut out = tokio::fs::File::create(dest)
        .await
        .map_err(|e| FetchError::io(dest, e))?;

    let mut written = 0u64;
    let mut last_reported = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(dest, e))?;
        written += chunk.len() as u64;

        if written - last_reported >= PROGRESS_STEP_BYTES {
            last_reported = written;
            events.emit_lossy(IngestEvent::FileDownloadProgress {
                group_id: group_id.to_string(),
                file_name: file.name.clone(),
                bytes_downloaded: written,
                total_bytes: file.size_bytes,
                timestamp: Utc::now(),
            });
        }
    }
    out.flush().await.map_err(|e| FetchError::io(dest, e))?;

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RemoteNode;
    use crate::remote::{ByteStream, RemoteError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Serves "hello world" in two chunks; the first `failures` streams break mid-way
    struct FlakyStore {
        failures: usize,
        opened: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for FlakyStore {
        async fn list_children(&self, _: &str) -> Result<Vec<RemoteNode>, RemoteError> {
            Ok(vec![])
        }

        async fn get_node(&self, id: &str) -> Result<RemoteNode, RemoteError> {
            Err(RemoteError::NotFound(id.to_string()))
        }

        async fn open_download_stream(&self, _: &str) -> Result<ByteStream, RemoteError> {
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            let second = if n < self.failures {
                Err(RemoteError::Network("connection reset".into()))
            } else {
                Ok(Bytes::from_static(b" world"))
            };
            let chunks = vec![Ok(Bytes::from_static(b"hello")), second];
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    fn remote_file() -> RemoteFile {
        RemoteFile {
            id: "f1".to_string(),
            name: "song.ogg".to_string(),
            size_bytes: 11,
            content_hash: None,
            modified_time: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2,
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_interrupted_stream_restarts_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("song.ogg");
        let store = FlakyStore {
            failures: 1,
            opened: AtomicUsize::new(0),
        };

        let bytes = download_file(&store, &remote_file(), &dest, "g", &EventBus::new(8), &fast_policy())
            .await
            .unwrap();

        assert_eq!(bytes, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
        assert_eq!(store.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_stream_failure_surfaces() {
        let dir = TempDir::new().unwrap();
        let store = FlakyStore {
            failures: usize::MAX,
            opened: AtomicUsize::new(0),
        };

        let result = download_file(
            &store,
            &remote_file(),
            &dir.path().join("song.ogg"),
            "g",
            &EventBus::new(8),
            &fast_policy(),
        )
        .await;

        assert!(matches!(result, Err(FetchError::Remote(_))));
        assert_eq!(store.opened.load(Ordering::SeqCst), 3);
    }

    /// Every open is refused with a transient error
    struct RefusingStore {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl RemoteStore for RefusingStore {
        async fn list_children(&self, _: &str) -> Result<Vec<RemoteNode>, RemoteError> {
            Ok(vec![])
        }

        async fn get_node(&self, id: &str) -> Result<RemoteNode, RemoteError> {
            Err(RemoteError::NotFound(id.to_string()))
        }

        async fn open_download_stream(&self, _: &str) -> Result<ByteStream, RemoteError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Status {
                status: 503,
                message: "backend error".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_failing_open_is_bounded_by_stream_policy() {
        let dir = TempDir::new().unwrap();
        let store = RefusingStore {
            opened: AtomicUsize::new(0),
        };
        let policy = fast_policy();

        let result = download_file(
            &store,
            &remote_file(),
            &dir.path().join("song.ogg"),
            "g",
            &EventBus::new(8),
            &policy,
        )
        .await;

        assert!(matches!(result, Err(FetchError::Remote(RemoteError::Status { status: 503, .. }))));
        assert_eq!(store.opened.load(Ordering::SeqCst), policy.max_attempts as usize);
    }

    #[tokio::test]
    async fn test_local_write_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let store = FlakyStore {
            failures: 0,
            opened: AtomicUsize::new(0),
        };
        let dest = dir.path().join("missing-dir").join("song.ogg");

        let result = download_file(&store, &remote_file(), &dest, "g", &EventBus::new(8), &fast_policy()).await;

        assert!(matches!(result, Err(FetchError::Io { .. })));
        assert_eq!(store.opened.load(Ordering::SeqCst), 1);
    }
}
