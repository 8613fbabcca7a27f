//! Fetch stage: materializes chart groups onto local storage
//!
//! Groups are processed one after another. Member files inside a group
//! download concurrently; the remote limiter still serializes the calls that
//! open each stream. A failure aborts only its own group.

pub mod download;
pub mod extract;

pub use extract::{ArchiveExtractor, ConsolePrompt, ManualExtraction};

use crate::model::ChartGroup;
use crate::naming::sanitize_filename;
use crate::remote::{RemoteError, RemoteStore, RetryPolicy, Transient};
use chartscan_common::events::{EventBus, IngestEvent};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Group-level fetch failures
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction failed for {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },
}

impl FetchError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        FetchError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn extraction(path: &Path, reason: String) -> Self {
        FetchError::Extraction {
            path: path.to_path_buf(),
            reason,
        }
    }
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Remote(e) => e.is_transient(),
            FetchError::Io { .. } | FetchError::Extraction { .. } => false,
        }
    }
}

/// Fetch stage output
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Groups with `local_path` set
    pub fetched: Vec<ChartGroup>,
    pub failed: Vec<(ChartGroup, FetchError)>,
    /// Over the per-source download bound; left for a later run
    pub deferred: Vec<ChartGroup>,
}

impl FetchOutcome {
    /// Whether any source hit its download bound this run
    pub fn was_limited(&self) -> bool {
        !self.deferred.is_empty()
    }
}

pub struct ChartFetcher {
    store: Arc<dyn RemoteStore>,
    charts_dir: PathBuf,
    extractor: ArchiveExtractor,
    events: EventBus,
    max_downloads_per_source: Option<usize>,
    stream_policy: RetryPolicy,
}

impl ChartFetcher {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        charts_dir: impl Into<PathBuf>,
        extractor: ArchiveExtractor,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            charts_dir: charts_dir.into(),
            extractor,
            events,
            max_downloads_per_source: None,
            stream_policy: RetryPolicy::content_stream(),
        }
    }

    pub fn with_max_downloads_per_source(mut self, limit: Option<usize>) -> Self {
        self.max_downloads_per_source = limit;
        self
    }

    pub fn with_stream_policy(mut self, policy: RetryPolicy) -> Self {
        self.stream_policy = policy;
        self
    }

    /// Fetch every group in order
    pub async fn fetch_all(&self, groups: Vec<ChartGroup>) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let mut per_source: HashMap<String, usize> = HashMap::new();

        let mut queue = Vec::with_capacity(groups.len());
        for group in groups {
            let taken = per_source.entry(group.source.root_id.clone()).or_default();
            if self.max_downloads_per_source.is_some_and(|max| *taken >= max) {
                outcome.deferred.push(group);
            } else {
                *taken += 1;
                queue.push(group);
            }
        }
        if !outcome.deferred.is_empty() {
            tracing::info!(
                deferred = outcome.deferred.len(),
                "Download limit per source reached; remaining groups deferred"
            );
        }

        let total = queue.len();
        for (index, group) in queue.into_iter().enumerate() {
            self.events.emit_lossy(IngestEvent::GroupFetchStarted {
                group_id: group.group_id.clone(),
                label: group.label().to_string(),
                file_count: group.members.len(),
                position: index + 1,
                total,
                timestamp: Utc::now(),
            });

            match self.fetch_group(&group).await {
                Ok(local_path) => {
                    self.events.emit_lossy(IngestEvent::GroupFetchCompleted {
                        group_id: group.group_id.clone(),
                        local_path: local_path.display().to_string(),
                        timestamp: Utc::now(),
                    });
                    outcome.fetched.push(ChartGroup {
                        local_path: Some(local_path),
                        ..group
                    });
                }
                Err(e) => {
                    tracing::error!(
                        group_id = %group.group_id,
                        root_id = %group.source.root_id,
                        label = %group.label(),
                        error = %e,
                        "Failed to fetch chart group"
                    );
                    self.events.emit_lossy(IngestEvent::GroupFetchFailed {
                        group_id: group.group_id.clone(),
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    outcome.failed.push((group, e));
                }
            }
        }

        outcome
    }

    /// Download and, for archives, extract one group. Returns its local folder.
    pub async fn fetch_group(&self, group: &ChartGroup) -> Result<PathBuf, FetchError> {
        if let Some(existing) = &group.local_path {
            if tokio::fs::metadata(existing).await.is_ok_and(|m| m.is_dir()) {
                tracing::debug!(
                    group_id = %group.group_id,
                    path = %existing.display(),
                    "Reusing existing local folder"
                );
                return Ok(existing.clone());
            }
        }

        let folder = self.create_group_folder(group).await?;
        if let Err(e) = self.materialize(group, &folder).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&folder).await {
                tracing::warn!(path = %folder.display(), error = %cleanup, "Failed to remove partial download");
            }
            return Err(e);
        }
        Ok(folder)
    }

    async fn materialize(&self, group: &ChartGroup, folder: &Path) -> Result<(), FetchError> {
        let store = self.store.as_ref();
        let downloads = group.members.iter().map(|file| {
            let dest = folder.join(&file.name);
            async move {
                download::download_file(
                    store,
                    file,
                    &dest,
                    &group.group_id,
                    &self.events,
                    &self.stream_policy,
                )
                .await
                .map(|_| dest)
            }
        });
        let results = futures::future::join_all(downloads).await;

        let mut paths = Vec::with_capacity(results.len());
        for result in results {
            paths.push(result?);
        }

        if group.is_archive {
            for archive in &paths {
                self.extractor.extract(archive, folder).await?;
            }
        }
        Ok(())
    }

    /// `<charts>/<source>/chart_<6 hex>`, re-rolled until unused
    async fn create_group_folder(&self, group: &ChartGroup) -> Result<PathBuf, FetchError> {
        let source_dir = self
            .charts_dir
            .join(sanitize_filename(&group.source.display_name));
        tokio::fs::create_dir_all(&source_dir)
            .await
            .map_err(|e| FetchError::io(&source_dir, e))?;

        loop {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let folder = source_dir.join(format!("chart_{}", &suffix[..6]));
            match tokio::fs::create_dir(&folder).await {
                Ok(()) => return Ok(folder),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(FetchError::io(&folder, e)),
            }
        }
    }
}
