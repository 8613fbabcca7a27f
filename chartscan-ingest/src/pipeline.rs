//! The top-level ingest run
//!
//! Stages run in sequence: walk, reconcile, fetch, scan, report. Only an
//! authentication failure or a failure to persist state stops a run; every
//! other problem stays inside its group or becomes a validation issue.

use crate::error::{IngestError, IngestResult};
use crate::fetch::{ArchiveExtractor, ChartFetcher, ConsolePrompt};
use crate::model::{ChartGroup, SourceRoot};
use crate::reconcile::{reconcile, ReconcileOptions};
use crate::remote::{RemoteError, RemoteStore};
use crate::report::{build_reports, FileReportSink, ReportSink, WriteMode};
use crate::scanner::{LibraryScanner, Version};
use crate::state::{StateStore, SNAPSHOT_FILE, TO_REMOVE_FILE, TO_SCAN_FILE};
use crate::validation::checks::{check_chart_counts, check_duplicates, check_version, ChartCounts};
use crate::validation::{IssueCollector, Severity};
use crate::walker::{partition_sources, TreeWalker, WalkWarning};
use chartscan_common::config::ScanSettings;
use chartscan_common::events::{EventBus, IngestEvent, RunStage};
use chrono::Utc;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Counts from one finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub groups_walked: usize,
    pub groups_fetched: usize,
    pub groups_failed: usize,
    pub groups_deferred: usize,
    pub groups_removed: usize,
    pub groups_retained: usize,
    pub walk_warnings: usize,
    pub versions_scanned: usize,
    pub regular_issues: usize,
    pub serious_issues: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Groups walked:     {}", self.groups_walked)?;
        writeln!(f, "Groups fetched:    {}", self.groups_fetched)?;
        writeln!(f, "Groups failed:     {}", self.groups_failed)?;
        writeln!(f, "Groups deferred:   {}", self.groups_deferred)?;
        writeln!(f, "Groups removed:    {}", self.groups_removed)?;
        writeln!(f, "Groups retained:   {}", self.groups_retained)?;
        writeln!(f, "Walk warnings:     {}", self.walk_warnings)?;
        writeln!(f, "Versions scanned:  {}", self.versions_scanned)?;
        write!(
            f,
            "Issues:            {} serious, {} regular",
            self.serious_issues, self.regular_issues
        )
    }
}

pub struct IngestPipeline {
    store: Arc<dyn RemoteStore>,
    settings: ScanSettings,
    sources: Vec<SourceRoot>,
    events: EventBus,
    state: StateStore,
    extractor: Option<ArchiveExtractor>,
    sink: Box<dyn ReportSink>,
}

impl IngestPipeline {
    /// A pipeline that prompts on the console for manual extraction and
    /// writes reports under the configured downloads directory
    pub fn new(
        store: Arc<dyn RemoteStore>,
        settings: ScanSettings,
        sources: Vec<SourceRoot>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            state: StateStore::new(settings.state_dir()),
            sink: Box::new(FileReportSink::new(settings.reports_dir())),
            extractor: None,
            settings,
            sources,
            events,
        }
    }

    pub fn with_extractor(mut self, extractor: ArchiveExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn with_report_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    fn stage_started(&self, stage: RunStage) {
        tracing::info!(stage = %stage, "Stage started");
        self.events.emit_lossy(IngestEvent::StageStarted {
            stage,
            timestamp: Utc::now(),
        });
    }

    fn stage_completed(&self, stage: RunStage) {
        self.events.emit_lossy(IngestEvent::StageCompleted {
            stage,
            timestamp: Utc::now(),
        });
    }

    /// One probe call so bad credentials fail the run before anything changes
    async fn verify_access(&self) -> IngestResult<()> {
        let Some(first) = self.sources.first() else {
            return Err(IngestError::Config("No sources to scan".to_string()));
        };
        match self.store.get_node(&first.root_id).await {
            Ok(_) => Ok(()),
            Err(e @ RemoteError::Auth(_)) => {
                tracing::error!(root_id = %first.root_id, error = %e, "Remote store rejected credentials");
                Err(IngestError::Auth(e))
            }
            Err(e) => {
                tracing::warn!(root_id = %first.root_id, error = %e, "Access probe failed; continuing");
                Ok(())
            }
        }
    }

    fn persist<T>(&self, file_name: &str, result: chartscan_common::Result<T>) -> IngestResult<T> {
        result.map_err(|source| {
            let path = self.state.path_of(file_name);
            tracing::error!(path = %path.display(), error = %source, "Failed to persist state");
            IngestError::Persist { path, source }
        })
    }

    async fn delete_local_folders(groups: &[ChartGroup]) {
        for group in groups {
            let Some(path) = &group.local_path else { continue };
            if !path.exists() {
                continue;
            }
            match tokio::fs::remove_dir_all(path).await {
                Ok(()) => tracing::debug!(group_id = %group.group_id, path = %path.display(), "Removed local folder"),
                Err(e) => tracing::warn!(
                    group_id = %group.group_id,
                    path = %path.display(),
                    error = %e,
                    "Failed to remove local folder"
                ),
            }
        }
    }

    /// Run every stage once
    pub async fn run(mut self) -> IngestResult<RunSummary> {
        let mut summary = RunSummary::default();
        self.verify_access().await?;

        // Walk
        self.stage_started(RunStage::Walk);
        let (walked_sources, excluded) =
            partition_sources(&self.sources, self.settings.only_scan_last());
        let walker = TreeWalker::new(
            self.store.as_ref(),
            &self.sources,
            self.settings.max_archive_size_bytes(),
        )
        .with_events(&self.events);
        let walk = walker.walk(&walked_sources, &excluded).await;
        for warning in &walk.warnings {
            log_walk_warning(warning);
        }
        summary.groups_walked = walk.snapshot.len();
        summary.walk_warnings = walk.warnings.len();
        self.stage_completed(RunStage::Walk);

        // Reconcile
        self.stage_started(RunStage::Reconcile);
        let old = self.persist(SNAPSHOT_FILE, self.state.load_snapshot())?;
        let options = ReconcileOptions {
            force_rescan: self.settings.rescan_all,
            excluded_roots: excluded,
        };
        let mut reconciliation = reconcile(&old, &walk.snapshot, &options);
        self.persist(SNAPSHOT_FILE, self.state.save_snapshot(&reconciliation.updated))?;
        self.persist(TO_REMOVE_FILE, self.state.save_to_remove(&reconciliation.to_remove))?;
        summary.groups_removed = reconciliation.to_remove.len();
        summary.groups_retained = reconciliation.result.retained.len();
        Self::delete_local_folders(&reconciliation.to_remove).await;
        self.stage_completed(RunStage::Reconcile);

        // Fetch
        self.stage_started(RunStage::Fetch);
        let to_fetch = std::mem::take(&mut reconciliation.to_fetch);
        let extractor = self
            .extractor
            .take()
            .unwrap_or_else(|| ArchiveExtractor::new(Box::new(ConsolePrompt)));
        let fetcher = ChartFetcher::new(
            self.store.clone(),
            self.settings.charts_dir(),
            extractor,
            self.events.clone(),
        )
        .with_max_downloads_per_source(self.settings.max_downloads_per_source());
        let fetched = fetcher.fetch_all(to_fetch).await;

        let mut updated = reconciliation.updated;
        for group in &fetched.fetched {
            updated.insert(group.clone());
        }
        self.persist(SNAPSHOT_FILE, self.state.save_snapshot(&updated))?;
        self.persist(TO_SCAN_FILE, self.state.save_to_scan(&fetched.fetched))?;
        summary.groups_fetched = fetched.fetched.len();
        summary.groups_failed = fetched.failed.len();
        summary.groups_deferred = fetched.deferred.len();
        self.stage_completed(RunStage::Fetch);

        // Scan
        self.stage_started(RunStage::Scan);
        let groups = fetched.fetched.clone();
        let events = self.events.clone();
        let scan = tokio::task::spawn_blocking(move || {
            let mut collector = IssueCollector::new();
            let versions = LibraryScanner::new().scan_groups(&groups, &mut collector, &events);
            (versions, collector)
        })
        .await;
        let (versions, mut collector): (Vec<Version>, IssueCollector) = match scan {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Scan task failed");
                (Vec::new(), IssueCollector::new())
            }
        };

        for version in &versions {
            check_version(version, &mut collector);
        }
        check_duplicates(&versions, &mut collector);

        let mut counts = ChartCounts::default();
        for version in &versions {
            *counts
                .versions
                .entry(version.source_group.source.root_id.as_str())
                .or_default() += 1;
        }
        counts.scanned_roots = fetched
            .fetched
            .iter()
            .map(|g| g.source.root_id.as_str())
            .collect();
        counts.limited_roots = fetched
            .deferred
            .iter()
            .map(|g| g.source.root_id.as_str())
            .collect::<HashSet<_>>();
        counts.empty_roots = walked_sources
            .iter()
            .filter(|s| walk.snapshot.groups_in(&s.root_id).map_or(true, |g| g.is_empty()))
            .map(|s| s.root_id.as_str())
            .collect();
        check_chart_counts(
            &walked_sources,
            &counts,
            self.settings.minimum_chart_count,
            &mut collector,
        );
        summary.versions_scanned = versions.len();
        self.stage_completed(RunStage::Scan);

        // Report
        self.stage_started(RunStage::Report);
        let mode = if self.settings.ad_hoc_sources {
            WriteMode::Append
        } else {
            WriteMode::Overwrite
        };
        for report in build_reports(
            &walked_sources,
            &collector,
            self.settings.serious_issue_threshold,
        ) {
            if let Err(e) = self.sink.write(&report, mode).await {
                tracing::error!(
                    source = %report.source.display_name,
                    root_id = %report.source.root_id,
                    error = %e,
                    "Failed to write report"
                );
            }
        }
        summary.serious_issues = collector.count(Severity::Serious);
        summary.regular_issues = collector.count(Severity::Regular);
        self.stage_completed(RunStage::Report);

        tracing::info!(
            walked = summary.groups_walked,
            fetched = summary.groups_fetched,
            failed = summary.groups_failed,
            versions = summary.versions_scanned,
            serious = summary.serious_issues,
            "Run complete"
        );
        Ok(summary)
    }
}

fn log_walk_warning(warning: &WalkWarning) {
    match warning {
        WalkWarning::OversizedArchive {
            root_id,
            node_id,
            name,
            size_bytes,
            limit_bytes,
        } => tracing::warn!(
            root_id = %root_id,
            node_id = %node_id,
            size_bytes,
            limit_bytes,
            "Skipped oversized archive {}",
            name
        ),
        WalkWarning::UnsupportedNode {
            root_id,
            node_id,
            name,
            parent_id,
        } => tracing::warn!(
            root_id = %root_id,
            node_id = %node_id,
            parent_id = %parent_id,
            "Skipped unsupported item {}",
            name
        ),
        WalkWarning::ListingFailed {
            root_id,
            folder_id,
            reason,
        } => tracing::warn!(
            root_id = %root_id,
            folder_id = %folder_id,
            reason = %reason,
            "Folder listing failed; treated as empty"
        ),
        WalkWarning::NodeUnavailable {
            root_id,
            node_id,
            reason,
        } => tracing::warn!(
            root_id = %root_id,
            node_id = %node_id,
            reason = %reason,
            "Item unavailable; skipped"
        ),
    }
}
