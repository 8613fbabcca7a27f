//! Per-source issue reports
//!
//! Issues are grouped by source, then by chart folder in the order the
//! folders first produced an issue. Each source's report is filed under one
//! of three destinations by its serious issue count.

use crate::model::SourceRoot;
use crate::naming::sanitize_filename;
use crate::validation::{IssueCollector, Severity, ValidationIssue};
use async_trait::async_trait;
use chartscan_common::Result;
use std::fmt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

const FOLDER_URL: &str = "https://drive.google.com/drive/folders/";

/// Where a source's report is filed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportRoute {
    NoIssues,
    FewIssues,
    ManyIssues,
}

impl ReportRoute {
    pub fn dir_name(&self) -> &'static str {
        match self {
            ReportRoute::NoIssues => "NoIssues",
            ReportRoute::FewIssues => "FewIssues",
            ReportRoute::ManyIssues => "ManyIssues",
        }
    }

    pub fn for_issues(issues: &[&ValidationIssue], serious_threshold: usize) -> Self {
        let serious = issues.iter().filter(|i| i.severity == Severity::Serious).count();
        if issues.is_empty() {
            ReportRoute::NoIssues
        } else if serious >= serious_threshold {
            ReportRoute::ManyIssues
        } else {
            ReportRoute::FewIssues
        }
    }
}

impl fmt::Display for ReportRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Whether a sink adds to or replaces an existing report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Overwrite,
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: SourceRoot,
    pub route: ReportRoute,
    pub issue_count: usize,
    pub serious_count: usize,
    pub text: String,
}

/// Render one source's issues, one block per folder
pub fn render_source_report(issues: &[&ValidationIssue]) -> String {
    let mut folder_order: Vec<&str> = Vec::new();
    for issue in issues {
        if !folder_order.contains(&issue.subject.folder_id.as_str()) {
            folder_order.push(&issue.subject.folder_id);
        }
    }

    let mut text = String::new();
    for folder_id in folder_order {
        let mut in_folder = issues.iter().filter(|i| i.subject.folder_id == folder_id).peekable();
        let Some(first) = in_folder.peek() else { continue };
        text.push_str(&format!(
            "[\"{}\" at {}{}]\n",
            first.subject.folder_name, FOLDER_URL, folder_id
        ));
        let lines: Vec<String> = in_folder
            .map(|i| format!("[{}] for {}: {}", i.kind, i.subject_label, i.description))
            .collect();
        text.push_str(&lines.join("\n"));
        text.push_str("\n\n");
    }
    text
}

/// One report per source, in source order
pub fn build_reports(
    sources: &[SourceRoot],
    collector: &IssueCollector,
    serious_threshold: usize,
) -> Vec<SourceReport> {
    sources
        .iter()
        .map(|source| {
            let issues: Vec<&ValidationIssue> = collector.for_source(&source.root_id).collect();
            SourceReport {
                source: source.clone(),
                route: ReportRoute::for_issues(&issues, serious_threshold),
                issue_count: issues.len(),
                serious_count: issues.iter().filter(|i| i.severity == Severity::Serious).count(),
                text: render_source_report(&issues),
            }
        })
        .collect()
}

/// Destination for finished reports
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Write `report`, returning where it went
    async fn write(&self, report: &SourceReport, mode: WriteMode) -> Result<PathBuf>;
}

/// Writes `<reports_dir>/<route>/<source name>.txt`
pub struct FileReportSink {
    reports_dir: PathBuf,
}

impl FileReportSink {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
        }
    }

    pub fn path_for(&self, report: &SourceReport) -> PathBuf {
        self.reports_dir
            .join(report.route.dir_name())
            .join(format!("{}.txt", sanitize_filename(&report.source.display_name)))
    }
}

#[async_trait]
impl ReportSink for FileReportSink {
    async fn write(&self, report: &SourceReport, mode: WriteMode) -> Result<PathBuf> {
        let path = self.path_for(report);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut options = tokio::fs::OpenOptions::new();
        match mode {
            WriteMode::Append => options.create(true).append(true),
            WriteMode::Overwrite => options.create(true).write(true).truncate(true),
        };
        let mut file = options.open(&path).await?;
        file.write_all(report.text.as_bytes()).await?;
        file.flush().await?;

        tracing::info!(
            source = %report.source.display_name,
            route = %report.route,
            issues = report.issue_count,
            path = %path.display(),
            "Report written"
        );
        Ok(path)
    }
}
