//! Validation issues and the run-scoped collector
//!
//! Structural problems are never errors: every check records a
//! [`ValidationIssue`] and the run carries on. Issues keep discovery order so
//! reports group deterministically.

pub mod checks;

use crate::model::{ChartGroup, SourceRoot};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Regular,
    Serious,
}

/// Every kind of issue a scan can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    // Regular
    InvalidIniLine,
    Duplicate,
    MetadataFix,
    NonzeroDelay,
    NonzeroOffset,

    // Serious
    NotEnoughCharts,
    BrokenNotes,
    NoSections,
    NoStarpower,
    DefaultBpm,
    AccessFailure,
    ExtraFile,
    NoMetadata,
    InvalidMetadata,
    MultipleCharts,
    MultipleIniFiles,
    MultipleAlbums,
    InvalidIni,
    BadEncoding,
    InvalidImage,
    NoAudio,
    InvalidAudio,
    NoChart,
    InvalidChart,
    BadChart,
    EmptyFolder,
    FilesFolders,
}

impl IssueKind {
    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::InvalidIniLine
            | IssueKind::Duplicate
            | IssueKind::MetadataFix
            | IssueKind::NonzeroDelay
            | IssueKind::NonzeroOffset => Severity::Regular,
            _ => Severity::Serious,
        }
    }

    /// Name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::InvalidIniLine => "invalidIniLine",
            IssueKind::Duplicate => "duplicate",
            IssueKind::MetadataFix => "metadataFix",
            IssueKind::NonzeroDelay => "nonzeroDelay",
            IssueKind::NonzeroOffset => "nonzeroOffset",
            IssueKind::NotEnoughCharts => "notEnoughCharts",
            IssueKind::BrokenNotes => "brokenNotes",
            IssueKind::NoSections => "noSections",
            IssueKind::NoStarpower => "noStarpower",
            IssueKind::DefaultBpm => "defaultBPM",
            IssueKind::AccessFailure => "accessFailure",
            IssueKind::ExtraFile => "extraFile",
            IssueKind::NoMetadata => "noMetadata",
            IssueKind::InvalidMetadata => "invalidMetadata",
            IssueKind::MultipleCharts => "multipleCharts",
            IssueKind::MultipleIniFiles => "multipleIniFiles",
            IssueKind::MultipleAlbums => "multipleAlbums",
            IssueKind::InvalidIni => "invalidIni",
            IssueKind::BadEncoding => "badEncoding",
            IssueKind::InvalidImage => "invalidImage",
            IssueKind::NoAudio => "noAudio",
            IssueKind::InvalidAudio => "invalidAudio",
            IssueKind::NoChart => "noChart",
            IssueKind::InvalidChart => "invalidChart",
            IssueKind::BadChart => "badChart",
            IssueKind::EmptyFolder => "emptyFolder",
            IssueKind::FilesFolders => "filesFolders",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issue before it is attached to a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub kind: IssueKind,
    pub description: String,
}

impl Finding {
    pub fn new(kind: IssueKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

/// Where an issue was found, in remote-store terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueSubject {
    pub root_id: String,
    pub source_name: String,
    pub folder_id: String,
    pub folder_name: String,
    /// None for source-level issues
    pub group_id: Option<String>,
}

impl From<&ChartGroup> for IssueSubject {
    fn from(group: &ChartGroup) -> Self {
        Self {
            root_id: group.source.root_id.clone(),
            source_name: group.source.display_name.clone(),
            folder_id: group.folder_id.clone(),
            folder_name: group.folder_name.clone(),
            group_id: Some(group.group_id.clone()),
        }
    }
}

impl From<&SourceRoot> for IssueSubject {
    fn from(source: &SourceRoot) -> Self {
        Self {
            root_id: source.root_id.clone(),
            source_name: source.display_name.clone(),
            folder_id: source.root_id.clone(),
            folder_name: source.display_name.clone(),
            group_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub subject: IssueSubject,
    /// Chart name when known, else the folder or archive name
    pub subject_label: String,
    pub description: String,
}

/// Run-scoped issue list, passed by `&mut` to every check
#[derive(Debug, Default)]
pub struct IssueCollector {
    issues: Vec<ValidationIssue>,
}

impl IssueCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, subject: IssueSubject, label: &str, finding: Finding) {
        tracing::debug!(
            kind = %finding.kind,
            folder = %subject.folder_name,
            label,
            "Issue recorded"
        );
        self.issues.push(ValidationIssue {
            severity: finding.kind.severity(),
            kind: finding.kind,
            subject,
            subject_label: label.to_string(),
            description: finding.description,
        });
    }

    pub fn record_for_group(&mut self, group: &ChartGroup, label: &str, finding: Finding) {
        self.record(IssueSubject::from(group), label, finding);
    }

    pub fn record_all(&mut self, group: &ChartGroup, label: &str, findings: Vec<Finding>) {
        for finding in findings {
            self.record_for_group(group, label, finding);
        }
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Issues of one source, in discovery order
    pub fn for_source<'a>(&'a self, root_id: &'a str) -> impl Iterator<Item = &'a ValidationIssue> + 'a {
        self.issues.iter().filter(move |i| i.subject.root_id == root_id)
    }

    pub fn into_issues(self) -> Vec<ValidationIssue> {
        self.issues
    }
}
