//! Checks that run on scanned Versions and on whole sources

use super::{Finding, IssueCollector, IssueKind, IssueSubject};
use crate::model::SourceRoot;
use crate::scanner::Version;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// Feature and metadata checks for one Version. Each check runs regardless
/// of the others.
pub fn check_version(version: &Version, collector: &mut IssueCollector) {
    let f = &version.features;
    let m = &version.metadata;
    let mut findings = Vec::new();

    if f.has_broken_notes {
        findings.push(Finding::new(
            IssueKind::BrokenNotes,
            "This chart contains broken notes.",
        ));
    }
    if !f.has_sections {
        findings.push(Finding::new(
            IssueKind::NoSections,
            "This chart doesn't have any sections.",
        ));
    }
    if !f.has_star_power {
        findings.push(Finding::new(
            IssueKind::NoStarpower,
            "This chart doesn't have any star power.",
        ));
    }
    if f.is_120 {
        findings.push(Finding::new(
            IssueKind::DefaultBpm,
            "If this song is not 120bpm, it wasn't tempo-mapped correctly.",
        ));
    }
    if let Some(required) = &version.source_group.source.required_icon {
        if &m.icon != required {
            findings.push(Finding::new(
                IssueKind::MetadataFix,
                format!("icon [{}] should be [{}]", m.icon, required),
            ));
        }
    }
    if m.delay != 0.0 {
        findings.push(Finding::new(
            IssueKind::NonzeroDelay,
            format!("delay is [{}] ms; it should be 0.", m.delay),
        ));
    }
    if m.chart_offset != 0.0 {
        findings.push(Finding::new(
            IssueKind::NonzeroOffset,
            format!("Offset in the .chart file is [{}] ms; it should be 0.", m.chart_offset),
        ));
    }

    collector.record_all(&version.source_group, &version.label(), findings);
}

/// Hash of what makes two Versions the same chart: the notation bytes, the
/// displayed metadata and any `ignored_` values
pub fn identity_hash(version: &Version) -> String {
    let m = &version.metadata;
    let mut hasher = Sha256::new();
    hasher.update(version.features.file_hash.as_bytes());
    for field in [&m.name, &m.artist, &m.album, &m.genre, &m.year, &m.charter] {
        hasher.update(b"\0");
        hasher.update(field.as_bytes());
    }
    for (key, value) in &m.ignored {
        hasher.update(b"\0");
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Flag every Version whose identity matches one seen earlier
pub fn check_duplicates(versions: &[Version], collector: &mut IssueCollector) {
    let mut first_seen: HashMap<String, &Version> = HashMap::new();
    for version in versions {
        let hash = identity_hash(version);
        match first_seen.get(&hash) {
            Some(original) => {
                let description = format!(
                    "This chart is a duplicate of {} in [{}] ({})",
                    original.label(),
                    original.source_group.label(),
                    original.source_group.source.display_name
                );
                collector.record_for_group(
                    &version.source_group,
                    &version.label(),
                    Finding::new(IssueKind::Duplicate, description),
                );
            }
            None => {
                first_seen.insert(hash, version);
            }
        }
    }
}

/// Inputs to the per-source chart count check
#[derive(Debug, Default)]
pub struct ChartCounts<'a> {
    /// Versions scanned this run, by root id
    pub versions: HashMap<&'a str, usize>,
    /// Roots that had groups scanned this run
    pub scanned_roots: HashSet<&'a str>,
    /// Roots the walk found no groups under
    pub empty_roots: HashSet<&'a str>,
    /// Roots whose fetch was cut short by the download bound
    pub limited_roots: HashSet<&'a str>,
}

/// `notEnoughCharts` for sources with too few charts
pub fn check_chart_counts(
    sources: &[SourceRoot],
    counts: &ChartCounts<'_>,
    minimum: usize,
    collector: &mut IssueCollector,
) {
    for source in sources {
        let root = source.root_id.as_str();
        if counts.limited_roots.contains(root) {
            continue;
        }
        let found = counts.versions.get(root).copied().unwrap_or(0);
        let too_few = counts.scanned_roots.contains(root) && found < minimum;
        if too_few || counts.empty_roots.contains(root) {
            collector.record(
                IssueSubject::from(source),
                &source.display_name,
                Finding::new(
                    IssueKind::NotEnoughCharts,
                    format!("This source has fewer than {} charts.", minimum),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::ChartFeatures;
    use crate::metadata::SongMetadata;
    use crate::model::ChartGroup;
    use crate::validation::Severity;
    use std::path::PathBuf;

    fn source(icon: Option<&str>) -> SourceRoot {
        SourceRoot {
            root_id: "root".to_string(),
            display_name: "Source".to_string(),
            is_single_file_source: false,
            required_icon: icon.map(str::to_string),
        }
    }

    fn version(group_id: &str, icon: Option<&str>, features: ChartFeatures) -> Version {
        Version {
            local_path: PathBuf::from("/tmp/x"),
            metadata: SongMetadata::default(),
            features,
            source_group: ChartGroup {
                group_id: group_id.to_string(),
                source: source(icon),
                folder_name: format!("Folder {}", group_id),
                folder_id: group_id.to_string(),
                is_archive: false,
                members: vec![],
                local_path: None,
            },
            member_files: vec![],
            main_chart: "notes.chart".to_string(),
        }
    }

    fn good_features() -> ChartFeatures {
        ChartFeatures {
            has_sections: true,
            has_star_power: true,
            file_hash: "abc".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_clean_version_has_no_issues() {
        let mut collector = IssueCollector::new();
        check_version(&version("g", None, good_features()), &mut collector);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_feature_checks() {
        let features = ChartFeatures {
            is_120: true,
            has_broken_notes: true,
            ..Default::default()
        };
        let mut collector = IssueCollector::new();

        check_version(&version("g", Some("setlist"), features), &mut collector);

        let kinds: Vec<_> = collector.issues().iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::BrokenNotes,
                IssueKind::NoSections,
                IssueKind::NoStarpower,
                IssueKind::DefaultBpm,
                IssueKind::MetadataFix,
            ]
        );
        assert_eq!(collector.issues()[4].description, "icon [] should be [setlist]");
        assert_eq!(collector.issues()[4].severity, Severity::Regular);
    }

    #[test]
    fn test_delay_and_offset() {
        let mut v = version("g", None, good_features());
        v.metadata.chart_offset = 250.0;
        v.metadata.delay = 250.0;
        let mut collector = IssueCollector::new();

        check_version(&v, &mut collector);

        let kinds: Vec<_> = collector.issues().iter().map(|i| i.kind).collect();
        assert_eq!(kinds, vec![IssueKind::NonzeroDelay, IssueKind::NonzeroOffset]);
    }

    #[test]
    fn test_duplicates_flag_later_copies() {
        let a = version("a", None, good_features());
        let b = version("b", None, good_features());
        let mut c = version("c", None, good_features());
        c.metadata.ignored.insert("name".to_string(), "Alt".to_string());
        let mut collector = IssueCollector::new();

        check_duplicates(&[a, b, c], &mut collector);

        assert_eq!(collector.len(), 1);
        let issue = &collector.issues()[0];
        assert_eq!(issue.kind, IssueKind::Duplicate);
        assert_eq!(issue.subject.group_id.as_deref(), Some("b"));
        assert!(issue.description.contains("Folder a"));
    }

    #[test]
    fn test_chart_counts() {
        let sources = vec![source(None)];
        let mut counts = ChartCounts::default();
        counts.scanned_roots.insert("root");
        counts.versions.insert("root", 2);
        let mut collector = IssueCollector::new();

        check_chart_counts(&sources, &counts, 5, &mut collector);
        assert_eq!(collector.len(), 1);
        assert_eq!(collector.issues()[0].description, "This source has fewer than 5 charts.");

        counts.limited_roots.insert("root");
        let mut collector = IssueCollector::new();
        check_chart_counts(&sources, &counts, 5, &mut collector);
        assert!(collector.is_empty());

        // Nothing scanned and the walk found groups: nothing new to judge
        let counts = ChartCounts::default();
        check_chart_counts(&sources, &counts, 5, &mut collector);
        assert!(collector.is_empty());
    }
}
