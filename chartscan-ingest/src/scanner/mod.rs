//! Local scanning of fetched chart groups
//!
//! Two phases per group: a sequential directory walk that classifies every
//! folder, then parallel Version building over the leaf folders. Results keep
//! discovery order.

pub mod version;

use crate::model::ChartGroup;
use crate::validation::{Finding, IssueCollector, IssueKind};
use chartscan_common::events::{EventBus, IngestEvent};
use chrono::Utc;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use version::{build_version, FileEntry, FolderScan, LabeledFinding};
use walkdir::{DirEntry, WalkDir};

pub use version::Version;

/// Metadata folder some archivers add next to the real content
const MACOS_METADATA_DIR: &str = "__MACOSX";

/// Everything found under one group's local folder
#[derive(Debug, Default)]
pub struct GroupScan {
    pub versions: Vec<Version>,
    pub findings: Vec<LabeledFinding>,
}

/// Children of one directory, split by type and sorted by name
struct DirListing {
    files: Vec<FileEntry>,
    folders: Vec<String>,
}

fn list_dir(path: &Path) -> std::io::Result<DirListing> {
    let mut files = Vec::new();
    let mut folders = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            folders.push(name);
        } else {
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push(FileEntry { name, size_bytes });
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    folders.sort();
    Ok(DirListing { files, folders })
}

fn is_macos_metadata(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == MACOS_METADATA_DIR
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Scans fetched groups into Versions
#[derive(Debug, Default, Clone, Copy)]
pub struct LibraryScanner;

impl LibraryScanner {
    pub fn new() -> Self {
        Self
    }

    /// Scan one fetched group. A group with no local folder yields nothing.
    pub fn scan_group(&self, group: &ChartGroup) -> GroupScan {
        let mut scan = GroupScan::default();
        let Some(root) = group.local_path.as_deref() else {
            return scan;
        };

        // Phase 1: classify folders
        let mut candidates: Vec<(PathBuf, Vec<FileEntry>)> = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_macos_metadata(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(group_id = %group.group_id, error = %e, "Error accessing entry");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            let listing = match list_dir(path) {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read folder");
                    continue;
                }
            };

            if listing.files.is_empty() && listing.folders.is_empty() {
                scan.findings.push(LabeledFinding {
                    label: base_name(path),
                    finding: Finding::new(IssueKind::EmptyFolder, "There are no files in this folder."),
                });
                continue;
            }

            if !listing.folders.is_empty() {
                if !listing.files.is_empty() {
                    let mut names: Vec<&str> = listing.folders.iter().map(String::as_str).collect();
                    names.extend(listing.files.iter().map(|f| f.name.as_str()));
                    scan.findings.push(LabeledFinding {
                        label: base_name(path),
                        finding: Finding::new(
                            IssueKind::FilesFolders,
                            format!(
                                "There are both files and folders in this directory: [{}]",
                                names.join(",")
                            ),
                        ),
                    });
                }
                continue;
            }

            candidates.push((path.to_path_buf(), listing.files));
        }

        tracing::debug!(
            group_id = %group.group_id,
            candidates = candidates.len(),
            "Folder walk complete"
        );

        // Phase 2: build versions in parallel, keep discovery order
        let built: Vec<FolderScan> = candidates
            .into_par_iter()
            .map(|(path, files)| build_version(&path, files, group))
            .collect();

        for folder in built {
            scan.findings.extend(folder.findings);
            if let Some(version) = folder.version {
                scan.versions.push(version);
            }
        }
        scan
    }

    /// Scan every group in order, recording findings into `collector`
    pub fn scan_groups(
        &self,
        groups: &[ChartGroup],
        collector: &mut IssueCollector,
        events: &EventBus,
    ) -> Vec<Version> {
        let mut versions = Vec::new();
        let total = groups.len();

        for (index, group) in groups.iter().enumerate() {
            let scan = self.scan_group(group);
            for labeled in scan.findings {
                collector.record_for_group(group, &labeled.label, labeled.finding);
            }

            let label = match scan.versions.as_slice() {
                [single] => single.label(),
                _ => group.label().to_string(),
            };
            tracing::debug!(
                group_id = %group.group_id,
                versions = scan.versions.len(),
                "Scanned group"
            );
            events.emit_lossy(IngestEvent::ScanProgress {
                scanned: index + 1,
                total,
                label,
                timestamp: Utc::now(),
            });
            versions.extend(scan.versions);
        }

        versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceRoot;
    use tempfile::TempDir;

    const CHART: &str = "[Song]\n{\n  Name = \"Song\"\n}\n[SyncTrack]\n{\n  0 = B 120000\n}\n\
        [ExpertSingle]\n{\n  0 = N 0 0\n}\n";

    fn group(path: &Path) -> ChartGroup {
        ChartGroup {
            group_id: "g".to_string(),
            source: SourceRoot {
                root_id: "root".to_string(),
                display_name: "Source".to_string(),
                is_single_file_source: false,
                required_icon: None,
            },
            folder_name: "Pack".to_string(),
            folder_id: "f".to_string(),
            is_archive: false,
            members: vec![],
            local_path: Some(path.to_path_buf()),
        }
    }

    fn write_chart(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("notes.chart"), CHART).unwrap();
        std::fs::write(dir.join("song.ogg"), b"").unwrap();
    }

    #[test]
    fn test_pack_yields_one_version_per_leaf() {
        let dir = TempDir::new().unwrap();
        write_chart(&dir.path().join("a"));
        write_chart(&dir.path().join("b"));
        write_chart(&dir.path().join(MACOS_METADATA_DIR).join("a"));

        let scan = LibraryScanner::new().scan_group(&group(dir.path()));

        assert_eq!(scan.versions.len(), 2);
        assert!(scan.versions[0].local_path.ends_with("a"));
        assert!(scan.versions[1].local_path.ends_with("b"));
        assert!(scan.findings.is_empty());
    }

    #[test]
    fn test_empty_and_mixed_folders() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let scan = LibraryScanner::new().scan_group(&group(dir.path()));

        let kinds: Vec<_> = scan.findings.iter().map(|f| f.finding.kind).collect();
        assert_eq!(kinds, vec![IssueKind::FilesFolders, IssueKind::EmptyFolder]);
        assert_eq!(scan.findings[1].label, "empty");
        assert!(scan.versions.is_empty());
    }

    #[test]
    fn test_unfetched_group_is_skipped() {
        let mut g = group(Path::new("/nonexistent"));
        g.local_path = None;
        let scan = LibraryScanner::new().scan_group(&g);
        assert!(scan.versions.is_empty());
        assert!(scan.findings.is_empty());
    }

    #[tokio::test]
    async fn test_scan_groups_records_and_reports_progress() {
        let dir = TempDir::new().unwrap();
        write_chart(dir.path());
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        let mut collector = IssueCollector::new();

        let versions = LibraryScanner::new().scan_groups(&[group(dir.path())], &mut collector, &bus);

        assert_eq!(versions.len(), 1);
        assert!(collector.is_empty());
        match rx.recv().await.unwrap() {
            IngestEvent::ScanProgress { scanned, total, .. } => assert_eq!((scanned, total), (1, 1)),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
