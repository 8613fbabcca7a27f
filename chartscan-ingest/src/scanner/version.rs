//! Building one [`Version`] from a chart folder
//!
//! Metadata comes first; without it the folder yields no Version and only
//! the metadata issue is reported. Structural checks then run independently
//! of each other, and finally every notation file is decoded.

use crate::decode::{self, ChartFeatures, DecodeError};
use crate::metadata::{self, SongMetadata};
use crate::model::ChartGroup;
use crate::naming::{self, FileClass};
use crate::validation::{Finding, IssueKind};
use std::path::{Path, PathBuf};

/// A file directly inside a chart folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub size_bytes: u64,
}

/// One scanned, locally materialized chart
#[derive(Debug, Clone)]
pub struct Version {
    pub local_path: PathBuf,
    pub metadata: SongMetadata,
    pub features: ChartFeatures,
    pub source_group: ChartGroup,
    pub member_files: Vec<FileEntry>,
    /// Name of the notation file the features came from
    pub main_chart: String,
}

impl Version {
    pub fn label(&self) -> String {
        self.metadata.display_label()
    }
}

/// A finding plus the label it is reported under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledFinding {
    pub label: String,
    pub finding: Finding,
}

/// Result of building one folder
#[derive(Debug, Default)]
pub struct FolderScan {
    pub version: Option<Version>,
    pub findings: Vec<LabeledFinding>,
}

impl FolderScan {
    fn push_all(&mut self, label: &str, findings: Vec<Finding>) {
        self.findings.extend(findings.into_iter().map(|finding| LabeledFinding {
            label: label.to_string(),
            finding,
        }));
    }
}

/// The notation file the game would load:
/// `notes.mid` > `notes.chart` > any `.mid` > any `.chart`
pub fn main_chart(files: &[FileEntry]) -> Option<&FileEntry> {
    let rank = |file: &FileEntry| match (naming::extension(&file.name).as_str(), naming::has_chart_name(&file.name)) {
        ("mid", true) => Some(0),
        ("chart", true) => Some(1),
        ("mid", false) => Some(2),
        ("chart", false) => Some(3),
        _ => None,
    };
    files
        .iter()
        .filter_map(|f| rank(f).map(|r| (r, f)))
        .min_by_key(|(r, _)| *r)
        .map(|(_, f)| f)
}

fn check_images(files: &[FileEntry]) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut albums = 0;
    for file in files.iter().filter(|f| naming::classify(&f.name) == FileClass::Image) {
        if naming::is_album_image(&file.name) {
            albums += 1;
        } else if !naming::is_background_image(&file.name) {
            findings.push(Finding::new(
                IssueKind::InvalidImage,
                format!("[{}] is not an album or background image.", file.name),
            ));
        }
    }
    if albums > 1 {
        findings.push(Finding::new(
            IssueKind::MultipleAlbums,
            "There are multiple album art image files.",
        ));
    }
    findings
}

fn check_extra_files(files: &[FileEntry]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for file in files {
        if naming::classify(&file.name) == FileClass::Other {
            findings.push(Finding::new(
                IssueKind::ExtraFile,
                format!("[{}] is not interpreted by Clone Hero.", file.name),
            ));
        }
    }

    // song.ogg and song.ini may share a stem, two audio files may not
    let mut audio_stems: Vec<String> = Vec::new();
    let mut other_stems: Vec<String> = Vec::new();
    for file in files {
        let stem = naming::stem(&file.name);
        let ext = naming::extension(&file.name);
        if naming::classify(&file.name) == FileClass::Audio {
            if audio_stems.contains(&stem) {
                findings.push(Finding::new(
                    IssueKind::ExtraFile,
                    format!("There is more than one [{}] audio file.", stem),
                ));
            } else {
                audio_stems.push(stem);
            }
        } else if !naming::is_notation_extension(&ext) {
            if other_stems.contains(&stem) {
                findings.push(Finding::new(
                    IssueKind::ExtraFile,
                    format!("There is more than one [{}] file.", stem),
                ));
            } else {
                other_stems.push(stem);
            }
        }
    }
    findings
}

fn check_audio(files: &[FileEntry]) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut audio = 0;
    for file in files.iter().filter(|f| naming::classify(&f.name) == FileClass::Audio) {
        audio += 1;
        if !naming::is_valid_audio_stem(&file.name) {
            findings.push(Finding::new(
                IssueKind::InvalidAudio,
                format!("[{}] is not a valid audio stem name.", file.name),
            ));
        }
    }
    if audio == 0 {
        findings.push(Finding::new(IssueKind::NoAudio, "There are no audio files."));
    }
    findings
}

fn check_notation(files: &[FileEntry]) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut charts = 0;
    for file in files.iter().filter(|f| naming::classify(&f.name) == FileClass::Notation) {
        charts += 1;
        if !naming::has_chart_name(&file.name) {
            findings.push(Finding::new(
                IssueKind::InvalidChart,
                format!("[{}] is not named \"notes\".", file.name),
            ));
        }
    }
    match charts {
        0 => findings.push(Finding::new(IssueKind::NoChart, "There is no .chart/.mid file.")),
        1 => {}
        _ => findings.push(Finding::new(
            IssueKind::MultipleCharts,
            "There is more than one .chart/.mid file.",
        )),
    }
    findings
}

fn decode_failure(file: &str, error: &DecodeError) -> Finding {
    match error {
        DecodeError::Io { .. } => Finding::new(IssueKind::AccessFailure, format!("File: [{}]", file)),
        _ => Finding::new(
            IssueKind::BadChart,
            format!(
                "Failed to read ChartData from [{}]; it may not be formatted correctly.",
                file
            ),
        ),
    }
}

/// Build the Version for `folder`, whose direct children are `files`
pub fn build_version(folder: &Path, files: Vec<FileEntry>, group: &ChartGroup) -> FolderScan {
    let mut scan = FolderScan::default();
    let folder_label = group.label().to_string();
    let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();

    let mut metadata_findings = Vec::new();
    let metadata = metadata::extract(folder, &names, &mut metadata_findings);
    scan.push_all(&folder_label, metadata_findings);
    let metadata = match metadata {
        Ok(metadata) => metadata,
        Err(e) => {
            tracing::warn!(
                folder = %folder.display(),
                group_id = %group.group_id,
                error = %e,
                "Chart has missing metadata"
            );
            scan.push_all(&folder_label, vec![e.to_finding()]);
            return scan;
        }
    };
    let label = metadata.display_label();

    scan.push_all(&label, check_images(&files));
    scan.push_all(&label, check_extra_files(&files));
    scan.push_all(&label, check_audio(&files));
    scan.push_all(&label, check_notation(&files));

    let main = main_chart(&files).map(|f| f.name.clone());
    let mut main_features = None;
    for file in files.iter().filter(|f| naming::classify(&f.name) == FileClass::Notation) {
        match decode::decode_notation(&folder.join(&file.name)) {
            Ok(features) => {
                if main.as_deref() == Some(file.name.as_str()) {
                    main_features = Some(features);
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %folder.join(&file.name).display(),
                    error = %e,
                    "Failed to decode notation file"
                );
                scan.push_all(&label, vec![decode_failure(&file.name, &e)]);
            }
        }
    }

    match (main, main_features) {
        (Some(main_chart), Some(features)) => {
            scan.version = Some(Version {
                local_path: folder.to_path_buf(),
                metadata,
                features,
                source_group: group.clone(),
                member_files: files,
                main_chart,
            });
        }
        (None, _) => tracing::warn!(folder = %folder.display(), "{} has a missing chart file", label),
        (Some(_), None) => tracing::warn!(folder = %folder.display(), "{} has an invalid chart file", label),
    }

    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceRoot;
    use tempfile::TempDir;

    const CHART: &str = "[Song]\n{\n  Name = \"Chart Song\"\n  Artist = \"Chart Band\"\n  Resolution = 192\n}\n\
        [SyncTrack]\n{\n  0 = B 120000\n}\n[Events]\n{\n}\n[ExpertSingle]\n{\n  0 = N 0 0\n}\n";

    fn group() -> ChartGroup {
        ChartGroup {
            group_id: "g".to_string(),
            source: SourceRoot {
                root_id: "root".to_string(),
                display_name: "Source".to_string(),
                is_single_file_source: false,
                required_icon: None,
            },
            folder_name: "Song Folder".to_string(),
            folder_id: "f".to_string(),
            is_archive: false,
            members: vec![],
            local_path: None,
        }
    }

    fn entries(names: &[&str]) -> Vec<FileEntry> {
        names
            .iter()
            .map(|n| FileEntry {
                name: n.to_string(),
                size_bytes: 0,
            })
            .collect()
    }

    fn kinds(scan: &FolderScan) -> Vec<IssueKind> {
        scan.findings.iter().map(|f| f.finding.kind).collect()
    }

    #[test]
    fn test_main_chart_priority() {
        let files = entries(&["other.chart", "other.mid", "notes.chart"]);
        assert_eq!(main_chart(&files).unwrap().name, "notes.chart");
        let files = entries(&["notes.chart", "notes.mid"]);
        assert_eq!(main_chart(&files).unwrap().name, "notes.mid");
        let files = entries(&["a.chart", "b.mid"]);
        assert_eq!(main_chart(&files).unwrap().name, "b.mid");
        assert!(main_chart(&entries(&["song.ogg"])).is_none());
    }

    #[test]
    fn test_structural_checks() {
        let files = entries(&[
            "album.png", "album.jpg", "cover.png", "Song.ogg", "song.mp3", "lead.ogg",
            "readme.txt", "song.ini", "chart.chart",
        ]);
        let mut found = check_images(&files);
        found.extend(check_extra_files(&files));
        found.extend(check_audio(&files));
        found.extend(check_notation(&files));
        let kinds: Vec<_> = found.iter().map(|f| f.kind).collect();

        assert_eq!(
            kinds,
            vec![
                IssueKind::InvalidImage,
                IssueKind::MultipleAlbums,
                IssueKind::ExtraFile,
                IssueKind::ExtraFile,
                IssueKind::ExtraFile,
                IssueKind::InvalidAudio,
                IssueKind::InvalidChart,
            ]
        );
        assert_eq!(found[2].description, "[readme.txt] is not interpreted by Clone Hero.");
        assert_eq!(found[3].description, "There is more than one [album] file.");
        assert_eq!(found[4].description, "There is more than one [song] audio file.");
    }

    #[test]
    fn test_builds_version_from_chart_folder() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.chart"), CHART).unwrap();
        std::fs::write(dir.path().join("song.ogg"), b"").unwrap();

        let scan = build_version(dir.path(), entries(&["notes.chart", "song.ogg"]), &group());

        assert!(kinds(&scan).is_empty());
        let version = scan.version.expect("version");
        assert!(version.features.is_120);
        assert_eq!(version.main_chart, "notes.chart");
        assert_eq!(version.label(), "\"Chart Song\" - \"Chart Band\" (Unknown Charter)");
    }

    #[test]
    fn test_preview_clip_is_not_song_audio() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.chart"), CHART).unwrap();
        std::fs::write(dir.path().join("song.ogg"), b"").unwrap();
        std::fs::write(dir.path().join("preview.ogg"), b"").unwrap();

        let scan = build_version(
            dir.path(),
            entries(&["notes.chart", "preview.ogg", "song.ogg"]),
            &group(),
        );

        assert!(kinds(&scan).is_empty());
        assert!(scan.version.is_some());

        let only_preview = entries(&["notes.chart", "preview.ogg"]);
        let kinds: Vec<_> = check_audio(&only_preview).iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![IssueKind::NoAudio]);
    }

    #[test]
    fn test_missing_metadata_stops_early() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("song.ogg"), b"").unwrap();

        let scan = build_version(dir.path(), entries(&["song.ogg"]), &group());

        assert!(scan.version.is_none());
        assert_eq!(kinds(&scan), vec![IssueKind::NoMetadata]);
        assert_eq!(scan.findings[0].label, "Song Folder");
    }

    #[test]
    fn test_bad_secondary_chart_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.chart"), CHART).unwrap();
        std::fs::write(dir.path().join("notes.mid"), b"not midi").unwrap();
        std::fs::write(dir.path().join("song.ogg"), b"").unwrap();

        let scan = build_version(
            dir.path(),
            entries(&["notes.chart", "notes.mid", "song.ogg"]),
            &group(),
        );

        // notes.mid is the main chart and failed
        assert!(scan.version.is_none());
        assert_eq!(kinds(&scan), vec![IssueKind::MultipleCharts, IssueKind::BadChart]);
    }
}
