//! Song metadata extraction
//!
//! Metadata comes from `song.ini` when there is one, else from the `[Song]`
//! header of the `.chart` file. Values are converted field by field; a bad
//! value is reported as a [`Finding`] and the default is kept.

pub mod ini;

use crate::naming::{self, decode_text};
use crate::validation::{Finding, IssueKind};
use ini::{IniDocument, IniSection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of keys the game skips but duplicate detection still reads
pub const IGNORED_PREFIX: &str = "ignored_";

/// Values that mean "not set" for string and integer fields
const UNSET: &[&str] = &["", "0", "-1"];

/// Values that mean "not set" for boolean fields
const UNSET_BOOL: &[&str] = &["", "-1"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongMetadata {
    pub name: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub year: String,
    pub charter: String,
    pub loading_phrase: String,
    pub icon: String,
    pub song_length: i64,
    pub diff_band: i64,
    pub diff_guitar: i64,
    pub diff_rhythm: i64,
    pub diff_bass: i64,
    pub diff_drums: i64,
    pub diff_keys: i64,
    pub diff_guitarghl: i64,
    pub diff_bassghl: i64,
    pub preview_start_time: i64,
    pub album_track: i64,
    pub playlist_track: i64,
    pub hopo_frequency: i64,
    pub multiplier_note: i64,
    pub video_start_time: i64,
    /// Milliseconds
    pub delay: f64,
    /// `.chart` header `Offset`, in milliseconds
    pub chart_offset: f64,
    pub modchart: bool,
    pub eighthnote_hopo: bool,
    /// Raw `ignored_*` values, keyed without the prefix
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub ignored: BTreeMap<String, String>,
}

impl Default for SongMetadata {
    fn default() -> Self {
        Self {
            name: "Unknown Name".to_string(),
            artist: "Unknown Artist".to_string(),
            album: "Unknown Album".to_string(),
            genre: "Unknown Genre".to_string(),
            year: "Unknown Year".to_string(),
            charter: "Unknown Charter".to_string(),
            loading_phrase: String::new(),
            icon: String::new(),
            song_length: 0,
            diff_band: -1,
            diff_guitar: -1,
            diff_rhythm: -1,
            diff_bass: -1,
            diff_drums: -1,
            diff_keys: -1,
            diff_guitarghl: -1,
            diff_bassghl: -1,
            preview_start_time: -1,
            album_track: 16000,
            playlist_track: 16000,
            hopo_frequency: 0,
            multiplier_note: 0,
            video_start_time: 0,
            delay: 0.0,
            chart_offset: 0.0,
            modchart: false,
            eighthnote_hopo: false,
            ignored: BTreeMap::new(),
        }
    }
}

impl SongMetadata {
    /// `"<name>" - "<artist>" (<charter>)`
    pub fn display_label(&self) -> String {
        format!("\"{}\" - \"{}\" ({})", self.name, self.artist, self.charter)
    }
}

/// Metadata could not be produced for a folder
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("No song.ini or .chart file among {files:?}")]
    NoMetadata { files: Vec<String> },

    #[error("No [Song] section in {file}")]
    InvalidMetadata { file: String },

    #[error("Failed to read {}: {source}", path.display())]
    AccessFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unreadable text encoding in {file}: {source}")]
    BadEncoding {
        file: String,
        #[source]
        source: naming::TextDecodeError,
    },
}

impl MetadataError {
    pub fn issue_kind(&self) -> IssueKind {
        match self {
            MetadataError::NoMetadata { .. } => IssueKind::NoMetadata,
            MetadataError::InvalidMetadata { .. } => IssueKind::InvalidMetadata,
            MetadataError::AccessFailure { .. } => IssueKind::AccessFailure,
            MetadataError::BadEncoding { .. } => IssueKind::BadEncoding,
        }
    }

    /// The issue this failure is reported as
    pub fn to_finding(&self) -> Finding {
        let description = match self {
            MetadataError::NoMetadata { files } => format!("Files: [{}]", files.join(",")),
            MetadataError::InvalidMetadata { file } => format!("No [Song] section in {}", file),
            MetadataError::AccessFailure { path, .. } => format!("File: [{}]", file_name(path)),
            MetadataError::BadEncoding { file, source } => {
                format!("The detected encoding of [{}] was [{:?}]", file, source.encoding)
            }
        };
        Finding::new(self.issue_kind(), description)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Pick the sidecar: `song.ini` wins, else the last `.ini` seen
fn choose_ini(file_names: &[String], findings: &mut Vec<Finding>) -> Option<String> {
    let inis: Vec<&String> = file_names
        .iter()
        .filter(|name| naming::extension(name) == "ini")
        .collect();

    for name in &inis {
        if !naming::has_ini_name(name) {
            findings.push(Finding::new(IssueKind::InvalidIni, format!("File: [{}]", name)));
        }
    }
    if inis.len() > 1 {
        let joined: Vec<&str> = inis.iter().map(|s| s.as_str()).collect();
        findings.push(Finding::new(
            IssueKind::MultipleIniFiles,
            format!("Files: [{}]", joined.join(",")),
        ));
    }

    inis.iter()
        .find(|name| naming::has_ini_name(name))
        .or_else(|| inis.last())
        .map(|name| name.to_string())
}

/// Pick the `.chart` file whose header can stand in for a sidecar
fn choose_chart(file_names: &[String]) -> Option<String> {
    let charts: Vec<&String> = file_names
        .iter()
        .filter(|name| naming::extension(name) == "chart")
        .collect();
    charts
        .iter()
        .find(|name| naming::has_chart_name(name))
        .or_else(|| charts.last())
        .map(|name| name.to_string())
}

fn read_ini(
    folder: &Path,
    file: &str,
    remove_quotes: bool,
    findings: &mut Vec<Finding>,
) -> Result<IniDocument, MetadataError> {
    let path = folder.join(file);
    let bytes = std::fs::read(&path).map_err(|source| {
        tracing::warn!(path = %path.display(), error = %source, "Failed to open metadata file");
        MetadataError::AccessFailure {
            path: path.clone(),
            source,
        }
    })?;
    let (text, _) = decode_text(&bytes).map_err(|source| MetadataError::BadEncoding {
        file: file.to_string(),
        source,
    })?;

    let doc = IniDocument::parse(&text, remove_quotes);
    for description in doc.invalid_line_descriptions() {
        findings.push(Finding::new(IssueKind::InvalidIniLine, description));
    }
    Ok(doc)
}

/// Typed reads from one `[song]` section
struct SongSection<'a> {
    values: &'a IniSection,
    findings: &'a mut Vec<Finding>,
}

impl SongSection<'_> {
    fn raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.trim())
    }

    fn string(&self, key: &str, field: &mut String) {
        if let Some(value) = self.raw(key) {
            if !UNSET.contains(&value) {
                *field = naming::remove_style_tags(value);
            }
        }
    }

    fn number(&self, key: &str) -> Option<f64> {
        let value = self.raw(key)?;
        if UNSET.contains(&value) {
            return None;
        }
        value.parse::<f64>().ok().filter(|n| n.is_finite())
    }

    fn integer(&mut self, key: &str, field: &mut i64) {
        let Some(num) = self.number(key) else { return };
        let int = num.round();
        if int != num {
            self.findings.push(Finding::new(
                IssueKind::InvalidIniLine,
                format!("song.ini value of [{}] ({}) is not an integer", key, num),
            ));
        }
        *field = int as i64;
    }

    fn decimal(&self, key: &str, field: &mut f64) {
        if let Some(num) = self.number(key) {
            *field = num;
        }
    }

    fn boolean(&self, key: &str, field: &mut bool) {
        let Some(value) = self.raw(key) else { return };
        if UNSET_BOOL.contains(&value) {
            return;
        }
        match value.to_lowercase().as_str() {
            "true" => *field = true,
            "false" => *field = false,
            _ => {}
        }
    }
}

fn apply_song_section(
    section: &IniSection,
    chart_header: Option<&IniSection>,
    findings: &mut Vec<Finding>,
) -> SongMetadata {
    let mut m = SongMetadata::default();
    let mut song = SongSection {
        values: section,
        findings,
    };

    song.string("artist", &mut m.artist);
    song.string("album", &mut m.album);
    song.string("genre", &mut m.genre);
    song.string("year", &mut m.year);
    song.string("frets", &mut m.charter);
    song.string("charter", &mut m.charter);
    song.string("loading_phrase", &mut m.loading_phrase);

    song.integer("song_length", &mut m.song_length);
    song.integer("diff_band", &mut m.diff_band);
    song.integer("diff_guitar", &mut m.diff_guitar);
    song.integer("diff_rhythm", &mut m.diff_rhythm);
    song.integer("diff_bass", &mut m.diff_bass);
    song.integer("diff_drums", &mut m.diff_drums);
    song.integer("diff_keys", &mut m.diff_keys);
    song.integer("diff_guitarghl", &mut m.diff_guitarghl);
    song.integer("diff_bassghl", &mut m.diff_bassghl);
    song.integer("preview_start_time", &mut m.preview_start_time);
    song.integer("track", &mut m.album_track);
    song.integer("album_track", &mut m.album_track);
    song.integer("playlist_track", &mut m.playlist_track);
    song.integer("hopo_frequency", &mut m.hopo_frequency);
    song.integer("multiplier_note", &mut m.multiplier_note);
    song.integer("video_start_time", &mut m.video_start_time);

    song.decimal("delay", &mut m.delay);
    if let Some(header) = chart_header {
        let offset = header
            .get("offset")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|n| n.is_finite())
            .unwrap_or(0.0);
        m.chart_offset = offset * 1000.0;
    }
    // Offset is in seconds, delay in milliseconds
    if m.delay == 0.0 {
        m.delay = m.chart_offset;
    }

    song.boolean("modchart", &mut m.modchart);
    song.boolean("eighthnote_hopo", &mut m.eighthnote_hopo);

    song.string("name", &mut m.name);
    if let Some(year) = m.year.strip_prefix(", ") {
        m.year = year.to_string();
    }

    song.string("icon", &mut m.icon);
    m.icon = m.icon.to_lowercase();
    if m.icon == m.charter.to_lowercase() {
        m.icon.clear();
    }

    m.ignored = section
        .iter()
        .filter_map(|(key, value)| {
            let field = key.strip_prefix(IGNORED_PREFIX)?;
            Some((field.to_string(), value.trim().to_string()))
        })
        .collect();

    m
}

/// Extract metadata for the chart folder `folder` holding `file_names`.
///
/// Non-fatal problems go to `findings`. An `Err` means no metadata could be
/// produced; its [`MetadataError::to_finding`] describes why.
pub fn extract(
    folder: &Path,
    file_names: &[String],
    findings: &mut Vec<Finding>,
) -> Result<SongMetadata, MetadataError> {
    let ini_file = choose_ini(file_names, findings);
    let chart_file = choose_chart(file_names);

    let chart_doc = match &chart_file {
        Some(file) => Some(read_ini(folder, file, true, findings)?),
        None => None,
    };
    let ini_doc = match &ini_file {
        Some(file) => Some(read_ini(folder, file, false, findings)?),
        None => None,
    };

    let (doc, source_file) = match (ini_doc.as_ref(), ini_file, chart_doc.as_ref(), chart_file) {
        (Some(doc), Some(file), _, _) => (doc, file),
        (None, _, Some(doc), Some(file)) => (doc, file),
        _ => {
            return Err(MetadataError::NoMetadata {
                files: file_names.to_vec(),
            })
        }
    };

    let section = doc
        .section("song")
        .ok_or(MetadataError::InvalidMetadata { file: source_file })?;
    let chart_header = chart_doc.as_ref().and_then(|c| c.section("song"));

    Ok(apply_song_section(section, chart_header, findings))
}
