//! Notation decoders
//!
//! Both the text `.chart` format and Standard MIDI files decode into the same
//! [`ChartFeatures`], so validation never needs to know which one it saw.
//! Seconds are floored in both.

pub mod chart;
pub mod midi;
pub mod notes;
pub mod tempo;

use crate::naming::TextDecodeError;
use notes::TrackNotes;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Instrument {
    Guitar,
    Bass,
    Rhythm,
    Keys,
    Drums,
    Vocals,
    GuitarGhl,
    BassGhl,
}

impl Instrument {
    pub fn as_str(&self) -> &'static str {
        match self {
            Instrument::Guitar => "guitar",
            Instrument::Bass => "bass",
            Instrument::Rhythm => "rhythm",
            Instrument::Keys => "keys",
            Instrument::Drums => "drums",
            Instrument::Vocals => "vocals",
            Instrument::GuitarGhl => "guitarghl",
            Instrument::BassGhl => "bassghl",
        }
    }

    pub fn is_ghl(&self) -> bool {
        matches!(self, Instrument::GuitarGhl | Instrument::BassGhl)
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Difficulty {
    Expert,
    Hard,
    Medium,
    Easy,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Difficulty::Expert => "expert",
            Difficulty::Hard => "hard",
            Difficulty::Medium => "medium",
            Difficulty::Easy => "easy",
        })
    }
}

pub type TrackKey = (Instrument, Difficulty);

/// Canonical decoder output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartFeatures {
    pub has_sections: bool,
    pub has_star_power: bool,
    pub has_forced: bool,
    pub has_tap: bool,
    pub has_lyrics: bool,
    pub has_solo_sections: bool,
    /// Tempo looks un-mapped (a lone 120 BPM)
    pub is_120: bool,
    pub has_broken_notes: bool,
    /// Instruments with at least one open note
    pub open_notes: BTreeSet<Instrument>,
    pub note_counts: BTreeMap<TrackKey, usize>,
    pub note_hashes: BTreeMap<TrackKey, String>,
    pub length_seconds: u64,
    /// First note to last note
    pub effective_length_seconds: u64,
    /// SHA-256 of the raw notation bytes
    pub file_hash: String,
}

impl ChartFeatures {
    pub fn has_open(&self, instrument: Instrument) -> bool {
        self.open_notes.contains(&instrument)
    }

    /// Fill counts, hashes and the broken flag from accumulated tracks
    fn absorb_tracks(&mut self, tracks: &BTreeMap<TrackKey, TrackNotes>) {
        for (key, track) in tracks {
            if track.has_broken_notes() {
                self.has_broken_notes = true;
            }
            if !track.is_significant() {
                continue;
            }
            self.note_counts.insert(*key, track.count());
            self.note_hashes.insert(*key, track.content_hash());
        }
    }
}

/// Earliest and latest note times across all tracks
fn note_span(tracks: &BTreeMap<TrackKey, TrackNotes>) -> Option<(u64, u64)> {
    let first = tracks.values().filter_map(TrackNotes::first_time).min()?;
    let last = tracks.values().filter_map(TrackNotes::last_time).max()?;
    Some((first, last))
}

fn file_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Missing [Song] header")]
    MissingHeader,

    #[error("No recognizable note track")]
    NoTracks,

    #[error(transparent)]
    Encoding(#[from] TextDecodeError),

    #[error("Invalid MIDI file: {0}")]
    Midi(String),

    #[error("Unsupported MIDI timing: {0}")]
    UnsupportedTiming(String),

    #[error("Unsupported notation format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotationFormat {
    Chart,
    Midi,
}

impl NotationFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "chart" => Some(Self::Chart),
            "mid" => Some(Self::Midi),
            _ => None,
        }
    }
}

pub fn decode_bytes(bytes: &[u8], format: NotationFormat) -> Result<ChartFeatures, DecodeError> {
    match format {
        NotationFormat::Chart => chart::decode(bytes),
        NotationFormat::Midi => midi::decode(bytes),
    }
}

/// Read and decode a notation file, choosing the decoder by extension
pub fn decode_notation(path: &Path) -> Result<ChartFeatures, DecodeError> {
    let format = NotationFormat::from_path(path)
        .ok_or_else(|| DecodeError::UnsupportedFormat(path.display().to_string()))?;
    let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_bytes(&bytes, format)
}
