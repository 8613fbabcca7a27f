//! `.chart` text format decoder

use super::notes::{TrackNotes, OPEN_LANE};
use super::tempo::{TempoMap, DEFAULT_RESOLUTION};
use super::{file_hash, note_span, ChartFeatures, DecodeError, Difficulty, Instrument, TrackKey};
use crate::naming::decode_text;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Broken-note distance in ticks
const BROKEN_TICKS: u64 = 5;

static NOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+) = N ([0-4]|7|8) ").expect("static regex"));
static TEMPO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) = B (\d+)").expect("static regex"));

fn track_for_header(line: &str) -> Option<TrackKey> {
    let inner = line.strip_prefix('[')?.strip_suffix(']')?;
    let (difficulty, rest) = [
        ("Expert", Difficulty::Expert),
        ("Hard", Difficulty::Hard),
        ("Medium", Difficulty::Medium),
        ("Easy", Difficulty::Easy),
    ]
    .into_iter()
    .find_map(|(prefix, d)| inner.strip_prefix(prefix).map(|rest| (d, rest)))?;
    let instrument = match rest {
        "Single" => Instrument::Guitar,
        "DoubleBass" => Instrument::Bass,
        "DoubleRhythm" => Instrument::Rhythm,
        "Keyboard" => Instrument::Keys,
        "Drums" => Instrument::Drums,
        "GHLGuitar" => Instrument::GuitarGhl,
        "GHLBass" => Instrument::BassGhl,
        _ => return None,
    };
    Some((instrument, difficulty))
}

/// Fret number → normalized lane
fn lane_for_fret(fret: &str) -> Option<u8> {
    match fret {
        "0" => Some(1),
        "1" => Some(2),
        "2" => Some(3),
        "3" => Some(4),
        "4" => Some(5),
        "8" => Some(6),
        "7" => Some(OPEN_LANE),
        _ => None,
    }
}

/// Lines of the `[name]` section body, up to its closing brace
fn section<'a>(lines: &'a [&'a str], name: &str) -> &'a [&'a str] {
    let Some(start) = lines.iter().position(|l| *l == name) else {
        return &[];
    };
    let body = &lines[start + 1..];
    let end = body.iter().position(|l| l.starts_with('}')).unwrap_or(body.len());
    &body[..end]
}

fn resolution(song: &[&str]) -> u32 {
    song.iter()
        .find_map(|line| {
            let (key, value) = line.split_once('=')?;
            if key.trim() != "Resolution" {
                return None;
            }
            value.trim().trim_matches('"').parse::<u32>().ok()
        })
        .unwrap_or(DEFAULT_RESOLUTION)
}

pub fn decode(bytes: &[u8]) -> Result<ChartFeatures, DecodeError> {
    let (text, _) = decode_text(bytes)?;
    let lines: Vec<&str> = text.lines().map(str::trim).collect();

    if !lines.iter().any(|l| l.contains("[Song]")) {
        return Err(DecodeError::MissingHeader);
    }
    let first_track = lines
        .iter()
        .position(|l| track_for_header(l).is_some())
        .ok_or(DecodeError::NoTracks)?;

    let mut features = ChartFeatures {
        file_hash: file_hash(bytes),
        ..Default::default()
    };

    for line in section(&lines, "[Events]") {
        if line.contains("\"lyric ") {
            features.has_lyrics = true;
        } else if line.contains("\"section ") && line.split(" = ").count() == 2 {
            features.has_sections = true;
        }
    }

    let mut tempo = TempoMap::new(resolution(section(&lines, "[Song]")));
    for line in section(&lines, "[SyncTrack]") {
        if let Some(caps) = TEMPO_RE.captures(line) {
            if let (Ok(tick), Ok(millibpm)) = (caps[1].parse::<u64>(), caps[2].parse::<u64>()) {
                tempo.push(tick, millibpm as f64 / 1000.0);
            }
        }
    }

    let mut tracks: BTreeMap<TrackKey, TrackNotes> = BTreeMap::new();
    let mut current: Option<TrackKey> = None;
    for line in &lines[first_track..] {
        if line.starts_with('[') {
            current = track_for_header(line);
            if let Some(key) = current {
                tracks.entry(key).or_insert_with(|| TrackNotes::new(BROKEN_TICKS));
            }
            continue;
        }

        if line.contains("N 5 ") {
            features.has_forced = true;
        }
        if line.contains("N 6 ") {
            features.has_tap = true;
        } else if line.contains(" solo") {
            features.has_solo_sections = true;
        } else if line.contains("S 2") {
            features.has_star_power = true;
        }

        let Some(key) = current else { continue };
        if line.contains("N 7 ") {
            features.open_notes.insert(key.0);
        }
        if let Some(caps) = NOTE_RE.captures(line) {
            let (Ok(tick), Some(lane)) = (caps[1].parse::<u64>(), lane_for_fret(&caps[2])) else {
                continue;
            };
            if let Some(track) = tracks.get_mut(&key) {
                track.push(tick, lane);
            }
        }
    }

    features.absorb_tracks(&tracks);
    features.is_120 = tempo.is_default_120();

    let span = note_span(&tracks);
    let last_note = span.map_or(0, |(_, last)| last);
    features.length_seconds = tempo.seconds_at(last_note.max(tempo.last_tick())).floor() as u64;
    if let Some((first, last)) = span {
        let effective = tempo.seconds_at(last) - tempo.seconds_at(first);
        features.effective_length_seconds = effective.max(0.0).floor() as u64;
    }

    Ok(features)
}
