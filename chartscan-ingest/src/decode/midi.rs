//! Standard MIDI file decoder
//!
//! Note times are converted to microseconds through the file's own tempo
//! events, then fed to the same per-track accumulator the text decoder uses.

use super::notes::{TrackNotes, OPEN_LANE};
use super::tempo::TempoMap;
use super::{file_hash, note_span, ChartFeatures, DecodeError, Difficulty, Instrument, TrackKey};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::BTreeMap;

/// Broken-note distance: 5 ms, in microseconds
const BROKEN_MICROS: u64 = 5_000;

const SOLO_KEY: u8 = 103;
const STAR_POWER_KEY: u8 = 116;
const FORCED_KEYS: [u8; 8] = [65, 66, 77, 78, 89, 90, 101, 102];

/// Phase Shift sysex header
const PS_PREFIX: [u8; 4] = [0x50, 0x53, 0x00, 0x00];
const PS_TYPE_OPEN: u8 = 0x01;
const PS_TYPE_TAP: u8 = 0x04;

fn instrument_for_track_name(name: &str) -> Option<Instrument> {
    match name.trim() {
        "PART GUITAR" => Some(Instrument::Guitar),
        "PART BASS" => Some(Instrument::Bass),
        "PART RHYTHM" => Some(Instrument::Rhythm),
        "PART KEYS" => Some(Instrument::Keys),
        "PART DRUMS" => Some(Instrument::Drums),
        "PART VOCALS" => Some(Instrument::Vocals),
        "PART GUITAR GHL" => Some(Instrument::GuitarGhl),
        "PART BASS GHL" => Some(Instrument::BassGhl),
        _ => None,
    }
}

/// Difficulty and lane of a note key on a five-fret track
fn standard_note(key: u8, open: bool) -> Option<(Difficulty, u8)> {
    let (difficulty, offset) = match key {
        60..=64 => (Difficulty::Easy, 59),
        72..=76 => (Difficulty::Medium, 71),
        84..=88 => (Difficulty::Hard, 83),
        96..=100 => (Difficulty::Expert, 95),
        _ => return None,
    };
    Some((difficulty, if open { OPEN_LANE } else { key - offset }))
}

/// Difficulty and lane of a note key on a six-fret track. Lane 0 is open.
fn ghl_note(key: u8) -> Option<(Difficulty, u8)> {
    let (difficulty, offset) = match key {
        94.. => (Difficulty::Expert, 95),
        82.. => (Difficulty::Hard, 83),
        70.. => (Difficulty::Medium, 71),
        _ => (Difficulty::Easy, 59),
    };
    let lane = i16::from(key) - offset + 1;
    let lane = if lane == 0 { i16::from(OPEN_LANE) } else { lane };
    if (1..=i16::from(OPEN_LANE)).contains(&lane) {
        Some((difficulty, lane as u8))
    } else {
        None
    }
}

fn text_marks_section(text: &[u8]) -> bool {
    text.starts_with(b"[section") || text.starts_with(b"[prc")
}

/// One note-on, located in absolute ticks
struct NoteOn {
    tick: u64,
    key: u8,
    instrument: Option<Instrument>,
    open: bool,
}

pub fn decode(bytes: &[u8]) -> Result<ChartFeatures, DecodeError> {
    let smf = Smf::parse(bytes).map_err(|e| DecodeError::Midi(e.to_string()))?;
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => u32::from(tpb.as_int()),
        Timing::Timecode(fps, sub) => {
            return Err(DecodeError::UnsupportedTiming(format!(
                "SMPTE {:?} fps, {} subframes",
                fps, sub
            )))
        }
    };

    let mut features = ChartFeatures {
        file_hash: file_hash(bytes),
        ..Default::default()
    };
    let mut tempo = TempoMap::new(ticks_per_beat);
    let mut tempo_events = Vec::new();
    let mut note_ons = Vec::new();

    for track in &smf.tracks {
        let mut tick = 0u64;
        let mut instrument = None;
        let mut open = false;

        for event in track {
            tick += u64::from(event.delta.as_int());
            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(us_per_beat)) => {
                    let us = us_per_beat.as_int();
                    if us > 0 {
                        let bpm = 60_000_000.0 / f64::from(us);
                        tempo.push(tick, bpm);
                        tempo_events.push(bpm);
                    }
                }
                TrackEventKind::Meta(MetaMessage::TrackName(name)) => {
                    instrument = instrument_for_track_name(&String::from_utf8_lossy(name));
                    if instrument == Some(Instrument::Vocals) {
                        features.has_lyrics = true;
                    }
                }
                TrackEventKind::Meta(MetaMessage::Lyric(_)) => features.has_lyrics = true,
                TrackEventKind::Meta(MetaMessage::Text(text))
                | TrackEventKind::Meta(MetaMessage::Marker(text)) => {
                    if text_marks_section(text) {
                        features.has_sections = true;
                    }
                }
                TrackEventKind::SysEx(data) => {
                    if data.len() >= 7 && data[..4] == PS_PREFIX {
                        match (data[5], data[6]) {
                            (PS_TYPE_TAP, 1) => features.has_tap = true,
                            (PS_TYPE_OPEN, value) => {
                                open = value == 1;
                                if let (true, Some(i)) = (open, instrument) {
                                    features.open_notes.insert(i);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { key, vel },
                    ..
                } if vel.as_int() > 0 => {
                    let key = key.as_int();
                    match key {
                        SOLO_KEY => features.has_solo_sections = true,
                        STAR_POWER_KEY => features.has_star_power = true,
                        k if FORCED_KEYS.contains(&k) => features.has_forced = true,
                        _ => note_ons.push(NoteOn {
                            tick,
                            key,
                            instrument,
                            open,
                        }),
                    }
                }
                _ => {}
            }
        }
    }

    // Tempo may live in a different track than the notes, so times are
    // resolved only once every tempo event is known
    let mut tracks: BTreeMap<TrackKey, TrackNotes> = BTreeMap::new();
    for note in &note_ons {
        let Some(instrument) = note.instrument else {
            continue;
        };
        let located = if instrument.is_ghl() {
            ghl_note(note.key)
        } else {
            standard_note(note.key, note.open)
        };
        let Some((difficulty, lane)) = located else {
            continue;
        };
        let micros = (tempo.seconds_at(note.tick) * 1_000_000.0).round() as u64;
        tracks
            .entry((instrument, difficulty))
            .or_insert_with(|| TrackNotes::new(BROKEN_MICROS))
            .push(micros, lane);
    }

    features.absorb_tracks(&tracks);
    features.is_120 = matches!(tempo_events.as_slice(), [bpm] if (*bpm - 120.0).abs() < 1e-6);

    if let Some((first, last)) = note_span(&tracks) {
        features.length_seconds = last / 1_000_000;
        features.effective_length_seconds = (last - first) / 1_000_000;
    }

    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a format-1 SMF with a tempo track and one named note track
    struct SmfBuilder {
        tempo_track: Vec<u8>,
        note_track: Vec<u8>,
    }

    fn vlq(mut value: u32) -> Vec<u8> {
        let mut out = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            out.insert(0, (value & 0x7F) as u8 | 0x80);
            value >>= 7;
        }
        out
    }

    impl SmfBuilder {
        fn new(track_name: &str) -> Self {
            let mut note_track = vec![0x00, 0xFF, 0x03, track_name.len() as u8];
            note_track.extend_from_slice(track_name.as_bytes());
            Self {
                tempo_track: Vec::new(),
                note_track,
            }
        }

        fn tempo(mut self, delta: u32, us_per_beat: u32) -> Self {
            self.tempo_track.extend(vlq(delta));
            self.tempo_track.extend([0xFF, 0x51, 0x03]);
            self.tempo_track.extend(&us_per_beat.to_be_bytes()[1..]);
            self
        }

        fn note(mut self, delta: u32, key: u8) -> Self {
            self.note_track.extend(vlq(delta));
            self.note_track.extend([0x90, key, 100]);
            self.note_track.extend([0x00, 0x80, key, 0]);
            self
        }

        fn sysex(mut self, delta: u32, payload: &[u8]) -> Self {
            self.note_track.extend(vlq(delta));
            self.note_track.push(0xF0);
            self.note_track.extend(vlq(payload.len() as u32));
            self.note_track.extend_from_slice(payload);
            self
        }

        fn text(mut self, delta: u32, text: &str) -> Self {
            self.note_track.extend(vlq(delta));
            self.note_track.extend([0xFF, 0x01, text.len() as u8]);
            self.note_track.extend_from_slice(text.as_bytes());
            self
        }

        fn build(self) -> Vec<u8> {
            let mut out = b"MThd".to_vec();
            out.extend([0, 0, 0, 6, 0, 1, 0, 2, 0x01, 0xE0]); // format 1, 2 tracks, 480 tpb
            for mut body in [self.tempo_track, self.note_track] {
                body.extend([0x00, 0xFF, 0x2F, 0x00]);
                out.extend(b"MTrk");
                out.extend((body.len() as u32).to_be_bytes());
                out.extend(body);
            }
            out
        }
    }

    #[test]
    fn test_single_120_tempo_is_default() {
        let mut builder = SmfBuilder::new("PART GUITAR").tempo(0, 500_000);
        for _ in 0..12 {
            builder = builder.note(480, 96);
        }

        let features = decode(&builder.build()).unwrap();

        assert!(features.is_120);
        assert_eq!(features.note_counts[&(Instrument::Guitar, Difficulty::Expert)], 12);
        // 12 beats at 120 BPM
        assert_eq!(features.length_seconds, 6);
        assert_eq!(features.effective_length_seconds, 5);
        assert!(!features.has_broken_notes);
    }

    #[test]
    fn test_markers_and_special_keys() {
        let builder = SmfBuilder::new("PART VOCALS")
            .tempo(0, 400_000)
            .text(0, "[section verse_1]")
            .note(10, SOLO_KEY)
            .note(10, STAR_POWER_KEY)
            .note(10, 101);

        let features = decode(&builder.build()).unwrap();

        assert!(!features.is_120);
        assert!(features.has_lyrics);
        assert!(features.has_sections);
        assert!(features.has_solo_sections);
        assert!(features.has_star_power);
        assert!(features.has_forced);
    }

    #[test]
    fn test_open_and_tap_sysex() {
        let builder = SmfBuilder::new("PART BASS")
            .tempo(0, 500_000)
            .sysex(0, &[0x50, 0x53, 0x00, 0x00, 0xFF, 0x04, 0x01, 0xF7])
            .sysex(0, &[0x50, 0x53, 0x00, 0x00, 0x03, 0x01, 0x01, 0xF7])
            .note(0, 97)
            .sysex(0, &[0x50, 0x53, 0x00, 0x00, 0x03, 0x01, 0x00, 0xF7]);

        let features = decode(&builder.build()).unwrap();

        assert!(features.has_tap);
        assert!(features.has_open(Instrument::Bass));
        assert!(!features.has_open(Instrument::Guitar));
    }

    #[test]
    fn test_close_notes_are_broken() {
        // 480 tpb at 120 BPM: one tick is ~1.04 ms
        let builder = SmfBuilder::new("PART GUITAR")
            .tempo(0, 500_000)
            .note(480, 97)
            .note(2, 97);

        assert!(decode(&builder.build()).unwrap().has_broken_notes);
    }

    #[test]
    fn test_ghl_lanes() {
        assert_eq!(ghl_note(94), Some((Difficulty::Expert, OPEN_LANE)));
        assert_eq!(ghl_note(95), Some((Difficulty::Expert, 1)));
        assert_eq!(ghl_note(100), Some((Difficulty::Expert, 6)));
        assert_eq!(ghl_note(83), Some((Difficulty::Hard, 1)));
        assert_eq!(ghl_note(58), Some((Difficulty::Easy, OPEN_LANE)));
        assert_eq!(ghl_note(40), None);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(decode(b"not a midi file"), Err(DecodeError::Midi(_))));
    }
}
