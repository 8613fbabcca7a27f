//! Per-track note accumulation shared by both decoders

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Lane number for open notes
pub const OPEN_LANE: u8 = 7;

/// Tracks with fewer distinct note times are left out of counts and hashes
pub const MIN_TRACK_NOTES: usize = 10;

/// Whether two lanes are the same or neighbours. Open only matches open.
fn lanes_touch(a: u8, b: u8) -> bool {
    if a == OPEN_LANE || b == OPEN_LANE {
        a == b
    } else {
        a.abs_diff(b) <= 1
    }
}

/// Notes of one instrument/difficulty, keyed by time
#[derive(Debug, Clone)]
pub struct TrackNotes {
    /// Time → lanes at that time, in arrival order
    notes: BTreeMap<u64, Vec<u8>>,
    /// Distances below this (in the track's time unit) are "broken"
    broken_threshold: u64,
    /// The chord before the one currently arriving
    previous: Option<(u64, Vec<u8>)>,
    current: Option<(u64, Vec<u8>)>,
    broken: bool,
}

impl TrackNotes {
    pub fn new(broken_threshold: u64) -> Self {
        Self {
            notes: BTreeMap::new(),
            broken_threshold,
            previous: None,
            current: None,
            broken: false,
        }
    }

    /// Record a note at `time` on `lane`. Notes are expected in time order.
    pub fn push(&mut self, time: u64, lane: u8) {
        self.notes.entry(time).or_default().push(lane);

        match &mut self.current {
            Some((t, lanes)) if *t == time => lanes.push(lane),
            _ => {
                self.previous = self.current.take();
                self.current = Some((time, vec![lane]));
            }
        }

        if let Some((prev_time, prev_lanes)) = &self.previous {
            let distance = time.saturating_sub(*prev_time);
            if distance > 0
                && distance < self.broken_threshold
                && prev_lanes.iter().any(|&p| lanes_touch(p, lane))
            {
                self.broken = true;
            }
        }
    }

    pub fn has_broken_notes(&self) -> bool {
        self.broken
    }

    /// Distinct note times
    pub fn count(&self) -> usize {
        self.notes.len()
    }

    pub fn first_time(&self) -> Option<u64> {
        self.notes.keys().next().copied()
    }

    pub fn last_time(&self) -> Option<u64> {
        self.notes.keys().next_back().copied()
    }

    /// SHA-256 over the time-ordered lane strings joined with spaces
    pub fn content_hash(&self) -> String {
        let encoded: Vec<String> = self
            .notes
            .values()
            .map(|lanes| lanes.iter().map(|l| l.to_string()).collect())
            .collect();
        format!("{:x}", Sha256::digest(encoded.join(" ").as_bytes()))
    }

    /// Whether the track has enough notes to count
    pub fn is_significant(&self) -> bool {
        self.count() >= MIN_TRACK_NOTES
    }
}
