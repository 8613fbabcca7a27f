//! Tempo map and tick → seconds integration

/// Ticks per beat assumed when a chart does not declare one
pub const DEFAULT_RESOLUTION: u32 = 192;

/// Tempo in effect before the first tempo entry
pub const DEFAULT_BPM: f64 = 120.0;

/// Ordered `(tick, bpm)` entries plus the chart's resolution
#[derive(Debug, Clone, PartialEq)]
pub struct TempoMap {
    resolution: u32,
    entries: Vec<(u64, f64)>,
}

impl TempoMap {
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution: resolution.max(1),
            entries: Vec::new(),
        }
    }

    /// Add a tempo change. Non-positive tempos are ignored; a later entry
    /// at the same tick replaces the earlier one.
    pub fn push(&mut self, tick: u64, bpm: f64) {
        if !(bpm > 0.0 && bpm.is_finite()) {
            return;
        }
        match self.entries.binary_search_by(|(t, _)| t.cmp(&tick)) {
            Ok(i) => self.entries[i].1 = bpm,
            Err(i) => self.entries.insert(i, (tick, bpm)),
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn entries(&self) -> &[(u64, f64)] {
        &self.entries
    }

    pub fn last_tick(&self) -> u64 {
        self.entries.last().map_or(0, |(t, _)| *t)
    }

    /// Exactly one entry: 120 BPM at tick 0. Usually means the chart was
    /// never beat-mapped.
    pub fn is_default_120(&self) -> bool {
        matches!(self.entries.as_slice(), [(0, bpm)] if *bpm == DEFAULT_BPM)
    }

    /// Elapsed seconds at `tick`, integrating segment by segment and
    /// continuing with the last tempo past the final entry
    pub fn seconds_at(&self, tick: u64) -> f64 {
        let resolution = f64::from(self.resolution);
        let mut seconds = 0.0;
        let mut segment_start = 0u64;
        let mut bpm = DEFAULT_BPM;

        for &(entry_tick, entry_bpm) in &self.entries {
            if entry_tick >= tick {
                break;
            }
            seconds += (entry_tick - segment_start) as f64 * 60.0 / (bpm * resolution);
            segment_start = entry_tick;
            bpm = entry_bpm;
        }

        seconds + (tick - segment_start) as f64 * 60.0 / (bpm * resolution)
    }
}
