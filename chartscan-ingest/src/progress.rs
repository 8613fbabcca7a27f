//! Terminal progress for interactive runs
//!
//! [`CliReporter`] subscribes to the [`EventBus`] and drives one `indicatif`
//! bar per stage. The pipeline never talks to it directly.

use chartscan_common::events::{EventBus, IngestEvent, RunStage};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(TICK_CHARS)
}

fn counter_style(verb: &str) -> ProgressStyle {
    ProgressStyle::with_template(&format!(
        "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} {{msg}}",
        verb
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━╸─")
    .tick_chars(TICK_CHARS)
}

pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    /// Listen on `bus` until every sender is dropped
    pub fn spawn(bus: &EventBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            let reporter = CliReporter::new();
            loop {
                match rx.recv().await {
                    Ok(event) => reporter.handle(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Progress reporter lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            reporter.finish_bar();
        })
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn start_stage(&self, stage: RunStage) {
        let pb = match stage {
            RunStage::Fetch => {
                let pb = ProgressBar::new(0);
                pb.set_style(counter_style("Fetching"));
                pb
            }
            RunStage::Scan => {
                let pb = ProgressBar::new(0);
                pb.set_style(counter_style("Scanning"));
                pb
            }
            _ => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(spinner_style());
                pb.set_message(format!("{}...", capitalized(stage)));
                pb
            }
        };
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    pub fn handle(&self, event: &IngestEvent) {
        match event {
            IngestEvent::StageStarted { stage, .. } => self.start_stage(*stage),
            IngestEvent::StageCompleted { stage, .. } => {
                self.finish_bar();
                eprintln!("  \x1b[32m✓\x1b[0m {} complete", capitalized(*stage));
            }
            IngestEvent::SourceWalkStarted { source_name, .. } => {
                self.with_bar(|pb| pb.set_message(format!("Walking {}...", source_name)));
            }
            IngestEvent::SourceWalkCompleted { group_count, .. } => {
                self.with_bar(|pb| pb.println(format!("    {} chart groups found", group_count)));
            }
            IngestEvent::GroupFetchStarted {
                label,
                position,
                total,
                ..
            } => self.with_bar(|pb| {
                if pb.length() != Some(*total as u64) {
                    pb.set_length(*total as u64);
                }
                pb.set_position(position.saturating_sub(1) as u64);
                pb.set_message(label.clone());
            }),
            IngestEvent::FileDownloadProgress {
                file_name,
                bytes_downloaded,
                total_bytes,
                ..
            } => self.with_bar(|pb| {
                pb.set_message(format!(
                    "{} ({}/{})",
                    file_name,
                    HumanBytes(*bytes_downloaded),
                    HumanBytes(*total_bytes)
                ))
            }),
            IngestEvent::GroupFetchCompleted { .. } => self.with_bar(|pb| pb.inc(1)),
            IngestEvent::GroupFetchFailed { group_id, reason, .. } => self.with_bar(|pb| {
                pb.inc(1);
                pb.println(format!("  \x1b[31m✗\x1b[0m {}: {}", group_id, reason));
            }),
            IngestEvent::ScanProgress {
                scanned,
                total,
                label,
                ..
            } => self.with_bar(|pb| {
                if pb.length() != Some(*total as u64) {
                    pb.set_length(*total as u64);
                }
                pb.set_position(*scanned as u64);
                pb.set_message(label.clone());
            }),
            IngestEvent::FileDownloadStarted { .. } | IngestEvent::FileDownloadCompleted { .. } => {}
        }
    }
}

fn capitalized(stage: RunStage) -> String {
    let name = stage.to_string();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_capitalized_stage_names() {
        assert_eq!(capitalized(RunStage::Walk), "Walk");
        assert_eq!(capitalized(RunStage::Reconcile), "Reconcile");
    }

    #[test]
    fn test_scan_progress_sets_bar_length() {
        let reporter = CliReporter::new();
        reporter.handle(&IngestEvent::StageStarted {
            stage: RunStage::Scan,
            timestamp: Utc::now(),
        });
        reporter.handle(&IngestEvent::ScanProgress {
            scanned: 2,
            total: 5,
            label: "Song".to_string(),
            timestamp: Utc::now(),
        });

        let guard = reporter.bar.lock().unwrap();
        let pb = guard.as_ref().unwrap();
        assert_eq!(pb.length(), Some(5));
        assert_eq!(pb.position(), 2);
    }

    #[tokio::test]
    async fn test_reporter_stops_when_bus_is_dropped() {
        let bus = EventBus::new(16);
        let handle = CliReporter::spawn(&bus);
        bus.emit_lossy(IngestEvent::StageStarted {
            stage: RunStage::Walk,
            timestamp: Utc::now(),
        });
        drop(bus);
        handle.await.unwrap();
    }
}
