//! Event types for chartscan run progress
//!
//! The ingest pipeline emits `IngestEvent`s on an `EventBus` as it walks,
//! fetches and scans. Subscribers (the CLI progress reporter, tests) observe
//! them without the pipeline knowing who is listening.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Sequential stages of one ingest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Walk,
    Reconcile,
    Fetch,
    Scan,
    Report,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStage::Walk => "walk",
            RunStage::Reconcile => "reconcile",
            RunStage::Fetch => "fetch",
            RunStage::Scan => "scan",
            RunStage::Report => "report",
        };
        f.write_str(name)
    }
}

/// Progress events emitted during an ingest run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    StageStarted {
        stage: RunStage,
        timestamp: DateTime<Utc>,
    },

    StageCompleted {
        stage: RunStage,
        timestamp: DateTime<Utc>,
    },

    /// A source root is about to be walked
    SourceWalkStarted {
        root_id: String,
        source_name: String,
        timestamp: DateTime<Utc>,
    },

    SourceWalkCompleted {
        root_id: String,
        /// Chart groups found under this root
        group_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Fetch of one chart group begins
    GroupFetchStarted {
        group_id: String,
        label: String,
        file_count: usize,
        /// Position of this group in the fetch queue (1-based)
        position: usize,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    FileDownloadStarted {
        group_id: String,
        file_name: String,
        total_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    /// Emitted per received chunk; lossy
    FileDownloadProgress {
        group_id: String,
        file_name: String,
        bytes_downloaded: u64,
        total_bytes: u64,
        timestamp: DateTime<Utc>,
    },

    FileDownloadCompleted {
        group_id: String,
        file_name: String,
        timestamp: DateTime<Utc>,
    },

    GroupFetchCompleted {
        group_id: String,
        local_path: String,
        timestamp: DateTime<Utc>,
    },

    GroupFetchFailed {
        group_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// One fetched group has been scanned into versions
    ScanProgress {
        scanned: usize,
        total: usize,
        label: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for `IngestEvent`s
///
/// Cloning the bus shares the underlying channel. Events emitted before a
/// subscriber attaches are not replayed to it.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per receiver
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IngestEvent,
    ) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
