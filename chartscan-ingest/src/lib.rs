//! chartscan-ingest library interface
//!
//! Walks remote chart sources, fetches new or changed chart groups, decodes
//! and validates them, and files per-source issue reports. The binary in
//! `main.rs` wires these pieces to a config file and a terminal.

pub mod adhoc;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod model;
pub mod naming;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod remote;
pub mod report;
pub mod scanner;
pub mod state;
pub mod validation;
pub mod walker;

pub use crate::error::{IngestError, IngestResult};
pub use crate::pipeline::{IngestPipeline, RunSummary};
pub use crate::remote::{DriveAuth, DriveClient, RemoteError, RemoteStore};
