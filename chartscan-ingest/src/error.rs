//! Fatal pipeline errors
//!
//! Everything else is downgraded to a per-group failure or a validation issue.

use crate::remote::RemoteError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Cannot authenticate to the remote store: {0}")]
    Auth(RemoteError),

    #[error("Failed to persist state at {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: chartscan_common::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
