//! # chartscan Common Library
//!
//! Shared code for the chartscan tools including:
//! - Common error type
//! - Configuration model, loading and resolution
//! - Run progress events (IngestEvent enum and EventBus)

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
