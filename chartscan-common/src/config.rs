//! Configuration loading and config file resolution
//!
//! Settings live in a single TOML file. Every section is optional and falls
//! back to compiled defaults, so a file holding only `[[sources]]` is valid.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "CHARTSCAN_CONFIG";

/// Environment variable holding a Drive API key (overrides the file)
pub const DRIVE_API_KEY_ENV: &str = "CHARTSCAN_DRIVE_API_KEY";

/// Environment variable holding a Drive OAuth access token (overrides the file)
pub const DRIVE_TOKEN_ENV: &str = "CHARTSCAN_DRIVE_TOKEN";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub drive: DriveConfig,
    pub scan: ScanSettings,
    pub sources: Vec<SourceConfig>,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive used when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// `[drive]` section: remote store credentials and call pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    /// Minimum spacing between two remote API calls
    pub min_call_spacing_ms: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            access_token: None,
            min_call_spacing_ms: 200,
        }
    }
}

/// `[scan]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Root for downloads, persisted state and reports
    pub downloads_dir: PathBuf,
    /// Read source ids from stdin instead of `[[sources]]`
    pub ad_hoc_sources: bool,
    pub max_archive_size_mb: u64,
    /// Re-fetch every group, including unchanged ones
    pub rescan_all: bool,
    /// Walk only the last N configured sources (0 = all)
    pub only_scan_last: Option<usize>,
    pub minimum_chart_count: usize,
    pub serious_issue_threshold: usize,
    /// Negative means unlimited
    pub max_downloads_per_source: i64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("./ChartDownloads"),
            ad_hoc_sources: false,
            max_archive_size_mb: 3000,
            rescan_all: false,
            only_scan_last: None,
            minimum_chart_count: 5,
            serious_issue_threshold: 3,
            max_downloads_per_source: -1,
        }
    }
}

impl ScanSettings {
    /// Effective partial-scan count. Ad-hoc mode always scans everything it was given.
    pub fn only_scan_last(&self) -> Option<usize> {
        if self.ad_hoc_sources {
            return None;
        }
        self.only_scan_last.filter(|n| *n > 0)
    }

    pub fn max_downloads_per_source(&self) -> Option<usize> {
        usize::try_from(self.max_downloads_per_source).ok()
    }

    /// Archive size ceiling in bytes (1 MB = 1024 * 1024 bytes)
    pub fn max_archive_size_bytes(&self) -> u64 {
        self.max_archive_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.downloads_dir.join("scan_state")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.downloads_dir.join("reports")
    }

    pub fn charts_dir(&self) -> PathBuf {
        self.downloads_dir.join("downloads")
    }
}

/// One `[[sources]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub root_id: String,
    pub name: String,
    /// The root id names a single file rather than a folder
    #[serde(default)]
    pub single_file: bool,
    /// Icon every chart under this source must carry
    #[serde(default)]
    pub icon: Option<String>,
}

impl TomlConfig {
    /// Load and parse a config file, applying environment overrides.
    ///
    /// Call [`TomlConfig::validate`] once command-line overrides are applied.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let mut config: TomlConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;
        config.apply_env_overrides();
        tracing::debug!(
            path = %path.display(),
            sources = config.sources.len(),
            "Loaded config"
        );
        Ok(config)
    }

    /// Credentials from the environment win over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(DRIVE_API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.drive.api_key = Some(key);
            }
        }
        if let Ok(token) = std::env::var(DRIVE_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.drive.access_token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() && !self.scan.ad_hoc_sources {
            return Err(Error::Config(
                "No [[sources]] configured and ad_hoc_sources is off".to_string(),
            ));
        }
        if let Some(source) = self.sources.iter().find(|s| s.root_id.trim().is_empty()) {
            return Err(Error::Config(format!(
                "Source \"{}\" has an empty root_id",
                source.name
            )));
        }
        if self.drive.min_call_spacing_ms == 0 {
            return Err(Error::Config(
                "drive.min_call_spacing_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Config file resolution, in priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. `<config dir>/chartscan/config.toml`
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let default_path = default_config_path()?;
    if default_path.exists() {
        Ok(default_path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {}",
            default_path.display()
        )))
    }
}

/// Platform config location (e.g. ~/.config/chartscan/config.toml on Linux)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("chartscan").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}
