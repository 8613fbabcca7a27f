//! chartscan-ingest - command-line entry point
//!
//! Loads the config, builds a Drive client and runs one ingest pass over the
//! configured (or pasted) sources.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chartscan_common::config::{resolve_config_path, TomlConfig, CONFIG_PATH_ENV};
use chartscan_common::events::EventBus;
use chartscan_ingest::adhoc::{extract_drive_ids, resolve_sources};
use chartscan_ingest::model::SourceRoot;
use chartscan_ingest::progress::CliReporter;
use chartscan_ingest::remote::CallLimiter;
use chartscan_ingest::{DriveAuth, DriveClient, IngestPipeline, RemoteStore};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for chartscan-ingest
#[derive(Parser, Debug)]
#[command(name = "chartscan-ingest")]
#[command(about = "Fetch, decode and validate rhythm game charts from Drive sources")]
#[command(version)]
struct Args {
    /// Config file (falls back to the platform config directory)
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Re-fetch every chart group, changed or not
    #[arg(long)]
    rescan_all: bool,

    /// Walk only the last N configured sources
    #[arg(long, value_name = "N")]
    only_scan_last: Option<usize>,

    /// Read Drive links from stdin instead of the configured sources
    #[arg(long)]
    ad_hoc: bool,

    /// Override the downloads directory
    #[arg(long, env = "CHARTSCAN_DOWNLOADS_DIR")]
    downloads_dir: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<(TomlConfig, PathBuf)> {
    let path = resolve_config_path(args.config.as_deref(), CONFIG_PATH_ENV)
        .context("Failed to locate config file")?;
    let mut config = TomlConfig::load(&path)?;

    if args.rescan_all {
        config.scan.rescan_all = true;
    }
    if args.only_scan_last.is_some() {
        config.scan.only_scan_last = args.only_scan_last;
    }
    if args.ad_hoc {
        config.scan.ad_hoc_sources = true;
    }
    if let Some(dir) = &args.downloads_dir {
        config.scan.downloads_dir = dir.clone();
    }
    config.validate()?;
    Ok((config, path))
}

fn drive_auth(config: &TomlConfig) -> Result<DriveAuth> {
    if let Some(token) = &config.drive.access_token {
        return Ok(DriveAuth::AccessToken(token.clone()));
    }
    if let Some(key) = &config.drive.api_key {
        return Ok(DriveAuth::ApiKey(key.clone()));
    }
    bail!("No Drive credentials: set drive.api_key or drive.access_token")
}

async fn read_ad_hoc_sources(store: &dyn RemoteStore) -> Result<Vec<SourceRoot>> {
    eprintln!("Paste Drive links, then end input (Ctrl+D):");
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("Failed to read sources from stdin")?;
    let ids = extract_drive_ids(&text);
    if ids.is_empty() {
        bail!("No Drive ids found in input");
    }
    Ok(resolve_sources(store, &ids).await)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, config_path) = load_config(&args)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting chartscan-ingest {}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config_path.display());
    info!("Downloads: {}", config.scan.downloads_dir.display());

    let limiter = CallLimiter::new(Duration::from_millis(config.drive.min_call_spacing_ms));
    let store: Arc<dyn RemoteStore> = Arc::new(
        DriveClient::new(drive_auth(&config)?, limiter).context("Failed to build Drive client")?,
    );

    let sources: Vec<SourceRoot> = if config.scan.ad_hoc_sources {
        read_ad_hoc_sources(store.as_ref()).await?
    } else {
        config.sources.iter().map(SourceRoot::from).collect()
    };
    info!("{} sources", sources.len());

    let events = EventBus::default();
    let reporter = CliReporter::spawn(&events);
    let pipeline = IngestPipeline::new(store, config.scan.clone(), sources, events.clone());
    drop(events);

    let outcome = tokio::select! {
        result = pipeline.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; state from finished stages is kept");
            std::process::exit(130);
        }
    };
    let _ = reporter.await;

    match outcome {
        Ok(summary) => {
            println!("{}", summary);
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
