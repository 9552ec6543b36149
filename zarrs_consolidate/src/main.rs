//! The `zarrs_consolidate` command line tool.
//!
//! Reads a [`ConsolidateConfig`] from `--config` (or the defaults), applies command line overrides, and runs the [`Pipeline`].
//! Exits with an error if no partition is accepted, or consolidation or the write fails.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use zarrs::{filesystem::FilesystemStore, storage::ReadableWritableListableStorage};
use zarrs_consolidate::{ConsolidateConfig, DuplicatePolicy, Pipeline, StorageClient};

/// Consolidate time-partitioned Zarr datasets into a single archive
#[derive(Parser)]
#[command(name = "zarrs_consolidate")]
#[command(version)]
#[command(about = "Consolidate time-partitioned Zarr datasets into a single archive", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Location holding the partitions (local directory or s3:// URL)
    #[arg(long, value_name = "LOCATION")]
    base_location: Option<String>,

    /// Dataset name prefix of every partition
    #[arg(long, value_name = "NAME")]
    dataset_name: Option<String>,

    /// Year of the partitions
    #[arg(long)]
    year: Option<i32>,

    /// Period key of a partition, repeatable (default: 01 to 12)
    #[arg(long = "period", value_name = "KEY")]
    periods: Vec<String>,

    /// Temporal coordinate to merge along
    #[arg(long, value_name = "NAME")]
    temporal_coordinate: Option<String>,

    /// Archive chunk length along the temporal dimension
    #[arg(long, value_name = "LENGTH")]
    chunk_length: Option<u64>,

    /// Archive destination directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<String>,

    /// Keep the latest partition's entry for duplicate timestamps
    #[arg(long)]
    keep_last: bool,

    /// Sign object store requests with credentials from the environment
    #[arg(long)]
    signed: bool,

    /// Object store region
    #[arg(long)]
    region: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}

fn apply_cli_overrides(config: &mut ConsolidateConfig, cli: Cli) {
    if let Some(base_location) = cli.base_location {
        config.base_location = base_location;
    }
    if let Some(dataset_name) = cli.dataset_name {
        config.dataset_name = dataset_name;
    }
    if let Some(year) = cli.year {
        config.year = year;
    }
    if !cli.periods.is_empty() {
        config.periods = cli.periods;
    }
    if let Some(temporal_coordinate) = cli.temporal_coordinate {
        config.temporal_coordinate = temporal_coordinate;
    }
    if let Some(chunk_length) = cli.chunk_length {
        config.temporal_chunk_length = chunk_length;
    }
    if let Some(output) = cli.output {
        config.output = output;
    }
    if cli.keep_last {
        config.duplicate_policy = DuplicatePolicy::KeepLast;
    }
    if cli.signed {
        config.store.anonymous = false;
    }
    if let Some(region) = cli.region {
        config.store.region = Some(region);
    }
}

/// Split the output into an existing parent directory and the archive name within it.
fn output_destination(output: &str) -> Result<(PathBuf, String)> {
    if output.contains("://") {
        bail!("output must be a local path, got {output}");
    }
    let output = Path::new(output);
    let name = output
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid output path {}", output.display()))?
        .to_string();
    let parent = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    Ok((parent, name))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let mut config = match &cli.config {
        Some(path) => ConsolidateConfig::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ConsolidateConfig::default(),
    };
    apply_cli_overrides(&mut config, cli);
    config.validate()?;

    let client = StorageClient::for_location(
        &config.base_location,
        config.store.region.as_deref(),
        config.store.anonymous,
    )
    .with_context(|| format!("failed to create a store client for {}", config.base_location))?;

    let (parent, name) = output_destination(&config.output)?;
    let destination: ReadableWritableListableStorage = Arc::new(
        FilesystemStore::new(&parent)
            .with_context(|| format!("failed to open {}", parent.display()))?,
    );
    info!(
        base_location = %config.base_location,
        year = config.year,
        periods = config.periods.len(),
        output = %config.output,
        "Consolidating partitions"
    );

    let report = Pipeline::new(&config, &client).run(&destination, &name)?;
    println!("{report}");
    Ok(())
}
