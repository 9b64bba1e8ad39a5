//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::runtime::{Handle, Runtime};
use tracing::level_filters::LevelFilter;

use backdrop_cache::config::Config;
use backdrop_cache::{AssetId, AssetProvider, logging, metrics};

/// backdropctl commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Look up an asset in the caches without downloading it.
    Fetch {
        /// The asset id, for example `/kqjL17yufvn9OVLyXYpvtyrFfak.jpg`.
        id: String,
    },

    /// Download, downsample and cache the given assets.
    Prepare {
        /// The asset ids to prepare.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Remove every cached asset.
    Clear,

    /// Remove assets that have not been used for a while.
    Cleanup {
        /// Only report what would be removed.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Overrides the log level from the configuration file.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config()).context("failed loading config")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // SAFETY: no other threads have been spawned yet.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = Runtime::new().context("failed to start the runtime")?;
    runtime.block_on(run(config, cli.command))
}

async fn run(config: Config, command: Command) -> Result<()> {
    let provider = AssetProvider::from_config(&config, Handle::current())?;

    match command {
        Command::Fetch { id } => {
            let id = AssetId::from(id);
            let asset = provider.fetch(&id);
            if asset.is_placeholder() {
                println!("{id}: not cached");
            } else {
                println!("{id}: {}x{}", asset.width(), asset.height());
            }
        }
        Command::Prepare { ids } => prepare(&provider, ids).await?,
        Command::Clear => {
            provider.clear().await.context("failed to clear caches")?;
            println!("cleared `{}`", provider.disk().cache_dir().display());
        }
        Command::Cleanup { dry_run } => {
            let stats = provider
                .cleanup(dry_run)
                .await
                .context("failed to clean up caches")?;
            let verb = if dry_run { "would remove" } else { "removed" };
            println!(
                "{verb} {} files ({} bytes), retained {} files ({} bytes)",
                stats.removed_files, stats.removed_bytes, stats.retained_files, stats.retained_bytes
            );
        }
    }

    Ok(())
}

/// Prepares all `ids` concurrently and reports each outcome.
async fn prepare(provider: &AssetProvider, ids: Vec<String>) -> Result<()> {
    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| provider.prepare(&AssetId::from(id)))
        .collect();

    let total = handles.len();
    let mut failed = 0;
    for handle in handles {
        let id = handle.id().clone();
        match handle.wait().await {
            Ok(asset) => println!("{id}: {}x{}", asset.width(), asset.height()),
            Err(err) => {
                failed += 1;
                println!("{id}: {err}");
            }
        }
    }

    if failed > 0 {
        bail!("failed to prepare {failed} of {total} assets");
    }
    Ok(())
}
