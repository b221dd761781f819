//! keepsake-worker: archive media worker
//!
//! Usage:
//!   keepsake-worker [--config keepsake.toml] [--archive-dir DIR]
//!
//! Spawned by the host with piped stdin/stdout. Stdout carries only protocol
//! responses; all logging goes to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use keepsake_core::config::KeepsakeConfig;
use keepsake_worker::WorkerState;
use tokio::io::BufReader;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "keepsake-worker", version, about = "Keepsake archive media worker")]
struct Cli {
    /// Path to keepsake.toml configuration file
    #[arg(long, short = 'c', env = "KEEPSAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Archive directory (overrides [archive].dir)
    #[arg(long, env = "KEEPSAKE_ARCHIVE_DIR")]
    archive_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to [log].level
    #[arg(long, env = "KEEPSAKE_LOG")]
    log: Option<String>,

    /// Log format (json, text); defaults to [log].format
    #[arg(long, env = "KEEPSAKE_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // logging is configured from the file, so loading it reports to a
    // plain stderr subscriber
    let mut config = match &cli.config {
        Some(path) => {
            let bootstrap = tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::with_default(bootstrap, || KeepsakeConfig::load(path))?
        }
        None => KeepsakeConfig::default(),
    };
    if let Some(dir) = cli.archive_dir {
        config.archive.dir = dir;
    }

    let level = cli.log.unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        archive = %config.archive.root().display(),
        config = ?cli.config,
        "keepsake-worker starting"
    );

    let state = Arc::new(WorkerState::from_config(&config));
    if let Err(e) = keepsake_store::check_layout(&state.store) {
        warn!("{e}");
    }
    state
        .start_session()
        .context("preparing archive directories")?;

    keepsake_worker::serve(
        state,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    info!("keepsake-worker exiting");
    Ok(())
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
