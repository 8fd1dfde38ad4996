//! webindex command-line front end.
//!
//! Browses the configured mounts and performs downloads, writing bodies to a
//! file or to stdout.
//!
//! Usage:
//!   # List mounts from ./config.ron (or $WEBINDEX_CONF)
//!   webindex mounts
//!
//!   # Ad-hoc mount, no config file needed
//!   webindex --mount 'books|~/books' ls books
//!
//!   # Stream a directory as ZIP into a pipe
//!   webindex zip books/series | unzip -l /dev/stdin

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use webindex_kernel::config::{self, Config};
use webindex_kernel::vfs::parse_spec_line;
use webindex_kernel::{DownloadService, MimeTable, PathResolver};

/// Browse and download from read-only virtual mounts.
#[derive(Parser, Debug)]
#[command(name = "webindex")]
#[command(about = "Browse and download from read-only virtual mounts")]
struct Args {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: $WEBINDEX_CONF, then ./config.ron)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Extra mount as `name|root[|accel]`; repeatable
    #[arg(long = "mount", value_name = "SPEC", global = true)]
    mounts: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured mounts
    Mounts,
    /// List a directory (the virtual root by default)
    Ls {
        #[arg(default_value = "")]
        path: String,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show metadata and breadcrumbs for a path
    Stat {
        path: String,
        #[arg(long)]
        json: bool,
    },
    /// Download a single file
    Get {
        path: String,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download a directory as a ZIP archive
    Zip {
        path: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout may carry download bytes
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let path = config::config_path(explicit.as_deref());
    if path.exists() {
        return Config::load(&path).with_context(|| format!("loading {}", path.display()));
    }
    if explicit.is_some() {
        anyhow::bail!("config file {} does not exist", path.display());
    }
    tracing::info!(path = %path.display(), "No config file, using defaults");
    Ok(Config::default())
}

fn build_service(args: &Args) -> Result<DownloadService> {
    let config = load_config(args.config.clone())?;

    let extra = args
        .mounts
        .iter()
        .map(|spec| parse_spec_line(spec).with_context(|| format!("--mount {spec:?}")))
        .collect::<Result<Vec<_>>>()?;
    let table = config.mount_table(extra).context("building mount table")?;
    if table.is_empty() {
        anyhow::bail!("no mounts configured; pass --mount or a config file");
    }
    tracing::debug!(mounts = table.len(), "Mount table ready");

    let resolver = PathResolver::new(Arc::new(table), Arc::new(MimeTable::with_system_defaults()));
    Ok(DownloadService::new(
        resolver,
        config.archive.options(),
        config.archive.walk_timeout(),
    ))
}

async fn run(args: Args) -> Result<()> {
    let service = build_service(&args)?;
    match args.command {
        Command::Mounts => commands::mounts(&service).await,
        Command::Ls { path, json } => commands::ls(&service, &path, json).await,
        Command::Stat { path, json } => commands::stat(&service, &path, json).await,
        Command::Get { path, output } => commands::get(&service, &path, output).await,
        Command::Zip { path, output } => commands::zip(&service, &path, output).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("webindex: {e:#}");
            ExitCode::FAILURE
        }
    }
}
