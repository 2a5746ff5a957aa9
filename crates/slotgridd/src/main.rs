//! slotgridd: the slotgrid scheduler daemon.
//!
//! Single binary around the scheduler core:
//! - State store (redb) for history and fair-share records
//! - Scheduling cycles for several resource groups at once
//! - Fair-share factor calculation from usage records
//! - History queries
//!
//! # Usage
//!
//! ```text
//! slotgridd --config slotgrid.toml --db /var/lib/slotgrid/slotgrid.redb cycle default.json gpu.json
//! slotgridd fair-share --resource-group default usage.json
//! slotgridd history --scope session --result FAILURE --limit 20
//! ```

mod cycle;
mod fair_share;
mod history;

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use slotgrid_core::{SchedulingResult, SlotgridConfig};
use slotgrid_state::{HistoryScope, StateStore};

#[derive(Parser)]
#[command(name = "slotgridd", about = "slotgrid scheduler daemon")]
struct Cli {
    /// Path to slotgrid.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// State database file.
    #[arg(long, global = true, default_value = "/var/lib/slotgrid/slotgrid.redb")]
    db: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scheduling cycle per cycle file, concurrently.
    Cycle {
        /// JSON cycle files, one resource group each.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Recalculate fair-share factors from usage records.
    FairShare {
        /// JSON usage file.
        usage: PathBuf,

        #[arg(long, default_value = "default")]
        resource_group: String,

        /// Calculation date. Defaults to the file's `today`, then to the current date.
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Search the scheduling history.
    History {
        #[arg(long, default_value = "session")]
        scope: HistoryScope,

        #[arg(long)]
        scope_id: Option<String>,

        #[arg(long)]
        result: Option<SchedulingResult>,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Cycle { files } => {
            let store = open_store(&cli.db, &config)?;
            cycle::run_cycles(config, store, files).await
        }
        Command::FairShare {
            usage,
            resource_group,
            today,
        } => {
            let store = open_store(&cli.db, &config)?;
            fair_share::run_fair_share(&config, &store, &usage, &resource_group, today)
        }
        Command::History {
            scope,
            scope_id,
            result,
            offset,
            limit,
        } => {
            let store = open_store(&cli.db, &config)?;
            history::run_history(&store, scope, scope_id, result, offset, limit)
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,slotgridd=debug,slotgrid=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SlotgridConfig> {
    match path {
        Some(path) => {
            let config = SlotgridConfig::from_file(path)?;
            info!(path = ?path, groups = config.resource_groups.len(), "configuration loaded");
            Ok(config)
        }
        None => Ok(SlotgridConfig::default()),
    }
}

fn open_store(path: &Path, config: &SlotgridConfig) -> anyhow::Result<StateStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let store = StateStore::open(path)?.with_retry_policy(config.history.retry.clone());
    info!(path = ?path, "state store opened");
    Ok(store)
}
