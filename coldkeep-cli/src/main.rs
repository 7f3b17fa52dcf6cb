//! coldkeep command line.
//!
//! Streams site backups into a hot object store and a cold archive vault,
//! prunes the hot tier by retention policy, keeps its utilization under a
//! threshold and sizes a fleet before deployment.
//!
//! ```bash
//! coldkeep --bucket backups --vault archive backup --site web:/var/www
//! coldkeep --bucket backups list --site web
//! coldkeep --bucket backups prune --daily 7 --weekly 4 --monthly 12 --dry-run
//! coldkeep --bucket backups --vault archive monitor --threshold 80 --yes
//! coldkeep estimate --site web:/var/www --method sample --fleet-size 40
//! ```
//!
//! Every storage flag can also be set through its `COLDKEEP_*` variable.
//! Exit status is 0 on success, 1 when some items failed and 2 on error.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod commands;
mod config;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::commands::{
    BackupArgs, Context, DeleteArgs, EstimateArgs, ListArgs, MonitorArgs, PruneArgs, SelfTestArgs,
};
use crate::config::{ConfigLayer, Settings};

/// Two-tier backup and capacity management.
#[derive(Parser, Debug)]
#[command(name = "coldkeep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigLayer,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "COLDKEEP_LOG_LEVEL", default_value = "info")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture sites into the hot and cold tiers.
    Backup(BackupArgs),
    /// List hot-tier backups, newest first.
    List(ListArgs),
    /// Delete hot-tier backups by position, date window or prefix.
    Delete(DeleteArgs),
    /// Apply a retention policy to the hot tier.
    Prune(PruneArgs),
    /// Migrate the oldest backups to the cold tier while above a threshold.
    Monitor(MonitorArgs),
    /// Estimate backup size, fleet storage, growth and cost.
    Estimate(EstimateArgs),
    /// Verify the configured backends with a write-read-delete cycle.
    SelfTest(SelfTestArgs),
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Backup(_) => "backup",
            Self::List(_) => "list",
            Self::Delete(_) => "delete",
            Self::Prune(_) => "prune",
            Self::Monitor(_) => "monitor",
            Self::Estimate(_) => "estimate",
            Self::SelfTest(_) => "self-test",
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<usize> {
    // Configuration errors surface before any backend is touched.
    let settings = Settings::resolve(ConfigLayer::from_env()?.overlay(cli.config))?;
    info!(command = cli.command.name(), "Running command");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if let Command::Estimate(args) = &cli.command {
        return commands::estimate(&settings, args, &mut out).await;
    }

    let clients = settings.build_clients().await?;
    let ctx = Context { settings, clients };

    let stdin = std::io::stdin();
    let mut input = stdin.lock();

    match &cli.command {
        Command::Backup(args) => commands::backup(&ctx, args, &mut out).await,
        Command::List(args) => commands::list(&ctx, args, &mut out).await,
        Command::Delete(args) => commands::delete(&ctx, args, &mut out, &mut input).await,
        Command::Prune(args) => commands::prune(&ctx, args, &mut out, &mut input).await,
        Command::Monitor(args) => commands::monitor(&ctx, args, &mut out, &mut input).await,
        Command::Estimate(args) => commands::estimate(&ctx.settings, args, &mut out).await,
        Command::SelfTest(args) => commands::self_test_cmd(&ctx, args, &mut out).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install logger: {e}");
    }

    match run(cli).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            error!(failures, "Command finished with failures");
            ExitCode::from(1)
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
