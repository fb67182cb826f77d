mod archive;
mod backoff;
mod catalog;
mod cdc;
mod commands;
mod config;
mod constants;
mod copyworker;
mod db;
mod dbclient;
mod error;
mod fetch;
mod filter;
mod indexworker;
mod partition;
mod process;
mod progress;
mod schedule;
mod workdir;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::commands::{apply_changes, copy_db, list, receive, snapshot, transform, worker};
use crate::config::types::{ConfigInput, DatabasesInput, DirectoriesInput};
use crate::config::ConfigBuilder;
use crate::process::signals::ShutdownSignal;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file layered under CLI flags.
    #[arg(long, default_value = "pgrelay.yaml", global = true)]
    config_file: String,

    /// Enable verbose output (info level).
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress all non-essential output (error level only).
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Enable debug output (debug level).
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect catalog state: databases, extensions, tables, indexes, and more.
    List {
        #[command(subcommand)]
        which: list::ListCommand,
        #[command(flatten)]
        args: list::ListArgs,
    },

    /// Run the full bulk migration: schema, data, indexes, sequences, verify.
    #[command(alias = "clone")]
    CopyDb(copy_db::CopyDbArgs),

    /// Export the source's snapshot id and hold the exporting transaction open.
    Snapshot(snapshot::SnapshotArgs),

    /// Stream logical-replication changes into CDC segment files.
    Receive(receive::ReceiveArgs),

    /// Turn finished CDC segments into replayable SQL.
    Transform(transform::TransformArgs),

    /// Replay transformed CDC segments against the target.
    ApplyChanges(apply_changes::ApplyChangesArgs),

    /// Internal re-exec entry point for a single copy or index unit.
    #[command(hide = true)]
    Worker {
        #[command(subcommand)]
        which: worker::WorkerCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    initialize_logging(&cli);

    let shutdown = ShutdownSignal::new();
    shutdown.install();

    match run_main(&cli, &shutdown).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::error!("{err:#}");
            std::process::exit(error::exit_code_for(&err));
        }
    }
}

fn initialize_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

async fn run_main(cli: &Cli, shutdown: &ShutdownSignal) -> Result<()> {
    match &cli.command {
        Commands::List { which, args } => {
            let config = resolve_config_offline(cli, &args.dir)?;
            info!("listing catalog state");
            list::run(&config, args, which).await
        }
        Commands::CopyDb(args) => {
            let config = resolve_config(
                cli,
                Some(&args.dir),
                Some(&args.databases),
                args.resume,
                args.force,
                args.not_consistent,
            )?;
            info!("running full bulk migration");
            copy_db::run(&config, args, shutdown).await
        }
        Commands::Snapshot(args) => {
            let config = resolve_config(cli, Some(&args.dir), Some(&args.databases), false, false, false)?;
            info!("exporting source snapshot");
            snapshot::run(&config, shutdown).await
        }
        Commands::Receive(args) => {
            let config = resolve_config(cli, Some(&args.dir), Some(&args.databases), false, false, false)?;
            info!("receiving logical replication changes");
            receive::run(&config, args, shutdown).await
        }
        Commands::Transform(args) => {
            let config = resolve_config_offline(cli, &args.dir)?;
            info!("transforming CDC segments");
            transform::run(&config, args, shutdown).await
        }
        Commands::ApplyChanges(args) => {
            let config = resolve_config(cli, Some(&args.dir), Some(&args.databases), false, false, false)?;
            info!("applying CDC segments to target");
            apply_changes::run(&config, args, shutdown).await
        }
        Commands::Worker { which } => {
            let (databases, dir) = match which {
                worker::WorkerCommand::Copy(a) => (&a.databases, &a.dir),
                worker::WorkerCommand::Index(a) => (&a.databases, &a.dir),
            };
            let config = resolve_config(cli, Some(dir), Some(databases), false, false, false)?;
            worker::run(&config, which).await
        }
    }
}

/// Layer the on-disk config file under whatever CLI flags this
/// subcommand carries, then resolve defaults (§3 "Setup").
fn resolve_config(
    cli: &Cli,
    dir: Option<&config::types::DirectoryArgs>,
    databases: Option<&config::types::DatabaseArgs>,
    resume: bool,
    force: bool,
    not_consistent: bool,
) -> Result<config::Config> {
    let file_config = config::load_config_file(&cli.config_file)?;

    let cli_config = ConfigInput {
        databases: databases.map(|d| DatabasesInput::from(d.clone())),
        directories: dir.map(|d| DirectoriesInput::from(d.clone())),
        partition: None,
        filter: None,
        replication: None,
    };

    ConfigBuilder::new()
        .with_file(file_config)
        .with_cli_args(cli_config)
        .resume(resume)
        .force(force)
        .not_consistent(not_consistent)
        .resolve()
}

/// Same as [`resolve_config`] but for subcommands (`list`, `transform`)
/// that only read the on-disk catalog and never need a source/target DSN.
fn resolve_config_offline(cli: &Cli, dir: &config::types::DirectoryArgs) -> Result<config::Config> {
    let file_config = config::load_config_file(&cli.config_file)?;
    let cli_config = ConfigInput {
        databases: None,
        directories: Some(DirectoriesInput::from(dir.clone())),
        partition: None,
        filter: None,
        replication: None,
    };

    ConfigBuilder::new()
        .with_file(file_config)
        .with_cli_args(cli_config)
        .allow_missing_databases()
        .resolve()
}
