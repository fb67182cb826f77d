//! Hidden `pgrelay worker {copy|index}` entry points. `copy-db` re-execs
//! itself (`std::env::current_exe()`) into one of these per claimed unit
//! rather than spawning an in-process task, so a worker crash can never
//! take the orchestrating process down with it (§0, §5: "each worker
//! opens its own database connections").

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::catalog::{table, CatalogKind};
use crate::config::types::{DatabaseArgs, DirectoryArgs};
use crate::config::Config;
use crate::dbclient::{SourceClient, TargetClient};
use crate::{copyworker, indexworker, schedule};

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Copy one table (or partition) unit.
    Copy(CopyWorkerArgs),
    /// Build one index (and attach its constraint, if any) unit.
    Index(IndexWorkerArgs),
}

#[derive(Args, Debug)]
pub struct CopyWorkerArgs {
    #[command(flatten)]
    pub databases: DatabaseArgs,
    #[command(flatten)]
    pub dir: DirectoryArgs,
    #[arg(long)]
    pub table_oid: i64,
    #[arg(long)]
    pub partnum: i32,
    #[arg(long)]
    pub snapshot_id: String,
}

#[derive(Args, Debug)]
pub struct IndexWorkerArgs {
    #[command(flatten)]
    pub databases: DatabaseArgs,
    #[command(flatten)]
    pub dir: DirectoryArgs,
    #[arg(long)]
    pub table_oid: i64,
    #[arg(long)]
    pub index_oid: i64,
}

pub async fn run(config: &Config, which: &WorkerCommand) -> Result<()> {
    match which {
        WorkerCommand::Copy(args) => run_copy(config, args).await,
        WorkerCommand::Index(args) => run_index(config, args).await,
    }
}

async fn run_copy(config: &Config, args: &CopyWorkerArgs) -> Result<()> {
    let workdir = super::workdir_for(config);
    let catalog = super::open_catalog(&workdir, CatalogKind::Source)?;
    let t = table::find_by_oid(catalog.connection(), args.table_oid)?
        .with_context(|| format!("table {} not found in catalog", args.table_oid))?;

    let unit = schedule::Unit {
        table_oid: args.table_oid,
        partnum: Some(args.partnum),
        index_oid: None,
        title: format!("copy {} part {}", t.qname, args.partnum),
        size_bytes: t.bytes,
    };

    let source = SourceClient::connect(&config.databases.source_url).await?;
    let target = TargetClient::connect(&config.databases.target_url).await?;
    let pid = std::process::id() as i64;
    let now_epoch = now_epoch();

    let bytes = copyworker::run_unit(
        catalog.connection(),
        &source,
        &target,
        &t,
        &unit,
        pid,
        &args.snapshot_id,
        now_epoch,
    )
    .await?;

    tracing::info!(table = %t.qname, partnum = args.partnum, bytes, "copy unit complete");
    Ok(())
}

async fn run_index(config: &Config, args: &IndexWorkerArgs) -> Result<()> {
    let workdir = super::workdir_for(config);
    let catalog = super::open_catalog(&workdir, CatalogKind::Source)?;
    let target = TargetClient::connect(&config.databases.target_url).await?;
    let pid = std::process::id() as i64;
    let now_epoch = now_epoch();

    indexworker::run_unit(
        catalog.connection(),
        &target,
        args.index_oid,
        args.table_oid,
        pid,
        now_epoch,
    )
    .await?;

    tracing::info!(index_oid = args.index_oid, "index unit complete");
    Ok(())
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
