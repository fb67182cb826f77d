//! `pgrelay snapshot`: export the source's current snapshot identifier,
//! persist it to `<dir>/snapshot`, and hold the exporting transaction
//! open until told to stop — `pg_export_snapshot`'s id is only valid
//! while the exporting session's transaction is still running, so this
//! is a long-lived command rather than a one-shot query.

use anyhow::{Context, Result};
use clap::Args;

use crate::catalog::{setup, CatalogKind};
use crate::config::types::{DatabaseArgs, DirectoryArgs};
use crate::config::Config;
use crate::dbclient::SourceClient;
use crate::process::signals::ShutdownSignal;

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    #[command(flatten)]
    pub databases: DatabaseArgs,

    #[command(flatten)]
    pub dir: DirectoryArgs,
}

pub async fn run(config: &Config, shutdown: &ShutdownSignal) -> Result<()> {
    let workdir = super::workdir_for(config);
    workdir.ensure_directories().context("preparing work directory")?;

    let source = SourceClient::connect(&config.databases.source_url).await?;
    let (txn, snapshot_id) =
        source.export_snapshot().await.context("exporting source snapshot")?;

    std::fs::write(workdir.snapshot_file(), &snapshot_id).context("writing snapshot file")?;

    let catalog = super::open_catalog(&workdir, CatalogKind::Source)?;
    if setup::exists(catalog.connection())? {
        setup::set_snapshot_id(catalog.connection(), &snapshot_id)?;
    }

    tracing::info!(snapshot_id, "exported source snapshot, holding transaction open");
    println!("{snapshot_id}");

    while !shutdown.is_stopping() {
        tokio::time::sleep(crate::constants::LIVENESS_SCAN_INTERVAL).await;
    }

    tracing::info!("shutdown requested, releasing snapshot");
    txn.rollback().await.ok();
    Ok(())
}
