//! `pgrelay receive`: component H as a long-running command. Connects to
//! the source's logical replication slot, drains messages into
//! `.json` segment files under the CDC directory, and persists its own
//! progress (LSN, timeline) to disk so a restart resumes rather than
//! re-streaming from the slot's confirmed position.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use crate::catalog::{sentinel as sentinel_store, CatalogKind};
use crate::cdc::receiver::{self, Receiver};
use crate::cdc::sentinel;
use crate::cdc::wire::Lsn;
use crate::config::types::{DatabaseArgs, DirectoryArgs};
use crate::config::Config;
use crate::constants;
use crate::process::signals::ShutdownSignal;
use crate::workdir::WorkDir;

const DEFAULT_WAL_SEGMENT_BYTES: u64 = 16 * 1024 * 1024;
const PROGRESS_PUBLISH_INTERVAL: Duration = constants::LIVENESS_SCAN_INTERVAL;

#[derive(Args, Debug)]
pub struct ReceiveArgs {
    #[command(flatten)]
    pub databases: DatabaseArgs,
    #[command(flatten)]
    pub dir: DirectoryArgs,

    /// Stop once the stream reaches this LSN instead of running forever.
    #[arg(long)]
    pub endpos: Option<String>,
}

pub async fn run(config: &Config, args: &ReceiveArgs, shutdown: &ShutdownSignal) -> Result<()> {
    let workdir = super::workdir_for(config);
    workdir.ensure_directories().context("preparing work directory")?;
    let catalog = super::open_catalog(&workdir, CatalogKind::Source)?;

    let slot_name = &config.replication.slot_name;
    let tli = read_tli(&workdir);
    let wal_segment_bytes = read_wal_segment_bytes(&workdir);

    let start_lsn = resolve_start_lsn(&workdir, catalog.connection())?;
    sentinel::initialize(catalog.connection(), start_lsn)?;
    if let Some(cli_endpos) = args.endpos.as_deref().and_then(Lsn::parse) {
        sentinel::set_endpos(catalog.connection(), cli_endpos)?;
    }

    std::fs::write(workdir.cdc_slot_file(), slot_name).context("persisting slot name")?;
    std::fs::write(workdir.cdc_tli_file(), tli.to_string()).context("persisting timeline")?;
    std::fs::write(workdir.cdc_wal_segment_size_file(), wal_segment_bytes.to_string())
        .context("persisting WAL segment size")?;

    let (_client, mut stream) =
        receiver::connect_and_start(&config.databases.source_url, slot_name, start_lsn)
            .await
            .context("starting logical replication")?;

    let mut recv = Receiver::new(workdir.clone(), tli, wal_segment_bytes);
    let mut last_published = std::time::Instant::now();

    loop {
        if shutdown.is_stopping() {
            tracing::info!("shutdown requested, stopping receive loop");
            break;
        }
        let sentinel_row = sentinel_store::get(catalog.connection())?
            .context("sentinel row missing after initialization")?;
        if let Some(endpos) = Lsn::parse(&sentinel_row.endpos) {
            if endpos != Lsn::ZERO && recv.written_lsn() >= endpos {
                tracing::info!(endpos = %endpos.format(), "reached configured endpos, stopping");
                break;
            }
        }

        let still_open = receiver::drain_one(&mut stream, catalog.connection(), &mut recv).await?;
        if !still_open {
            tracing::warn!("replication stream closed by source");
            break;
        }

        if last_published.elapsed() >= PROGRESS_PUBLISH_INTERVAL {
            let lsn = recv.written_lsn();
            sentinel::publish_progress(catalog.connection(), lsn, lsn, Lsn::ZERO)?;
            std::fs::write(workdir.cdc_lsn_file(), lsn.format()).context("persisting LSN")?;
            last_published = std::time::Instant::now();
        }
    }

    recv.flush_and_close().context("closing final CDC segment")?;
    let lsn = recv.written_lsn();
    sentinel::publish_progress(catalog.connection(), lsn, lsn, Lsn::ZERO)?;
    std::fs::write(workdir.cdc_lsn_file(), lsn.format()).context("persisting final LSN")?;

    Ok(())
}

fn resolve_start_lsn(workdir: &WorkDir, catalog: &rusqlite::Connection) -> Result<Lsn> {
    if let Ok(saved) = std::fs::read_to_string(workdir.cdc_lsn_file()) {
        if let Some(lsn) = Lsn::parse(saved.trim()) {
            tracing::info!(lsn = %lsn.format(), "resuming receive from persisted LSN");
            return Ok(lsn);
        }
    }
    if let Some(row) = sentinel_store::get(catalog)? {
        if let Some(lsn) = Lsn::parse(&row.startpos) {
            return Ok(lsn);
        }
    }
    Ok(Lsn::ZERO)
}

fn read_tli(workdir: &WorkDir) -> u32 {
    std::fs::read_to_string(workdir.cdc_tli_file())
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(1)
}

fn read_wal_segment_bytes(workdir: &WorkDir) -> u64 {
    std::fs::read_to_string(workdir.cdc_wal_segment_size_file())
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_WAL_SEGMENT_BYTES)
}
