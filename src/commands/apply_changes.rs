//! `pgrelay apply-changes`: component J as a long-running command.
//! Replays transformed `.sql` segments against the target over a single
//! persistent connection, gated by the sentinel's `apply` flag (§4.J).

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use clap::Args;
use sqlx::Connection;

use crate::catalog::{sentinel as sentinel_store, CatalogKind};
use crate::cdc::applier::{self, Applier, ApplierState};
use crate::cdc::sentinel;
use crate::cdc::wire::Lsn;
use crate::config::types::{DatabaseArgs, DirectoryArgs};
use crate::config::Config;
use crate::constants;
use crate::process::signals::ShutdownSignal;
use crate::workdir::WorkDir;

#[derive(Args, Debug)]
pub struct ApplyChangesArgs {
    #[command(flatten)]
    pub databases: DatabaseArgs,
    #[command(flatten)]
    pub dir: DirectoryArgs,

    /// Stop once the replay stream reaches this LSN.
    #[arg(long)]
    pub endpos: Option<String>,
}

pub async fn run(config: &Config, args: &ApplyChangesArgs, shutdown: &ShutdownSignal) -> Result<()> {
    let workdir = super::workdir_for(config);
    workdir.ensure_directories().context("preparing work directory")?;
    let catalog = super::open_catalog(&workdir, CatalogKind::Source)?;

    let sentinel_row = sentinel_store::get(catalog.connection())?
        .context("sentinel row not initialized — run `receive` first")?;
    let sentinel_endpos = Lsn::parse(&sentinel_row.endpos).unwrap_or(Lsn::ZERO);
    let cli_endpos = args.endpos.as_deref().and_then(Lsn::parse);
    let endpos = sentinel::resolve_endpos(cli_endpos, sentinel_endpos);
    if endpos != sentinel_endpos {
        sentinel::set_endpos(catalog.connection(), endpos)?;
    }

    let mut conn = sqlx::PgConnection::connect(&config.databases.target_url)
        .await
        .context("connecting to target for apply-changes")?;

    let mut applier = Applier::new(endpos);
    if let Some(replayed) = Lsn::parse(&sentinel_row.replay_lsn) {
        applier.previous_lsn = replayed;
    }
    applier
        .wait_for_apply(catalog.connection(), constants::LIVENESS_SCAN_INTERVAL, || {
            shutdown.is_stopping()
        })
        .await
        .context("waiting for sentinel apply signal")?;

    let marker = applied_marker_path(&workdir);
    let mut last_applied = std::fs::read_to_string(&marker).ok();

    loop {
        if applier.state == ApplierState::ReachedEnd {
            tracing::info!("applier reached endpos, stopping");
            break;
        }
        if shutdown.is_stopping() {
            tracing::info!("shutdown requested, stopping apply-changes loop");
            break;
        }

        let pending = pending_segments(&workdir, last_applied.as_deref())?;
        if pending.is_empty() {
            tokio::time::sleep(constants::LIVENESS_SCAN_INTERVAL).await;
            continue;
        }

        for segment in pending {
            apply_segment(&workdir, &mut conn, &mut applier, &segment).await?;
            std::fs::write(&marker, &segment).context("persisting apply progress")?;
            last_applied = Some(segment);

            let write_lsn = applier.previous_lsn;
            if let Some(replay_lsn) = applier.finish_file(&mut conn).await? {
                sentinel::publish_progress(catalog.connection(), write_lsn, replay_lsn, replay_lsn)?;
            }

            if applier.state == ApplierState::ReachedEnd {
                break;
            }
        }
    }

    Ok(())
}

async fn apply_segment(
    workdir: &WorkDir,
    conn: &mut sqlx::PgConnection,
    applier: &mut Applier,
    segment: &str,
) -> Result<()> {
    let path = workdir.cdc_segment_sql(segment);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("reading transformed segment {}", path.display()))?;
    let total_commits = contents.lines().filter(|line| line.trim() == "COMMIT;").count() as u32;
    applier.begin_file(total_commits);
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(action) = applier::parse_line(line) else {
            continue;
        };
        applier.apply(conn, action).await?;
        if applier.state == ApplierState::ReachedEnd {
            break;
        }
    }
    tracing::info!(segment, "applied CDC segment");
    Ok(())
}

fn pending_segments(workdir: &WorkDir, last_applied: Option<&str>) -> Result<Vec<String>> {
    let mut segments = BTreeSet::new();
    for entry in std::fs::read_dir(workdir.cdc_dir()).context("reading CDC directory")? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".sql") {
            segments.insert(stem.to_string());
        }
    }
    Ok(segments
        .into_iter()
        .filter(|s| last_applied.map(|last| s.as_str() > last).unwrap_or(true))
        .collect())
}

fn applied_marker_path(workdir: &WorkDir) -> std::path::PathBuf {
    workdir.cdc_dir().join("applied_segment")
}
