//! `pgrelay transform`: component I as a long-running command. Watches
//! the CDC directory for `.json` segments the receiver has finished
//! writing and turns each into its `.sql` counterpart (§4.I). A segment
//! is "finished" once the receiver has moved on to a newer one — the
//! segment currently being appended is always left alone, since this
//! runs as a separate process with no other way to know it's done.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use clap::Args;

use crate::catalog::{sentinel as sentinel_store, CatalogKind};
use crate::cdc::transformer;
use crate::cdc::wire::Lsn;
use crate::config::types::DirectoryArgs;
use crate::config::Config;
use crate::constants;
use crate::process::signals::ShutdownSignal;
use crate::workdir::WorkDir;

#[derive(Args, Debug)]
pub struct TransformArgs {
    #[command(flatten)]
    pub dir: DirectoryArgs,
}

pub async fn run(config: &Config, _args: &TransformArgs, shutdown: &ShutdownSignal) -> Result<()> {
    let workdir = super::workdir_for(config);
    workdir.ensure_directories().context("preparing work directory")?;
    let catalog = super::open_catalog(&workdir, CatalogKind::Source)?;

    loop {
        let endpos = sentinel_store::get(catalog.connection())?
            .and_then(|s| Lsn::parse(&s.endpos))
            .filter(|lsn| *lsn != Lsn::ZERO);

        let transformed = transform_closed_segments(&workdir, endpos)?;
        if transformed == 0 {
            if shutdown.is_stopping() {
                break;
            }
            tokio::time::sleep(constants::LIVENESS_SCAN_INTERVAL).await;
        } else if shutdown.is_stopping() {
            break;
        }
    }
    Ok(())
}

/// Transform every `.json` segment except the lexically-last one (which
/// sorts last because segment names embed TLI/log id/segment id as
/// zero-padded hex, so "last" means "newest"), skipping any that
/// already have a `.sql` counterpart.
fn transform_closed_segments(workdir: &WorkDir, endpos: Option<Lsn>) -> Result<usize> {
    let mut segments = BTreeSet::new();
    for entry in std::fs::read_dir(workdir.cdc_dir()).context("reading CDC directory")? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".json") {
            segments.insert(stem.to_string());
        }
    }
    let Some(newest) = segments.iter().next_back().cloned() else {
        return Ok(0);
    };

    let mut count = 0;
    for segment in segments.into_iter() {
        if segment == newest {
            continue;
        }
        if workdir.cdc_segment_sql(&segment).exists() {
            continue;
        }
        transformer::transform_segment_file(workdir, &segment, endpos)
            .with_context(|| format!("transforming CDC segment {segment}"))?;
        tracing::info!(segment, "transformed CDC segment");
        count += 1;
    }
    Ok(count)
}
