//! The archive-manipulation boundary (§1 "archive-manipulation tools ...
//! invoked as opaque sub-processes"): thin wrappers around `pg_dump`/
//! `pg_restore` for the pre-data/post-data sections that this crate does
//! not reimplement. The core only consumes their exit status and the
//! `.done` markers recorded alongside them (§6).

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;

use crate::error::EngineError;
use crate::workdir::WorkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    PreData,
    PostData,
}

impl Section {
    fn pg_dump_flag(self) -> &'static str {
        match self {
            Section::PreData => "pre-data",
            Section::PostData => "post-data",
        }
    }

    fn done_marker(self, phase: Phase) -> &'static str {
        use crate::constants::*;
        match (self, phase) {
            (Section::PreData, Phase::Dump) => DONE_PRE_DATA,
            (Section::PostData, Phase::Dump) => DONE_POST_DATA,
            (Section::PreData, Phase::Restore) => DONE_PRE_DATA_RESTORE,
            (Section::PostData, Phase::Restore) => DONE_POST_DATA_RESTORE,
        }
    }

    fn archive_file_name(self) -> &'static str {
        match self {
            Section::PreData => "pre-data.dump",
            Section::PostData => "post-data.dump",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Dump,
    Restore,
}

/// Run `pg_dump --section=<section> -Fc` against `source_dsn`, writing
/// the archive under `<dir>/schema/`, skipping entirely if the section's
/// `.done` marker already exists (`--resume`).
pub async fn dump_section(workdir: &WorkDir, source_dsn: &str, section: Section) -> Result<()> {
    if workdir.is_done(section.done_marker(Phase::Dump)) {
        tracing::debug!(section = section.pg_dump_flag(), "dump section already done, skipping");
        return Ok(());
    }
    let archive_path = workdir.root().join("schema").join(section.archive_file_name());
    run_subprocess(
        "pg_dump",
        &[
            "-d",
            source_dsn,
            "--section",
            section.pg_dump_flag(),
            "-Fc",
            "-f",
            archive_path.to_str().context("archive path is not valid UTF-8")?,
        ],
        EngineError::Source,
    )
    .await?;
    workdir
        .mark_done(section.done_marker(Phase::Dump))
        .context("marking dump section done")?;
    Ok(())
}

/// Run `pg_restore --section=<section>` against `target_dsn`, using the
/// archive `dump_section` produced, skipping if already done.
pub async fn restore_section(workdir: &WorkDir, target_dsn: &str, section: Section) -> Result<()> {
    if workdir.is_done(section.done_marker(Phase::Restore)) {
        tracing::debug!(section = section.pg_dump_flag(), "restore section already done, skipping");
        return Ok(());
    }
    let archive_path = workdir.root().join("schema").join(section.archive_file_name());
    run_subprocess(
        "pg_restore",
        &[
            "-d",
            target_dsn,
            "--section",
            section.pg_dump_flag(),
            "--no-owner",
            "--single-transaction",
            archive_path.to_str().context("archive path is not valid UTF-8")?,
        ],
        EngineError::Target,
    )
    .await?;
    workdir
        .mark_done(section.done_marker(Phase::Restore))
        .context("marking restore section done")?;
    Ok(())
}

async fn run_subprocess(
    program: &str,
    args: &[&str],
    classify: impl FnOnce(String) -> EngineError,
) -> Result<()> {
    tracing::info!(program, args = ?args, "invoking archive tool");
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("spawning {program}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(classify(format!("{program} exited with {}: {stderr}", output.status)).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_map_to_distinct_done_markers() {
        assert_ne!(
            Section::PreData.done_marker(Phase::Dump),
            Section::PostData.done_marker(Phase::Dump)
        );
        assert_ne!(
            Section::PreData.done_marker(Phase::Dump),
            Section::PreData.done_marker(Phase::Restore)
        );
    }

    #[test]
    fn pg_dump_flags_match_postgres_section_names() {
        assert_eq!(Section::PreData.pg_dump_flag(), "pre-data");
        assert_eq!(Section::PostData.pg_dump_flag(), "post-data");
    }
}
