//! `pgrelay copy-db` (and the `clone` alias): the full bulk-migration
//! orchestration — pre-data schema, table data, indexes/constraints,
//! sequences, post-data schema, and an optional checksum verification
//! pass. Ties together components A–G end to end; the CDC follow-up
//! (H/I/J) is a separate set of commands (`receive`/`transform`/
//! `apply-changes`) so a plain bulk copy never pays for replication
//! machinery it doesn't use.

use anyhow::{Context, Result};
use clap::Args;
use sqlx::Row;

use crate::archive::{self, Section};
use crate::catalog::{
    self, checksum, filter_entry, partition as partition_catalog, sequence, setup, table,
    CatalogKind, CatalogStore,
};
use crate::config::types::{DatabaseArgs, DirectoryArgs};
use crate::config::Config;
use crate::constants;
use crate::dbclient::{SourceClient, TargetClient};
use crate::error::EngineError;
use crate::fetch;
use crate::filter;
use crate::partition::{self as partitioner, IntegerKeyRange, PartitionConfig};
use crate::process::signals::ShutdownSignal;
use crate::progress::SectionReporter;
use crate::schedule::{self, Unit};
use crate::workdir::WorkDir;

#[derive(Args, Debug)]
pub struct CopyDbArgs {
    #[command(flatten)]
    pub databases: DatabaseArgs,
    #[command(flatten)]
    pub dir: DirectoryArgs,

    /// Re-check row counts/checksums per table after copying.
    #[arg(long)]
    pub verify: bool,

    /// Continue a previous run instead of requiring a clean `--dir`.
    #[arg(long)]
    pub resume: bool,

    /// Overwrite a persisted setup that disagrees with the current flags.
    #[arg(long)]
    pub force: bool,

    /// Skip the shared-snapshot consistency guarantee.
    #[arg(long)]
    pub not_consistent: bool,

    /// Reuse the snapshot id a separately-running `pgrelay snapshot`
    /// process already exported, instead of exporting a fresh one.
    #[arg(long)]
    pub snapshot: bool,

    /// Drop and recreate the catalog cache files before starting.
    #[arg(long)]
    pub drop_cache: bool,

    /// Concurrent copy-worker subprocesses.
    #[arg(long, default_value_t = 4)]
    pub table_jobs: usize,

    /// Concurrent index-worker subprocesses.
    #[arg(long, default_value_t = 4)]
    pub index_jobs: usize,
}

pub async fn run(config: &Config, args: &CopyDbArgs, shutdown: &ShutdownSignal) -> Result<()> {
    let workdir = super::workdir_for(config);
    workdir.ensure_directories().context("preparing work directory")?;

    let mut source_catalog = super::open_catalog(&workdir, CatalogKind::Source)?;
    let filter_catalog = super::open_catalog(&workdir, CatalogKind::Filter)?;
    if args.drop_cache {
        source_catalog.drop_schema(CatalogKind::Source)?;
        source_catalog.create_schema(CatalogKind::Source)?;
        filter_catalog.drop_schema(CatalogKind::Filter)?;
        filter_catalog.create_schema(CatalogKind::Filter)?;
    }

    reconcile_setup(source_catalog.connection(), config, args)?;

    let source = SourceClient::connect(&config.databases.source_url).await?;
    let target = TargetClient::connect(&config.databases.target_url).await?;

    fetch_schema(&source, &mut source_catalog).await?;
    filter::build(source_catalog.connection(), filter_catalog.connection(), &config.filter)
        .context("running filter engine")?;
    plan_partitions(&source, &mut source_catalog, &config.partition).await?;

    let mut reporter = SectionReporter::new(6, false);
    let started = std::time::Instant::now();

    run_reported(&mut reporter, "pre-data schema", || async {
        archive::dump_section(&workdir, &config.databases.source_url, Section::PreData).await?;
        archive::restore_section(&workdir, &config.databases.target_url, Section::PreData).await
    })
    .await?;

    let (snapshot_id, held_txn) = resolve_snapshot(&workdir, &source, args).await?;
    setup::set_snapshot_id(source_catalog.connection(), &snapshot_id)?;

    run_reported(&mut reporter, "table data", || async {
        run_copy_units(
            &workdir,
            config,
            &source_catalog,
            filter_catalog.connection(),
            &snapshot_id,
            args.table_jobs,
            shutdown,
        )
        .await?;
        workdir.mark_done(constants::DONE_TABLES)?;
        Ok(())
    })
    .await?;

    run_reported(&mut reporter, "indexes and constraints", || async {
        run_index_units(&workdir, config, &source_catalog, args.index_jobs, shutdown).await?;
        workdir.mark_done(constants::DONE_INDEXES)?;
        Ok(())
    })
    .await?;

    run_reported(&mut reporter, "sequences", || async {
        apply_sequences(source_catalog.connection(), filter_catalog.connection(), &target).await?;
        workdir.mark_done(constants::DONE_SEQUENCES)?;
        Ok(())
    })
    .await?;

    run_reported(&mut reporter, "blobs", || async {
        copy_blobs(&workdir, &source, &target).await?;
        workdir.mark_done(constants::DONE_BLOBS)?;
        Ok(())
    })
    .await?;

    run_reported(&mut reporter, "post-data schema", || async {
        archive::dump_section(&workdir, &config.databases.source_url, Section::PostData).await?;
        archive::restore_section(&workdir, &config.databases.target_url, Section::PostData).await
    })
    .await?;

    if args.verify {
        verify_tables(source_catalog.connection(), filter_catalog.connection(), &source, &target)
            .await?;
    }

    if let Some(txn) = held_txn {
        txn.rollback().await.ok();
    }

    reporter.migration_summary(started.elapsed(), 6);
    Ok(())
}

/// Drive one `SectionReporter` section around a fallible async block,
/// reporting start/complete/fail the way the teacher's migration runner
/// reports its own sections.
async fn run_reported<F, Fut>(reporter: &mut SectionReporter, name: &str, body: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    reporter.start_section(name, None);
    let started = std::time::Instant::now();
    match body().await {
        Ok(()) => {
            reporter.complete_section(name, started.elapsed(), None);
            Ok(())
        }
        Err(err) => {
            reporter.fail_section(name, &err);
            Err(err)
        }
    }
}

/// Record (or, with `--force`, overwrite) the setup singleton so a
/// re-exec'd worker can recover its connection strings and filter
/// specification without re-parsing CLI flags.
fn reconcile_setup(catalog: &rusqlite::Connection, config: &Config, args: &CopyDbArgs) -> Result<()> {
    if let Some(existing) = setup::get(catalog)? {
        let changed = existing.source_dsn != config.databases.source_url
            || existing.target_dsn != config.databases.target_url;
        if changed && !args.force {
            anyhow::bail!(EngineError::Configuration(
                "persisted setup disagrees with --source/--target; pass --force to overwrite".into()
            ));
        }
    }
    setup::insert(
        catalog,
        &setup::Setup {
            source_dsn: config.databases.source_url.clone(),
            target_dsn: config.databases.target_url.clone(),
            snapshot_id: None,
            split_threshold_bytes: config.partition.split_threshold_bytes,
            split_max_parts: config.partition.split_max_parts,
            filter_spec_json: serde_json::to_string(&config.filter)
                .context("serializing filter specification")?,
            plugin_name: Some(config.replication.plugin.clone()),
            slot_name: Some(config.replication.slot_name.clone()),
        },
    )
    .context("recording setup")
}

async fn fetch_schema(source: &SourceClient, catalog: &mut CatalogStore) -> Result<()> {
    if catalog::section::is_fetched(catalog.connection(), "schema")? {
        tracing::debug!("schema already fetched, skipping");
        return Ok(());
    }
    let now = now_epoch();
    catalog::section::start(catalog.connection(), "schema", now)?;
    fetch::disable_system_index_scans(source).await?;
    fetch::fetch_tables(source, catalog.connection()).await?;
    for t in table::list_all(catalog.connection())? {
        fetch::fetch_attributes(source, catalog.connection(), t.oid).await?;
        fetch::fetch_indexes(source, catalog.connection(), t.oid).await?;
    }
    fetch::fetch_sequences(source, catalog.connection()).await?;
    fetch::fetch_depend(source, catalog.connection()).await?;
    catalog::section::mark_done(catalog.connection(), "schema", now_epoch())?;
    Ok(())
}

async fn plan_partitions(
    source: &SourceClient,
    catalog: &mut CatalogStore,
    config: &crate::config::types::Partition,
) -> Result<()> {
    let cfg = PartitionConfig {
        split_threshold_bytes: config.split_threshold_bytes,
        split_max_parts: config.split_max_parts,
    };
    for t in table::list_all(catalog.connection())? {
        if t.bytes < cfg.split_threshold_bytes {
            continue;
        }
        if !partition_catalog::list_for_table(catalog.connection(), t.oid)?.is_empty() {
            continue;
        }
        let int_key_range = match partitioner::choose_integer_key(catalog.connection(), t.oid)? {
            Some(col) => fetch_int_range(source, &t.qname, &col).await?,
            None => None,
        };
        let parts = partitioner::plan_and_store(catalog, &t, int_key_range, &cfg)?;
        tracing::info!(table = %t.qname, parts = parts.len(), "planned table partitions");
    }
    Ok(())
}

async fn fetch_int_range(
    source: &SourceClient,
    qname: &str,
    column: &str,
) -> Result<Option<IntegerKeyRange>> {
    let rows = source
        .fetch_rows(&format!("SELECT min({column})::bigint, max({column})::bigint FROM {qname}"))
        .await?;
    let Some(row) = rows.into_iter().next() else {
        return Ok(None);
    };
    let min: Option<i64> = row.try_get::<Option<i64>, _>(0).unwrap_or(None);
    let max: Option<i64> = row.try_get::<Option<i64>, _>(1).unwrap_or(None);
    Ok(match (min, max) {
        (Some(min), Some(max)) => Some(IntegerKeyRange { min, max }),
        _ => None,
    })
}

/// Resolve the snapshot a run's copy workers will pin to. With
/// `--snapshot`, reads the id a separately-running `pgrelay snapshot`
/// process already exported and is holding open; otherwise exports one
/// itself and keeps the returned transaction alive (rolling it back
/// only once the whole copy has finished) so the id stays valid for the
/// run's own duration.
async fn resolve_snapshot<'a>(
    workdir: &WorkDir,
    source: &'a SourceClient,
    args: &CopyDbArgs,
) -> Result<(String, Option<sqlx::Transaction<'a, sqlx::Postgres>>)> {
    if args.not_consistent {
        return Ok(("00000000-00000000-0".to_string(), None));
    }
    if args.snapshot {
        let snapshot_id = std::fs::read_to_string(workdir.snapshot_file())
            .context("reading externally-exported snapshot file (pass --snapshot only after `pgrelay snapshot` is running)")?
            .trim()
            .to_string();
        return Ok((snapshot_id, None));
    }
    let (txn, snapshot_id) = source.export_snapshot().await.context("exporting snapshot")?;
    std::fs::write(workdir.snapshot_file(), &snapshot_id).context("writing snapshot file")?;
    Ok((snapshot_id, Some(txn)))
}

async fn run_copy_units(
    workdir: &WorkDir,
    config: &Config,
    catalog: &CatalogStore,
    filter_conn: &rusqlite::Connection,
    snapshot_id: &str,
    jobs: usize,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    loop {
        schedule::reap_stale_claims(catalog.connection())?;
        let candidates: Vec<Unit> = schedule::pending_copy_units(catalog.connection())?
            .into_iter()
            .filter(|u| !filter_entry::contains_oid(filter_conn, u.table_oid).unwrap_or(false))
            .collect();
        if candidates.is_empty() {
            break;
        }
        if shutdown.is_stopping() {
            tracing::info!("shutdown requested, leaving remaining copy units for a future run");
            break;
        }

        let batch: Vec<Unit> = candidates.into_iter().take(jobs).collect();
        run_worker_batch(workdir, config, batch, |unit| {
            vec![
                "worker".into(),
                "copy".into(),
                "--table-oid".into(),
                unit.table_oid.to_string(),
                "--partnum".into(),
                unit.partnum.unwrap_or(0).to_string(),
                "--snapshot-id".into(),
                snapshot_id.to_string(),
            ]
        })
        .await?;
    }
    Ok(())
}

async fn run_index_units(
    workdir: &WorkDir,
    config: &Config,
    catalog: &CatalogStore,
    jobs: usize,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    loop {
        schedule::reap_stale_claims(catalog.connection())?;
        let candidates = schedule::pending_index_units(catalog.connection())?;
        if candidates.is_empty() {
            break;
        }
        if shutdown.is_stopping() {
            tracing::info!("shutdown requested, leaving remaining index units for a future run");
            break;
        }

        let batch: Vec<Unit> = candidates.into_iter().take(jobs).collect();
        run_worker_batch(workdir, config, batch, |unit| {
            vec![
                "worker".into(),
                "index".into(),
                "--table-oid".into(),
                unit.table_oid.to_string(),
                "--index-oid".into(),
                unit.index_oid.unwrap_or(0).to_string(),
            ]
        })
        .await?;
    }
    Ok(())
}

/// Re-exec this same binary once per unit in `batch`, concurrently, and
/// wait for all of them (§0: "scheduler/orchestrator re-execs via
/// `std::process::Command`").
async fn run_worker_batch(
    workdir: &WorkDir,
    config: &Config,
    batch: Vec<Unit>,
    build_args: impl Fn(&Unit) -> Vec<String>,
) -> Result<()> {
    let exe = std::env::current_exe().context("locating current executable for re-exec")?;
    let mut handles = Vec::with_capacity(batch.len());
    for unit in &batch {
        let mut cmd_args = build_args(unit);
        cmd_args.push("--dir".into());
        cmd_args.push(workdir.root().to_string_lossy().into_owned());
        cmd_args.push("--source".into());
        cmd_args.push(config.databases.source_url.clone());
        cmd_args.push("--target".into());
        cmd_args.push(config.databases.target_url.clone());
        let exe = exe.clone();
        let title = unit.title.clone();
        handles.push(tokio::spawn(async move {
            let status = tokio::process::Command::new(&exe)
                .args(&cmd_args)
                .status()
                .await
                .with_context(|| format!("spawning worker for {title}"))?;
            if !status.success() {
                anyhow::bail!(EngineError::Partial {
                    unit: title,
                    message: format!("worker exited with {status}"),
                });
            }
            Ok::<(), anyhow::Error>(())
        }));
    }
    for h in handles {
        h.await.context("joining worker task")??;
    }
    Ok(())
}

async fn apply_sequences(
    catalog: &rusqlite::Connection,
    filter_conn: &rusqlite::Connection,
    target: &TargetClient,
) -> Result<()> {
    for seq in sequence::list_all(catalog)? {
        if filter_entry::contains_oid(filter_conn, seq.oid)? {
            continue;
        }
        target
            .set_sequence_value(&seq.qname, seq.last_value, seq.is_called)
            .await
            .with_context(|| format!("setting sequence value for {}", seq.qname))?;
    }
    Ok(())
}

/// Copy every large object (`pg_largeobject_metadata`) from source to
/// target. Uses the SQL-callable `lo_get`/`lo_from_bytea` pair rather than
/// libpq's large-object client API, so it rides the same `sqlx` pools as
/// every other step instead of opening a side connection. Passing the
/// source oid through to `lo_from_bytea` preserves it on the target,
/// which matters for columns that store a large object oid as a foreign
/// key into `pg_largeobject_metadata`.
async fn copy_blobs(workdir: &WorkDir, source: &SourceClient, target: &TargetClient) -> Result<()> {
    if workdir.is_done(constants::DONE_BLOBS) {
        tracing::debug!("blobs already copied, skipping");
        return Ok(());
    }

    let oids: Vec<i64> = sqlx::query("SELECT oid::bigint AS oid FROM pg_largeobject_metadata ORDER BY oid")
        .fetch_all(source.pool())
        .await
        .map_err(|e| EngineError::Source(format!("listing large objects: {e}")))?
        .into_iter()
        .map(|row| row.get::<i64, _>("oid"))
        .collect();

    for oid in &oids {
        let data: Vec<u8> = sqlx::query("SELECT lo_get($1::oid) AS data")
            .bind(*oid)
            .fetch_one(source.pool())
            .await
            .map_err(|e| EngineError::Source(format!("reading large object {oid}: {e}")))?
            .get(0);

        sqlx::query("SELECT lo_from_bytea($1::oid, $2)")
            .bind(*oid)
            .bind(&data)
            .execute(target.pool())
            .await
            .map_err(|e| EngineError::Target(format!("writing large object {oid}: {e}")))?;
    }

    tracing::info!(count = oids.len(), "copied large objects");
    Ok(())
}

async fn verify_tables(
    catalog: &rusqlite::Connection,
    filter_conn: &rusqlite::Connection,
    source: &SourceClient,
    target: &TargetClient,
) -> Result<()> {
    for t in table::list_all(catalog)? {
        if filter_entry::contains_oid(filter_conn, t.oid)? || t.exclude_data {
            continue;
        }
        let checksum_sql = format!(
            "SELECT count(*), coalesce(md5(string_agg(md5(t.*::text), '')), '') FROM {} t",
            t.qname
        );

        let rows = source.fetch_rows(&checksum_sql).await?;
        let (source_count, source_sum): (i64, String) = match rows.first() {
            Some(row) => (row.try_get(0).unwrap_or(0), row.try_get(1).unwrap_or_default()),
            None => (0, String::new()),
        };
        checksum::record_source(catalog, t.oid, source_count, &source_sum)?;

        let target_row = sqlx::query(&checksum_sql)
            .fetch_optional(target.pool())
            .await
            .with_context(|| format!("computing target checksum for {}", t.qname))?;
        let (target_count, target_sum): (i64, String) = match &target_row {
            Some(row) => (row.try_get(0).unwrap_or(0), row.try_get(1).unwrap_or_default()),
            None => (0, String::new()),
        };
        checksum::record_target(catalog, t.oid, target_count, &target_sum)?;

        let matches = checksum::get(catalog, t.oid)?.map(|c| c.matches()).unwrap_or(false);
        if !matches {
            tracing::warn!(table = %t.qname, source_count, target_count, "checksum mismatch after copy");
        }
    }
    Ok(())
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{Databases, FilterSpecInput, Partition, Replication};

    fn sample_args() -> CopyDbArgs {
        CopyDbArgs {
            databases: DatabaseArgs::default(),
            dir: DirectoryArgs::default(),
            verify: false,
            resume: false,
            force: false,
            not_consistent: true,
            snapshot: false,
            drop_cache: false,
            table_jobs: 4,
            index_jobs: 4,
        }
    }

    fn sample_config(source_url: &str, target_url: &str) -> Config {
        Config {
            databases: Databases {
                source_url: source_url.to_string(),
                target_url: target_url.to_string(),
            },
            dir: std::path::PathBuf::from("/tmp/pgrelay-test"),
            partition: Partition::default(),
            filter: FilterSpecInput::default(),
            replication: Replication::default(),
            resume: false,
            force: false,
            not_consistent: false,
        }
    }

    #[test]
    fn reconcile_setup_records_a_fresh_run() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open(tmp.path().join("source.db")).unwrap();
        catalog.create_schema(CatalogKind::Source).unwrap();

        let config = sample_config("postgres://s", "postgres://t");
        let args = sample_args();
        reconcile_setup(catalog.connection(), &config, &args).unwrap();

        let setup = setup::get(catalog.connection()).unwrap().unwrap();
        assert_eq!(setup.source_dsn, "postgres://s");
        assert_eq!(setup.target_dsn, "postgres://t");
    }

    #[test]
    fn reconcile_setup_rejects_disagreeing_dsn_without_force() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open(tmp.path().join("source.db")).unwrap();
        catalog.create_schema(CatalogKind::Source).unwrap();

        let first = sample_config("postgres://s", "postgres://t");
        reconcile_setup(catalog.connection(), &first, &sample_args()).unwrap();

        let second = sample_config("postgres://other-source", "postgres://t");
        let result = reconcile_setup(catalog.connection(), &second, &sample_args());
        assert!(result.is_err());
    }

    #[test]
    fn reconcile_setup_allows_disagreeing_dsn_with_force() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = CatalogStore::open(tmp.path().join("source.db")).unwrap();
        catalog.create_schema(CatalogKind::Source).unwrap();

        let first = sample_config("postgres://s", "postgres://t");
        reconcile_setup(catalog.connection(), &first, &sample_args()).unwrap();

        let second = sample_config("postgres://other-source", "postgres://t");
        let mut forced_args = sample_args();
        forced_args.force = true;
        reconcile_setup(catalog.connection(), &second, &forced_args).unwrap();

        let setup = setup::get(catalog.connection()).unwrap().unwrap();
        assert_eq!(setup.source_dsn, "postgres://other-source");
    }
}
