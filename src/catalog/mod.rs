//! Component A: the catalog store. A durable, on-disk relational cache of
//! source/target schema objects, filtering decisions, worker process
//! state, per-object summaries, timing and checksums (§3, §4.A).
//!
//! Backed by SQLite (via `rusqlite`) rather than Postgres itself: the
//! catalog must survive and coordinate across OS processes without a
//! database server of its own, and must support `ATTACH` for
//! cross-catalog `NOT EXISTS` joins (§4.A `attach`).

pub mod attribute;
pub mod checksum;
pub mod constraint;
pub mod cursor;
pub mod dependency;
pub mod filter_entry;
pub mod index;
pub mod partition;
pub mod process;
pub mod schema_sql;
pub mod section;
pub mod sentinel;
pub mod sequence;
pub mod setup;
pub mod summary;
pub mod table;
pub mod timeline;
pub mod writer_gate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::backoff::Backoff;
use crate::error::EngineError;
use writer_gate::WriterGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Source,
    Filter,
    Target,
}

pub struct CatalogStore {
    conn: Connection,
    gate: WriterGate,
    backoff: Backoff,
    path: PathBuf,
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::DatabaseBusy
            || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

impl CatalogStore {
    /// Open (creating if absent) the catalog file at `path`. Idempotent:
    /// calling this repeatedly against the same file is safe. Sets the
    /// journal mode to write-ahead so concurrent readers don't block a
    /// single writer holding the gate (§4.A).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }
        let is_new = !path.exists();
        let conn = Connection::open(&path)
            .with_context(|| format!("opening catalog store {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(std::time::Duration::from_millis(0))?;

        let gate = WriterGate::new(&path);
        let store = Self {
            conn,
            gate,
            backoff: Backoff::default(),
            path,
        };
        if is_new {
            tracing::debug!(path = %store.path.display(), "created new catalog file");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Recreate one of {source, filter, target} to its documented shape.
    pub fn create_schema(&self, kind: CatalogKind) -> Result<()> {
        self.with_gate_retry("create_schema", |conn| {
            conn.execute_batch(schema_sql::ddl_for(kind))
        })
    }

    pub fn drop_schema(&self, kind: CatalogKind) -> Result<()> {
        self.with_gate_retry("drop_schema", |conn| {
            conn.execute_batch(schema_sql::drop_ddl_for(kind))
        })
    }

    /// Expose a second catalog file under `alias` for cross-catalog
    /// queries (used by the filter engine for `NOT EXISTS`-style joins
    /// against the target catalog).
    pub fn attach(&self, other: &Path, alias: &str) -> Result<()> {
        self.with_gate_retry("attach", |conn| {
            conn.execute(
                &format!("ATTACH DATABASE ?1 AS {alias}"),
                [other.to_string_lossy().to_string()],
            )
            .map(|_| ())
        })
    }

    pub fn detach(&self, alias: &str) -> Result<()> {
        self.with_gate_retry("detach", |conn| {
            conn.execute(&format!("DETACH DATABASE {alias}"), []).map(|_| ())
        })
    }

    /// Begin a scoped transaction. `immediate` acquires the writer gate
    /// immediately (used before a sequence of writes that must not
    /// interleave with a peer process); non-immediate transactions defer
    /// gate acquisition until the first write.
    pub fn begin(&mut self, immediate: bool) -> Result<CatalogTxn<'_>> {
        let _guard = if immediate {
            Some(self.gate.acquire().context("acquiring writer gate")?)
        } else {
            None
        };
        let behavior = if immediate {
            rusqlite::TransactionBehavior::Immediate
        } else {
            rusqlite::TransactionBehavior::Deferred
        };
        let txn = self
            .backoff
            .retry_blocking("begin transaction", || {
                match self.conn.transaction_with_behavior(behavior) {
                    Ok(txn) => Ok(Some(txn)),
                    Err(e) if is_busy(&e) => Ok(None),
                    Err(e) => Err(EngineError::Busy(e.to_string()).into()),
                }
            })
            .context("begin")?;
        Ok(CatalogTxn {
            txn,
            _gate_guard: _guard,
        })
    }

    /// Run `op` against the raw connection, retrying on SQLITE_BUSY under
    /// the shared back-off policy, holding the writer gate for the
    /// duration (§4.A, §9).
    fn with_gate_retry<T>(
        &self,
        label: &str,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let _guard = self.gate.acquire().context("acquiring writer gate")?;
        self.backoff.retry_blocking(label, || match op(&self.conn) {
            Ok(v) => Ok(Some(v)),
            Err(e) if is_busy(&e) => Ok(None),
            Err(e) => Err(EngineError::Internal(format!("{label}: {e}")).into()),
        })
    }
}

/// A scoped transaction (§4.A "Scoped transactions"). Dropping without
/// calling `commit` rolls back, mirroring `rusqlite::Transaction`.
pub struct CatalogTxn<'conn> {
    txn: rusqlite::Transaction<'conn>,
    _gate_guard: Option<writer_gate::GateGuard<'conn>>,
}

impl<'conn> CatalogTxn<'conn> {
    pub fn connection(&self) -> &rusqlite::Connection {
        &self.txn
    }

    pub fn commit(self) -> Result<()> {
        self.txn.commit().context("commit catalog transaction")
    }

    pub fn rollback(self) -> Result<()> {
        self.txn.rollback().context("rollback catalog transaction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_idempotent_and_creates_parent_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/source.db");
        let store1 = CatalogStore::open(&path).unwrap();
        store1.create_schema(CatalogKind::Source).unwrap();
        drop(store1);
        let store2 = CatalogStore::open(&path).unwrap();
        // Re-creating is safe (CREATE TABLE IF NOT EXISTS).
        store2.create_schema(CatalogKind::Source).unwrap();
    }

    #[test]
    fn attach_exposes_second_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let source_path = tmp.path().join("source.db");
        let target_path = tmp.path().join("target.db");

        let source = CatalogStore::open(&source_path).unwrap();
        source.create_schema(CatalogKind::Source).unwrap();

        let target = CatalogStore::open(&target_path).unwrap();
        target.create_schema(CatalogKind::Target).unwrap();
        drop(target);

        source.attach(&target_path, "tgt").unwrap();
        let count: i64 = source
            .connection()
            .query_row("SELECT COUNT(*) FROM tgt.s_table", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn transaction_commits_and_rolls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = CatalogStore::open(tmp.path().join("source.db")).unwrap();
        store.create_schema(CatalogKind::Source).unwrap();

        {
            let txn = store.begin(true).unwrap();
            txn.connection()
                .execute(
                    "INSERT INTO section(name, fetched) VALUES ('schema', 1)",
                    [],
                )
                .unwrap();
            txn.commit().unwrap();
        }

        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM section", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        {
            let txn = store.begin(false).unwrap();
            txn.connection()
                .execute(
                    "INSERT INTO section(name, fetched) VALUES ('namespaces', 1)",
                    [],
                )
                .unwrap();
            txn.rollback().unwrap();
        }

        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM section", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
