//! Component E: the work scheduler. Builds the ordered copy/index unit
//! queues and implements pull-based claiming over the `process` table
//! (§4.E).

use anyhow::Result;
use rusqlite::Connection;

use crate::catalog::{index, partition, process, summary, table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Copy,
    Index,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Copy => "COPY",
            Role::Index => "INDEX",
        }
    }
}

/// One unit of work. A non-partitioned table's single copy unit always
/// carries `partnum = Some(0)` (never `None`) so the `process` table's
/// partial unique index on `(table_oid, partnum)` actually prevents two
/// workers from claiming the same table twice.
#[derive(Debug, Clone)]
pub struct Unit {
    pub table_oid: i64,
    pub partnum: Option<i32>,
    pub index_oid: Option<i64>,
    pub title: String,
    pub size_bytes: i64,
}

/// All copy units not yet recorded in `summary`, largest table first
/// (§4.E: "consumes table-and-partition units in descending on-disk size
/// order").
pub fn pending_copy_units(conn: &Connection) -> Result<Vec<Unit>> {
    let mut units = Vec::new();
    for t in table::list_all(conn)? {
        let parts = partition::list_for_table(conn, t.oid)?;
        if parts.is_empty() {
            if summary::list_for_table(conn, t.oid)?
                .iter()
                .any(|s| s.partnum == Some(0) && s.index_oid.is_none())
            {
                continue;
            }
            units.push(Unit {
                table_oid: t.oid,
                partnum: Some(0),
                index_oid: None,
                title: format!("copy {}", t.qname),
                size_bytes: t.bytes,
            });
        } else {
            let done: std::collections::HashSet<_> = summary::list_for_table(conn, t.oid)?
                .into_iter()
                .filter(|s| s.index_oid.is_none())
                .filter_map(|s| s.partnum)
                .collect();
            for p in parts {
                if done.contains(&p.partnum) {
                    continue;
                }
                units.push(Unit {
                    table_oid: t.oid,
                    partnum: Some(p.partnum),
                    index_oid: None,
                    title: format!("copy {} part {}/{}", t.qname, p.partnum + 1, p.partcount),
                    size_bytes: t.bytes / p.partcount.max(1) as i64,
                });
            }
        }
    }
    units.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
    Ok(units)
}

/// Index-build units: only tables whose every copy unit has already
/// completed are eligible (§4.E: "within a single table, all partitions
/// must complete before any index build on that table starts"), ordered
/// by owning-table size descending.
pub fn pending_index_units(conn: &Connection) -> Result<Vec<Unit>> {
    let mut units = Vec::new();
    for t in table::list_all(conn)? {
        if !table_copy_complete(conn, t.oid)? {
            continue;
        }
        for idx in index::list_all(conn)?
            .into_iter()
            .filter(|i| i.table_oid == t.oid)
        {
            if summary::list_for_table(conn, t.oid)?
                .iter()
                .any(|s| s.index_oid == Some(idx.oid))
            {
                continue;
            }
            units.push(Unit {
                table_oid: t.oid,
                partnum: None,
                index_oid: Some(idx.oid),
                title: format!("build index {}", idx.qname),
                size_bytes: t.bytes,
            });
        }
    }
    units.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
    Ok(units)
}

fn table_copy_complete(conn: &Connection, table_oid: i64) -> Result<bool> {
    let parts = partition::list_for_table(conn, table_oid)?;
    let expected: Vec<i32> = if parts.is_empty() {
        vec![0]
    } else {
        parts.iter().map(|p| p.partnum).collect()
    };
    let done: std::collections::HashSet<_> = summary::list_for_table(conn, table_oid)?
        .into_iter()
        .filter(|s| s.index_oid.is_none())
        .filter_map(|s| s.partnum)
        .collect();
    Ok(expected.iter().all(|p| done.contains(p)))
}

/// All of a table's indexes have completed and its partitions/indexes
/// are both done — eligible for a post-data `VACUUM` (§4.E: "vacuum is
/// triggered per table only after all partitions and indexes have
/// completed").
pub fn table_ready_for_vacuum(conn: &Connection, table_oid: i64) -> Result<bool> {
    if !table_copy_complete(conn, table_oid)? {
        return Ok(false);
    }
    let all_indexes: Vec<_> = index::list_all(conn)?
        .into_iter()
        .filter(|i| i.table_oid == table_oid)
        .collect();
    let done: std::collections::HashSet<_> = summary::list_for_table(conn, table_oid)?
        .into_iter()
        .filter_map(|s| s.index_oid)
        .collect();
    Ok(all_indexes.iter().all(|i| done.contains(&i.oid)))
}

/// Pull-based claim: try each candidate unit in order until one claims
/// cleanly (the partial unique index on `process` rejects a unit another
/// worker just claimed), rather than locking the whole queue.
pub fn claim_next(
    conn: &Connection,
    role: Role,
    pid: i64,
    candidates: &[Unit],
) -> Result<Option<Unit>> {
    for unit in candidates {
        let row = process::ProcessRow {
            pid,
            role: role.as_str().into(),
            title: unit.title.clone(),
            table_oid: Some(unit.table_oid),
            partnum: unit.partnum,
            index_oid: unit.index_oid,
        };
        match process::claim(conn, &row) {
            Ok(()) => return Ok(Some(unit.clone())),
            Err(e) if is_unique_violation(&e) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Run one liveness scan: reclaim units held by vanished pids so they
/// re-enter the next `pending_*_units` call (§4.E).
pub fn reap_stale_claims(conn: &Connection) -> Result<usize> {
    Ok(process::reap_dead(conn)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{schema_sql, table::Table, CatalogKind};

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch(schema_sql::ddl_for(CatalogKind::Source)).unwrap();
        c
    }

    fn sample_table(c: &Connection, oid: i64, bytes: i64) {
        table::insert(
            c,
            &Table {
                oid,
                qname: format!("public.t{oid}"),
                nspname: "public".into(),
                relname: format!("t{oid}"),
                relkind: "r".into(),
                restore_list_name: None,
                est_pages: 0,
                est_tuples: 0,
                exclude_data: false,
                part_key_column: None,
                bytes,
            },
        )
        .unwrap();
    }

    #[test]
    fn copy_units_ordered_largest_first() {
        let c = conn();
        sample_table(&c, 1, 100);
        sample_table(&c, 2, 9999);
        let units = pending_copy_units(&c).unwrap();
        assert_eq!(units[0].table_oid, 2);
        assert_eq!(units[1].table_oid, 1);
    }

    #[test]
    fn completed_copy_unit_drops_out_of_queue() {
        let c = conn();
        sample_table(&c, 1, 100);
        summary::start(&c, Some(1), Some(0), None, 55, "COPY", 0).unwrap();
        assert!(pending_copy_units(&c).unwrap().is_empty());
    }

    #[test]
    fn claim_next_skips_unit_another_worker_just_took() {
        let c = conn();
        sample_table(&c, 1, 100);
        let units = pending_copy_units(&c).unwrap();
        let first = claim_next(&c, Role::Copy, 100, &units).unwrap();
        assert!(first.is_some());
        let second = claim_next(&c, Role::Copy, 101, &units).unwrap();
        assert!(second.is_none(), "unit already claimed by pid 100");
    }

    #[test]
    fn index_units_wait_for_copy_completion() {
        let c = conn();
        sample_table(&c, 1, 100);
        index::insert(
            &c,
            &index::Index {
                oid: 10,
                qname: "public.t1_pkey".into(),
                table_oid: 1,
                is_primary: true,
                is_unique: true,
                columns_json: "[]".into(),
                definition: "CREATE UNIQUE INDEX t1_pkey ON t1 (id)".into(),
            },
        )
        .unwrap();
        assert!(pending_index_units(&c).unwrap().is_empty());
        summary::start(&c, Some(1), Some(0), None, 55, "COPY", 0).unwrap();
        assert_eq!(pending_index_units(&c).unwrap().len(), 1);
    }
}
