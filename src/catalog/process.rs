//! `process`: the work scheduler's (component E) claim table. A worker
//! claims a unit (a table partition, or an index) by inserting its own
//! pid alongside the unit it intends to work on; the liveness scan
//! reclaims units left behind by a process that vanished without
//! clearing its row (§4.E).

use rusqlite::{Connection, params};

use super::cursor::query_all;

#[derive(Debug, Clone)]
pub struct ProcessRow {
    pub pid: i64,
    pub role: String,
    pub title: String,
    pub table_oid: Option<i64>,
    pub partnum: Option<i32>,
    pub index_oid: Option<i64>,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<ProcessRow> {
    Ok(ProcessRow {
        pid: row.get(0)?,
        role: row.get(1)?,
        title: row.get(2)?,
        table_oid: row.get(3)?,
        partnum: row.get(4)?,
        index_oid: row.get(5)?,
    })
}

const SELECT_COLS: &str = "pid, role, title, table_oid, partnum, index_oid";

pub fn claim(conn: &Connection, p: &ProcessRow) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO process (pid, role, title, table_oid, partnum, index_oid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![p.pid, p.role, p.title, p.table_oid, p.partnum, p.index_oid],
    )?;
    Ok(())
}

pub fn release(conn: &Connection, pid: i64) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM process WHERE pid = ?1", params![pid])?;
    Ok(())
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<ProcessRow>> {
    query_all(conn, &format!("SELECT {SELECT_COLS} FROM process ORDER BY pid"), [], from_row)
}

/// Is `pid` still alive? Consulted by the liveness scan before trusting a
/// `process` row as a live claim (§4.E). Linux-only (`/proc` existence
/// check); assumed alive everywhere else since a false positive here only
/// delays reclaiming a unit, never corrupts one.
#[cfg(target_os = "linux")]
pub fn pid_is_alive(pid: i64) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
pub fn pid_is_alive(_pid: i64) -> bool {
    true
}

/// Remove claims held by processes that are no longer running, returning
/// the units they had reserved so the scheduler can re-offer them.
pub fn reap_dead(conn: &Connection) -> rusqlite::Result<Vec<ProcessRow>> {
    let dead: Vec<ProcessRow> = list_all(conn)?
        .into_iter()
        .filter(|p| !pid_is_alive(p.pid))
        .collect();
    for p in &dead {
        release(conn, p.pid)?;
    }
    Ok(dead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogKind, schema_sql};

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch(schema_sql::ddl_for(CatalogKind::Source)).unwrap();
        c
    }

    #[test]
    fn claim_then_release_round_trips() {
        let c = conn();
        claim(
            &c,
            &ProcessRow {
                pid: 999_999,
                role: "copy".into(),
                title: "copy public.a part 0/1".into(),
                table_oid: Some(1),
                partnum: Some(0),
                index_oid: None,
            },
        )
        .unwrap();
        assert_eq!(list_all(&c).unwrap().len(), 1);
        release(&c, 999_999).unwrap();
        assert_eq!(list_all(&c).unwrap().len(), 0);
    }

    #[test]
    fn reap_dead_clears_vanished_claims() {
        let c = conn();
        // A pid this high is exceedingly unlikely to be live on any system.
        claim(
            &c,
            &ProcessRow {
                pid: 999_999,
                role: "copy".into(),
                title: "stale".into(),
                table_oid: Some(1),
                partnum: Some(0),
                index_oid: None,
            },
        )
        .unwrap();
        let reaped = reap_dead(&c).unwrap();
        assert_eq!(reaped.len(), 1);
        assert_eq!(list_all(&c).unwrap().len(), 0);
    }
}
