//! `summary`: a durable record of completed work, one row per copied
//! partition or built index, independent of `process` (which only tracks
//! work in flight). `list progress` and the §8 testable properties
//! ("at-most-one summary row per (table, partition)", "summary row per
//! selected table after a run completes") read from here.

use rusqlite::{Connection, params};

use super::cursor::query_all;

#[derive(Debug, Clone)]
pub struct Summary {
    pub table_oid: Option<i64>,
    pub partnum: Option<i32>,
    pub index_oid: Option<i64>,
    pub pid: i64,
    pub start_epoch: i64,
    pub done_epoch: Option<i64>,
    pub duration_ms: Option<i64>,
    pub bytes: Option<i64>,
    pub command: String,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Summary> {
    Ok(Summary {
        table_oid: row.get(0)?,
        partnum: row.get(1)?,
        index_oid: row.get(2)?,
        pid: row.get(3)?,
        start_epoch: row.get(4)?,
        done_epoch: row.get(5)?,
        duration_ms: row.get(6)?,
        bytes: row.get(7)?,
        command: row.get(8)?,
    })
}

const SELECT_COLS: &str =
    "table_oid, partnum, index_oid, pid, start_epoch, done_epoch, duration_ms, bytes, command";

pub fn start(
    conn: &Connection,
    table_oid: Option<i64>,
    partnum: Option<i32>,
    index_oid: Option<i64>,
    pid: i64,
    command: &str,
    now_epoch: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO summary (table_oid, partnum, index_oid, pid, start_epoch, command)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![table_oid, partnum, index_oid, pid, now_epoch, command],
    )?;
    Ok(())
}

pub fn finish(
    conn: &Connection,
    table_oid: Option<i64>,
    partnum: Option<i32>,
    index_oid: Option<i64>,
    bytes: Option<i64>,
    now_epoch: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE summary SET done_epoch = ?4, bytes = ?5,
            duration_ms = (?4 - start_epoch) * 1000
         WHERE table_oid IS ?1 AND partnum IS ?2 AND index_oid IS ?3",
        params![table_oid, partnum, index_oid, now_epoch, bytes],
    )?;
    Ok(())
}

pub fn list_for_table(conn: &Connection, table_oid: i64) -> rusqlite::Result<Vec<Summary>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM summary WHERE table_oid = ?1 ORDER BY index_oid IS NOT NULL, partnum"),
        params![table_oid],
        from_row,
    )
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<Summary>> {
    query_all(conn, &format!("SELECT {SELECT_COLS} FROM summary ORDER BY rowid"), [], from_row)
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
    fn at_most_one_summary_per_table_partition() {
        let c = conn();
        start(&c, Some(1), Some(0), None, 100, "COPY", 10).unwrap();
        let err = start(&c, Some(1), Some(0), None, 101, "COPY", 11);
        assert!(err.is_err(), "unique partial index must reject duplicate (table, partition)");
    }

    #[test]
    fn finish_records_duration_and_bytes() {
        let c = conn();
        start(&c, Some(1), Some(0), None, 100, "COPY", 10).unwrap();
        finish(&c, Some(1), Some(0), None, Some(4096), 15).unwrap();
        let rows = list_for_table(&c, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration_ms, Some(5000));
        assert_eq!(rows[0].bytes, Some(4096));
    }

    #[test]
    fn index_summary_does_not_collide_with_partition_summary() {
        let c = conn();
        start(&c, Some(1), Some(0), None, 100, "COPY", 10).unwrap();
        start(&c, Some(1), None, Some(10), 101, "CREATE INDEX", 11).unwrap();
        assert_eq!(list_for_table(&c, 1).unwrap().len(), 2);
    }
}
