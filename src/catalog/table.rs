//! `s_table`: one row per relation the schema fetcher discovered on the
//! source (or, in the target catalog, per relation already present on the
//! target). §3, §4.C.

use rusqlite::{Connection, params};

use super::cursor::{query_all, query_optional};

#[derive(Debug, Clone)]
pub struct Table {
    pub oid: i64,
    pub qname: String,
    pub nspname: String,
    pub relname: String,
    pub relkind: String,
    pub restore_list_name: Option<String>,
    pub est_pages: i64,
    pub est_tuples: i64,
    pub exclude_data: bool,
    pub part_key_column: Option<String>,
    pub bytes: i64,
}

const SELECT_COLS: &str = "oid, qname, nspname, relname, relkind, restore_list_name, \
    est_pages, est_tuples, exclude_data, part_key_column, bytes";

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Table> {
    Ok(Table {
        oid: row.get(0)?,
        qname: row.get(1)?,
        nspname: row.get(2)?,
        relname: row.get(3)?,
        relkind: row.get(4)?,
        restore_list_name: row.get(5)?,
        est_pages: row.get(6)?,
        est_tuples: row.get(7)?,
        exclude_data: row.get::<_, i64>(8)? != 0,
        part_key_column: row.get(9)?,
        bytes: row.get(10)?,
    })
}

pub fn insert(conn: &Connection, t: &Table) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO s_table (oid, qname, nspname, relname, relkind, restore_list_name,
                               est_pages, est_tuples, exclude_data, part_key_column, bytes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(oid) DO UPDATE SET
            qname = excluded.qname, nspname = excluded.nspname, relname = excluded.relname,
            relkind = excluded.relkind, restore_list_name = excluded.restore_list_name,
            est_pages = excluded.est_pages, est_tuples = excluded.est_tuples,
            exclude_data = excluded.exclude_data, part_key_column = excluded.part_key_column,
            bytes = excluded.bytes",
        params![
            t.oid,
            t.qname,
            t.nspname,
            t.relname,
            t.relkind,
            t.restore_list_name,
            t.est_pages,
            t.est_tuples,
            t.exclude_data as i64,
            t.part_key_column,
            t.bytes,
        ],
    )?;
    Ok(())
}

pub fn find_by_oid(conn: &Connection, oid: i64) -> rusqlite::Result<Option<Table>> {
    query_optional(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_table WHERE oid = ?1"),
        params![oid],
        from_row,
    )
}

pub fn find_by_qname(conn: &Connection, qname: &str) -> rusqlite::Result<Option<Table>> {
    query_optional(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_table WHERE qname = ?1"),
        params![qname],
        from_row,
    )
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<Table>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_table ORDER BY qname"),
        [],
        from_row,
    )
}

/// Tables selected for copy: `relkind` is an ordinary/partitioned table
/// and `exclude_data` was not set by the filter engine (§4.B data-only
/// exclusion, e.g. for unlogged or `--exclude-table-data` matches).
pub fn list_copyable(conn: &Connection) -> rusqlite::Result<Vec<Table>> {
    query_all(
        conn,
        &format!(
            "SELECT {SELECT_COLS} FROM s_table \
             WHERE relkind IN ('r', 'p') AND exclude_data = 0 ORDER BY qname"
        ),
        [],
        from_row,
    )
}
