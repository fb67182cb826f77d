//! §9 "Callback with cursor iteration. Strategy: expose iterators that
//! produce owned records; avoid exposing raw cursors to callers." Every
//! entity module's `iterate`/`find_*` function goes through
//! [`query_all`] or [`query_optional`] rather than handing back a raw
//! `rusqlite::Statement`/`Rows`; the statement is always finalised before
//! the function returns.

use rusqlite::{Connection, Params, Row};

pub fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl Params,
    mut map_row: impl FnMut(&Row) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| map_row(row))?;
    rows.collect()
}

pub fn query_optional<T>(
    conn: &Connection,
    sql: &str,
    params: impl Params,
    map_row: impl FnOnce(&Row) -> rusqlite::Result<T>,
) -> rusqlite::Result<Option<T>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(map_row(row)?)),
        None => Ok(None),
    }
}
