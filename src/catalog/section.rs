//! Coarse-grained run sections (`schema`, `namespaces`, `extensions`,
//! `collations`, `pre-data`, `data`, `post-data`, ...) used by `list
//! progress` and by the scheduler to decide whether a fetch phase has
//! already run (§3, §4.E).

use rusqlite::{Connection, params};

use super::cursor::{query_all, query_optional};

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub fetched: bool,
    pub start_epoch: Option<i64>,
    pub done_epoch: Option<i64>,
    pub duration_ms: Option<i64>,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Section> {
    Ok(Section {
        name: row.get(0)?,
        fetched: row.get::<_, i64>(1)? != 0,
        start_epoch: row.get(2)?,
        done_epoch: row.get(3)?,
        duration_ms: row.get(4)?,
    })
}

const SELECT_COLS: &str = "name, fetched, start_epoch, done_epoch, duration_ms";

pub fn start(conn: &Connection, name: &str, now_epoch: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO section (name, fetched, start_epoch) VALUES (?1, 0, ?2)
         ON CONFLICT(name) DO UPDATE SET start_epoch = excluded.start_epoch",
        params![name, now_epoch],
    )?;
    Ok(())
}

pub fn mark_done(conn: &Connection, name: &str, now_epoch: i64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE section SET fetched = 1, done_epoch = ?2,
            duration_ms = (?2 - COALESCE(start_epoch, ?2)) * 1000
         WHERE name = ?1",
        params![name, now_epoch],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, name: &str) -> rusqlite::Result<Option<Section>> {
    query_optional(
        conn,
        &format!("SELECT {SELECT_COLS} FROM section WHERE name = ?1"),
        params![name],
        from_row,
    )
}

pub fn is_fetched(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    Ok(get(conn, name)?.map(|s| s.fetched).unwrap_or(false))
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<Section>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM section ORDER BY rowid"),
        [],
        from_row,
    )
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
    fn start_then_done_computes_duration() {
        let c = conn();
        start(&c, "schema", 100).unwrap();
        assert!(!is_fetched(&c, "schema").unwrap());
        mark_done(&c, "schema", 103).unwrap();
        let s = get(&c, "schema").unwrap().unwrap();
        assert!(s.fetched);
        assert_eq!(s.duration_ms, Some(3000));
    }

    #[test]
    fn unknown_section_is_not_fetched() {
        let c = conn();
        assert!(!is_fetched(&c, "ghost").unwrap());
    }
}
