//! `timeline_history`: the replication timelines this run has observed. A
//! `SWITCH` record in the CDC stream (promotion, or `pg_rewind`) bumps
//! the timeline; recording the boundary LSN lets a restarted receiver
//! figure out which segment file name prefix to resume from.

use rusqlite::{Connection, params};

use super::cursor::query_all;

#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub tli: i32,
    pub start_lsn: String,
    pub end_lsn: Option<String>,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<TimelineEntry> {
    Ok(TimelineEntry {
        tli: row.get(0)?,
        start_lsn: row.get(1)?,
        end_lsn: row.get(2)?,
    })
}

pub fn record_switch(conn: &Connection, tli: i32, start_lsn: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO timeline_history (tli, start_lsn) VALUES (?1, ?2)
         ON CONFLICT(tli) DO UPDATE SET start_lsn = excluded.start_lsn",
        params![tli, start_lsn],
    )?;
    if let Some(prev) = tli.checked_sub(1).filter(|p| *p > 0) {
        conn.execute(
            "UPDATE timeline_history SET end_lsn = ?2 WHERE tli = ?1 AND end_lsn IS NULL",
            params![prev, start_lsn],
        )?;
    }
    Ok(())
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<TimelineEntry>> {
    query_all(
        conn,
        "SELECT tli, start_lsn, end_lsn FROM timeline_history ORDER BY tli",
        [],
        from_row,
    )
}

pub fn current(conn: &Connection) -> rusqlite::Result<Option<TimelineEntry>> {
    Ok(list_all(conn)?.into_iter().last())
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
    fn switch_closes_out_the_previous_timeline() {
        let c = conn();
        record_switch(&c, 1, "0/0").unwrap();
        record_switch(&c, 2, "0/5000").unwrap();
        let entries = list_all(&c).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].end_lsn.as_deref(), Some("0/5000"));
        assert_eq!(current(&c).unwrap().unwrap().tli, 2);
    }
}
