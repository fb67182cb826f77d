//! `sentinel`: the CDC control surface (§4.H/I/J). A single row the
//! receiver polls for `startpos`/`endpos`/`apply` and publishes
//! `write_lsn`/`flush_lsn`/`replay_lsn` progress into, so an operator (or
//! a second process) can drive replication without sending signals.

use rusqlite::{Connection, params};

use super::cursor::query_optional;

#[derive(Debug, Clone)]
pub struct Sentinel {
    pub startpos: String,
    pub endpos: String,
    pub apply: bool,
    pub write_lsn: String,
    pub flush_lsn: String,
    pub replay_lsn: String,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Sentinel> {
    Ok(Sentinel {
        startpos: row.get(0)?,
        endpos: row.get(1)?,
        apply: row.get::<_, i64>(2)? != 0,
        write_lsn: row.get(3)?,
        flush_lsn: row.get(4)?,
        replay_lsn: row.get(5)?,
    })
}

const SELECT_COLS: &str = "startpos, endpos, apply, write_lsn, flush_lsn, replay_lsn";

pub fn ensure_initialized(conn: &Connection, startpos: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO sentinel (id, startpos) VALUES (1, ?1)",
        params![startpos],
    )?;
    Ok(())
}

pub fn get(conn: &Connection) -> rusqlite::Result<Option<Sentinel>> {
    query_optional(conn, &format!("SELECT {SELECT_COLS} FROM sentinel WHERE id = 1"), [], from_row)
}

pub fn set_endpos(conn: &Connection, endpos: &str) -> rusqlite::Result<()> {
    conn.execute("UPDATE sentinel SET endpos = ?1 WHERE id = 1", params![endpos])?;
    Ok(())
}

pub fn set_apply(conn: &Connection, apply: bool) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sentinel SET apply = ?1 WHERE id = 1",
        params![apply as i64],
    )?;
    Ok(())
}

pub fn publish_progress(
    conn: &Connection,
    write_lsn: &str,
    flush_lsn: &str,
    replay_lsn: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sentinel SET write_lsn = ?1, flush_lsn = ?2, replay_lsn = ?3 WHERE id = 1",
        params![write_lsn, flush_lsn, replay_lsn],
    )?;
    Ok(())
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
    fn ensure_initialized_is_idempotent() {
        let c = conn();
        ensure_initialized(&c, "0/100").unwrap();
        ensure_initialized(&c, "0/200").unwrap();
        assert_eq!(get(&c).unwrap().unwrap().startpos, "0/100");
    }

    #[test]
    fn progress_and_endpos_update_independently() {
        let c = conn();
        ensure_initialized(&c, "0/0").unwrap();
        set_endpos(&c, "0/500").unwrap();
        publish_progress(&c, "0/100", "0/90", "0/80").unwrap();
        let s = get(&c).unwrap().unwrap();
        assert_eq!(s.endpos, "0/500");
        assert_eq!(s.flush_lsn, "0/90");
    }
}
