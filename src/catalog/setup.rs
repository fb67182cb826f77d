//! The `setup` singleton row: the parameters a run was launched with,
//! recorded once so a resumed process (or a worker re-exec'd via
//! `pgrelay worker copy`) can recover them without re-parsing CLI flags.

use rusqlite::{Connection, OptionalExtension, params};

use super::cursor::query_optional;

#[derive(Debug, Clone)]
pub struct Setup {
    pub source_dsn: String,
    pub target_dsn: String,
    pub snapshot_id: Option<String>,
    pub split_threshold_bytes: i64,
    pub split_max_parts: u32,
    pub filter_spec_json: String,
    pub plugin_name: Option<String>,
    pub slot_name: Option<String>,
}

pub fn insert(conn: &Connection, setup: &Setup) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO setup (id, source_dsn, target_dsn, snapshot_id, split_threshold_bytes,
                             split_max_parts, filter_spec_json, plugin_name, slot_name)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            source_dsn = excluded.source_dsn,
            target_dsn = excluded.target_dsn,
            snapshot_id = excluded.snapshot_id,
            split_threshold_bytes = excluded.split_threshold_bytes,
            split_max_parts = excluded.split_max_parts,
            filter_spec_json = excluded.filter_spec_json,
            plugin_name = excluded.plugin_name,
            slot_name = excluded.slot_name",
        params![
            setup.source_dsn,
            setup.target_dsn,
            setup.snapshot_id,
            setup.split_threshold_bytes,
            setup.split_max_parts,
            setup.filter_spec_json,
            setup.plugin_name,
            setup.slot_name,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection) -> rusqlite::Result<Option<Setup>> {
    query_optional(
        conn,
        "SELECT source_dsn, target_dsn, snapshot_id, split_threshold_bytes,
                split_max_parts, filter_spec_json, plugin_name, slot_name
         FROM setup WHERE id = 1",
        [],
        |row| {
            Ok(Setup {
                source_dsn: row.get(0)?,
                target_dsn: row.get(1)?,
                snapshot_id: row.get(2)?,
                split_threshold_bytes: row.get(3)?,
                split_max_parts: row.get::<_, i64>(4)? as u32,
                filter_spec_json: row.get(5)?,
                plugin_name: row.get(6)?,
                slot_name: row.get(7)?,
            })
        },
    )
}

pub fn set_snapshot_id(conn: &Connection, snapshot_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE setup SET snapshot_id = ?1 WHERE id = 1",
        params![snapshot_id],
    )?;
    Ok(())
}

pub fn set_slot_name(conn: &Connection, slot_name: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE setup SET slot_name = ?1 WHERE id = 1",
        params![slot_name],
    )?;
    Ok(())
}

pub fn exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM setup WHERE id = 1", [], |_| Ok(()))
        .optional()
        .map(|v| v.is_some())
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
    fn insert_then_get_round_trips() {
        let c = conn();
        let setup = Setup {
            source_dsn: "postgres://a".into(),
            target_dsn: "postgres://b".into(),
            snapshot_id: None,
            split_threshold_bytes: 1024,
            split_max_parts: 4,
            filter_spec_json: "{}".into(),
            plugin_name: None,
            slot_name: None,
        };
        insert(&c, &setup).unwrap();
        let back = get(&c).unwrap().unwrap();
        assert_eq!(back.source_dsn, "postgres://a");
        assert_eq!(back.split_max_parts, 4);
    }

    #[test]
    fn upsert_replaces_existing_row() {
        let c = conn();
        let mut setup = Setup {
            source_dsn: "postgres://a".into(),
            target_dsn: "postgres://b".into(),
            snapshot_id: None,
            split_threshold_bytes: 1024,
            split_max_parts: 4,
            filter_spec_json: "{}".into(),
            plugin_name: None,
            slot_name: None,
        };
        insert(&c, &setup).unwrap();
        setup.split_max_parts = 8;
        insert(&c, &setup).unwrap();
        assert_eq!(get(&c).unwrap().unwrap().split_max_parts, 8);
    }
}
