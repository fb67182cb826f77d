//! `s_table_checksum`: row counts and aggregate checksums recorded by
//! `copy-db --verify` (§2 supplemented feature) for each copied table, on
//! both sides.

use rusqlite::{Connection, params};

use super::cursor::query_optional;

#[derive(Debug, Clone, Default)]
pub struct TableChecksum {
    pub table_oid: i64,
    pub source_row_count: Option<i64>,
    pub source_checksum: Option<String>,
    pub target_row_count: Option<i64>,
    pub target_checksum: Option<String>,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<TableChecksum> {
    Ok(TableChecksum {
        table_oid: row.get(0)?,
        source_row_count: row.get(1)?,
        source_checksum: row.get(2)?,
        target_row_count: row.get(3)?,
        target_checksum: row.get(4)?,
    })
}

const SELECT_COLS: &str =
    "table_oid, source_row_count, source_checksum, target_row_count, target_checksum";

pub fn record_source(
    conn: &Connection,
    table_oid: i64,
    row_count: i64,
    checksum: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO s_table_checksum (table_oid, source_row_count, source_checksum)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(table_oid) DO UPDATE SET
            source_row_count = excluded.source_row_count,
            source_checksum = excluded.source_checksum",
        params![table_oid, row_count, checksum],
    )?;
    Ok(())
}

pub fn record_target(
    conn: &Connection,
    table_oid: i64,
    row_count: i64,
    checksum: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO s_table_checksum (table_oid, target_row_count, target_checksum)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(table_oid) DO UPDATE SET
            target_row_count = excluded.target_row_count,
            target_checksum = excluded.target_checksum",
        params![table_oid, row_count, checksum],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, table_oid: i64) -> rusqlite::Result<Option<TableChecksum>> {
    query_optional(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_table_checksum WHERE table_oid = ?1"),
        params![table_oid],
        from_row,
    )
}

impl TableChecksum {
    pub fn matches(&self) -> bool {
        self.source_row_count.is_some()
            && self.source_row_count == self.target_row_count
            && self.source_checksum == self.target_checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogKind, schema_sql};

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch(schema_sql::ddl_for(CatalogKind::Source)).unwrap();
        c.execute(
            "INSERT INTO s_table (oid, qname, nspname, relname, relkind) VALUES (1, 'public.a', 'public', 'a', 'r')",
            [],
        )
        .unwrap();
        c
    }

    #[test]
    fn matching_checksums_report_match() {
        let c = conn();
        record_source(&c, 1, 10, "abc").unwrap();
        record_target(&c, 1, 10, "abc").unwrap();
        assert!(get(&c, 1).unwrap().unwrap().matches());
    }

    #[test]
    fn mismatched_row_counts_report_no_match() {
        let c = conn();
        record_source(&c, 1, 10, "abc").unwrap();
        record_target(&c, 1, 9, "abc").unwrap();
        assert!(!get(&c, 1).unwrap().unwrap().matches());
    }
}
