//! `s_table_part`: the work units the partitioner (component D) splits a
//! table into. §4.D's S1/S2 scenarios and the coverage/disjointness
//! properties of §8 are stated in terms of this table.

use rusqlite::{Connection, params};

use super::cursor::query_all;

#[derive(Debug, Clone)]
pub struct TablePart {
    pub table_oid: i64,
    pub partnum: i32,
    pub partcount: i32,
    pub min: Option<String>,
    pub max: Option<String>,
    pub upper_bound_inclusive: bool,
    pub row_count: Option<i64>,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<TablePart> {
    Ok(TablePart {
        table_oid: row.get(0)?,
        partnum: row.get(1)?,
        partcount: row.get(2)?,
        min: row.get(3)?,
        max: row.get(4)?,
        upper_bound_inclusive: row.get::<_, i64>(5)? != 0,
        row_count: row.get(6)?,
    })
}

const SELECT_COLS: &str = "table_oid, partnum, partcount, min, max, upper_bound_inclusive, row_count";

pub fn insert(conn: &Connection, p: &TablePart) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO s_table_part (table_oid, partnum, partcount, min, max, upper_bound_inclusive, row_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            p.table_oid,
            p.partnum,
            p.partcount,
            p.min,
            p.max,
            p.upper_bound_inclusive as i64,
            p.row_count,
        ],
    )?;
    Ok(())
}

pub fn list_for_table(conn: &Connection, table_oid: i64) -> rusqlite::Result<Vec<TablePart>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_table_part WHERE table_oid = ?1 ORDER BY partnum"),
        params![table_oid],
        from_row,
    )
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<TablePart>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_table_part ORDER BY table_oid, partnum"),
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
        c.execute(
            "INSERT INTO s_table (oid, qname, nspname, relname, relkind) VALUES (1, 'public.a', 'public', 'a', 'r')",
            [],
        )
        .unwrap();
        c
    }

    #[test]
    fn partitions_are_ordered_and_cover_table() {
        let c = conn();
        for i in 0..4 {
            insert(
                &c,
                &TablePart {
                    table_oid: 1,
                    partnum: i,
                    partcount: 4,
                    min: Some((i * 100).to_string()),
                    max: Some(((i + 1) * 100).to_string()),
                    upper_bound_inclusive: i == 3,
                    row_count: None,
                },
            )
            .unwrap();
        }
        let parts = list_for_table(&c, 1).unwrap();
        assert_eq!(parts.len(), 4);
        for (idx, p) in parts.iter().enumerate() {
            assert_eq!(p.partnum, idx as i32);
        }
        assert!(parts.last().unwrap().upper_bound_inclusive);
        assert!(!parts.first().unwrap().upper_bound_inclusive);
    }
}
