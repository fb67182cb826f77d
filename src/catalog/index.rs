//! `s_index`: index definitions discovered by the schema fetcher and
//! rebuilt by the index worker (component G) once a table's partitions
//! are all copied.

use rusqlite::{Connection, params};

use super::cursor::{query_all, query_optional};

#[derive(Debug, Clone)]
pub struct Index {
    pub oid: i64,
    pub qname: String,
    pub table_oid: i64,
    pub is_primary: bool,
    pub is_unique: bool,
    pub columns_json: String,
    pub definition: String,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Index> {
    Ok(Index {
        oid: row.get(0)?,
        qname: row.get(1)?,
        table_oid: row.get(2)?,
        is_primary: row.get::<_, i64>(3)? != 0,
        is_unique: row.get::<_, i64>(4)? != 0,
        columns_json: row.get(5)?,
        definition: row.get(6)?,
    })
}

const SELECT_COLS: &str = "oid, qname, table_oid, is_primary, is_unique, columns_json, definition";

pub fn insert(conn: &Connection, idx: &Index) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO s_index (oid, qname, table_oid, is_primary, is_unique, columns_json, definition)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(oid) DO UPDATE SET
            qname = excluded.qname, table_oid = excluded.table_oid,
            is_primary = excluded.is_primary, is_unique = excluded.is_unique,
            columns_json = excluded.columns_json, definition = excluded.definition",
        params![
            idx.oid,
            idx.qname,
            idx.table_oid,
            idx.is_primary as i64,
            idx.is_unique as i64,
            idx.columns_json,
            idx.definition,
        ],
    )?;
    Ok(())
}

pub fn find_by_oid(conn: &Connection, oid: i64) -> rusqlite::Result<Option<Index>> {
    query_optional(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_index WHERE oid = ?1"),
        params![oid],
        from_row,
    )
}

pub fn list_for_table(conn: &Connection, table_oid: i64) -> rusqlite::Result<Vec<Index>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_index WHERE table_oid = ?1 ORDER BY qname"),
        params![table_oid],
        from_row,
    )
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<Index>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_index ORDER BY qname"),
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
    fn insert_then_find_round_trips() {
        let c = conn();
        insert(
            &c,
            &Index {
                oid: 10,
                qname: "public.a_pkey".into(),
                table_oid: 1,
                is_primary: true,
                is_unique: true,
                columns_json: "[\"id\"]".into(),
                definition: "CREATE UNIQUE INDEX a_pkey ON public.a (id)".into(),
            },
        )
        .unwrap();
        assert_eq!(list_for_table(&c, 1).unwrap().len(), 1);
        assert!(find_by_oid(&c, 10).unwrap().unwrap().is_primary);
    }
}
