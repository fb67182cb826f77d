//! `s_constraint`: constraints backed by an index (primary key, unique,
//! exclusion) that the index worker attaches with `ALTER TABLE ... ADD
//! CONSTRAINT ... USING INDEX` once the backing index exists on the
//! target (§4.G).

use rusqlite::{Connection, params};

use super::cursor::query_all;

#[derive(Debug, Clone)]
pub struct Constraint {
    pub oid: i64,
    pub name: String,
    pub index_oid: Option<i64>,
    pub table_oid: i64,
    pub is_deferrable: bool,
    pub initially_deferred: bool,
    pub definition: String,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Constraint> {
    Ok(Constraint {
        oid: row.get(0)?,
        name: row.get(1)?,
        index_oid: row.get(2)?,
        table_oid: row.get(3)?,
        is_deferrable: row.get::<_, i64>(4)? != 0,
        initially_deferred: row.get::<_, i64>(5)? != 0,
        definition: row.get(6)?,
    })
}

const SELECT_COLS: &str =
    "oid, name, index_oid, table_oid, is_deferrable, initially_deferred, definition";

pub fn insert(conn: &Connection, c: &Constraint) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO s_constraint (oid, name, index_oid, table_oid, is_deferrable, initially_deferred, definition)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(oid) DO UPDATE SET
            name = excluded.name, index_oid = excluded.index_oid, table_oid = excluded.table_oid,
            is_deferrable = excluded.is_deferrable, initially_deferred = excluded.initially_deferred,
            definition = excluded.definition",
        params![
            c.oid,
            c.name,
            c.index_oid,
            c.table_oid,
            c.is_deferrable as i64,
            c.initially_deferred as i64,
            c.definition,
        ],
    )?;
    Ok(())
}

pub fn list_for_table(conn: &Connection, table_oid: i64) -> rusqlite::Result<Vec<Constraint>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_constraint WHERE table_oid = ?1 ORDER BY name"),
        params![table_oid],
        from_row,
    )
}

pub fn list_for_index(conn: &Connection, index_oid: i64) -> rusqlite::Result<Vec<Constraint>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_constraint WHERE index_oid = ?1"),
        params![index_oid],
        from_row,
    )
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<Constraint>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_constraint ORDER BY name"),
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
        c.execute(
            "INSERT INTO s_index (oid, qname, table_oid, is_primary, is_unique, columns_json, definition) \
             VALUES (10, 'public.a_pkey', 1, 1, 1, '[]', 'def')",
            [],
        )
        .unwrap();
        c
    }

    #[test]
    fn constraint_resolves_to_its_index() {
        let c = conn();
        insert(
            &c,
            &Constraint {
                oid: 20,
                name: "a_pkey".into(),
                index_oid: Some(10),
                table_oid: 1,
                is_deferrable: false,
                initially_deferred: false,
                definition: "PRIMARY KEY (id)".into(),
            },
        )
        .unwrap();
        assert_eq!(list_for_index(&c, 10).unwrap().len(), 1);
        assert_eq!(list_for_table(&c, 1).unwrap().len(), 1);
    }
}
