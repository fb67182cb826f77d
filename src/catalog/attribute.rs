//! `s_attribute`: column metadata, used by the copy worker to build
//! column lists for `COPY` (skipping generated columns, see §4.F) and by
//! the partitioner to find a table's primary-key column.

use rusqlite::{Connection, params};

use super::cursor::query_all;

#[derive(Debug, Clone)]
pub struct Attribute {
    pub table_oid: i64,
    pub position: i32,
    pub type_oid: i64,
    pub name: String,
    pub is_pkey_member: bool,
    pub is_generated: bool,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Attribute> {
    Ok(Attribute {
        table_oid: row.get(0)?,
        position: row.get(1)?,
        type_oid: row.get(2)?,
        name: row.get(3)?,
        is_pkey_member: row.get::<_, i64>(4)? != 0,
        is_generated: row.get::<_, i64>(5)? != 0,
    })
}

const SELECT_COLS: &str = "table_oid, position, type_oid, name, is_pkey_member, is_generated";

/// Postgres hands out no real system oid for `pg_attribute` rows, but the
/// filter engine still needs one to key a sequence's owning-column
/// `DEFAULT` archive entry by oid (§4.B, §8 S3). `(table_oid, attnum)`
/// already uniquely identifies a column, so combine them into one stable
/// integer rather than widen every oid-keyed lookup to a composite key.
pub fn synthetic_oid(table_oid: i64, position: i32) -> i64 {
    table_oid * 100_000 + position as i64
}

pub fn insert(conn: &Connection, a: &Attribute) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO s_attribute (table_oid, position, type_oid, name, is_pkey_member, is_generated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(table_oid, position) DO UPDATE SET
            type_oid = excluded.type_oid, name = excluded.name,
            is_pkey_member = excluded.is_pkey_member, is_generated = excluded.is_generated",
        params![
            a.table_oid,
            a.position,
            a.type_oid,
            a.name,
            a.is_pkey_member as i64,
            a.is_generated as i64,
        ],
    )?;
    Ok(())
}

pub fn list_for_table(conn: &Connection, table_oid: i64) -> rusqlite::Result<Vec<Attribute>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_attribute WHERE table_oid = ?1 ORDER BY position"),
        params![table_oid],
        from_row,
    )
}

/// Columns eligible for `COPY`: everything except generated columns,
/// which Postgres computes server-side and rejects in a `COPY` column
/// list (§4.F).
pub fn list_copy_columns(conn: &Connection, table_oid: i64) -> rusqlite::Result<Vec<Attribute>> {
    query_all(
        conn,
        &format!(
            "SELECT {SELECT_COLS} FROM s_attribute \
             WHERE table_oid = ?1 AND is_generated = 0 ORDER BY position"
        ),
        params![table_oid],
        from_row,
    )
}

pub fn pkey_columns(conn: &Connection, table_oid: i64) -> rusqlite::Result<Vec<Attribute>> {
    query_all(
        conn,
        &format!(
            "SELECT {SELECT_COLS} FROM s_attribute \
             WHERE table_oid = ?1 AND is_pkey_member = 1 ORDER BY position"
        ),
        params![table_oid],
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
    fn generated_columns_excluded_from_copy_list() {
        let c = conn();
        insert(&c, &Attribute { table_oid: 1, position: 1, type_oid: 23, name: "id".into(), is_pkey_member: true, is_generated: false }).unwrap();
        insert(&c, &Attribute { table_oid: 1, position: 2, type_oid: 23, name: "computed".into(), is_pkey_member: false, is_generated: true }).unwrap();

        let copy_cols = list_copy_columns(&c, 1).unwrap();
        assert_eq!(copy_cols.len(), 1);
        assert_eq!(copy_cols[0].name, "id");

        let pkeys = pkey_columns(&c, 1).unwrap();
        assert_eq!(pkeys.len(), 1);
        assert_eq!(pkeys[0].name, "id");
    }
}
