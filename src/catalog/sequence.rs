//! `s_sequence`: sequences, and the owning table/column they advance
//! (`nextval` default, `GENERATED ... AS IDENTITY`), so `clone`/`copy-db`
//! can set the target sequence to the source's last value after the copy
//! phase (§4.F).

use rusqlite::{Connection, params};

use super::cursor::query_all;

#[derive(Debug, Clone)]
pub struct Sequence {
    pub oid: i64,
    pub qname: String,
    pub owning_table_oid: Option<i64>,
    pub owning_column: Option<String>,
    /// Synthetic oid for the owning column's `DEFAULT` expression, so the
    /// filter engine can key that archive entry the same way it keys
    /// every other oid-addressed object (§4.B, §8 S3). Postgres doesn't
    /// hand out a real system oid for attribute rows, so this is derived
    /// from `(owning_table_oid, attnum)` via [`super::attribute::synthetic_oid`].
    pub owning_attribute_oid: Option<i64>,
    pub last_value: i64,
    pub is_called: bool,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Sequence> {
    Ok(Sequence {
        oid: row.get(0)?,
        qname: row.get(1)?,
        owning_table_oid: row.get(2)?,
        owning_column: row.get(3)?,
        owning_attribute_oid: row.get(4)?,
        last_value: row.get(5)?,
        is_called: row.get::<_, i64>(6)? != 0,
    })
}

const SELECT_COLS: &str =
    "oid, qname, owning_table_oid, owning_column, owning_attribute_oid, last_value, is_called";

pub fn insert(conn: &Connection, s: &Sequence) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO s_sequence
            (oid, qname, owning_table_oid, owning_column, owning_attribute_oid, last_value, is_called)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(oid) DO UPDATE SET
            qname = excluded.qname, owning_table_oid = excluded.owning_table_oid,
            owning_column = excluded.owning_column,
            owning_attribute_oid = excluded.owning_attribute_oid,
            last_value = excluded.last_value,
            is_called = excluded.is_called",
        params![
            s.oid,
            s.qname,
            s.owning_table_oid,
            s.owning_column,
            s.owning_attribute_oid,
            s.last_value,
            s.is_called as i64,
        ],
    )?;
    Ok(())
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<Sequence>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_sequence ORDER BY qname"),
        [],
        from_row,
    )
}

pub fn list_owned_by(conn: &Connection, table_oid: i64) -> rusqlite::Result<Vec<Sequence>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_sequence WHERE owning_table_oid = ?1"),
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
    fn owned_sequence_is_findable_by_table() {
        let c = conn();
        insert(
            &c,
            &Sequence {
                oid: 30,
                qname: "public.a_id_seq".into(),
                owning_table_oid: Some(1),
                owning_column: Some("id".into()),
                owning_attribute_oid: Some(super::super::attribute::synthetic_oid(1, 1)),
                last_value: 42,
                is_called: true,
            },
        )
        .unwrap();
        let owned = list_owned_by(&c, 1).unwrap();
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].last_value, 42);
    }
}
