//! `s_depend`: a flattened copy of the source's `pg_depend`, used by the
//! filter engine (component B) to compute the dependency closure of an
//! explicitly-included object (e.g. an extension pulling in its support
//! functions, or a sequence pulled in by the column that owns it).

use rusqlite::{Connection, params};

use super::cursor::query_all;

#[derive(Debug, Clone)]
pub struct Depend {
    pub nspname: String,
    pub relname: String,
    pub refclassid: i64,
    pub refobjid: i64,
    pub classid: i64,
    pub objid: i64,
    pub deptype: String,
    pub kind: String,
    pub identity: String,
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Depend> {
    Ok(Depend {
        nspname: row.get(0)?,
        relname: row.get(1)?,
        refclassid: row.get(2)?,
        refobjid: row.get(3)?,
        classid: row.get(4)?,
        objid: row.get(5)?,
        deptype: row.get(6)?,
        kind: row.get(7)?,
        identity: row.get(8)?,
    })
}

const SELECT_COLS: &str =
    "nspname, relname, refclassid, refobjid, classid, objid, deptype, type, identity";

pub fn insert(conn: &Connection, d: &Depend) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO s_depend (nspname, relname, refclassid, refobjid, classid, objid, deptype, type, identity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            d.nspname, d.relname, d.refclassid, d.refobjid, d.classid, d.objid, d.deptype, d.kind,
            d.identity,
        ],
    )?;
    Ok(())
}

pub fn list_all(conn: &Connection) -> rusqlite::Result<Vec<Depend>> {
    query_all(conn, &format!("SELECT {SELECT_COLS} FROM s_depend"), [], from_row)
}

/// Objects that `(refclassid, refobjid)` depends on (i.e. edges pointing
/// away from it), used when walking the closure outward from a selected
/// object.
pub fn list_dependents_of(
    conn: &Connection,
    refclassid: i64,
    refobjid: i64,
) -> rusqlite::Result<Vec<Depend>> {
    query_all(
        conn,
        &format!("SELECT {SELECT_COLS} FROM s_depend WHERE refclassid = ?1 AND refobjid = ?2"),
        params![refclassid, refobjid],
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
    fn dependents_filtered_by_referenced_object() {
        let c = conn();
        insert(
            &c,
            &Depend {
                nspname: "public".into(),
                relname: "a_id_seq".into(),
                refclassid: 1259,
                refobjid: 1,
                classid: 1259,
                objid: 30,
                deptype: "a".into(),
                kind: "sequence".into(),
                identity: "public.a_id_seq".into(),
            },
        )
        .unwrap();
        assert_eq!(list_dependents_of(&c, 1259, 1).unwrap().len(), 1);
        assert_eq!(list_dependents_of(&c, 1259, 999).unwrap().len(), 0);
    }
}
