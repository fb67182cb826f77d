//! Component G: the index/constraint worker. Builds one index, then
//! attaches any constraint it backs (§4.G).

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::catalog::{constraint, index, process, summary};
use crate::dbclient::TargetClient;

/// Statements to run on the target for one index unit: the `CREATE
/// INDEX` always runs; the `ALTER TABLE ... ADD CONSTRAINT ... USING
/// INDEX` only runs when the index backs a constraint, and is skipped
/// entirely for EXCLUDE-backed indexes (§4.G: "for EXCLUDE-backed
/// indexes only the constraint is emitted" — there is no separate index
/// to build, the constraint's own DDL creates it).
pub struct IndexPlan {
    pub create_index_sql: Option<String>,
    pub attach_constraint_sql: Option<String>,
}

pub fn plan_index(catalog: &Connection, index_oid: i64) -> Result<IndexPlan> {
    let idx = index::find_by_oid(catalog, index_oid)?
        .with_context(|| format!("index {index_oid} not found in catalog"))?;
    let backing = constraint::list_for_table(catalog, idx.table_oid)?
        .into_iter()
        .find(|c| c.index_oid == Some(idx.oid));

    match backing {
        Some(c) if is_exclusion(&c.definition) => Ok(IndexPlan {
            create_index_sql: None,
            attach_constraint_sql: Some(c.definition.clone()),
        }),
        Some(c) => Ok(IndexPlan {
            create_index_sql: Some(idx.definition.clone()),
            attach_constraint_sql: Some(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} USING INDEX {}",
                table_qname(catalog, idx.table_oid)?,
                c.name,
                unqualified(&idx.qname),
            )),
        }),
        None => Ok(IndexPlan {
            create_index_sql: Some(idx.definition.clone()),
            attach_constraint_sql: None,
        }),
    }
}

fn is_exclusion(definition: &str) -> bool {
    definition.to_uppercase().contains("EXCLUDE")
}

fn unqualified(qname: &str) -> &str {
    qname.rsplit('.').next().unwrap_or(qname)
}

fn table_qname(catalog: &Connection, table_oid: i64) -> Result<String> {
    crate::catalog::table::find_by_oid(catalog, table_oid)?
        .map(|t| t.qname)
        .with_context(|| format!("table {table_oid} not found in catalog"))
}

/// Run one index unit end to end: claim, build, attach, record, release.
/// Concurrency discipline (§4.G: parallel across tables, never against a
/// still-copying table) is enforced by the scheduler's `pending_index_units`,
/// not here.
pub async fn run_unit(
    catalog: &Connection,
    target: &TargetClient,
    index_oid: i64,
    table_oid: i64,
    pid: i64,
    now_epoch: i64,
) -> Result<()> {
    process::claim(
        catalog,
        &process::ProcessRow {
            pid,
            role: "CREATE INDEX".into(),
            title: format!("build index {index_oid}"),
            table_oid: Some(table_oid),
            partnum: None,
            index_oid: Some(index_oid),
        },
    )
    .context("claiming index unit")?;

    summary::start(catalog, Some(table_oid), None, Some(index_oid), pid, "CREATE INDEX", now_epoch)
        .context("recording summary start")?;

    let plan = plan_index(catalog, index_oid)?;
    if let Some(sql) = &plan.create_index_sql {
        target.execute_ddl(sql).await.context("creating index")?;
    }
    if let Some(sql) = &plan.attach_constraint_sql {
        target.execute_ddl(sql).await.context("attaching constraint")?;
    }

    summary::finish(catalog, Some(table_oid), None, Some(index_oid), None, now_epoch)
        .context("recording summary finish")?;
    process::release(catalog, pid).context("releasing index claim")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{schema_sql, table, CatalogKind};

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch(schema_sql::ddl_for(CatalogKind::Source)).unwrap();
        table::insert(
            &c,
            &table::Table {
                oid: 1,
                qname: "public.orders".into(),
                nspname: "public".into(),
                relname: "orders".into(),
                relkind: "r".into(),
                restore_list_name: None,
                est_pages: 0,
                est_tuples: 0,
                exclude_data: false,
                part_key_column: None,
                bytes: 0,
            },
        )
        .unwrap();
        c
    }

    #[test]
    fn plain_index_has_no_constraint_attach() {
        let c = conn();
        index::insert(
            &c,
            &index::Index {
                oid: 10,
                qname: "public.orders_created_at_idx".into(),
                table_oid: 1,
                is_primary: false,
                is_unique: false,
                columns_json: "[]".into(),
                definition: "CREATE INDEX orders_created_at_idx ON orders (created_at)".into(),
            },
        )
        .unwrap();
        let plan = plan_index(&c, 10).unwrap();
        assert!(plan.create_index_sql.is_some());
        assert!(plan.attach_constraint_sql.is_none());
    }

    #[test]
    fn unique_index_backing_pkey_attaches_via_using_index() {
        let c = conn();
        index::insert(
            &c,
            &index::Index {
                oid: 11,
                qname: "public.orders_pkey".into(),
                table_oid: 1,
                is_primary: true,
                is_unique: true,
                columns_json: "[]".into(),
                definition: "CREATE UNIQUE INDEX orders_pkey ON orders (id)".into(),
            },
        )
        .unwrap();
        constraint::insert(
            &c,
            &constraint::Constraint {
                oid: 20,
                name: "orders_pkey".into(),
                index_oid: Some(11),
                table_oid: 1,
                is_deferrable: false,
                initially_deferred: false,
                definition: "PRIMARY KEY (id)".into(),
            },
        )
        .unwrap();
        let plan = plan_index(&c, 11).unwrap();
        assert!(plan.create_index_sql.is_some());
        let attach = plan.attach_constraint_sql.unwrap();
        assert!(attach.contains("USING INDEX orders_pkey"));
        assert!(attach.contains("ADD CONSTRAINT orders_pkey"));
    }

    #[test]
    fn exclusion_constraint_skips_separate_create_index() {
        let c = conn();
        index::insert(
            &c,
            &index::Index {
                oid: 12,
                qname: "public.orders_excl".into(),
                table_oid: 1,
                is_primary: false,
                is_unique: false,
                columns_json: "[]".into(),
                definition: "CREATE INDEX orders_excl ON orders USING gist (during)".into(),
            },
        )
        .unwrap();
        constraint::insert(
            &c,
            &constraint::Constraint {
                oid: 21,
                name: "orders_no_overlap".into(),
                index_oid: Some(12),
                table_oid: 1,
                is_deferrable: false,
                initially_deferred: false,
                definition: "ALTER TABLE orders ADD CONSTRAINT orders_no_overlap EXCLUDE USING gist (during WITH &&)".into(),
            },
        )
        .unwrap();
        let plan = plan_index(&c, 12).unwrap();
        assert!(plan.create_index_sql.is_none());
        assert!(plan.attach_constraint_sql.unwrap().contains("EXCLUDE"));
    }
}
