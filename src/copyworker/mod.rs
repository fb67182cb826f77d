//! Component F: the copy worker. Executes one claimed unit end to end:
//! claim, stream `COPY` source→target, record the summary, release the
//! claim (§4.F).

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::catalog::{attribute, partition, process, summary, table::Table};
use crate::dbclient::{SourceClient, TargetClient};
use crate::schedule::Unit;

/// Build the `COPY (<select>) TO STDOUT (FORMAT binary)` source query for
/// a unit, applying the partition's predicate (integer range or `ctid`
/// block range) when the unit is one of several partitions.
pub fn build_copy_out_sql(catalog: &Connection, t: &Table, unit: &Unit) -> Result<String> {
    let columns = column_list(catalog, t.oid)?;
    let predicate = match unit.partnum {
        Some(partnum) => partition_predicate(catalog, t, partnum)?,
        None => None,
    };
    let select = match predicate {
        Some(p) => format!("SELECT {columns} FROM {} WHERE {p}", t.qname),
        None => format!("SELECT {columns} FROM {}", t.qname),
    };
    Ok(format!("COPY ({select}) TO STDOUT (FORMAT binary)"))
}

/// Build the matching `COPY <qname> (<columns>) FROM STDIN (FORMAT
/// binary)` target query, `OVERRIDING SYSTEM VALUE` when the table
/// carries a generated identity column so inserted values aren't
/// silently replaced (§4.F).
pub fn build_copy_in_sql(catalog: &Connection, t: &Table) -> Result<String> {
    let columns = column_list(catalog, t.oid)?;
    let has_generated = !attribute::list_for_table(catalog, t.oid)?
        .into_iter()
        .filter(|a| a.is_generated)
        .collect::<Vec<_>>()
        .is_empty();
    let overriding = if has_generated { " OVERRIDING SYSTEM VALUE" } else { "" };
    Ok(format!(
        "COPY {} ({columns}) FROM STDIN{overriding} (FORMAT binary)",
        t.qname
    ))
}

fn column_list(catalog: &Connection, table_oid: i64) -> Result<String> {
    let cols = attribute::list_copy_columns(catalog, table_oid)?;
    if cols.is_empty() {
        anyhow::bail!("table {table_oid} has no copyable columns");
    }
    Ok(cols.into_iter().map(|a| a.name).collect::<Vec<_>>().join(", "))
}

fn partition_predicate(catalog: &Connection, t: &Table, partnum: i32) -> Result<Option<String>> {
    let parts = partition::list_for_table(catalog, t.oid)?;
    let Some(p) = parts.into_iter().find(|p| p.partnum == partnum) else {
        return Ok(None);
    };
    let (Some(min), Some(max)) = (p.min.as_deref(), p.max.as_deref()) else {
        return Ok(None);
    };
    let key_col = t.part_key_column.as_deref();
    let predicate = match key_col {
        Some(col) => {
            if p.upper_bound_inclusive {
                format!("{col} >= {min} AND {col} <= {max}")
            } else {
                format!("{col} >= {min} AND {col} < {max}")
            }
        }
        None => format!("ctid >= '{min}'::tid AND ctid < '{max}'::tid"),
    };
    Ok(Some(predicate))
}

/// Run one copy unit: claim, stream, record, release. `now_epoch` is
/// supplied by the caller (unix seconds) since the crate avoids `Date::now`
/// internally to stay deterministic under test.
pub async fn run_unit(
    catalog: &Connection,
    source: &SourceClient,
    target: &TargetClient,
    t: &Table,
    unit: &Unit,
    pid: i64,
    snapshot_id: &str,
    now_epoch: i64,
) -> Result<u64> {
    process::claim(
        catalog,
        &process::ProcessRow {
            pid,
            role: "COPY".into(),
            title: unit.title.clone(),
            table_oid: Some(t.oid),
            partnum: unit.partnum,
            index_oid: None,
        },
    )
    .context("claiming copy unit")?;

    summary::start(catalog, Some(t.oid), unit.partnum, None, pid, "COPY", now_epoch)
        .context("recording summary start")?;

    let copy_out_sql = build_copy_out_sql(catalog, t, unit)?;
    let copy_in_sql = build_copy_in_sql(catalog, t)?;

    let mut txn = source.use_snapshot(snapshot_id).await?;
    let mut chunks = Vec::new();
    let bytes = source
        .copy_out(&mut txn, &copy_out_sql, |chunk| {
            chunks.push(chunk.to_vec());
            Ok(())
        })
        .await
        .context("streaming COPY TO")?;
    txn.rollback().await.ok();

    target
        .copy_in(&copy_in_sql, chunks)
        .await
        .context("streaming COPY FROM")?;

    summary::finish(catalog, Some(t.oid), unit.partnum, None, Some(bytes as i64), now_epoch)
        .context("recording summary finish")?;
    process::release(catalog, pid).context("releasing copy claim")?;

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{attribute::Attribute, schema_sql, table, CatalogKind};

    fn conn() -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch(schema_sql::ddl_for(CatalogKind::Source)).unwrap();
        c
    }

    fn sample(c: &Connection) -> Table {
        let t = Table {
            oid: 1,
            qname: "public.orders".into(),
            nspname: "public".into(),
            relname: "orders".into(),
            relkind: "r".into(),
            restore_list_name: None,
            est_pages: 0,
            est_tuples: 0,
            exclude_data: false,
            part_key_column: Some("id".into()),
            bytes: 0,
        };
        table::insert(c, &t).unwrap();
        attribute::insert(
            c,
            &Attribute {
                table_oid: 1,
                position: 1,
                type_oid: 23,
                name: "id".into(),
                is_pkey_member: true,
                is_generated: false,
            },
        )
        .unwrap();
        attribute::insert(
            c,
            &Attribute {
                table_oid: 1,
                position: 2,
                type_oid: 23,
                name: "computed_total".into(),
                is_pkey_member: false,
                is_generated: true,
            },
        )
        .unwrap();
        t
    }

    #[test]
    fn column_list_skips_generated_columns() {
        let c = conn();
        sample(&c);
        assert_eq!(column_list(&c, 1).unwrap(), "id");
    }

    #[test]
    fn copy_in_sql_omits_overriding_when_no_generated_columns() {
        let c = conn();
        let t = Table {
            part_key_column: None,
            ..sample(&c)
        };
        attribute::insert(
            &c,
            &Attribute {
                table_oid: 1,
                position: 2,
                type_oid: 23,
                name: "computed_total".into(),
                is_pkey_member: false,
                is_generated: false,
            },
        )
        .unwrap();
        let sql = build_copy_in_sql(&c, &t).unwrap();
        assert!(!sql.contains("OVERRIDING SYSTEM VALUE"));
    }

    #[test]
    fn integer_partition_predicate_respects_inclusive_flag() {
        let c = conn();
        let t = sample(&c);
        partition::insert(
            &c,
            &partition::TablePart {
                table_oid: 1,
                partnum: 0,
                partcount: 2,
                min: Some("1".into()),
                max: Some("500".into()),
                upper_bound_inclusive: false,
                row_count: None,
            },
        )
        .unwrap();
        let predicate = partition_predicate(&c, &t, 0).unwrap().unwrap();
        assert_eq!(predicate, "id >= 1 AND id < 500");
    }
}
