//! Component I: the CDC transformer. Converts a segment of captured
//! wal2json messages into an equivalent segment of SQL statements, one
//! per line, preserving message order (§4.I).

use std::collections::HashMap;
use std::io::Write;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::cdc::wire::{statement_fingerprint, ColumnValue, Lsn, WalMessage};
use crate::workdir::WorkDir;

/// Per-segment `PREPARE` dedup map: fingerprint to SQL template, and the
/// set already emitted this segment (§4.I "emits `PREPARE` lazily on
/// first use").
#[derive(Default)]
pub struct PrepareCache {
    templates: HashMap<u32, String>,
    emitted: std::collections::HashSet<u32>,
}

impl PrepareCache {
    /// Returns the lines to write: the `PREPARE` (only on first use) and
    /// the `EXECUTE`.
    fn statements_for(&mut self, template: String, params: &[Value]) -> Vec<String> {
        let fp = statement_fingerprint(&template);
        let mut lines = Vec::new();
        if self.emitted.insert(fp) {
            self.templates.insert(fp, template.clone());
            lines.push(format!("PREPARE stmt_{fp:08x} AS {template};"));
        }
        let params_json = serde_json::to_string(params).unwrap_or_else(|_| "[]".into());
        lines.push(format!("EXECUTE stmt_{fp:08x}({params_json});"));
        lines
    }
}

/// Transform one message into zero or more output lines, using and
/// updating `cache` for INSERT/UPDATE/DELETE dedup, and `side_file_lookup`
/// to recover a BEGIN's commit LSN when the plugin omits it (§4 Open
/// Question 1: the side file must exist on disk before this is called
/// for the corresponding BEGIN, which the receiver/transformer pipeline
/// guarantees by fsyncing it first).
pub fn transform_message(
    msg: &WalMessage,
    lsn: Lsn,
    cache: &mut PrepareCache,
    commit_lsn_for_xid: impl Fn(u32) -> Option<Lsn>,
) -> Vec<String> {
    match msg {
        WalMessage::Begin { xid, timestamp, commit_lsn, .. } => {
            let commit = commit_lsn
                .as_deref()
                .and_then(Lsn::parse)
                .or_else(|| commit_lsn_for_xid(*xid));
            let ts = timestamp.clone().unwrap_or_default();
            match commit {
                Some(c) => vec![format!(
                    "-- BEGIN {{\"lsn\":\"{}\",\"xid\":{xid},\"ts\":\"{ts}\",\"commit_lsn\":\"{}\"}}",
                    lsn.format(),
                    c.format()
                )],
                None => vec![format!(
                    "-- BEGIN {{\"lsn\":\"{}\",\"xid\":{xid},\"ts\":\"{ts}\"}}",
                    lsn.format()
                )],
            }
        }
        WalMessage::Commit { .. } => vec!["COMMIT;".to_string()],
        WalMessage::Insert { schema, table, columns } => {
            let cols: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
            let placeholders: Vec<_> = (1..=columns.len()).map(|i| format!("${i}")).collect();
            let template = format!(
                "INSERT INTO {schema}.{table} ({}) VALUES ({})",
                cols.join(", "),
                placeholders.join(", ")
            );
            let params: Vec<Value> = columns.iter().map(|c| c.value.clone()).collect();
            cache.statements_for(template, &params)
        }
        WalMessage::Update { schema, table, columns, identity } => {
            let set_clause: Vec<_> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = ${}", c.name, i + 1))
                .collect();
            let where_clause: Vec<_> = identity
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = ${}", c.name, columns.len() + i + 1))
                .collect();
            let template = format!(
                "UPDATE {schema}.{table} SET {} WHERE {}",
                set_clause.join(", "),
                where_clause.join(" AND ")
            );
            let params: Vec<Value> = columns
                .iter()
                .chain(identity.iter())
                .map(|c: &ColumnValue| c.value.clone())
                .collect();
            cache.statements_for(template, &params)
        }
        WalMessage::Delete { schema, table, identity } => {
            let where_clause: Vec<_> = identity
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{} = ${}", c.name, i + 1))
                .collect();
            let template = format!("DELETE FROM {schema}.{table} WHERE {}", where_clause.join(" AND "));
            let params: Vec<Value> = identity.iter().map(|c| c.value.clone()).collect();
            cache.statements_for(template, &params)
        }
        WalMessage::Truncate { schema, table } => vec![format!("TRUNCATE {schema}.{table};")],
    }
}

pub fn keepalive_line(lsn: Lsn, ts: &str) -> String {
    format!("-- KEEPALIVE {{\"lsn\":\"{}\",\"ts\":\"{ts}\"}}", lsn.format())
}

pub fn switch_line(lsn: Lsn) -> String {
    format!("-- SWITCH {{\"lsn\":\"{}\"}}", lsn.format())
}

pub fn endpos_line(lsn: Lsn) -> String {
    format!("-- ENDPOS {{\"lsn\":\"{}\"}}", lsn.format())
}

/// Transform an entire `.json` segment file into its `.sql` counterpart.
/// A fresh [`PrepareCache`] is used per segment (§4.I: dedup scope is the
/// segment, not the whole run).
pub fn transform_segment_file(workdir: &WorkDir, segment_name: &str, endpos: Option<Lsn>) -> Result<()> {
    let json_path = workdir.cdc_segment_json(segment_name);
    let sql_path = workdir.cdc_segment_sql(segment_name);
    let contents = std::fs::read_to_string(&json_path)
        .with_context(|| format!("reading CDC segment {}", json_path.display()))?;

    let mut out = std::fs::File::create(&sql_path)
        .with_context(|| format!("creating transformed segment {}", sql_path.display()))?;
    let mut cache = PrepareCache::default();

    for raw_line in contents.lines() {
        if raw_line.trim().is_empty() {
            continue;
        }
        if let Ok(msg) = serde_json::from_str::<WalMessage>(raw_line) {
            let lsn = message_lsn(&msg).unwrap_or(Lsn::ZERO);
            if let Some(end) = endpos {
                if end != Lsn::ZERO && end <= lsn {
                    writeln!(out, "{}", endpos_line(end))?;
                    break;
                }
            }
            let side_file_lookup = |xid: u32| -> Option<Lsn> {
                let path = workdir.cdc_xid_side_file(xid);
                let text = std::fs::read_to_string(path).ok()?;
                let v: Value = serde_json::from_str(&text).ok()?;
                v.get("commit_lsn")?.as_str().and_then(Lsn::parse)
            };
            for line in transform_message(&msg, lsn, &mut cache, side_file_lookup) {
                writeln!(out, "{line}").context("writing transformed line")?;
            }
        }
    }
    Ok(())
}

fn message_lsn(msg: &WalMessage) -> Option<Lsn> {
    match msg {
        WalMessage::Begin { lsn, .. } => lsn.as_deref().and_then(Lsn::parse),
        WalMessage::Commit { lsn, .. } => Lsn::parse(lsn),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_prepared_once_and_executed_per_row() {
        let mut cache = PrepareCache::default();
        let msg = WalMessage::Insert {
            schema: "public".into(),
            table: "orders".into(),
            columns: vec![ColumnValue {
                name: "id".into(),
                type_name: "int4".into(),
                value: Value::from(1),
            }],
        };
        let first = transform_message(&msg, Lsn(1), &mut cache, |_| None);
        assert_eq!(first.len(), 2);
        assert!(first[0].starts_with("PREPARE"));
        assert!(first[1].starts_with("EXECUTE"));

        let second = transform_message(&msg, Lsn(2), &mut cache, |_| None);
        assert_eq!(second.len(), 1, "second occurrence should skip PREPARE");
        assert!(second[0].starts_with("EXECUTE"));
    }

    #[test]
    fn begin_without_commit_lsn_falls_back_to_side_file_lookup() {
        let mut cache = PrepareCache::default();
        let msg = WalMessage::Begin {
            xid: 42,
            lsn: Some("0/100".into()),
            timestamp: Some("2026-01-01T00:00:00Z".into()),
            commit_lsn: None,
        };
        let lines = transform_message(&msg, Lsn(0x100), &mut cache, |xid| {
            assert_eq!(xid, 42);
            Lsn::parse("0/200")
        });
        assert!(lines[0].contains("0/200"));
    }

    #[test]
    fn truncate_emits_plain_statement() {
        let mut cache = PrepareCache::default();
        let msg = WalMessage::Truncate { schema: "public".into(), table: "orders".into() };
        let lines = transform_message(&msg, Lsn(0), &mut cache, |_| None);
        assert_eq!(lines, vec!["TRUNCATE public.orders;".to_string()]);
    }
}
