//! `filter_entry`: the filter engine's output (§4.B) — the set of objects
//! *excluded* from migration (the skip list), recorded in a catalog of
//! its own so downstream components only ever need a single `NOT
//! EXISTS` check rather than re-evaluating include/exclude rules on
//! every object they touch.

use rusqlite::{Connection, params};

use super::cursor::query_all;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Table,
    Index,
    Constraint,
    Sequence,
    Extension,
    Collation,
    Namespace,
    ColumnDefault,
}

impl EntryKind {
    fn as_str(self) -> &'static str {
        match self {
            EntryKind::Table => "table",
            EntryKind::Index => "index",
            EntryKind::Constraint => "constraint",
            EntryKind::Sequence => "sequence",
            EntryKind::Extension => "extension",
            EntryKind::Collation => "collation",
            EntryKind::Namespace => "namespace",
            EntryKind::ColumnDefault => "column_default",
        }
    }

    fn parse(s: &str) -> EntryKind {
        match s {
            "table" => EntryKind::Table,
            "index" => EntryKind::Index,
            "constraint" => EntryKind::Constraint,
            "sequence" => EntryKind::Sequence,
            "extension" => EntryKind::Extension,
            "collation" => EntryKind::Collation,
            "namespace" => EntryKind::Namespace,
            "column_default" => EntryKind::ColumnDefault,
            other => unreachable!("unknown filter_entry kind {other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterEntry {
    pub oid: Option<i64>,
    pub restore_list_name: Option<String>,
    pub kind: EntryKind,
}

pub fn insert(conn: &Connection, entry: &FilterEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO filter_entry (oid, restore_list_name, kind) VALUES (?1, ?2, ?3)",
        params![entry.oid, entry.restore_list_name, entry.kind.as_str()],
    )?;
    Ok(())
}

pub fn contains_oid(conn: &Connection, oid: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM filter_entry WHERE oid = ?1",
        params![oid],
        |_| Ok(()),
    )
    .optional()
    .map(|v| v.is_some())
}

pub fn list_by_kind(conn: &Connection, kind: EntryKind) -> rusqlite::Result<Vec<FilterEntry>> {
    query_all(
        conn,
        "SELECT oid, restore_list_name, kind FROM filter_entry WHERE kind = ?1",
        params![kind.as_str()],
        |row| {
            Ok(FilterEntry {
                oid: row.get(0)?,
                restore_list_name: row.get(1)?,
                kind: EntryKind::parse(&row.get::<_, String>(2)?),
            })
        },
    )
}

use rusqlite::OptionalExtension;
