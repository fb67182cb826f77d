//! Component B: the filter engine. Evaluates the configured include/
//! exclude rules against the populated source catalog and records the
//! result as a skip list in the `filter` catalog's `filter_entry` table
//! (§4.B) — downstream components decide "do I touch this object?" with
//! a single `NOT EXISTS` lookup rather than re-running glob matching.

use anyhow::Result;
use glob::Pattern;
use rusqlite::Connection;

use crate::catalog::filter_entry::{self, EntryKind, FilterEntry};
use crate::catalog::table::Table;
use crate::catalog::{dependency, index, sequence, table};
use crate::config::types::FilterSpecInput;

/// Does `qname` (`schema.relname`) survive the include/exclude glob
/// pair? An include list, if non-empty, is a whitelist: nothing matches
/// unless it matches one of its patterns. Exclude patterns always win.
fn matches_filters(qname: &str, nspname: &str, include: &[String], exclude: &[String]) -> bool {
    let included = include.is_empty()
        || include
            .iter()
            .any(|p| glob_match(p, qname) || glob_match(p, nspname));
    let excluded = exclude
        .iter()
        .any(|p| glob_match(p, qname) || glob_match(p, nspname));
    included && !excluded
}

fn glob_match(pattern: &str, candidate: &str) -> bool {
    Pattern::new(pattern)
        .map(|p| p.matches(candidate))
        .unwrap_or(false)
}

fn table_selected(t: &Table, spec: &FilterSpecInput) -> bool {
    matches_filters(&t.qname, &t.nspname, &spec.include_tables, &spec.exclude_tables)
        && matches_filters(&t.nspname, &t.nspname, &spec.include_schemas, &spec.exclude_schemas)
}

/// Run the filter engine: read `source`, write exclusion rows into
/// `filter`. Additive and write-once per run (§4.B invariant) — callers
/// must not call this twice against the same filter catalog within one
/// run.
pub fn build(source: &Connection, filter: &Connection, spec: &FilterSpecInput) -> Result<()> {
    let tables = table::list_all(source)?;
    let mut table_selection = std::collections::HashMap::new();

    for t in &tables {
        let selected = table_selected(t, spec);
        table_selection.insert(t.oid, selected);
        if !selected {
            filter_entry::insert(
                filter,
                &FilterEntry {
                    oid: Some(t.oid),
                    restore_list_name: Some(t.qname.clone()),
                    kind: EntryKind::Table,
                },
            )?;
        }
    }

    for idx in index::list_all(source)? {
        if !*table_selection.get(&idx.table_oid).unwrap_or(&true) {
            filter_entry::insert(
                filter,
                &FilterEntry {
                    oid: Some(idx.oid),
                    restore_list_name: Some(idx.qname.clone()),
                    kind: EntryKind::Index,
                },
            )?;
        }
    }

    for c in crate::catalog::constraint::list_all(source)? {
        if !*table_selection.get(&c.table_oid).unwrap_or(&true) {
            filter_entry::insert(
                filter,
                &FilterEntry {
                    oid: Some(c.oid),
                    restore_list_name: None,
                    kind: EntryKind::Constraint,
                },
            )?;
        }
    }

    for seq in sequence::list_all(source)? {
        let owner_selected = seq
            .owning_table_oid
            .map(|oid| *table_selection.get(&oid).unwrap_or(&true))
            .unwrap_or(true);
        let seq_own_match = matches_filters(
            &seq.qname,
            "",
            &spec.include_sequences,
            &spec.exclude_sequences,
        );
        let seq_selected = seq_own_match && owner_selected;

        if !seq_selected {
            filter_entry::insert(
                filter,
                &FilterEntry {
                    oid: Some(seq.oid),
                    restore_list_name: Some(seq.qname.clone()),
                    kind: EntryKind::Sequence,
                },
            )?;
        }

        // "Owned by" clause: filtered out additionally when the owning
        // table is also not in the selection (§4.B).
        if !seq_selected && !owner_selected {
            filter_entry::insert(
                filter,
                &FilterEntry {
                    oid: None,
                    restore_list_name: Some(format!("{} owned by", seq.qname)),
                    kind: EntryKind::Sequence,
                },
            )?;
            filter_entry::insert(
                filter,
                &FilterEntry {
                    oid: seq.owning_attribute_oid,
                    restore_list_name: Some(format!("DEFAULT {}", seq.qname)),
                    kind: EntryKind::ColumnDefault,
                },
            )?;
        }
    }

    let all_sequences = sequence::list_all(source)?;
    for dep in dependency::list_all(source)? {
        // A pg_depend row is excluded when its target object is not a
        // selected sequence (§4.B).
        let mut target_is_selected_sequence = false;
        for s in &all_sequences {
            if s.oid == dep.refobjid && !filter_entry::contains_oid(filter, s.oid)? {
                target_is_selected_sequence = true;
                break;
            }
        }
        if !target_is_selected_sequence {
            filter_entry::insert(
                filter,
                &FilterEntry {
                    oid: None,
                    restore_list_name: Some(dep.identity.clone()),
                    kind: EntryKind::Namespace,
                },
            )?;
        }
    }

    if spec.skip_extensions {
        filter_entry::insert(
            filter,
            &FilterEntry {
                oid: None,
                restore_list_name: Some("*".into()),
                kind: EntryKind::Extension,
            },
        )?;
    }
    if spec.skip_collations {
        filter_entry::insert(
            filter,
            &FilterEntry {
                oid: None,
                restore_list_name: Some("*".into()),
                kind: EntryKind::Collation,
            },
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogKind, schema_sql};

    fn conn(kind: CatalogKind) -> Connection {
        let c = Connection::open_in_memory().unwrap();
        c.execute_batch(schema_sql::ddl_for(kind)).unwrap();
        c
    }

    fn sample_table(oid: i64, nspname: &str, relname: &str) -> Table {
        Table {
            oid,
            qname: format!("{nspname}.{relname}"),
            nspname: nspname.into(),
            relname: relname.into(),
            relkind: "r".into(),
            restore_list_name: None,
            est_pages: 1,
            est_tuples: 1,
            exclude_data: false,
            part_key_column: None,
            bytes: 0,
        }
    }

    #[test]
    fn table_outside_include_list_is_excluded() {
        let source = conn(CatalogKind::Source);
        table::insert(&source, &sample_table(1, "public", "a")).unwrap();
        table::insert(&source, &sample_table(2, "reporting", "b")).unwrap();
        let filter = conn(CatalogKind::Filter);

        let spec = FilterSpecInput {
            include_schemas: vec!["public".into()],
            ..Default::default()
        };
        build(&source, &filter, &spec).unwrap();

        assert!(!filter_entry::contains_oid(&filter, 1).unwrap());
        assert!(filter_entry::contains_oid(&filter, 2).unwrap());
    }

    #[test]
    fn sequence_follows_excluded_owning_table() {
        let source = conn(CatalogKind::Source);
        table::insert(&source, &sample_table(42, "public", "orders")).unwrap();
        let owning_attribute_oid = crate::catalog::attribute::synthetic_oid(42, 1);
        sequence::insert(
            &source,
            &crate::catalog::sequence::Sequence {
                oid: 50,
                qname: "public.orders_id_seq".into(),
                owning_table_oid: Some(42),
                owning_column: Some("id".into()),
                owning_attribute_oid: Some(owning_attribute_oid),
                last_value: 1,
                is_called: false,
            },
        )
        .unwrap();
        let filter = conn(CatalogKind::Filter);

        let spec = FilterSpecInput {
            exclude_tables: vec!["public.orders".into()],
            ..Default::default()
        };
        build(&source, &filter, &spec).unwrap();

        assert!(filter_entry::contains_oid(&filter, 42).unwrap());
        assert!(filter_entry::contains_oid(&filter, 50).unwrap());
        let owned_by = filter_entry::list_by_kind(&filter, EntryKind::Sequence).unwrap();
        assert!(owned_by.iter().any(|e| e
            .restore_list_name
            .as_deref()
            .map(|n| n.ends_with("owned by"))
            .unwrap_or(false)));

        let default_entries = filter_entry::list_by_kind(&filter, EntryKind::ColumnDefault).unwrap();
        assert!(default_entries.iter().any(|e| e.oid == Some(owning_attribute_oid)));
    }
}
