//! Component D: the partitioner. Decides whether a table needs to be
//! split into parallel copy units and, if so, records the partitions
//! (§4.D).

use anyhow::Result;
use rusqlite::Connection;

use crate::catalog::partition::{self, TablePart};
use crate::catalog::table::Table;
use crate::catalog::{attribute, CatalogStore};

#[derive(Debug, Clone, Copy)]
pub struct PartitionConfig {
    pub split_threshold_bytes: i64,
    pub split_max_parts: u32,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            split_threshold_bytes: crate::constants::DEFAULT_SPLIT_THRESHOLD_BYTES,
            split_max_parts: crate::constants::DEFAULT_SPLIT_MAX_PARTS,
        }
    }
}

/// A table's live min/max for its chosen integer key, fetched by the
/// caller against the source before calling [`plan`].
#[derive(Debug, Clone, Copy)]
pub struct IntegerKeyRange {
    pub min: i64,
    pub max: i64,
}

/// Decide the partition set for one table (§4.D). Pure function over
/// already-fetched inputs — no I/O — so the split-count math can be unit
/// tested without a live database.
pub fn plan(
    table_bytes: i64,
    int_key_range: Option<IntegerKeyRange>,
    config: &PartitionConfig,
) -> Vec<TablePart> {
    if table_bytes < config.split_threshold_bytes {
        return Vec::new();
    }

    let partcount = split_count(table_bytes, config);

    match int_key_range {
        Some(range) => integer_key_partitions(partcount, range),
        None => ctid_partitions(partcount, table_bytes),
    }
}

fn split_count(table_bytes: i64, config: &PartitionConfig) -> u32 {
    let threshold = config.split_threshold_bytes.max(1);
    let raw = (table_bytes as f64 / threshold as f64).ceil() as u32;
    raw.max(1).min(config.split_max_parts.max(1))
}

fn integer_key_partitions(partcount: u32, range: IntegerKeyRange) -> Vec<TablePart> {
    let span = (range.max - range.min + 1).max(0) as u64;
    let step = (span / partcount as u64).max(1);

    let mut parts = Vec::with_capacity(partcount as usize);
    for k in 0..partcount {
        let lo = range.min + (k as u64 * step) as i64;
        let hi = if k + 1 == partcount {
            range.max
        } else {
            range.min + ((k as u64 + 1) * step) as i64
        };
        parts.push(TablePart {
            table_oid: 0,
            partnum: k as i32,
            partcount: partcount as i32,
            min: Some(lo.to_string()),
            max: Some(hi.to_string()),
            upper_bound_inclusive: k + 1 == partcount,
            row_count: None,
        });
    }
    parts
}

/// `ctid` fallback: partition by block number, `(block_k,0)` through
/// `(block_{k+1},0)`, upper bound always exclusive (S2 in §8) — a table
/// without a usable integer key is split on physical layout instead.
fn ctid_partitions(partcount: u32, table_bytes: i64) -> Vec<TablePart> {
    const BLOCK_SIZE: i64 = 8192;
    let total_blocks = (table_bytes / BLOCK_SIZE).max(1);
    let step = (total_blocks as u64 / partcount as u64).max(1);

    let mut parts = Vec::with_capacity(partcount as usize);
    for k in 0..partcount {
        let lo = (k as u64 * step) as i64;
        let hi = if k + 1 == partcount {
            total_blocks
        } else {
            ((k as u64 + 1) * step) as i64
        };
        parts.push(TablePart {
            table_oid: 0,
            partnum: k as i32,
            partcount: partcount as i32,
            min: Some(format!("({lo},0)")),
            max: Some(format!("({hi},0)")),
            upper_bound_inclusive: false,
            row_count: None,
        });
    }
    parts
}

/// Find the table's designated integer partition key: the primary-key
/// column, if it is a single column and of an integer-looking name. The
/// caller still has to read its live min/max against the source; this
/// only decides which column (if any) to use.
pub fn choose_integer_key(catalog: &Connection, table_oid: i64) -> Result<Option<String>> {
    let pkey_cols: Vec<_> = attribute::list_for_table(catalog, table_oid)?
        .into_iter()
        .filter(|a| a.is_pkey_member)
        .collect();
    if pkey_cols.len() == 1 {
        Ok(Some(pkey_cols[0].name.clone()))
    } else {
        Ok(None)
    }
}

/// Plan and persist a table's partitions under the writer gate (§4.D:
/// "partition records are inserted atomically under the writer gate").
pub fn plan_and_store(
    catalog: &mut CatalogStore,
    table: &Table,
    int_key_range: Option<IntegerKeyRange>,
    config: &PartitionConfig,
) -> Result<Vec<TablePart>> {
    let mut parts = plan(table.bytes, int_key_range, config);
    for p in parts.iter_mut() {
        p.table_oid = table.oid;
    }

    let txn = catalog.begin(true)?;
    for p in &parts {
        partition::insert(txn.connection(), p)?;
    }
    txn.commit()?;

    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PartitionConfig {
        PartitionConfig {
            split_threshold_bytes: 256 * 1024 * 1024,
            split_max_parts: 8,
        }
    }

    #[test]
    fn below_threshold_is_not_split() {
        let parts = plan(100 * 1024 * 1024, Some(IntegerKeyRange { min: 1, max: 1000 }), &cfg());
        assert!(parts.is_empty());
    }

    /// S1 from §8: 1_048_576_000 bytes, 256 MiB threshold, max 8 parts,
    /// integer key spanning 1..10_000_000.
    #[test]
    fn s1_integer_key_split() {
        let parts = plan(
            1_048_576_000,
            Some(IntegerKeyRange { min: 1, max: 10_000_000 }),
            &cfg(),
        );
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].min.as_deref(), Some("1"));
        assert_eq!(parts[0].max.as_deref(), Some("2500001"));
        assert!(!parts[0].upper_bound_inclusive);
        assert_eq!(parts[1].min.as_deref(), Some("2500001"));
        assert_eq!(parts[1].max.as_deref(), Some("5000001"));
        assert_eq!(parts[3].min.as_deref(), Some("7500001"));
        assert_eq!(parts[3].max.as_deref(), Some("10000000"));
        assert!(parts[3].upper_bound_inclusive);
    }

    /// S2 from §8: same size, no integer key — falls back to ctid block
    /// ranges with an always-exclusive upper bound.
    #[test]
    fn s2_ctid_fallback_split() {
        let parts = plan(1_048_576_000, None, &cfg());
        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(|p| !p.upper_bound_inclusive));
        assert!(parts[0].min.as_deref().unwrap().starts_with('('));
    }

    #[test]
    fn partition_count_is_clamped_to_split_max_parts() {
        let huge = cfg().split_threshold_bytes * 100;
        let parts = plan(huge, Some(IntegerKeyRange { min: 0, max: 1_000_000 }), &cfg());
        assert_eq!(parts.len(), 8);
    }

    #[test]
    fn partitions_cover_the_full_key_range_without_gaps() {
        let parts = plan(
            1_048_576_000,
            Some(IntegerKeyRange { min: 1, max: 10_000_000 }),
            &cfg(),
        );
        for w in parts.windows(2) {
            assert_eq!(w[0].max, w[1].min);
        }
    }
}
