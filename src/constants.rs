use std::time::Duration;

/// Base delay for the shared exponential-with-cap back-off policy (§9).
pub const BACKOFF_BASE: Duration = Duration::from_millis(10);
/// Per-attempt delay cap.
pub const BACKOFF_CAP: Duration = Duration::from_millis(350);
/// Total time budget before a retried operation fails with `Busy`.
pub const BACKOFF_TOTAL: Duration = Duration::from_secs(5);

/// Default split threshold: tables larger than this get partitioned (§4.D).
pub const DEFAULT_SPLIT_THRESHOLD_BYTES: i64 = 256 * 1024 * 1024;
/// Default clamp on partitions per table.
pub const DEFAULT_SPLIT_MAX_PARTS: u32 = 8;

/// How often the sentinel row is polled while waiting for `apply=true` (§4.J).
pub const SENTINEL_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// How often the scheduler scans `process` rows for vanished pids (§4.E).
pub const LIVENESS_SCAN_INTERVAL: Duration = Duration::from_secs(5);

pub const CONFIG_FILENAME: &str = "pgrelay.yaml";

/// Catalog namespace file names under `<dir>/schema/` (§6).
pub const SOURCE_CATALOG_FILE: &str = "source.db";
pub const FILTER_CATALOG_FILE: &str = "filter.db";
pub const TARGET_CATALOG_FILE: &str = "target.db";

pub const SNAPSHOT_FILE: &str = "snapshot";

/// CDC working area file/subdir names under `<dir>/cdc/` (§6).
pub const CDC_SUBDIR: &str = "cdc";
pub const CDC_ORIGIN_FILE: &str = "origin";
pub const CDC_SLOT_FILE: &str = "slot";
pub const CDC_WAL_SEGMENT_SIZE_FILE: &str = "wal_segment_size";
pub const CDC_TLI_FILE: &str = "tli";
pub const CDC_TLI_HISTORY_FILE: &str = "tli.history";
pub const CDC_LSN_FILE: &str = "lsn.json";

pub const RUN_SUBDIR: &str = "run";
pub const SCHEMA_SUBDIR: &str = "schema";

/// Coarse-stage `.done` sentinel names under `<dir>/run/` (supplemented, SPEC_FULL §2).
pub const DONE_PRE_DATA: &str = "pre-data-dump.done";
pub const DONE_POST_DATA: &str = "post-data-dump.done";
pub const DONE_PRE_DATA_RESTORE: &str = "pre-data-restore.done";
pub const DONE_POST_DATA_RESTORE: &str = "post-data-restore.done";
pub const DONE_TABLES: &str = "tables.done";
pub const DONE_INDEXES: &str = "indexes.done";
pub const DONE_SEQUENCES: &str = "sequences.done";
pub const DONE_BLOBS: &str = "blobs.done";

/// wal2json plugin options used when creating/consuming the replication slot (§4.H).
pub const WAL2JSON_PLUGIN: &str = "wal2json";
pub const WAL2JSON_OPTIONS: &[(&str, &str)] = &[
    ("format-version", "2"),
    ("include-xids", "true"),
    ("include-lsn", "true"),
    ("include-transaction", "true"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_bounds_are_sane() {
        assert!(BACKOFF_BASE < BACKOFF_CAP);
        assert!(BACKOFF_CAP < BACKOFF_TOTAL);
    }
}
