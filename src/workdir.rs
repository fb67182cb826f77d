//! The working-directory layout of §6: abstractly-typed paths for the three
//! catalog files, the snapshot marker, the CDC working area, and the
//! coarse-stage `.done` sentinels.

use std::path::{Path, PathBuf};

use crate::constants::*;

#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn schema_dir(&self) -> PathBuf {
        self.root.join(SCHEMA_SUBDIR)
    }

    pub fn source_catalog(&self) -> PathBuf {
        self.schema_dir().join(SOURCE_CATALOG_FILE)
    }

    pub fn filter_catalog(&self) -> PathBuf {
        self.schema_dir().join(FILTER_CATALOG_FILE)
    }

    pub fn target_catalog(&self) -> PathBuf {
        self.schema_dir().join(TARGET_CATALOG_FILE)
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn cdc_dir(&self) -> PathBuf {
        self.root.join(CDC_SUBDIR)
    }

    pub fn cdc_origin_file(&self) -> PathBuf {
        self.cdc_dir().join(CDC_ORIGIN_FILE)
    }

    pub fn cdc_slot_file(&self) -> PathBuf {
        self.cdc_dir().join(CDC_SLOT_FILE)
    }

    pub fn cdc_wal_segment_size_file(&self) -> PathBuf {
        self.cdc_dir().join(CDC_WAL_SEGMENT_SIZE_FILE)
    }

    pub fn cdc_tli_file(&self) -> PathBuf {
        self.cdc_dir().join(CDC_TLI_FILE)
    }

    pub fn cdc_tli_history_file(&self) -> PathBuf {
        self.cdc_dir().join(CDC_TLI_HISTORY_FILE)
    }

    pub fn cdc_lsn_file(&self) -> PathBuf {
        self.cdc_dir().join(CDC_LSN_FILE)
    }

    /// `<WAL>.json`: the raw captured-message segment for a WAL segment
    /// name formatted as `<TLI><LogId><SegId>` (§4.H / §6).
    pub fn cdc_segment_json(&self, wal_segment: &str) -> PathBuf {
        self.cdc_dir().join(format!("{wal_segment}.json"))
    }

    /// `<WAL>.sql`: the transformed segment (§4.I / §6).
    pub fn cdc_segment_sql(&self, wal_segment: &str) -> PathBuf {
        self.cdc_dir().join(format!("{wal_segment}.sql"))
    }

    /// `<xid>.json`: per-transaction metadata side file (§4.I / §6).
    pub fn cdc_xid_side_file(&self, xid: u32) -> PathBuf {
        self.cdc_dir().join(format!("{xid}.json"))
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join(RUN_SUBDIR)
    }

    pub fn done_marker(&self, name: &str) -> PathBuf {
        self.run_dir().join(name)
    }

    /// Create `schema/`, `cdc/`, and `run/` if they don't already exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.schema_dir())?;
        std::fs::create_dir_all(self.cdc_dir())?;
        std::fs::create_dir_all(self.run_dir())?;
        Ok(())
    }

    /// Touch a `run/*.done` sentinel file, creating it if absent.
    pub fn mark_done(&self, name: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.run_dir())?;
        std::fs::write(self.done_marker(name), b"")
    }

    pub fn is_done(&self, name: &str) -> bool {
        self.done_marker(name).is_file()
    }
}
