use crate::constants::{DEFAULT_SPLIT_MAX_PARTS, DEFAULT_SPLIT_THRESHOLD_BYTES};

use super::types::{Partition, Replication};

impl Default for Partition {
    fn default() -> Self {
        Self {
            split_threshold_bytes: DEFAULT_SPLIT_THRESHOLD_BYTES,
            split_max_parts: DEFAULT_SPLIT_MAX_PARTS,
        }
    }
}

impl Default for Replication {
    fn default() -> Self {
        Self {
            plugin: crate::constants::WAL2JSON_PLUGIN.to_string(),
            slot_name: "pgrelay".to_string(),
            endpos: None,
        }
    }
}
