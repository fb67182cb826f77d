use clap::Args;
use serde::{Deserialize, Serialize};

/// Raw configuration input — every field optional so file, CLI and
/// environment layers can be merged before resolving defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigInput {
    pub databases: Option<DatabasesInput>,
    pub directories: Option<DirectoriesInput>,
    pub partition: Option<PartitionInput>,
    pub filter: Option<FilterSpecInput>,
    pub replication: Option<ReplicationInput>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabasesInput {
    pub source_url: Option<String>,
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DirectoriesInput {
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PartitionInput {
    pub split_threshold_bytes: Option<i64>,
    pub split_max_parts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReplicationInput {
    pub plugin: Option<String>,
    pub slot_name: Option<String>,
    pub endpos: Option<String>,
}

/// The filter specification persisted verbatim in the `Setup` entity
/// (§3): include/exclude lists by object kind, plus global switches.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct FilterSpecInput {
    #[serde(default)]
    pub include_schemas: Vec<String>,
    #[serde(default)]
    pub exclude_schemas: Vec<String>,
    #[serde(default)]
    pub include_tables: Vec<String>,
    #[serde(default)]
    pub exclude_tables: Vec<String>,
    #[serde(default)]
    pub include_sequences: Vec<String>,
    #[serde(default)]
    pub exclude_sequences: Vec<String>,
    #[serde(default)]
    pub include_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_extensions: Vec<String>,
    #[serde(default)]
    pub skip_extensions: bool,
    #[serde(default)]
    pub skip_collations: bool,
}

/// Resolved configuration, all defaults applied.
#[derive(Debug, Clone)]
pub struct Config {
    pub databases: Databases,
    pub dir: std::path::PathBuf,
    pub partition: Partition,
    pub filter: FilterSpecInput,
    pub replication: Replication,
    pub resume: bool,
    pub force: bool,
    pub not_consistent: bool,
}

#[derive(Debug, Clone)]
pub struct Databases {
    pub source_url: String,
    pub target_url: String,
}

#[derive(Debug, Clone)]
pub struct Partition {
    pub split_threshold_bytes: i64,
    pub split_max_parts: u32,
}

#[derive(Debug, Clone)]
pub struct Replication {
    pub plugin: String,
    pub slot_name: String,
    pub endpos: Option<String>,
}

/// CLI flags shared by every subcommand that touches source/target.
#[derive(Args, Clone, Debug, Default)]
pub struct DatabaseArgs {
    /// Source Postgres DSN. Falls back to `PGRELAY_SOURCE_URL`.
    #[arg(long, env = "PGRELAY_SOURCE_URL")]
    pub source: Option<String>,

    /// Target Postgres DSN. Falls back to `PGRELAY_TARGET_URL`.
    #[arg(long, env = "PGRELAY_TARGET_URL")]
    pub target: Option<String>,
}

impl From<DatabaseArgs> for DatabasesInput {
    fn from(args: DatabaseArgs) -> Self {
        DatabasesInput {
            source_url: args.source,
            target_url: args.target,
        }
    }
}

#[derive(Args, Clone, Debug, Default)]
pub struct DirectoryArgs {
    /// Working directory holding the catalog files, snapshot and CDC area.
    #[arg(long, default_value = "./pgrelay-work")]
    pub dir: String,
}

impl From<DirectoryArgs> for DirectoriesInput {
    fn from(args: DirectoryArgs) -> Self {
        DirectoriesInput { dir: Some(args.dir) }
    }
}
