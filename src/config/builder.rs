use anyhow::{Context, Result};

use super::merge::merge;
use super::types::{Config, ConfigInput, Databases, Partition, Replication};
use crate::error::EngineError;

/// Layers configuration the way the spec's Setup entity expects it to be
/// assembled: an optional YAML file, then CLI flags (which may themselves
/// carry `env`-sourced values via clap), resolved into a fully-populated
/// [`Config`]. Precedence: CLI > file > built-in defaults.
#[derive(Default)]
pub struct ConfigBuilder {
    layers: Vec<ConfigInput>,
    resume: bool,
    force: bool,
    not_consistent: bool,
    allow_missing_databases: bool,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, input: ConfigInput) -> Self {
        self.layers.push(input);
        self
    }

    pub fn with_cli_args(mut self, input: ConfigInput) -> Self {
        self.layers.push(input);
        self
    }

    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn not_consistent(mut self, not_consistent: bool) -> Self {
        self.not_consistent = not_consistent;
        self
    }

    /// Skip the source/target DSN requirement — for subcommands like
    /// `list` and `transform` that only ever touch the cached catalog
    /// files on disk and never open a live connection.
    pub fn allow_missing_databases(mut self) -> Self {
        self.allow_missing_databases = true;
        self
    }

    pub fn resolve(self) -> Result<Config> {
        let allow_missing_databases = self.allow_missing_databases;
        let merged = self
            .layers
            .into_iter()
            .fold(ConfigInput::default(), merge);

        let databases = merged.databases.unwrap_or_default();
        let (source_url, target_url) = if allow_missing_databases {
            (databases.source_url.unwrap_or_default(), databases.target_url.unwrap_or_default())
        } else {
            let source_url = databases.source_url.ok_or_else(|| {
                EngineError::Configuration(
                    "missing source database URL (--source or PGRELAY_SOURCE_URL)".into(),
                )
            })?;
            let target_url = databases.target_url.ok_or_else(|| {
                EngineError::Configuration(
                    "missing target database URL (--target or PGRELAY_TARGET_URL)".into(),
                )
            })?;
            (source_url, target_url)
        };

        let dir = merged
            .directories
            .and_then(|d| d.dir)
            .unwrap_or_else(|| "./pgrelay-work".to_string());

        let partition_defaults = Partition::default();
        let partition = merged.partition.map(|p| Partition {
            split_threshold_bytes: p
                .split_threshold_bytes
                .unwrap_or(partition_defaults.split_threshold_bytes),
            split_max_parts: p.split_max_parts.unwrap_or(partition_defaults.split_max_parts),
        }).unwrap_or(partition_defaults);

        let replication_defaults = Replication::default();
        let replication = merged.replication.map(|r| Replication {
            plugin: r.plugin.unwrap_or(replication_defaults.plugin.clone()),
            slot_name: r.slot_name.unwrap_or(replication_defaults.slot_name.clone()),
            endpos: r.endpos,
        }).unwrap_or(replication_defaults);

        let filter = merged.filter.unwrap_or_default();

        Ok(Config {
            databases: Databases {
                source_url,
                target_url,
            },
            dir: std::path::PathBuf::from(dir),
            partition,
            filter,
            replication,
            resume: self.resume,
            force: self.force,
            not_consistent: self.not_consistent,
        })
    }
}

/// Load the on-disk `ConfigInput` layer, defaulting to an empty one when
/// the file doesn't exist — a missing config file is not a configuration
/// error, only a missing DSN is.
pub fn load_config_file(path: &str) -> Result<ConfigInput> {
    if !std::path::Path::new(path).exists() {
        return Ok(ConfigInput::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {path}"))?;
    serde_yaml::from_str(&contents).with_context(|| format!("parsing config file {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DatabasesInput, DirectoriesInput};

    #[test]
    fn resolve_fails_without_source_url() {
        let result = ConfigBuilder::new().resolve();
        assert!(result.is_err());
    }

    #[test]
    fn resolve_applies_defaults() {
        let config = ConfigBuilder::new()
            .with_file(ConfigInput {
                databases: Some(DatabasesInput {
                    source_url: Some("postgres://s".into()),
                    target_url: Some("postgres://t".into()),
                }),
                directories: Some(DirectoriesInput { dir: Some("/tmp/x".into()) }),
                ..Default::default()
            })
            .resolve()
            .unwrap();

        assert_eq!(config.databases.source_url, "postgres://s");
        assert_eq!(config.partition.split_max_parts, 8);
        assert_eq!(config.replication.plugin, "wal2json");
    }

    #[test]
    fn cli_layer_overrides_file_layer() {
        let config = ConfigBuilder::new()
            .with_file(ConfigInput {
                databases: Some(DatabasesInput {
                    source_url: Some("postgres://file".into()),
                    target_url: Some("postgres://file-target".into()),
                }),
                ..Default::default()
            })
            .with_cli_args(ConfigInput {
                databases: Some(DatabasesInput {
                    source_url: Some("postgres://cli".into()),
                    target_url: None,
                }),
                ..Default::default()
            })
            .resolve()
            .unwrap();

        assert_eq!(config.databases.source_url, "postgres://cli");
        assert_eq!(config.databases.target_url, "postgres://file-target");
    }
}
