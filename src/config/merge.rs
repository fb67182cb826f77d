use super::types::ConfigInput;

/// Merge two `ConfigInput` layers: fields set in `override_layer` win,
/// fields left `None` fall through to `base`. Mirrors the precedence rule
/// documented on [`super::ConfigBuilder`]: CLI > file.
pub fn merge(base: ConfigInput, override_layer: ConfigInput) -> ConfigInput {
    ConfigInput {
        databases: merge_opt(base.databases, override_layer.databases, |b, o| {
            super::types::DatabasesInput {
                source_url: o.source_url.or(b.source_url),
                target_url: o.target_url.or(b.target_url),
            }
        }),
        directories: merge_opt(base.directories, override_layer.directories, |b, o| {
            super::types::DirectoriesInput { dir: o.dir.or(b.dir) }
        }),
        partition: merge_opt(base.partition, override_layer.partition, |b, o| {
            super::types::PartitionInput {
                split_threshold_bytes: o.split_threshold_bytes.or(b.split_threshold_bytes),
                split_max_parts: o.split_max_parts.or(b.split_max_parts),
            }
        }),
        filter: override_layer.filter.or(base.filter),
        replication: merge_opt(base.replication, override_layer.replication, |b, o| {
            super::types::ReplicationInput {
                plugin: o.plugin.or(b.plugin),
                slot_name: o.slot_name.or(b.slot_name),
                endpos: o.endpos.or(b.endpos),
            }
        }),
    }
}

fn merge_opt<T>(base: Option<T>, over: Option<T>, combine: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, over) {
        (Some(b), Some(o)) => Some(combine(b, o)),
        (Some(b), None) => Some(b),
        (None, Some(o)) => Some(o),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DatabasesInput, DirectoriesInput};

    #[test]
    fn cli_overrides_file() {
        let file = ConfigInput {
            databases: Some(DatabasesInput {
                source_url: Some("file-source".into()),
                target_url: Some("file-target".into()),
            }),
            ..Default::default()
        };
        let cli = ConfigInput {
            databases: Some(DatabasesInput {
                source_url: Some("cli-source".into()),
                target_url: None,
            }),
            ..Default::default()
        };
        let merged = merge(file, cli);
        let db = merged.databases.unwrap();
        assert_eq!(db.source_url.as_deref(), Some("cli-source"));
        assert_eq!(db.target_url.as_deref(), Some("file-target"));
    }

    #[test]
    fn missing_layer_falls_through() {
        let file = ConfigInput {
            directories: Some(DirectoriesInput {
                dir: Some("/a".into()),
            }),
            ..Default::default()
        };
        let merged = merge(file, ConfigInput::default());
        assert_eq!(merged.directories.unwrap().dir.as_deref(), Some("/a"));
    }
}
