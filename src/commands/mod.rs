//! CLI command implementations, one module per subcommand of §6.

pub mod apply_changes;
pub mod copy_db;
pub mod list;
pub mod receive;
pub mod snapshot;
pub mod transform;
pub mod worker;

use crate::catalog::{CatalogKind, CatalogStore};
use crate::config::Config;
use crate::workdir::WorkDir;
use anyhow::Result;

/// Every subcommand operates against the same three catalog files under
/// `config.dir`; open (and create, if absent) whichever of them it needs.
pub fn open_catalog(workdir: &WorkDir, kind: CatalogKind) -> Result<CatalogStore> {
    let path = match kind {
        CatalogKind::Source => workdir.source_catalog(),
        CatalogKind::Filter => workdir.filter_catalog(),
        CatalogKind::Target => workdir.target_catalog(),
    };
    let store = CatalogStore::open(path)?;
    store.create_schema(kind)?;
    Ok(store)
}

pub fn workdir_for(config: &Config) -> WorkDir {
    WorkDir::new(config.dir.clone())
}
