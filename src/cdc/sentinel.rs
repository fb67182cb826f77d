//! The sentinel control surface shared by components H/I/J: resolving
//! `--endpos` precedence against the stored sentinel row, polling for the
//! operator's apply signal, and publishing receive/replay progress back
//! into the catalog (§4.H/I/J).

use anyhow::{Context, Result};

use crate::catalog::sentinel as store;
use crate::cdc::wire::Lsn;

pub fn initialize(catalog: &rusqlite::Connection, startpos: Lsn) -> Result<()> {
    store::ensure_initialized(catalog, &startpos.format()).context("initializing sentinel row")
}

/// Resolve `--endpos` vs. the sentinel's stored value: a CLI value that
/// differs from the sentinel's overrides it, with a warning, since the
/// operator is explicitly asking for a different stopping point (§4.J).
pub fn resolve_endpos(cli_endpos: Option<Lsn>, sentinel_endpos: Lsn) -> Lsn {
    match cli_endpos {
        Some(cli) if cli != sentinel_endpos => {
            tracing::warn!(
                cli = %cli.format(),
                sentinel = %sentinel_endpos.format(),
                "overriding sentinel endpos with --endpos"
            );
            cli
        }
        Some(cli) => cli,
        None => sentinel_endpos,
    }
}

/// Poll the sentinel row until its `apply` flag is set or `cancel` fires,
/// returning the endpos recorded at that point (§4.J control contract:
/// the applier does not start replaying until told to).
pub async fn wait_for_apply(
    catalog: &rusqlite::Connection,
    poll_interval: std::time::Duration,
    mut cancel: impl FnMut() -> bool,
) -> Result<Option<Lsn>> {
    loop {
        if cancel() {
            return Ok(None);
        }
        let row = store::get(catalog)?.context("sentinel row not initialized")?;
        if row.apply {
            return Ok(Lsn::parse(&row.endpos));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

pub fn set_endpos(catalog: &rusqlite::Connection, endpos: Lsn) -> Result<()> {
    store::set_endpos(catalog, &endpos.format()).context("setting sentinel endpos")
}

pub fn set_apply(catalog: &rusqlite::Connection, apply: bool) -> Result<()> {
    store::set_apply(catalog, apply).context("setting sentinel apply flag")
}

/// Publish receive/replay progress so an operator watching the sentinel
/// row sees the follow-up process advancing (§4.H/J).
pub fn publish_progress(
    catalog: &rusqlite::Connection,
    write_lsn: Lsn,
    flush_lsn: Lsn,
    replay_lsn: Lsn,
) -> Result<()> {
    store::publish_progress(catalog, &write_lsn.format(), &flush_lsn.format(), &replay_lsn.format())
        .context("publishing sentinel progress")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{schema_sql, CatalogKind};

    fn conn() -> rusqlite::Connection {
        let c = rusqlite::Connection::open_in_memory().unwrap();
        c.execute_batch(schema_sql::ddl_for(CatalogKind::Source)).unwrap();
        c
    }

    #[test]
    fn resolve_endpos_prefers_cli_value_when_different() {
        let sentinel_endpos = Lsn::parse("0/100").unwrap();
        let cli = Lsn::parse("0/200").unwrap();
        assert_eq!(resolve_endpos(Some(cli), sentinel_endpos), cli);
        assert_eq!(resolve_endpos(None, sentinel_endpos), sentinel_endpos);
        assert_eq!(resolve_endpos(Some(sentinel_endpos), sentinel_endpos), sentinel_endpos);
    }

    #[tokio::test]
    async fn wait_for_apply_returns_once_apply_flag_is_set() {
        let c = conn();
        initialize(&c, Lsn::ZERO).unwrap();
        set_endpos(&c, Lsn::parse("0/500").unwrap()).unwrap();
        set_apply(&c, true).unwrap();
        let endpos = wait_for_apply(&c, std::time::Duration::from_millis(1), || false)
            .await
            .unwrap();
        assert_eq!(endpos, Lsn::parse("0/500"));
    }

    #[tokio::test]
    async fn wait_for_apply_honors_cancel() {
        let c = conn();
        initialize(&c, Lsn::ZERO).unwrap();
        let endpos = wait_for_apply(&c, std::time::Duration::from_millis(1), || true)
            .await
            .unwrap();
        assert_eq!(endpos, None);
    }
}
