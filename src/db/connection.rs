//! Pool construction for the source/target Postgres connections, retried
//! under the crate-wide back-off policy (§1.3, §9) rather than a
//! bespoke retry loop.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::backoff::Backoff;
use crate::error::EngineError;

pub async fn connect_with_retry(url: &str) -> Result<PgPool> {
    connect_with_retry_backoff(url, &Backoff::default()).await
}

pub async fn connect_with_retry_backoff(url: &str, backoff: &Backoff) -> Result<PgPool> {
    backoff
        .retry("connect", || async {
            match PgPoolOptions::new().max_connections(8).connect(url).await {
                Ok(pool) => Ok(Some(pool)),
                Err(e) if is_transient(&e) => {
                    tracing::debug!(error = %e, "database not ready yet, retrying");
                    Ok(None)
                }
                Err(e) => Err(EngineError::Source(e.to_string()).into()),
            }
        })
        .await
        .context("connecting to database")
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// Standardise the session so copy and schema operations see a
/// predictable `search_path` regardless of the role's own defaults.
pub async fn initialize_session(pool: &PgPool) -> Result<()> {
    sqlx::query("SET search_path = public, pg_catalog")
        .execute(pool)
        .await
        .map_err(|e| EngineError::Source(format!("setting search_path: {e}")))?;
    sqlx::query("SET standard_conforming_strings = on")
        .execute(pool)
        .await
        .map_err(|e| EngineError::Source(format!("setting standard_conforming_strings: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_treated_as_transient() {
        assert!(is_transient(&sqlx::Error::PoolTimedOut));
    }
}
