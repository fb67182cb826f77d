//! Target-side client: DDL execution, `COPY ... FROM STDIN` streaming,
//! and the schema operations the index/constraint worker issues once a
//! table's data has landed (§4.F/G).

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::error::EngineError;

pub struct TargetClient {
    pool: PgPool,
}

impl TargetClient {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = crate::db::connection::connect_with_retry(dsn).await?;
        crate::db::connection::initialize_session(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn execute_ddl(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await.map_err(|e| {
            anyhow::Error::new(classify_ddl_error(sql, &e))
        })?;
        Ok(())
    }

    /// Stream rows into `qname` via `COPY <qname> (<columns>) FROM STDIN
    /// (FORMAT binary)`, feeding chunks produced by `source`.
    pub async fn copy_in(&self, copy_sql: &str, chunks: Vec<Vec<u8>>) -> Result<u64> {
        let mut conn = self.pool.acquire().await.context("acquiring target connection")?;
        let mut writer = conn
            .copy_in_raw(copy_sql)
            .await
            .map_err(|e| EngineError::Target(format!("COPY FROM failed: {e}")))?;
        let mut bytes = 0u64;
        for chunk in chunks {
            bytes += chunk.len() as u64;
            writer
                .send(chunk)
                .await
                .map_err(|e| EngineError::Target(format!("writing COPY chunk: {e}")))?;
        }
        writer
            .finish()
            .await
            .map_err(|e| EngineError::Target(format!("finishing COPY: {e}")))?;
        Ok(bytes)
    }

    pub async fn set_sequence_value(&self, qname: &str, last_value: i64, is_called: bool) -> Result<()> {
        sqlx::query("SELECT setval($1::regclass, $2, $3)")
            .bind(qname)
            .bind(last_value)
            .bind(is_called)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Target(format!("setval({qname}): {e}")))?;
        Ok(())
    }

    pub async fn row_count(&self, qname: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM {qname}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EngineError::Target(format!("counting {qname}: {e}")))?;
        Ok(row.0)
    }
}

/// Distinguish an object-already-exists conflict (safe to skip under
/// `--resume`) from any other DDL failure, attaching the qualified name
/// so the caller can report it (§7 `TargetConflict`).
fn classify_ddl_error(sql: &str, err: &sqlx::Error) -> EngineError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.code().as_deref() == Some("42P07") || db_err.code().as_deref() == Some("42710") {
            return EngineError::TargetConflict {
                message: db_err.message().to_string(),
                qname: sql.to_string(),
            };
        }
    }
    EngineError::Target(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_ddl_error_falls_back_to_target_error_for_plain_errors() {
        // io::Error doesn't implement DatabaseError, so this exercises the
        // non-conflict branch without needing a live connection.
        let err = sqlx::Error::PoolClosed;
        match classify_ddl_error("CREATE INDEX x", &err) {
            EngineError::Target(_) => {}
            other => panic!("expected Target error, got {other:?}"),
        }
    }
}
