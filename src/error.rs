//! Error taxonomy (§7). Call sites still propagate with `anyhow::Result` and
//! `?`, the way the rest of the crate does; `EngineError` is what ends up at
//! the root of that chain when a command fails, and `main` downcasts to it
//! to choose a process exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("target error: {0}")]
    Target(String),

    #[error("target error: {message} (object: {qname})")]
    TargetConflict { message: String, qname: String },

    #[error("busy: {0}")]
    Busy(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),

    #[error("partial failure in {unit}: {message}")]
    Partial { unit: String, message: String },
}

impl EngineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Configuration(_) => 1,
            EngineError::Source(_) => 2,
            EngineError::Target(_) | EngineError::TargetConflict { .. } => 3,
            EngineError::Busy(_) => 4,
            EngineError::Internal(_) => 5,
            EngineError::Partial { .. } => 6,
        }
    }
}

/// Find an `EngineError` anywhere in an anyhow chain, defaulting to exit
/// code 1 for errors that never went through the typed taxonomy (e.g. I/O
/// errors bubbled straight up via `?`).
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EngineError>())
        .map(|e| e.exit_code())
        .unwrap_or(1)
}

/// Construct and log an `Internal` error with the mandatory `BUG:` prefix.
macro_rules! bug {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        tracing::error!("BUG: {}", msg);
        $crate::error::EngineError::Internal(msg)
    }};
}

pub(crate) use bug;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let kinds = vec![
            EngineError::Configuration("x".into()),
            EngineError::Source("x".into()),
            EngineError::Target("x".into()),
            EngineError::Busy("x".into()),
            EngineError::Internal("x".into()),
            EngineError::Partial {
                unit: "t".into(),
                message: "x".into(),
            },
        ];
        let codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(codes.len(), sorted.len());
    }

    #[test]
    fn exit_code_for_finds_wrapped_engine_error() {
        let base = EngineError::Busy("locked".into());
        let wrapped = anyhow::Error::new(base).context("while claiming unit");
        assert_eq!(exit_code_for(&wrapped), 4);
    }

    #[test]
    fn exit_code_for_defaults_to_one() {
        let err = anyhow::anyhow!("plain io failure");
        assert_eq!(exit_code_for(&err), 1);
    }
}
