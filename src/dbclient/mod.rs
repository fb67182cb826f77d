//! Thin client layer over the two Postgres wire protocols this crate
//! needs: ordinary SQL/COPY (via `sqlx`, used for schema introspection,
//! snapshot export and bulk data movement) and logical replication (via
//! `tokio_postgres`, which `sqlx` does not expose — §1 REDESIGN FLAGS).

pub mod replication;
pub mod source;
pub mod target;

pub use replication::ReplicationClient;
pub use source::SourceClient;
pub use target::TargetClient;
