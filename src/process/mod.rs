//! Process-level concerns shared by every long-running subcommand:
//! signal-aware shutdown. (Claimed work units live in `catalog::process`;
//! this module is about the OS process, not the catalog table.)

pub mod signals;
