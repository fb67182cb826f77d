//! Components H, I, J: the logical-replication follow-up pipeline —
//! receiver (wire → segmented JSON), transformer (JSON → SQL), applier
//! (SQL → target), and the sentinel control surface they share.

pub mod applier;
pub mod receiver;
pub mod sentinel;
pub mod transformer;
pub mod wire;
