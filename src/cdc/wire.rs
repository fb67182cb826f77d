//! Shared wire types for components H/I/J: the textual LSN form
//! Postgres uses everywhere in the replication protocol and sentinel
//! row, the wal2json message model, and the statement fingerprint used
//! to deduplicate `PREPARE`s (§4.H/I/J).

use serde::{Deserialize, Serialize};

/// A `X/X`-formatted log sequence number, stored as one `u64` internally
/// (hi 32 bits before the slash, lo 32 bits after) so LSNs compare and
/// subtract like the integers they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);

    pub fn parse(s: &str) -> Option<Lsn> {
        let (hi, lo) = s.split_once('/')?;
        let hi = u32::from_str_radix(hi, 16).ok()?;
        let lo = u32::from_str_radix(lo, 16).ok()?;
        Some(Lsn(((hi as u64) << 32) | lo as u64))
    }

    pub fn format(self) -> String {
        format!("{:X}/{:X}", self.0 >> 32, self.0 & 0xffff_ffff)
    }

    /// The WAL segment name (`<TLI><LogId><SegId>`) containing this LSN,
    /// given the timeline and the source's configured WAL segment size
    /// (§4.H).
    pub fn wal_segment_name(self, tli: u32, wal_segment_bytes: u64) -> String {
        let segno = self.0 / wal_segment_bytes;
        let log_id = segno >> 32;
        let seg_id = segno & 0xffff_ffff;
        format!("{tli:08X}{log_id:08X}{seg_id:08X}")
    }
}

impl std::ops::Sub for Lsn {
    type Output = u64;
    fn sub(self, rhs: Lsn) -> u64 {
        self.0.saturating_sub(rhs.0)
    }
}

/// One decoded wal2json (format-version=2) message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "action")]
pub enum WalMessage {
    #[serde(rename = "B")]
    Begin {
        xid: u32,
        lsn: Option<String>,
        timestamp: Option<String>,
        #[serde(rename = "nextlsn")]
        commit_lsn: Option<String>,
    },
    #[serde(rename = "C")]
    Commit {
        xid: u32,
        lsn: String,
        timestamp: Option<String>,
    },
    #[serde(rename = "I")]
    Insert {
        schema: String,
        table: String,
        columns: Vec<ColumnValue>,
    },
    #[serde(rename = "U")]
    Update {
        schema: String,
        table: String,
        columns: Vec<ColumnValue>,
        identity: Vec<ColumnValue>,
    },
    #[serde(rename = "D")]
    Delete {
        schema: String,
        table: String,
        identity: Vec<ColumnValue>,
    },
    #[serde(rename = "T")]
    Truncate { schema: String, table: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ColumnValue {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: serde_json::Value,
}

/// Synthetic records the receiver/transformer inject that never came off
/// the wire (§4.H/I): keepalives, segment switches, and the endpos
/// marker.
#[derive(Debug, Clone)]
pub enum SyntheticRecord {
    Keepalive { lsn: Lsn },
    Switch { lsn: Lsn },
    Endpos { lsn: Lsn },
}

/// A 32-bit fingerprint of a statement *template* (column names and
/// placeholder count, not values), used to dedupe `PREPARE`s per segment
/// (§4.I). `xxh3` for speed; 32-bit because the dedup scope is one
/// segment file, not a cluster-wide namespace, so collision risk is
/// negligible at that scale.
pub fn statement_fingerprint(template: &str) -> u32 {
    xxhash_rust::xxh3::xxh3_64(template.as_bytes()) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsn_round_trips_through_text_form() {
        let lsn = Lsn::parse("16/B374D848").unwrap();
        assert_eq!(lsn.format(), "16/B374D848");
    }

    #[test]
    fn lsn_zero_formats_as_zero_slash_zero() {
        assert_eq!(Lsn::ZERO.format(), "0/0");
    }

    #[test]
    fn lsn_ordering_follows_numeric_value() {
        let a = Lsn::parse("0/100").unwrap();
        let b = Lsn::parse("0/200").unwrap();
        assert!(a < b);
        assert_eq!(b - a, 0x100);
    }

    #[test]
    fn fingerprint_is_stable_and_differentiates_templates() {
        let a = statement_fingerprint("INSERT INTO public.orders (id, total) VALUES ($1, $2)");
        let b = statement_fingerprint("INSERT INTO public.orders (id, total) VALUES ($1, $2)");
        let c = statement_fingerprint("UPDATE public.orders SET total = $1 WHERE id = $2");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
