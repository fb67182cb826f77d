//! Logical replication client (component H's transport). `sqlx` has no
//! replication-protocol support, so this speaks to Postgres directly via
//! `tokio_postgres` in `replication=database` mode — `START_REPLICATION`,
//! the `XLogData`/keepalive messages, and standby status updates all live
//! here (§1 REDESIGN FLAGS, §4.H).

use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use std::pin::Pin;
use tokio_postgres::{Client, CopyBothDuplex, NoTls, SimpleQueryMessage};

use crate::error::EngineError;

pub type ReplicationStream = CopyBothDuplex<Bytes>;

pub struct ReplicationClient {
    client: Client,
}

/// One decoded message off the replication stream: either a chunk of
/// `wal2json` output at `lsn`, or a keepalive asking whether to reply.
pub enum ReplicationEvent {
    Data { lsn: u64, payload: Bytes },
    Keepalive { lsn: u64, reply_requested: bool },
}

impl ReplicationClient {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let conn_str = if dsn.contains('?') {
            format!("{dsn}&replication=database")
        } else {
            format!("{dsn}?replication=database")
        };
        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls)
            .await
            .map_err(|e| EngineError::Source(format!("replication connect: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "replication connection terminated");
            }
        });
        Ok(Self { client })
    }

    pub async fn create_logical_slot(&self, slot_name: &str, plugin: &str) -> Result<()> {
        let query = format!("CREATE_REPLICATION_SLOT {slot_name} LOGICAL {plugin} NOEXPORT_SNAPSHOT");
        match self.client.simple_query(&query).await {
            Ok(_) => Ok(()),
            Err(e) if e.code().map(|c| c.code()) == Some("42710") => {
                tracing::debug!(slot_name, "replication slot already exists");
                Ok(())
            }
            Err(e) => Err(EngineError::Source(format!("creating slot {slot_name}: {e}")).into()),
        }
    }

    pub async fn drop_slot(&self, slot_name: &str) -> Result<()> {
        self.client
            .simple_query(&format!("DROP_REPLICATION_SLOT {slot_name}"))
            .await
            .map_err(|e| EngineError::Source(format!("dropping slot {slot_name}: {e}")))?;
        Ok(())
    }

    pub async fn identify_system(&self) -> Result<String> {
        let rows = self
            .client
            .simple_query("IDENTIFY_SYSTEM")
            .await
            .map_err(|e| EngineError::Source(format!("IDENTIFY_SYSTEM: {e}")))?;
        for row in rows {
            if let SimpleQueryMessage::Row(r) = row {
                if let Some(xlogpos) = r.get("xlogpos") {
                    return Ok(xlogpos.to_string());
                }
            }
        }
        Err(EngineError::Internal("IDENTIFY_SYSTEM returned no xlogpos".into()).into())
    }

    /// Begin streaming from `start_lsn`, with the wal2json plugin options
    /// of §1 baked into the slot options string.
    pub async fn start_replication(&self, slot_name: &str, start_lsn: u64) -> Result<ReplicationStream> {
        let options = crate::constants::WAL2JSON_OPTIONS
            .iter()
            .map(|(k, v)| format!("\"{k}\" '{v}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "START_REPLICATION SLOT {slot_name} LOGICAL {}/{} ({options})",
            start_lsn >> 32,
            start_lsn & 0xffff_ffff
        );
        self.client
            .copy_both_simple::<Bytes>(&query)
            .await
            .map_err(|e| EngineError::Source(format!("START_REPLICATION: {e}")).into())
    }
}

/// `StandbyStatusUpdate` feedback message (§4.H), telling Postgres how
/// far we've written/flushed/replayed so it can advance the slot's
/// retained WAL and the physical replication lag metrics.
pub async fn send_standby_status_update(
    stream: &mut ReplicationStream,
    write_lsn: u64,
    flush_lsn: u64,
    apply_lsn: u64,
    clock_micros: i64,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(1 + 8 * 3 + 8 + 1);
    buf.put_u8(b'r');
    buf.put_u64(write_lsn);
    buf.put_u64(flush_lsn);
    buf.put_u64(apply_lsn);
    buf.put_i64(clock_micros);
    buf.put_u8(0); // reply requested: no
    Pin::new(stream)
        .send(buf.freeze())
        .await
        .context("sending standby status update")?;
    Ok(())
}

pub async fn next_event(stream: &mut ReplicationStream) -> Result<Option<ReplicationEvent>> {
    match Pin::new(stream).next().await {
        None => Ok(None),
        Some(Err(e)) => Err(EngineError::Source(format!("reading replication stream: {e}")).into()),
        Some(Ok(bytes)) => Ok(Some(decode_message(bytes)?)),
    }
}

/// Decode a raw `CopyData` payload into a [`ReplicationEvent`], per the
/// streaming replication protocol's two message kinds (`w` = XLogData,
/// `k` = primary keepalive).
fn decode_message(mut payload: Bytes) -> Result<ReplicationEvent> {
    if payload.is_empty() {
        return Err(EngineError::Internal("empty replication message".into()).into());
    }
    let tag = payload.get_u8();
    match tag {
        b'w' => {
            let start_lsn = payload.get_u64();
            let _end_lsn = payload.get_u64();
            let _send_time = payload.get_i64();
            Ok(ReplicationEvent::Data {
                lsn: start_lsn,
                payload,
            })
        }
        b'k' => {
            let lsn = payload.get_u64();
            let _clock = payload.get_i64();
            let reply_requested = payload.get_u8() != 0;
            Ok(ReplicationEvent::Keepalive { lsn, reply_requested })
        }
        other => Err(EngineError::Internal(format!("unknown replication message tag {other:#x}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_xlogdata_message() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'w');
        buf.put_u64(0x1234);
        buf.put_u64(0x1234);
        buf.put_i64(0);
        buf.extend_from_slice(b"{\"change\":[]}");
        match decode_message(buf.freeze()).unwrap() {
            ReplicationEvent::Data { lsn, payload } => {
                assert_eq!(lsn, 0x1234);
                assert_eq!(&payload[..], b"{\"change\":[]}");
            }
            _ => panic!("expected Data event"),
        }
    }

    #[test]
    fn decode_keepalive_message() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'k');
        buf.put_u64(0x5678);
        buf.put_i64(0);
        buf.put_u8(1);
        match decode_message(buf.freeze()).unwrap() {
            ReplicationEvent::Keepalive { lsn, reply_requested } => {
                assert_eq!(lsn, 0x5678);
                assert!(reply_requested);
            }
            _ => panic!("expected Keepalive event"),
        }
    }
}
