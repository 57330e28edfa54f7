//! JSON payloads served by ledger nodes and gateways.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::codec::u64_from_str_or_num;
use crate::ProtocolError;

/// `GET /tx/{id}/offset`: absolute end offset and byte size of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOffset {
    #[serde(deserialize_with = "u64_from_str_or_num")]
    pub offset: u64,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    pub size: u64,
}

impl TxOffset {
    /// First byte of the transaction in the weave: `offset - size + 1`.
    pub fn start(&self) -> Result<u64, ProtocolError> {
        if self.size == 0 || self.size > self.offset + 1 {
            return Err(ProtocolError::Malformed(format!(
                "offset {} cannot hold size {}",
                self.offset, self.size
            )));
        }
        Ok(self.offset + 1 - self.size)
    }
}

/// `GET /tx/{id}/status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    pub block_height: u64,
    pub number_of_confirmations: u64,
}

/// `GET /chunk/{offset}`; the chunk bytes are base64url.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub chunk: String,
}

/// `GET /info`. Only the fields the watchdog reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(default)]
    pub release: u64,
    pub height: u64,
    #[serde(default)]
    pub network: Option<String>,
}

/// One `{end: start}` interval from `GET /data_sync_record/{start}/{count}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncRecord {
    pub start: u64,
    pub end: u64,
}

impl SyncRecord {
    /// Whether this `(start, end]` interval holds every byte of `tx`.
    pub fn covers(&self, tx: &TxOffset) -> bool {
        tx.offset <= self.end && tx.offset.saturating_sub(tx.size) >= self.start
    }

    /// Parse the node's array of single-entry `{"<end>": "<start>"}` objects.
    pub fn parse_list(body: &[u8]) -> Result<Vec<SyncRecord>, ProtocolError> {
        let raw: Vec<BTreeMap<String, serde_json::Value>> = crate::codec::decode(body)?;
        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            for (end, start) in entry {
                let end: u64 = end
                    .parse()
                    .map_err(|_| ProtocolError::Malformed(format!("sync record end {end}")))?;
                let start = match &start {
                    serde_json::Value::String(s) => s.parse().ok(),
                    serde_json::Value::Number(n) => n.as_u64(),
                    _ => None,
                }
                .ok_or_else(|| ProtocolError::Malformed(format!("sync record start {start}")))?;
                out.push(SyncRecord { start, end });
            }
        }
        Ok(out)
    }
}
