//! Messages pushed by bundlers over their real-time streams.

use serde::{Deserialize, Serialize};
use whistle_types::TxId;

use crate::codec::decode_frame;
use crate::ProtocolError;

/// The two streams every bundler exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeedStream {
    Transactions,
    Receipts,
}

impl FeedStream {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Transactions => "/ws/transactions",
            Self::Receipts => "/ws/receipts",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::Receipts => "receipts",
        }
    }
}

/// An item accepted by the bundler. Nested items carry `parent`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamedTransaction {
    pub id: TxId,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub owner_address: Option<String>,
    #[serde(default)]
    pub data_size: Option<u64>,
}

/// A signed promise that `id` will be on the ledger by `deadline_height`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedReceipt {
    pub id: TxId,
    pub deadline_height: u64,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedMessage {
    Transaction(StreamedTransaction),
    Receipt(SignedReceipt),
}

impl FeedMessage {
    pub fn decode(stream: FeedStream, frame: &[u8]) -> Result<Self, ProtocolError> {
        Ok(match stream {
            FeedStream::Transactions => Self::Transaction(decode_frame(frame)?),
            FeedStream::Receipts => Self::Receipt(decode_frame(frame)?),
        })
    }

    pub fn id(&self) -> &TxId {
        match self {
            Self::Transaction(tx) => &tx.id,
            Self::Receipt(r) => &r.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_frame() {
        let id = TxId::new([1; 32]);
        let frame = format!(
            r#"{{"id":"{id}","owner":"abc","owner_address":"xyz","signature":"s","target":"","tags":[],"data_size":12}}"#
        );
        let msg = FeedMessage::decode(FeedStream::Transactions, frame.as_bytes()).unwrap();
        match msg {
            FeedMessage::Transaction(tx) => {
                assert_eq!(tx.id, id);
                assert!(tx.parent.is_none());
                assert_eq!(tx.data_size, Some(12));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn receipt_frame_uses_camel_case() {
        let id = TxId::new([2; 32]);
        let frame = format!(
            r#"{{"id":"{id}","timestamp":1,"version":"1.0.0","public":"k","signature":"s","deadlineHeight":1234,"validatorSignatures":[]}}"#
        );
        let msg = FeedMessage::decode(FeedStream::Receipts, frame.as_bytes()).unwrap();
        assert_eq!(
            msg,
            FeedMessage::Receipt(SignedReceipt {
                id,
                deadline_height: 1234,
                timestamp: Some(1),
                version: Some("1.0.0".into()),
            })
        );
    }

    #[test]
    fn garbage_frame_is_malformed() {
        assert!(FeedMessage::decode(FeedStream::Receipts, b"{nope").is_err());
    }
}
