//! External chain index seam (gateway GraphQL in production).

use async_trait::async_trait;
use thiserror::Error;
use whistle_types::params::{BUNDLE_VERSION, BUNDLE_VERSION_TAG};
use whistle_types::TxId;

use crate::graphql::Tag;
use crate::{ProtocolError, TransportError};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Where the index places a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInclusion {
    /// Height of the including block; `None` while the index has not caught up.
    pub block_height: Option<u64>,
    /// Parent bundle for data items.
    pub bundled_in: Option<TxId>,
}

/// A base-layer transaction posted by a bundler's wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedBundle {
    pub id: TxId,
    pub block: u64,
    pub tags: Vec<Tag>,
}

impl PostedBundle {
    pub fn is_bundle(&self) -> bool {
        self.tags
            .iter()
            .any(|t| t.name == BUNDLE_VERSION_TAG && t.value == BUNDLE_VERSION)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostedBundlePage {
    pub bundles: Vec<PostedBundle>,
    /// Cursor for the next page when more results exist.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait ChainIndex: Send + Sync {
    /// Including block and parent bundle; `Ok(None)` if the index does not
    /// know the transaction.
    async fn transaction_inclusion(&self, id: &TxId) -> Result<Option<TransactionInclusion>, IndexError>;

    /// Ledger address of the wallet that posted `id`.
    async fn owner_address(&self, id: &TxId) -> Result<Option<String>, IndexError>;

    /// Transactions owned by `owner` at or above `min_block`, height ascending.
    async fn posted_bundles(
        &self,
        owner: &str,
        min_block: u64,
        page_size: u32,
        after: Option<&str>,
    ) -> Result<PostedBundlePage, IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_detection_by_version_tag() {
        let mut b = PostedBundle {
            id: TxId::new([0; 32]),
            block: 1,
            tags: vec![Tag {
                name: "Bundle-Format".into(),
                value: "binary".into(),
            }],
        };
        assert!(!b.is_bundle());
        b.tags.push(Tag {
            name: "Bundle-Version".into(),
            value: "2.0.0".into(),
        });
        assert!(b.is_bundle());
    }
}
