//! Deterministic bundle fixtures.

use whistle_bundle::{assemble_bundle, DataItemBuilder, SignedItem};
use whistle_crypto::Ed25519Keypair;
use whistle_types::TxId;

/// One item to place in a fixture bundle. Keys derive from `seed`.
#[derive(Clone, Debug)]
pub enum TestItem {
    Valid { seed: u8, data: Vec<u8> },
    /// Signed over the wrong message; the header id still matches.
    BadSignature { seed: u8, data: Vec<u8> },
    /// Header carries an id the item's signature does not hash to.
    WrongId { seed: u8, data: Vec<u8> },
}

impl TestItem {
    pub fn valid(seed: u8, data: impl Into<Vec<u8>>) -> Self {
        Self::Valid { seed, data: data.into() }
    }

    pub fn bad_signature(seed: u8, data: impl Into<Vec<u8>>) -> Self {
        Self::BadSignature { seed, data: data.into() }
    }

    pub fn wrong_id(seed: u8, data: impl Into<Vec<u8>>) -> Self {
        Self::WrongId { seed, data: data.into() }
    }

    fn build(&self) -> SignedItem {
        match self {
            Self::Valid { seed, data } => builder(*seed, data).build(),
            Self::BadSignature { seed, data } => builder(*seed, data).forged().build(),
            Self::WrongId { seed, data } => {
                let mut item = builder(*seed, data).build();
                let mut bytes = *item.id.as_bytes();
                bytes[0] ^= 0xFF;
                item.id = TxId::new(bytes);
                item
            }
        }
    }
}

fn builder(seed: u8, data: &[u8]) -> DataItemBuilder {
    DataItemBuilder::new(Ed25519Keypair::from_seed([seed; 32]))
        .tag("Content-Type", "application/octet-stream")
        .data(data.to_vec())
}

/// Serialize a bundle holding `items`, returning its bytes and the header ids
/// in order.
pub fn build_bundle(items: &[TestItem]) -> (Vec<u8>, Vec<TxId>) {
    let signed: Vec<SignedItem> = items.iter().map(TestItem::build).collect();
    let ids = signed.iter().map(|i| i.id).collect();
    (assemble_bundle(&signed), ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_item_order() {
        let (bytes, ids) = build_bundle(&[TestItem::valid(1, b"a".to_vec()), TestItem::valid(2, b"b".to_vec())]);
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(&bytes[64..96], ids[0].as_bytes());
        assert_eq!(&bytes[128..160], ids[1].as_bytes());
    }

    #[test]
    fn same_seed_same_bundle() {
        let items = [TestItem::valid(7, b"x".to_vec())];
        assert_eq!(build_bundle(&items), build_bundle(&items));
    }
}
