//! Building signed items and bundles.
//!
//! Used for fixtures, benchmarks, and fuzz seeds. Items are signed with
//! ed25519 unless another [`ItemSigner`] is supplied.

use whistle_crypto::{deep_hash_blob, sha256, Ed25519Keypair, ListHasher, SignatureType};
use whistle_types::TxId;

use crate::tags::encode_tags;
use crate::Tag;

/// A serialized item and its id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedItem {
    pub id: TxId,
    pub bytes: Vec<u8>,
}

impl SignedItem {
    /// Flip one bit of the signature. The id no longer matches either.
    pub fn corrupt_signature_byte(&mut self, index: usize) {
        let index = 2 + index % SignatureType::Ed25519.signature_len();
        self.bytes[index] ^= 0x01;
    }
}

/// Produces an item's owner bytes and its signature over the deep hash.
pub trait ItemSigner {
    fn signature_type(&self) -> SignatureType;
    fn owner(&self) -> Vec<u8>;
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

impl ItemSigner for Ed25519Keypair {
    fn signature_type(&self) -> SignatureType {
        SignatureType::Ed25519
    }

    fn owner(&self) -> Vec<u8> {
        Ed25519Keypair::owner(self).to_vec()
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        Ed25519Keypair::sign(self, message).to_vec()
    }
}

pub struct DataItemBuilder<S: ItemSigner = Ed25519Keypair> {
    signer: S,
    target: Option<[u8; 32]>,
    anchor: Option<[u8; 32]>,
    tags: Vec<Tag>,
    data: Vec<u8>,
    forge: bool,
}

impl<S: ItemSigner> DataItemBuilder<S> {
    pub fn new(signer: S) -> Self {
        Self {
            signer,
            target: None,
            anchor: None,
            tags: Vec::new(),
            data: Vec::new(),
            forge: false,
        }
    }

    pub fn target(mut self, target: [u8; 32]) -> Self {
        self.target = Some(target);
        self
    }

    pub fn anchor(mut self, anchor: [u8; 32]) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn tag(mut self, name: &str, value: &str) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Sign something other than the item, keeping the id consistent with the
    /// signature, so only signature verification fails.
    pub fn forged(mut self) -> Self {
        self.forge = true;
        self
    }

    pub fn build(self) -> SignedItem {
        let sig_type = self.signer.signature_type();
        let owner = self.signer.owner();
        let tag_bytes = encode_tags(&self.tags);
        let empty: &[u8] = &[];

        let mut list = ListHasher::new(8);
        list.push_blob(b"dataitem");
        list.push_blob(b"1");
        list.push_blob(sig_type.tag().to_string().as_bytes());
        list.push_blob(&owner);
        list.push_blob(self.target.as_ref().map_or(empty, |t| &t[..]));
        list.push_blob(self.anchor.as_ref().map_or(empty, |a| &a[..]));
        list.push_blob(&tag_bytes);
        list.push_digest(&deep_hash_blob(&self.data));
        let message = list.finish();

        let signature = if self.forge {
            self.signer.sign(b"not this item")
        } else {
            self.signer.sign(&message)
        };
        let id = TxId::new(sha256(&signature));

        let mut bytes = Vec::with_capacity(
            2 + signature.len() + owner.len() + 66 + 16 + tag_bytes.len() + self.data.len(),
        );
        bytes.extend_from_slice(&sig_type.tag().to_le_bytes());
        bytes.extend_from_slice(&signature);
        bytes.extend_from_slice(&owner);
        push_optional(&mut bytes, self.target.as_ref());
        push_optional(&mut bytes, self.anchor.as_ref());
        bytes.extend_from_slice(&(self.tags.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(tag_bytes.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&tag_bytes);
        bytes.extend_from_slice(&self.data);

        SignedItem { id, bytes }
    }
}

fn push_optional(out: &mut Vec<u8>, value: Option<&[u8; 32]>) {
    match value {
        Some(v) => {
            out.push(1);
            out.extend_from_slice(v);
        }
        None => out.push(0),
    }
}

fn u256_le(n: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[..8].copy_from_slice(&n.to_le_bytes());
    out
}

/// Frame items into a bundle: count, header table, then item bytes.
pub fn assemble_bundle(items: &[SignedItem]) -> Vec<u8> {
    let body: usize = items.iter().map(|i| i.bytes.len()).sum();
    let mut out = Vec::with_capacity(32 + 64 * items.len() + body);
    out.extend_from_slice(&u256_le(items.len() as u64));
    for item in items {
        out.extend_from_slice(&u256_le(item.bytes.len() as u64));
        out.extend_from_slice(item.id.as_bytes());
    }
    for item in items {
        out.extend_from_slice(&item.bytes);
    }
    out
}
