//! SHA-384 deep hash over nested byte lists.
//!
//! ```text
//! blob(data)  = SHA384( SHA384("blob" ‖ len(data)) ‖ SHA384(data) )
//! list(items) = fold( SHA384("list" ‖ count), |acc, item| SHA384(acc ‖ deep(item)) )
//! ```
//!
//! Lengths and counts are rendered as decimal ASCII. The final list element
//! of a data item is its payload, which can be arbitrarily large, so
//! [`BlobHasher`] computes a blob digest incrementally from a declared length.

use sha2::{Digest, Sha384};

use crate::hash::{sha384, sha384_multi};

pub type DeepHashDigest = [u8; 48];

fn blob_tag(len: u64) -> DeepHashDigest {
    sha384(format!("blob{len}").as_bytes())
}

/// Deep hash of a single byte string.
pub fn deep_hash_blob(data: &[u8]) -> DeepHashDigest {
    let tag = blob_tag(data.len() as u64);
    let body = sha384(data);
    sha384_multi(&[&tag, &body])
}

/// Deep hash of a flat list of byte strings.
pub fn deep_hash_list(items: &[&[u8]]) -> DeepHashDigest {
    let mut list = ListHasher::new(items.len());
    for item in items {
        list.push_blob(item);
    }
    list.finish()
}

/// Incremental list accumulator.
///
/// The element count is committed up front, so callers must push exactly
/// `count` children before calling [`finish`](Self::finish).
#[derive(Clone, Debug)]
pub struct ListHasher {
    acc: DeepHashDigest,
}

impl ListHasher {
    pub fn new(count: usize) -> Self {
        Self {
            acc: sha384(format!("list{count}").as_bytes()),
        }
    }

    pub fn push_blob(&mut self, data: &[u8]) {
        let child = deep_hash_blob(data);
        self.push_digest(&child);
    }

    /// Fold an already-computed child digest (blob or nested list).
    pub fn push_digest(&mut self, child: &DeepHashDigest) {
        self.acc = sha384_multi(&[&self.acc, child]);
    }

    pub fn finish(self) -> DeepHashDigest {
        self.acc
    }
}

/// Streaming blob digest for data whose total length is known in advance.
pub struct BlobHasher {
    tag: DeepHashDigest,
    body: Sha384,
    expected: u64,
    seen: u64,
}

impl BlobHasher {
    pub fn new(len: u64) -> Self {
        Self {
            tag: blob_tag(len),
            body: Sha384::new(),
            expected: len,
            seen: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.seen += data.len() as u64;
        self.body.update(data);
    }

    /// Bytes still owed before the declared length is reached.
    pub fn remaining(&self) -> u64 {
        self.expected.saturating_sub(self.seen)
    }

    /// Finish the digest. Returns `None` when the bytes fed do not add up
    /// to the length committed in [`new`](Self::new).
    pub fn finish(self) -> Option<DeepHashDigest> {
        if self.seen != self.expected {
            return None;
        }
        let body: [u8; 48] = self.body.finalize().into();
        Some(sha384_multi(&[&self.tag, &body]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_blob_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut h = BlobHasher::new(data.len() as u64);
        for chunk in data.chunks(777) {
            h.update(chunk);
        }
        assert_eq!(h.finish(), Some(deep_hash_blob(&data)));
    }

    #[test]
    fn streaming_blob_rejects_short_input() {
        let mut h = BlobHasher::new(10);
        h.update(&[0u8; 9]);
        assert_eq!(h.remaining(), 1);
        assert!(h.finish().is_none());
    }

    #[test]
    fn list_hasher_matches_flat_list() {
        let items: [&[u8]; 3] = [b"dataitem", b"1", b"2"];
        let mut l = ListHasher::new(3);
        for i in items {
            l.push_blob(i);
        }
        assert_eq!(l.finish(), deep_hash_list(&items));
    }

    #[test]
    fn empty_blob_differs_from_empty_list() {
        assert_ne!(deep_hash_blob(b""), deep_hash_list(&[]));
    }

    #[test]
    fn order_matters() {
        assert_ne!(
            deep_hash_list(&[b"a", b"b"]),
            deep_hash_list(&[b"b", b"a"])
        );
    }
}
