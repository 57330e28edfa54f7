//! Ring of recently seen feed messages.
//!
//! Each feed is read over two redundant connections, so most messages arrive
//! twice within a short window. Only the last `capacity` message hashes are
//! kept; a duplicate arriving later than that is processed again, which the
//! store's insert-or-ignore writes absorb.

use std::collections::{HashSet, VecDeque};

use whistle_crypto::sha256;

/// Default ring size, enough to cover the skew between two connections.
pub const DEFAULT_DEDUP_CAPACITY: usize = 5;

pub struct RecentMessages {
    capacity: usize,
    hashes: HashSet<[u8; 32]>,
    order: VecDeque<[u8; 32]>,
}

impl RecentMessages {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            hashes: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns `true` if the message was seen recently; otherwise records it.
    pub fn is_duplicate(&mut self, message: &[u8]) -> bool {
        let hash = sha256(message);
        if self.hashes.contains(&hash) {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.hashes.remove(&old);
            }
        }
        self.hashes.insert(hash);
        self.order.push_back(hash);
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for RecentMessages {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_is_not_duplicate() {
        let mut ring = RecentMessages::new(5);
        assert!(!ring.is_duplicate(b"hello"));
        assert!(ring.is_duplicate(b"hello"));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn evicts_oldest_when_at_capacity() {
        let mut ring = RecentMessages::new(3);
        for m in [&b"m1"[..], b"m2", b"m3", b"m4"] {
            assert!(!ring.is_duplicate(m));
        }
        assert_eq!(ring.len(), 3);
        // m1 was evicted by m4
        assert!(!ring.is_duplicate(b"m1"));
        assert!(ring.is_duplicate(b"m4"));
    }

    #[test]
    fn zero_capacity_still_tracks_last_message() {
        let mut ring = RecentMessages::new(0);
        assert!(!ring.is_duplicate(b"a"));
        assert!(ring.is_duplicate(b"a"));
    }

    #[test]
    fn default_capacity() {
        assert_eq!(RecentMessages::default().capacity, DEFAULT_DEDUP_CAPACITY);
        assert!(RecentMessages::default().is_empty());
    }
}
