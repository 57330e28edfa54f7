use proptest::prelude::*;

use whistle_crypto::{deep_hash_blob, BlobHasher, Ed25519Keypair, SignatureType};

proptest! {
    /// Feeding a blob in arbitrary splits gives the one-shot digest.
    #[test]
    fn streamed_blob_equals_one_shot(
        data in prop::collection::vec(any::<u8>(), 0..4096),
        split in 1usize..512,
    ) {
        let mut h = BlobHasher::new(data.len() as u64);
        for chunk in data.chunks(split) {
            h.update(chunk);
        }
        prop_assert_eq!(h.finish(), Some(deep_hash_blob(&data)));
    }

    /// Any single-byte corruption of an ed25519 signature is rejected.
    #[test]
    fn corrupted_ed25519_signature_rejected(
        seed in prop::array::uniform32(0u8..),
        idx in 0usize..64,
        flip in 1u8..=255,
    ) {
        let kp = Ed25519Keypair::from_seed(seed);
        let msg = [0x5Au8; 48];
        let mut sig = kp.sign(&msg);
        sig[idx] ^= flip;
        prop_assert!(SignatureType::Ed25519.verify(&kp.owner(), &msg, &sig).is_err());
    }
}
