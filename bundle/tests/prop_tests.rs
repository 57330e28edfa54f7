use proptest::prelude::*;

use whistle_bundle::{assemble_bundle, parse_bytes, DataItemBuilder};
use whistle_crypto::Ed25519Keypair;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// N well-formed items parse to N items and zero errors, consuming every byte.
    #[test]
    fn well_formed_bundles_parse_clean(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..600), 1..6),
    ) {
        let items: Vec<_> = payloads
            .iter()
            .enumerate()
            .map(|(i, p)| DataItemBuilder::new(Ed25519Keypair::from_seed([i as u8 + 1; 32])).data(p.clone()).build())
            .collect();
        let bundle = assemble_bundle(&items);
        let parsed = parse_bytes(&bundle).unwrap();
        prop_assert_eq!(parsed.items.len(), items.len());
        prop_assert!(parsed.errors.is_empty());
        prop_assert_eq!(parsed.bytes_read, bundle.len() as u64);
    }

    /// Corrupting one item's signature affects only that item.
    #[test]
    fn signature_corruption_is_isolated(
        count in 2usize..6,
        victim_seed in any::<usize>(),
        byte in 0usize..64,
    ) {
        let victim = victim_seed % count;
        let mut items: Vec<_> = (0..count)
            .map(|i| DataItemBuilder::new(Ed25519Keypair::from_seed([i as u8 + 1; 32])).data(vec![i as u8; 40]).build())
            .collect();
        items[victim].corrupt_signature_byte(byte);
        let parsed = parse_bytes(&assemble_bundle(&items)).unwrap();
        prop_assert_eq!(parsed.errors.len(), 1);
        prop_assert_eq!(parsed.errors[0].id, items[victim].id);
        prop_assert_eq!(parsed.items.len(), count - 1);
    }

    /// Arbitrary input never panics.
    #[test]
    fn garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let _ = parse_bytes(&bytes);
    }
}
