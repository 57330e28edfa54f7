use proptest::prelude::*;

use whistle_types::params::{penalized_trust, praised_trust, TRUST_MAX, TRUST_MIN};
use whistle_types::{Timestamp, TxId, Validity};

fn arb_validity() -> impl Strategy<Value = Validity> {
    prop_oneof![
        Just(Validity::Unknown),
        Just(Validity::Valid),
        Just(Validity::Invalid),
    ]
}

proptest! {
    /// TxId string form parses back to the same bytes.
    #[test]
    fn tx_id_string_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let id = TxId::new(bytes);
        let parsed: TxId = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
    }

    /// TxId survives bincode, which the LMDB store uses for records.
    #[test]
    fn tx_id_bincode_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let id = TxId::new(bytes);
        let encoded = bincode::serialize(&id).unwrap();
        let decoded: TxId = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded, id);
    }

    /// Trust stays within bounds after any sequence of praise/penalize calls.
    #[test]
    fn trust_always_bounded(
        start in TRUST_MIN..=TRUST_MAX,
        ops in prop::collection::vec((any::<bool>(), 0.0f64..50.0), 0..200),
    ) {
        let mut trust = start;
        for (praise, amount) in ops {
            trust = if praise { praised_trust(trust) } else { penalized_trust(trust, amount) };
            prop_assert!((TRUST_MIN..=TRUST_MAX).contains(&trust), "trust {} out of range", trust);
        }
    }

    /// Only `Unknown` is undecided.
    #[test]
    fn decided_iff_not_unknown(v in arb_validity()) {
        prop_assert_eq!(v.is_decided(), v != Validity::Unknown);
    }

    /// has_expired agrees with elapsed_since.
    #[test]
    fn expiry_matches_elapsed(start in 0u64..1_000_000, dur in 0u64..10_000, now in 0u64..2_000_000) {
        let t = Timestamp::new(start);
        let now = Timestamp::new(now);
        prop_assert_eq!(t.has_expired(dur, now), now.as_secs() >= start && t.elapsed_since(now) >= dur);
    }
}
