//! Protocol constants shared by the parser, downloader, and peer scoring.

/// Ledger chunk size served by `GET /chunk/{offset}`.
pub const CHUNK_SIZE: u64 = 256 * 1024;

/// Lower bound of a peer trust score.
pub const TRUST_MIN: f64 = 0.0;

/// Upper bound of a peer trust score.
pub const TRUST_MAX: f64 = 100.0;

/// Trust assigned to newly discovered peers.
pub const STARTING_TRUST: f64 = 10.0;

/// Default trust deduction for a failed request.
pub const DEFAULT_PENALTY: f64 = 2.0;

/// Lowest node release a peer must report on `/info` to be used.
pub const MIN_PEER_RELEASE: u64 = 57;

/// Tag value identifying a binary bundle transaction.
pub const BUNDLE_FORMAT_TAG: &str = "Bundle-Format";
pub const BUNDLE_VERSION_TAG: &str = "Bundle-Version";
pub const BUNDLE_VERSION: &str = "2.0.0";

/// Blocks subtracted from the last seen bundle height when resuming a sync.
pub const SYNC_REWIND_BLOCKS: u64 = 51;

/// Clamp a trust value into `[TRUST_MIN, TRUST_MAX]`.
pub fn clamp_trust(trust: f64) -> f64 {
    if trust.is_nan() {
        return TRUST_MIN;
    }
    trust.clamp(TRUST_MIN, TRUST_MAX)
}

/// Trust after praise: `trust + 50 / (trust / 30.5 + 3) - 8`, clamped.
///
/// Increments shrink as trust grows and turn slightly negative just below
/// the cap.
pub fn praised_trust(trust: f64) -> f64 {
    clamp_trust(trust + 50.0 / (trust / 30.5 + 3.0) - 8.0)
}

/// Trust after a penalty of `amount`, floored at `TRUST_MIN`.
pub fn penalized_trust(trust: f64, amount: f64) -> f64 {
    clamp_trust(trust - amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn praise_mid_range_increases() {
        let t = praised_trust(10.0);
        // 50 / (10/30.5 + 3) - 8 ≈ 7.02
        assert!(t > 16.9 && t < 17.1, "got {t}");
    }

    #[test]
    fn praise_never_exceeds_max() {
        assert!(praised_trust(100.0) <= TRUST_MAX);
        assert!(praised_trust(99.0) <= TRUST_MAX);
    }

    #[test]
    fn praise_increment_shrinks() {
        let low = praised_trust(5.0) - 5.0;
        let high = praised_trust(60.0) - 60.0;
        assert!(low > high);
        assert!(praised_trust(100.0) < 100.0);
    }

    #[test]
    fn penalty_floors_at_zero() {
        assert_eq!(penalized_trust(1.0, 2.0), TRUST_MIN);
        assert_eq!(penalized_trust(10.0, 2.0), 8.0);
    }

    #[test]
    fn nan_clamps_to_min() {
        assert_eq!(clamp_trust(f64::NAN), TRUST_MIN);
    }
}
