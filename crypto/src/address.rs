//! Ledger account addresses.
//!
//! An address is the unpadded base64url encoding of SHA-256 over the owner
//! public key bytes exactly as they appear in the item or transaction.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::hash::sha256;
use crate::CryptoError;

/// Derive the ledger address for an owner public key.
pub fn owner_address(owner: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(sha256(owner))
}

/// Derive the address from a base64url-encoded owner, as served by
/// bundler `/public` endpoints and gateway responses.
pub fn owner_address_b64(owner_b64: &str) -> Result<String, CryptoError> {
    let owner = decode_b64url(owner_b64)?;
    Ok(owner_address(&owner))
}

/// Decode unpadded (or padded) base64url.
pub fn decode_b64url(s: &str) -> Result<Vec<u8>, CryptoError> {
    URL_SAFE_NO_PAD
        .decode(s.trim().trim_end_matches('='))
        .map_err(|e| CryptoError::Encoding(e.to_string()))
}

pub fn encode_b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_43_chars() {
        let addr = owner_address(&[9u8; 512]);
        assert_eq!(addr.len(), 43);
    }

    #[test]
    fn b64_owner_matches_raw_owner() {
        let owner = [3u8; 32];
        let b64 = encode_b64url(&owner);
        assert_eq!(owner_address_b64(&b64).unwrap(), owner_address(&owner));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_b64url("!!!").is_err());
    }

    #[test]
    fn decode_tolerates_padding_and_whitespace() {
        assert_eq!(decode_b64url(" AQI=\n").unwrap(), vec![1, 2]);
    }
}
