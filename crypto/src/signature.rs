//! Data-item signature profiles and verification.
//!
//! The 2-byte signature type at the head of every item selects a fixed
//! signature length, a fixed owner (public key) length, and the algorithm
//! used to check the signature against the item's deep hash.

use ed25519_dalek::{Verifier, VerifyingKey as Ed25519Key};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey as Secp256k1Key};
use rsa::{BigUint, Pss, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::hash::{keccak256, keccak256_multi};
use crate::CryptoError;

/// RSA public exponent used by ledger wallets.
const RSA_EXPONENT: u32 = 65_537;

/// Number of key/signature slots in a multi-ed25519 owner.
const MULTI_ED25519_SLOTS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureType {
    /// RSA-PSS with SHA-256 over a 4096-bit modulus.
    Arweave,
    Ed25519,
    /// secp256k1 over an EIP-191 personal-message digest.
    Ethereum,
    Solana,
    /// ed25519 over the wallet-extension message envelope.
    InjectedAptos,
    /// k-of-32 ed25519 with a signer bitmap.
    MultiAptos,
    /// secp256k1 over an EIP-712 typed-data digest; the owner is a `0x` address.
    TypedEthereum,
}

impl SignatureType {
    pub const ALL: [SignatureType; 7] = [
        Self::Arweave,
        Self::Ed25519,
        Self::Ethereum,
        Self::Solana,
        Self::InjectedAptos,
        Self::MultiAptos,
        Self::TypedEthereum,
    ];

    pub fn from_tag(tag: u16) -> Result<Self, CryptoError> {
        match tag {
            1 => Ok(Self::Arweave),
            2 => Ok(Self::Ed25519),
            3 => Ok(Self::Ethereum),
            4 => Ok(Self::Solana),
            5 => Ok(Self::InjectedAptos),
            6 => Ok(Self::MultiAptos),
            7 => Ok(Self::TypedEthereum),
            other => Err(CryptoError::UnsupportedSignatureType(other)),
        }
    }

    pub fn tag(&self) -> u16 {
        match self {
            Self::Arweave => 1,
            Self::Ed25519 => 2,
            Self::Ethereum => 3,
            Self::Solana => 4,
            Self::InjectedAptos => 5,
            Self::MultiAptos => 6,
            Self::TypedEthereum => 7,
        }
    }

    pub fn signature_len(&self) -> usize {
        match self {
            Self::Arweave => 512,
            Self::Ed25519 | Self::Solana | Self::InjectedAptos => 64,
            Self::Ethereum | Self::TypedEthereum => 65,
            Self::MultiAptos => 64 * MULTI_ED25519_SLOTS + 4,
        }
    }

    pub fn owner_len(&self) -> usize {
        match self {
            Self::Arweave => 512,
            Self::Ed25519 | Self::Solana | Self::InjectedAptos => 32,
            Self::Ethereum => 65,
            Self::MultiAptos => 32 * MULTI_ED25519_SLOTS + 1,
            Self::TypedEthereum => 42,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Arweave => "arweave",
            Self::Ed25519 => "ed25519",
            Self::Ethereum => "ethereum",
            Self::Solana => "solana",
            Self::InjectedAptos => "injectedAptos",
            Self::MultiAptos => "multiAptos",
            Self::TypedEthereum => "typedEthereum",
        }
    }

    /// Verify `signature` by `owner` over `message` (the item's deep hash).
    pub fn verify(&self, owner: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        check_len("owner", self.owner_len(), owner.len())?;
        check_len("signature", self.signature_len(), signature.len())?;
        match self {
            Self::Arweave => verify_rsa_pss(owner, message, signature),
            Self::Ed25519 | Self::Solana => verify_ed25519(owner, message, signature),
            Self::InjectedAptos => {
                let envelope = format!("APTOS\nmessage: {}\nnonce: bundlr", hex::encode(message));
                verify_ed25519(owner, envelope.as_bytes(), signature)
            }
            Self::MultiAptos => verify_multi_ed25519(owner, message, signature),
            Self::Ethereum => verify_eip191(owner, message, signature),
            Self::TypedEthereum => verify_eip712(owner, message, signature),
        }
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), CryptoError> {
    if expected != actual {
        return Err(CryptoError::BadLength {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ed25519
// ---------------------------------------------------------------------------

fn verify_ed25519(owner: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let key_bytes: [u8; 32] = owner
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("ed25519 key must be 32 bytes".into()))?;
    let key = Ed25519Key::from_bytes(&key_bytes)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let sig = ed25519_dalek::Signature::from_slice(signature)
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    key.verify(message, &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

/// Every signer flagged in the big-endian bitmap must verify with the key in
/// the same slot, and at least `threshold` signers must be flagged.
fn verify_multi_ed25519(owner: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let (keys, threshold) = owner.split_at(32 * MULTI_ED25519_SLOTS);
    let (sigs, bitmap) = signature.split_at(64 * MULTI_ED25519_SLOTS);
    let threshold = threshold[0] as usize;

    let mut signers = 0usize;
    for slot in 0..MULTI_ED25519_SLOTS {
        let included = bitmap[slot / 8] & (0x80 >> (slot % 8)) != 0;
        if !included {
            continue;
        }
        signers += 1;
        verify_ed25519(
            &keys[slot * 32..(slot + 1) * 32],
            message,
            &sigs[slot * 64..(slot + 1) * 64],
        )?;
    }

    if signers == 0 || signers < threshold {
        return Err(CryptoError::MalformedSignature(format!(
            "{signers} signers below threshold {threshold}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RSA-PSS
// ---------------------------------------------------------------------------

/// Wallets sign with either a 32-byte salt or the maximum salt length, so
/// both are accepted.
fn verify_rsa_pss(owner: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let key = RsaPublicKey::new(BigUint::from_bytes_be(owner), BigUint::from(RSA_EXPONENT))
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let hashed = Sha256::digest(message);

    let max_salt = owner.len() - Sha256::output_size() - 2;
    for salt_len in [32, max_salt] {
        if key
            .verify(Pss::new_with_salt::<Sha256>(salt_len), &hashed, signature)
            .is_ok()
        {
            return Ok(());
        }
    }
    Err(CryptoError::VerificationFailed)
}

// ---------------------------------------------------------------------------
// secp256k1
// ---------------------------------------------------------------------------

/// `keccak256("\x19Ethereum Signed Message:\n" ‖ len ‖ message)`
pub fn eip191_digest(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    keccak256_multi(&[prefix.as_bytes(), message])
}

fn verify_eip191(owner: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let key = Secp256k1Key::from_sec1_bytes(owner)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    let sig = sig.normalize_s().unwrap_or(sig);
    key.verify_prehash(&eip191_digest(message), &sig)
        .map_err(|_| CryptoError::VerificationFailed)
}

const EIP712_DOMAIN_TYPE: &str = "EIP712Domain(string name,string version)";
const EIP712_ITEM_TYPE: &str = "Bundlr(bytes Transaction hash,address address)";
const EIP712_DOMAIN_NAME: &str = "Bundlr";
const EIP712_DOMAIN_VERSION: &str = "1";

/// Typed-data digest binding the item's deep hash to the signer address.
pub fn eip712_digest(message: &[u8], address: &[u8; 20]) -> [u8; 32] {
    let domain_separator = keccak256_multi(&[
        &keccak256(EIP712_DOMAIN_TYPE.as_bytes()),
        &keccak256(EIP712_DOMAIN_NAME.as_bytes()),
        &keccak256(EIP712_DOMAIN_VERSION.as_bytes()),
    ]);
    let mut padded_address = [0u8; 32];
    padded_address[12..].copy_from_slice(address);
    let struct_hash = keccak256_multi(&[
        &keccak256(EIP712_ITEM_TYPE.as_bytes()),
        &keccak256(message),
        &padded_address,
    ]);
    keccak256_multi(&[b"\x19\x01", &domain_separator, &struct_hash])
}

/// Parse a `0x`-prefixed hex address from its ASCII owner bytes.
pub fn parse_eth_address(owner: &[u8]) -> Result<[u8; 20], CryptoError> {
    let text = std::str::from_utf8(owner)
        .map_err(|_| CryptoError::InvalidPublicKey("address is not utf-8".into()))?;
    let hex_part = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| CryptoError::InvalidPublicKey("address lacks 0x prefix".into()))?;
    let bytes = hex::decode(hex_part).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("address must be 20 bytes".into()))
}

/// Ethereum address of a secp256k1 key: last 20 bytes of keccak(X ‖ Y).
pub fn eth_address(key: &Secp256k1Key) -> [u8; 20] {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    out
}

fn verify_eip712(owner: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let address = parse_eth_address(owner)?;
    let sig = EcdsaSignature::from_slice(&signature[..64])
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    let v = signature[64];
    let recovery = RecoveryId::from_byte(v.checked_sub(27).unwrap_or(v))
        .ok_or_else(|| CryptoError::MalformedSignature(format!("bad recovery byte {v}")))?;

    let digest = eip712_digest(message, &address);
    let recovered = Secp256k1Key::recover_from_prehash(&digest, &sig, recovery)
        .map_err(|_| CryptoError::VerificationFailed)?;
    if eth_address(&recovered) != address {
        return Err(CryptoError::VerificationFailed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use k256::ecdsa::SigningKey as Secp256k1Signer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rsa::pss::BlindedSigningKey;
    use rsa::signature::{RandomizedSigner, SignatureEncoding};
    use rsa::traits::PublicKeyParts;

    fn ed_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn secp_key(seed: u8) -> Secp256k1Signer {
        Secp256k1Signer::from_bytes(&[seed; 32].into()).unwrap()
    }

    #[test]
    fn tag_roundtrip_and_lengths() {
        for ty in SignatureType::ALL {
            assert_eq!(SignatureType::from_tag(ty.tag()).unwrap(), ty);
            assert!(ty.signature_len() > 0 && ty.owner_len() > 0);
        }
        assert_eq!(
            SignatureType::from_tag(99),
            Err(CryptoError::UnsupportedSignatureType(99))
        );
    }

    #[test]
    fn ed25519_accepts_valid_and_rejects_flipped_bit() {
        let key = ed_key(1);
        let msg = [7u8; 48];
        let mut sig = key.sign(&msg).to_bytes();
        let owner = key.verifying_key().to_bytes();
        assert!(SignatureType::Ed25519.verify(&owner, &msg, &sig).is_ok());
        assert!(SignatureType::Solana.verify(&owner, &msg, &sig).is_ok());
        sig[10] ^= 1;
        assert!(SignatureType::Ed25519.verify(&owner, &msg, &sig).is_err());
    }

    #[test]
    fn wrong_owner_length_is_reported() {
        let err = SignatureType::Ed25519
            .verify(&[0u8; 31], &[0u8; 48], &[0u8; 64])
            .unwrap_err();
        assert!(matches!(err, CryptoError::BadLength { what: "owner", .. }));
    }

    #[test]
    fn injected_aptos_signs_envelope() {
        let key = ed_key(2);
        let msg = [9u8; 48];
        let envelope = format!("APTOS\nmessage: {}\nnonce: bundlr", hex::encode(msg));
        let sig = key.sign(envelope.as_bytes()).to_bytes();
        let owner = key.verifying_key().to_bytes();
        assert!(SignatureType::InjectedAptos.verify(&owner, &msg, &sig).is_ok());
        // Signing the raw message is not enough.
        let raw = key.sign(&msg).to_bytes();
        assert!(SignatureType::InjectedAptos.verify(&owner, &msg, &raw).is_err());
    }

    fn multi_fixture(signers: &[usize], threshold: u8, msg: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut owner = vec![0u8; 32 * 32 + 1];
        let mut sig = vec![0u8; 64 * 32 + 4];
        for slot in 0..32 {
            let key = ed_key(slot as u8 + 10);
            owner[slot * 32..(slot + 1) * 32].copy_from_slice(&key.verifying_key().to_bytes());
        }
        owner[1024] = threshold;
        for &slot in signers {
            let key = ed_key(slot as u8 + 10);
            sig[slot * 64..(slot + 1) * 64].copy_from_slice(&key.sign(msg).to_bytes());
            sig[2048 + slot / 8] |= 0x80 >> (slot % 8);
        }
        (owner, sig)
    }

    #[test]
    fn multi_aptos_threshold() {
        let msg = [5u8; 48];
        let (owner, sig) = multi_fixture(&[0, 3, 17], 2, &msg);
        assert!(SignatureType::MultiAptos.verify(&owner, &msg, &sig).is_ok());

        let (owner, sig) = multi_fixture(&[0], 2, &msg);
        assert!(SignatureType::MultiAptos.verify(&owner, &msg, &sig).is_err());
    }

    #[test]
    fn multi_aptos_rejects_bad_slot() {
        let msg = [5u8; 48];
        let (owner, mut sig) = multi_fixture(&[1, 2], 2, &msg);
        sig[2 * 64 + 5] ^= 0xFF;
        assert!(SignatureType::MultiAptos.verify(&owner, &msg, &sig).is_err());
    }

    #[test]
    fn ethereum_personal_message() {
        let key = secp_key(3);
        let msg = [1u8; 48];
        let (sig, recid) = key.sign_prehash_recoverable(&eip191_digest(&msg)).unwrap();
        let mut raw = sig.to_bytes().to_vec();
        raw.push(recid.to_byte() + 27);
        let owner = key.verifying_key().to_encoded_point(false);
        assert!(SignatureType::Ethereum
            .verify(owner.as_bytes(), &msg, &raw)
            .is_ok());
        assert!(SignatureType::Ethereum
            .verify(owner.as_bytes(), &[2u8; 48], &raw)
            .is_err());
    }

    #[test]
    fn typed_ethereum_recovers_address() {
        let key = secp_key(4);
        let address = eth_address(key.verifying_key());
        let owner = format!("0x{}", hex::encode(address));
        assert_eq!(owner.len(), 42);

        let msg = [3u8; 48];
        let (sig, recid) = key
            .sign_prehash_recoverable(&eip712_digest(&msg, &address))
            .unwrap();
        let mut raw = sig.to_bytes().to_vec();
        raw.push(recid.to_byte() + 27);
        assert!(SignatureType::TypedEthereum
            .verify(owner.as_bytes(), &msg, &raw)
            .is_ok());

        let other = format!("0x{}", hex::encode([0xAAu8; 20]));
        assert!(SignatureType::TypedEthereum
            .verify(other.as_bytes(), &msg, &raw)
            .is_err());
    }

    fn rsa_key() -> &'static rsa::RsaPrivateKey {
        static KEY: std::sync::OnceLock<rsa::RsaPrivateKey> = std::sync::OnceLock::new();
        KEY.get_or_init(|| {
            let mut rng = StdRng::seed_from_u64(0x5157);
            rsa::RsaPrivateKey::new(&mut rng, 4096).unwrap()
        })
    }

    fn left_pad(bytes: Vec<u8>, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len - bytes.len()];
        out.extend_from_slice(&bytes);
        out
    }

    fn rsa_sign(message: &[u8], salt_len: usize) -> Vec<u8> {
        let signer = BlindedSigningKey::<Sha256>::new_with_salt_len(rsa_key().clone(), salt_len);
        let signature = signer.sign_with_rng(&mut StdRng::seed_from_u64(salt_len as u64), message);
        left_pad(signature.to_bytes().into_vec(), 512)
    }

    #[test]
    fn rsa_accepts_both_salt_lengths() {
        let owner = left_pad(rsa_key().n().to_bytes_be(), 512);
        let message = crate::deep_hash_list(&[&b"dataitem"[..], b"1", b"1"]);

        for salt_len in [32, 512 - 32 - 2] {
            let mut signature = rsa_sign(&message, salt_len);
            assert!(
                SignatureType::Arweave.verify(&owner, &message, &signature).is_ok(),
                "salt length {salt_len}"
            );
            signature[100] ^= 0x01;
            assert_eq!(
                SignatureType::Arweave.verify(&owner, &message, &signature),
                Err(CryptoError::VerificationFailed)
            );
        }
    }

    #[test]
    fn rsa_rejects_a_different_message() {
        let owner = left_pad(rsa_key().n().to_bytes_be(), 512);
        let message = [4u8; 48];
        let signature = rsa_sign(&message, 32);
        assert!(SignatureType::Arweave.verify(&owner, &[5u8; 48], &signature).is_err());
    }

    #[test]
    fn rsa_rejects_garbage_signature() {
        let mut owner = vec![0xC3u8; 512];
        owner[511] |= 1;
        let err = SignatureType::Arweave.verify(&owner, &[0u8; 48], &[1u8; 512]);
        assert!(err.is_err());
    }

    #[test]
    fn eth_address_parse_requires_prefix() {
        assert!(parse_eth_address(b"abcd").is_err());
        let ok = format!("0x{}", "11".repeat(20));
        assert_eq!(parse_eth_address(ok.as_bytes()).unwrap(), [0x11; 20]);
    }
}
