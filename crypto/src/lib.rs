//! Cryptographic primitives for bundle verification.
//!
//! - **SHA-256 / SHA-384 / Keccak-256** digests
//! - **Deep hash**: the SHA-384 list/blob construction data items are signed over
//! - **Signature profiles**: RSA-PSS, ed25519 (plain, envelope, multi-key),
//!   secp256k1 (EIP-191 and EIP-712)
//! - Address derivation: base64url(SHA-256(owner))

pub mod address;
pub mod deep_hash;
pub mod error;
pub mod hash;
pub mod keys;
pub mod signature;

pub use address::{decode_b64url, encode_b64url, owner_address, owner_address_b64};
pub use deep_hash::{deep_hash_blob, deep_hash_list, BlobHasher, DeepHashDigest, ListHasher};
pub use error::CryptoError;
pub use hash::{keccak256, sha256, sha384};
pub use keys::Ed25519Keypair;
pub use signature::SignatureType;
