//! Parser error taxonomy.
//!
//! - [`ItemVerificationError`]: one item is malformed or forged; collected and
//!   parsing continues.
//! - [`DataSourceError`]: the byte source itself failed; aborts the parse.
//! - [`ParseFailure`]: the parse was aborted; carries whatever was collected.

use thiserror::Error;
use whistle_crypto::CryptoError;

use crate::ParsedBundle;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ItemVerificationError {
    #[error("item length {length} below minimum {min}")]
    TooShort { length: u64, min: u64 },

    #[error("unsupported signature type {0}")]
    UnsupportedSignatureType(u16),

    #[error("invalid {field} presence flag {flag}")]
    InvalidPresenceFlag { field: &'static str, flag: u8 },

    #[error("item headers need {needed} bytes but item length is {length}")]
    HeaderOverrun { needed: u64, length: u64 },

    #[error("tag bytes length {0} exceeds limit")]
    TagsTooLarge(u64),

    #[error("malformed tags: {0}")]
    MalformedTags(String),

    #[error("tag count mismatch: declared {declared}, decoded {decoded}")]
    TagCountMismatch { declared: u64, decoded: u64 },

    #[error("id does not match signature")]
    IdMismatch,

    #[error("invalid signature: {0}")]
    InvalidSignature(CryptoError),

    #[error("bundle ended {missing} bytes before the item did")]
    Truncated { missing: u64 },
}

/// The underlying byte source failed (network exhaustion, size mismatch).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("data source failed at byte {position}: {reason}")]
pub struct DataSourceError {
    pub position: u64,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ParseFailure {
    /// Bytes could not be obtained; nothing in the stream can be trusted.
    #[error("{source}")]
    DataSource {
        source: DataSourceError,
        partial: Box<ParsedBundle>,
    },

    /// The bundle header table is unreadable, so item boundaries are unknown.
    #[error("bundle framing: {reason}")]
    Framing {
        reason: String,
        partial: Box<ParsedBundle>,
    },
}

impl ParseFailure {
    /// Items and errors collected before the parse stopped.
    pub fn partial(&self) -> &ParsedBundle {
        match self {
            Self::DataSource { partial, .. } | Self::Framing { partial, .. } => partial,
        }
    }

    pub fn into_partial(self) -> ParsedBundle {
        match self {
            Self::DataSource { partial, .. } | Self::Framing { partial, .. } => *partial,
        }
    }

    pub fn is_data_source(&self) -> bool {
        matches!(self, Self::DataSource { .. })
    }
}
