//! Bundle framing and per-item verification.
//!
//! ```text
//! bundle := count:u256le  header{count}  item{count}
//! header := length:u256le  id:[32]
//! item   := sig_type:u16le  signature  owner
//!           target_flag [target:32]  anchor_flag [anchor:32]
//!           tag_count:u64le  tag_bytes_len:u64le  tag_bytes  payload
//! ```
//!
//! Each item consumes exactly its declared length. A malformed or forged item
//! is recorded in [`ParsedBundle::errors`] and the rest of its bytes are
//! skipped, so the next item starts aligned. Bytes left after the last item
//! fail the parse.

use bytes::Bytes;
use futures_util::Stream;
use std::fmt::Display;
use tracing::{debug, warn};
use whistle_crypto::{sha256, owner_address, BlobHasher, ListHasher, SignatureType};
use whistle_types::TxId;

use crate::reader::{ByteReader, ReadError};
use crate::tags::decode_tags;
use crate::{DataSourceError, ItemVerificationError, ParseFailure, Tag};

/// Items declaring fewer bytes are rejected before any field is read.
pub const MIN_ITEM_SIZE: u64 = 80;

const HEADER_ENTRY_SIZE: usize = 64;

/// Upper bound on tag bytes per item.
pub const DEFAULT_MAX_TAG_BYTES: u64 = 1024 * 1024;

/// Header-table entries preallocated before any bytes prove the count honest.
const MAX_PREALLOCATED_HEADERS: usize = 4096;

/// An item whose id and signature checked out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedItem {
    pub id: TxId,
    pub signature_type: SignatureType,
    /// Ledger address of the signer.
    pub owner_address: String,
    pub target: Option<[u8; 32]>,
    pub anchor: Option<[u8; 32]>,
    pub tags: Vec<Tag>,
    /// Absolute offset of the payload within the bundle.
    pub data_offset: u64,
    pub data_size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemError {
    pub id: TxId,
    pub error: ItemVerificationError,
}

/// Items partitioned by outcome, in header-table order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedBundle {
    pub items: Vec<VerifiedItem>,
    pub errors: Vec<ItemError>,
    /// Total bytes consumed from the source.
    pub bytes_read: u64,
}

impl ParsedBundle {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.items.len() + self.errors.len()
    }
}

/// What stopped an item. `Item` is isolated, the others end the parse.
enum ItemFault {
    Item(ItemVerificationError),
    Source(DataSourceError),
    Eof { missing: u64 },
}

impl From<ItemVerificationError> for ItemFault {
    fn from(e: ItemVerificationError) -> Self {
        Self::Item(e)
    }
}

impl From<ReadError> for ItemFault {
    fn from(e: ReadError) -> Self {
        match e {
            ReadError::Source(e) => Self::Source(e),
            ReadError::Eof { missing } => Self::Eof { missing },
        }
    }
}

#[derive(Clone, Debug)]
pub struct BundleParser {
    max_tag_bytes: u64,
}

impl Default for BundleParser {
    fn default() -> Self {
        Self {
            max_tag_bytes: DEFAULT_MAX_TAG_BYTES,
        }
    }
}

impl BundleParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tag_bytes(mut self, max: u64) -> Self {
        self.max_tag_bytes = max;
        self
    }

    /// Parse and verify every item in a bundle byte stream.
    ///
    /// Per-item failures land in the returned `errors`. A failing source or an
    /// unreadable header table aborts with [`ParseFailure`], carrying the
    /// partial result.
    pub async fn parse<S, E>(&self, source: S) -> Result<ParsedBundle, ParseFailure>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let mut reader = ByteReader::new(source);
        let mut out = ParsedBundle::default();

        let headers = match read_headers(&mut reader).await {
            Ok(h) => h,
            Err(fault) => {
                out.bytes_read = reader.position();
                return Err(match fault {
                    HeaderFault::Source(source) => ParseFailure::DataSource {
                        source,
                        partial: Box::new(out),
                    },
                    HeaderFault::Framing(reason) => ParseFailure::Framing {
                        reason,
                        partial: Box::new(out),
                    },
                });
            }
        };
        debug!(items = headers.len(), "bundle header table read");

        let mut truncated_at = None;
        for (index, (length, id)) in headers.iter().enumerate() {
            if truncated_at.is_some() {
                out.errors.push(ItemError {
                    id: *id,
                    error: ItemVerificationError::Truncated { missing: *length },
                });
                continue;
            }

            let start = reader.position();
            match self.read_item(&mut reader, *length, *id).await {
                Ok(item) => out.items.push(item),
                Err(ItemFault::Item(error)) => {
                    warn!(item = %id, index, %error, "item failed verification");
                    out.errors.push(ItemError { id: *id, error });
                    let used = reader.position() - start;
                    if let Err(e) = reader.skip(length.saturating_sub(used)).await {
                        match e {
                            ReadError::Source(source) => {
                                out.bytes_read = reader.position();
                                return Err(ParseFailure::DataSource {
                                    source,
                                    partial: Box::new(out),
                                });
                            }
                            ReadError::Eof { .. } => truncated_at = Some(index),
                        }
                    }
                }
                Err(ItemFault::Source(source)) => {
                    out.bytes_read = reader.position();
                    return Err(ParseFailure::DataSource {
                        source,
                        partial: Box::new(out),
                    });
                }
                Err(ItemFault::Eof { missing }) => {
                    warn!(item = %id, index, missing, "bundle ended inside item");
                    out.errors.push(ItemError {
                        id: *id,
                        error: ItemVerificationError::Truncated { missing },
                    });
                    truncated_at = Some(index);
                }
            }
        }

        // The source must end where the last item does; its own late errors
        // (a short or long body) only show up once it is polled to the end.
        if truncated_at.is_none() {
            let failure = match reader.trailing().await {
                Ok(0) => None,
                Ok(extra) => Some(DataSourceError {
                    position: reader.position(),
                    reason: format!("at least {extra} bytes past the last item"),
                }),
                Err(ReadError::Source(source)) => Some(source),
                Err(ReadError::Eof { .. }) => None,
            };
            if let Some(source) = failure {
                warn!(position = source.position, reason = %source.reason, "bundle source did not end with the last item");
                out.bytes_read = reader.position();
                return Err(ParseFailure::DataSource {
                    source,
                    partial: Box::new(out),
                });
            }
        }

        out.bytes_read = reader.position();
        Ok(out)
    }

    async fn read_item<S, E>(
        &self,
        reader: &mut ByteReader<S>,
        length: u64,
        id: TxId,
    ) -> Result<VerifiedItem, ItemFault>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        if length < MIN_ITEM_SIZE {
            return Err(ItemVerificationError::TooShort {
                length,
                min: MIN_ITEM_SIZE,
            }
            .into());
        }
        let start = reader.position();

        let tag = u16::from_le_bytes(reader.take_array::<2>().await?);
        let sig_type =
            SignatureType::from_tag(tag).map_err(|_| ItemVerificationError::UnsupportedSignatureType(tag))?;
        let fixed = 2 + sig_type.signature_len() as u64 + sig_type.owner_len() as u64 + 2 + 16;
        if fixed > length {
            return Err(ItemVerificationError::HeaderOverrun { needed: fixed, length }.into());
        }

        let signature = reader.take(sig_type.signature_len()).await?;
        let owner = reader.take(sig_type.owner_len()).await?;
        // After each flag: the anchor flag (target only) and the two tag lengths.
        let target = read_optional(reader, "target", start, length, 1 + 16).await?;
        let anchor = read_optional(reader, "anchor", start, length, 16).await?;

        let tag_count = u64::from_le_bytes(reader.take_array::<8>().await?);
        let tag_bytes_len = u64::from_le_bytes(reader.take_array::<8>().await?);
        let header_size = (reader.position() - start).saturating_add(tag_bytes_len);
        if header_size > length {
            return Err(ItemVerificationError::HeaderOverrun {
                needed: header_size,
                length,
            }
            .into());
        }
        if tag_bytes_len > self.max_tag_bytes {
            return Err(ItemVerificationError::TagsTooLarge(tag_bytes_len).into());
        }
        let tag_bytes = reader.take(tag_bytes_len as usize).await?;
        let tags = if tag_count != 0 && tag_bytes_len != 0 {
            decode_tags(&tag_bytes).map_err(ItemVerificationError::MalformedTags)?
        } else {
            Vec::new()
        };
        if tags.len() as u64 != tag_count {
            return Err(ItemVerificationError::TagCountMismatch {
                declared: tag_count,
                decoded: tags.len() as u64,
            }
            .into());
        }

        if sha256(&signature) != *id.as_bytes() {
            return Err(ItemVerificationError::IdMismatch.into());
        }

        let data_offset = reader.position();
        let data_size = length - header_size;

        let mut list = ListHasher::new(8);
        list.push_blob(b"dataitem");
        list.push_blob(b"1");
        list.push_blob(sig_type.tag().to_string().as_bytes());
        list.push_blob(&owner);
        list.push_blob(target.as_ref().map_or(&[][..], |t| &t[..]));
        list.push_blob(anchor.as_ref().map_or(&[][..], |a| &a[..]));
        list.push_blob(&tag_bytes);
        let mut payload = BlobHasher::new(data_size);
        reader.stream_into(data_size, |chunk| payload.update(chunk)).await?;
        let payload_digest = payload.finish().ok_or(ItemFault::Eof { missing: 0 })?;
        list.push_digest(&payload_digest);
        let message = list.finish();

        sig_type
            .verify(&owner, &message, &signature)
            .map_err(ItemVerificationError::InvalidSignature)?;

        Ok(VerifiedItem {
            id,
            signature_type: sig_type,
            owner_address: owner_address(&owner),
            target,
            anchor,
            tags,
            data_offset,
            data_size,
        })
    }
}

async fn read_optional<S, E>(
    reader: &mut ByteReader<S>,
    field: &'static str,
    item_start: u64,
    length: u64,
    trailing: u64,
) -> Result<Option<[u8; 32]>, ItemFault>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let [flag] = reader.take_array::<1>().await?;
    match flag {
        0 => Ok(None),
        1 => {
            let needed = reader.position() - item_start + 32 + trailing;
            if needed > length {
                return Err(ItemVerificationError::HeaderOverrun { needed, length }.into());
            }
            Ok(Some(reader.take_array::<32>().await?))
        }
        other => Err(ItemVerificationError::InvalidPresenceFlag { field, flag: other }.into()),
    }
}

enum HeaderFault {
    Source(DataSourceError),
    Framing(String),
}

/// Interpret a 32-byte little-endian integer; it must fit in a `u64`.
fn u256_le_to_u64(bytes: &[u8; 32]) -> Option<u64> {
    if bytes[8..].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[..8]);
    Some(u64::from_le_bytes(low))
}

async fn read_headers<S, E>(reader: &mut ByteReader<S>) -> Result<Vec<(u64, TxId)>, HeaderFault>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let map_read = |e: ReadError| match e {
        ReadError::Source(s) => HeaderFault::Source(s),
        ReadError::Eof { missing } => HeaderFault::Framing(format!("header table truncated, {missing} bytes short")),
    };

    let count_bytes = reader.take_array::<32>().await.map_err(map_read)?;
    let count = u256_le_to_u64(&count_bytes)
        .ok_or_else(|| HeaderFault::Framing("item count does not fit in 64 bits".into()))?;

    let mut headers = Vec::with_capacity((count as usize).min(MAX_PREALLOCATED_HEADERS));
    for index in 0..count {
        let entry = reader.take(HEADER_ENTRY_SIZE).await.map_err(map_read)?;
        let mut length = [0u8; 32];
        length.copy_from_slice(&entry[..32]);
        let length = u256_le_to_u64(&length)
            .ok_or_else(|| HeaderFault::Framing(format!("item {index} length does not fit in 64 bits")))?;
        let id = TxId::from_slice(&entry[32..]).map_err(|e| HeaderFault::Framing(e.to_string()))?;
        headers.push((length, id));
    }
    Ok(headers)
}
