//! Binary bundle parsing.
//!
//! [`BundleParser::parse`] consumes an async stream of byte chunks, walks the
//! header table, and verifies each item's id and signature while streaming its
//! payload through the deep hash. Per-item failures are isolated; a failing
//! byte source aborts the parse with the partial result attached.

pub mod encode;
pub mod error;
pub mod parser;
mod reader;
pub mod tags;

pub use encode::{assemble_bundle, DataItemBuilder, ItemSigner, SignedItem};
pub use error::{DataSourceError, ItemVerificationError, ParseFailure};
pub use parser::{BundleParser, ItemError, ParsedBundle, VerifiedItem};
pub use tags::{decode_tags, encode_tags, Tag};

/// Parse an in-memory bundle. The source never suspends, so this completes
/// without an executor.
pub fn parse_bytes(bytes: &[u8]) -> Result<ParsedBundle, ParseFailure> {
    use futures_util::FutureExt;

    let chunk: Result<bytes::Bytes, std::convert::Infallible> = Ok(bytes::Bytes::copy_from_slice(bytes));
    let parser = BundleParser::new();
    let fut = parser.parse(futures_util::stream::iter([chunk]));
    match fut.now_or_never() {
        Some(result) => result,
        None => Err(ParseFailure::Framing {
            reason: "in-memory parse suspended".into(),
            partial: Box::default(),
        }),
    }
}
