//! Bounded reads over an async stream of byte chunks.
//!
//! Chunks arrive in whatever sizes the source produces. Reads pull from the
//! source only until the requested length is buffered, and payload bytes are
//! handed to a sink chunk by chunk instead of being collected.

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::fmt::Display;

use crate::DataSourceError;

#[derive(Debug)]
pub(crate) enum ReadError {
    /// The source yielded an error.
    Source(DataSourceError),
    /// The source ended with `missing` bytes still owed.
    Eof { missing: u64 },
}

pub(crate) struct ByteReader<S> {
    source: S,
    buf: BytesMut,
    position: u64,
}

impl<S, E> ByteReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            buf: BytesMut::new(),
            position: 0,
        }
    }

    /// Absolute number of bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Pull one chunk into the buffer.
    async fn pull(&mut self, missing: u64) -> Result<(), ReadError> {
        match self.source.next().await {
            Some(Ok(chunk)) => {
                self.buf.extend_from_slice(&chunk);
                Ok(())
            }
            Some(Err(e)) => Err(ReadError::Source(DataSourceError {
                position: self.position + self.buf.len() as u64,
                reason: e.to_string(),
            })),
            None => Err(ReadError::Eof { missing }),
        }
    }

    async fn fill(&mut self, n: usize) -> Result<(), ReadError> {
        while self.buf.len() < n {
            let missing = (n - self.buf.len()) as u64;
            self.pull(missing).await?;
        }
        Ok(())
    }

    /// Read exactly `n` bytes.
    pub async fn take(&mut self, n: usize) -> Result<Bytes, ReadError> {
        self.fill(n).await?;
        self.position += n as u64;
        Ok(self.buf.split_to(n).freeze())
    }

    pub async fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ReadError> {
        self.fill(N).await?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        self.position += N as u64;
        Ok(out)
    }

    /// Hand the next `n` bytes to `sink` without buffering them all.
    pub async fn stream_into(&mut self, mut n: u64, mut sink: impl FnMut(&[u8])) -> Result<(), ReadError> {
        while n > 0 {
            if self.buf.is_empty() {
                self.pull(n).await?;
                continue;
            }
            let k = n.min(self.buf.len() as u64) as usize;
            sink(&self.buf[..k]);
            self.buf.advance(k);
            self.position += k as u64;
            n -= k as u64;
        }
        Ok(())
    }

    pub async fn skip(&mut self, n: u64) -> Result<(), ReadError> {
        self.stream_into(n, |_| {}).await
    }

    /// Poll the source until it ends or yields unread bytes. Returns how many
    /// unread bytes were found (zero at a clean end).
    pub async fn trailing(&mut self) -> Result<usize, ReadError> {
        while self.buf.is_empty() {
            match self.pull(0).await {
                Ok(()) => {}
                Err(ReadError::Eof { .. }) => return Ok(0),
                Err(e) => return Err(e),
            }
        }
        Ok(self.buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes, String>> + Unpin {
        let v: Vec<Result<Bytes, String>> = parts.iter().map(|p| Ok(Bytes::copy_from_slice(p))).collect();
        stream::iter(v)
    }

    #[tokio::test]
    async fn take_spans_chunks() {
        let mut r = ByteReader::new(chunks(&[b"ab", b"cde", b"f"]));
        assert_eq!(&r.take(4).await.unwrap()[..], b"abcd");
        assert_eq!(r.position(), 4);
        let rest: [u8; 2] = r.take_array().await.unwrap();
        assert_eq!(&rest, b"ef");
    }

    #[tokio::test]
    async fn stream_into_feeds_exact_length() {
        let mut r = ByteReader::new(chunks(&[b"0123", b"4567", b"89"]));
        let mut seen = Vec::new();
        r.stream_into(7, |b| seen.extend_from_slice(b)).await.unwrap();
        assert_eq!(seen, b"0123456");
        assert_eq!(&r.take(3).await.unwrap()[..], b"789");
    }

    #[tokio::test]
    async fn eof_reports_missing() {
        let mut r = ByteReader::new(chunks(&[b"abc"]));
        match r.take(5).await {
            Err(ReadError::Eof { missing }) => assert_eq!(missing, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn trailing_skips_empty_chunks_and_reports_leftovers() {
        let mut r = ByteReader::new(chunks(&[b"abc", b"", b"de"]));
        r.skip(3).await.unwrap();
        assert_eq!(r.trailing().await.unwrap(), 2);

        let mut r = ByteReader::new(chunks(&[b"abc", b""]));
        r.skip(3).await.unwrap();
        assert_eq!(r.trailing().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn source_error_carries_position() {
        let items: Vec<Result<Bytes, String>> = vec![Ok(Bytes::from_static(b"xy")), Err("peer gone".into())];
        let mut r = ByteReader::new(stream::iter(items));
        r.skip(2).await.unwrap();
        match r.take(1).await {
            Err(ReadError::Source(e)) => {
                assert_eq!(e.position, 2);
                assert!(e.reason.contains("peer gone"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
