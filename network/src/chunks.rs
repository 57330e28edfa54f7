//! Ordered, windowed download of a base-layer transaction's chunks.
//!
//! All but the last two chunks are fetched through a bounded in-flight
//! window and delivered in offset order. The final two are fetched one at a
//! time after everything else, because chunk boundaries are rebalanced at
//! the end of a transaction and their offsets depend on what came before.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, FuturesOrdered};
use futures_util::{FutureExt, StreamExt};
use std::sync::Arc;

use whistle_crypto::decode_b64url;
use whistle_protocol::{endpoints, ChunkResponse, TxOffset};
use whistle_types::params::CHUNK_SIZE;
use whistle_types::TxId;

use crate::fallback::{FallbackFetcher, RequestOptions};
use crate::DownloadError;

/// Chunks in ascending offset order. An error item ends the sequence.
pub type ChunkStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// Number of trailing chunks fetched sequentially.
const SEQUENTIAL_TAIL: u64 = 2;

#[derive(Clone)]
pub struct ChunkDownloader {
    fetcher: Arc<FallbackFetcher>,
    concurrency: usize,
}

impl ChunkDownloader {
    pub fn new(fetcher: Arc<FallbackFetcher>, concurrency: usize) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
        }
    }

    /// Lazily download `id`. Nothing is requested until the stream is polled.
    pub fn download(&self, id: TxId, options: RequestOptions) -> ChunkStream {
        let state = Download {
            fetcher: Arc::clone(&self.fetcher),
            options,
            id,
            concurrency: self.concurrency,
            phase: Phase::Start,
            layout: Layout::default(),
            next_chunk: 0,
            in_flight: FuturesOrdered::new(),
            received: 0,
        };
        stream::unfold(state, |mut state| async move {
            let item = state.next_item().await?;
            Some((item, state))
        })
        .boxed()
    }

    /// Look up where `id` lives in the weave.
    pub async fn offset(&self, id: &TxId, options: &RequestOptions) -> Result<TxOffset, DownloadError> {
        fetch_offset(&self.fetcher, id, options).await
    }
}

async fn fetch_offset(
    fetcher: &FallbackFetcher,
    id: &TxId,
    options: &RequestOptions,
) -> Result<TxOffset, DownloadError> {
    let response = fetcher
        .request(&endpoints::tx_offset(id), options)
        .await
        .map_err(DownloadError::Metadata)?;
    response
        .json::<TxOffset>()
        .map_err(|e| DownloadError::MalformedMetadata(e.to_string()))
}

async fn fetch_chunk(fetcher: Arc<FallbackFetcher>, offset: u64, options: RequestOptions) -> Result<Bytes, DownloadError> {
    let response = fetcher
        .request(&endpoints::chunk(offset), &options)
        .await
        .map_err(|source| DownloadError::Chunk { offset, source })?;
    let chunk: ChunkResponse = response.json().map_err(|e| DownloadError::ChunkDecode {
        offset,
        reason: e.to_string(),
    })?;
    let bytes = decode_b64url(&chunk.chunk).map_err(|e| DownloadError::ChunkDecode {
        offset,
        reason: e.to_string(),
    })?;
    tracing::trace!(offset, size = bytes.len(), "fetched chunk");
    Ok(Bytes::from(bytes))
}

#[derive(Clone, Copy, Debug, Default)]
struct Layout {
    start: u64,
    size: u64,
    /// Chunks fetched through the window.
    parallel: u64,
    window: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Start,
    Windowed,
    Tail { fetched: u64 },
    Done,
}

struct Download {
    fetcher: Arc<FallbackFetcher>,
    options: RequestOptions,
    id: TxId,
    concurrency: usize,
    phase: Phase,
    layout: Layout,
    next_chunk: u64,
    in_flight: FuturesOrdered<BoxFuture<'static, Result<Bytes, DownloadError>>>,
    received: u64,
}

impl Download {
    async fn next_item(&mut self) -> Option<Result<Bytes, DownloadError>> {
        match self.advance().await {
            Ok(Some(bytes)) => Some(Ok(bytes)),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(tx = %self.id, received = self.received, error = %e, "download failed");
                self.phase = Phase::Done;
                self.in_flight = FuturesOrdered::new();
                Some(Err(e))
            }
        }
    }

    fn top_up(&mut self) {
        while self.in_flight.len() < self.layout.window && self.next_chunk < self.layout.parallel {
            let offset = self.layout.start + CHUNK_SIZE * self.next_chunk;
            self.next_chunk += 1;
            let fut = fetch_chunk(Arc::clone(&self.fetcher), offset, self.options.clone()).boxed();
            self.in_flight.push_back(fut);
        }
    }

    async fn advance(&mut self) -> Result<Option<Bytes>, DownloadError> {
        loop {
            match self.phase {
                Phase::Start => {
                    let meta = fetch_offset(&self.fetcher, &self.id, &self.options).await?;
                    let start = meta
                        .start()
                        .map_err(|e| DownloadError::MalformedMetadata(e.to_string()))?;
                    let chunks = meta.size.div_ceil(CHUNK_SIZE);
                    let parallel = chunks.saturating_sub(SEQUENTIAL_TAIL);
                    let window = (self.concurrency as u64).min(parallel) as usize;
                    self.layout = Layout {
                        start,
                        size: meta.size,
                        parallel,
                        window,
                    };
                    tracing::debug!(tx = %self.id, start, size = meta.size, chunks, window, "starting download");
                    self.phase = Phase::Windowed;
                }
                Phase::Windowed => {
                    self.top_up();
                    match self.in_flight.next().await {
                        Some(result) => {
                            let bytes = result?;
                            if bytes.len() as u64 != CHUNK_SIZE {
                                return Err(DownloadError::ChunkSize {
                                    offset: self.layout.start + self.received,
                                    expected: CHUNK_SIZE,
                                    actual: bytes.len() as u64,
                                });
                            }
                            self.received += bytes.len() as u64;
                            return Ok(Some(bytes));
                        }
                        None => self.phase = Phase::Tail { fetched: 0 },
                    }
                }
                Phase::Tail { fetched } => {
                    if fetched < SEQUENTIAL_TAIL && self.received < self.layout.size {
                        let offset = self.layout.start + self.received;
                        let bytes = fetch_chunk(Arc::clone(&self.fetcher), offset, self.options.clone()).await?;
                        if bytes.is_empty() {
                            return Err(DownloadError::ChunkSize {
                                offset,
                                expected: CHUNK_SIZE.min(self.layout.size - self.received),
                                actual: 0,
                            });
                        }
                        self.received += bytes.len() as u64;
                        self.phase = Phase::Tail { fetched: fetched + 1 };
                        return Ok(Some(bytes));
                    }
                    self.phase = Phase::Done;
                    if self.received != self.layout.size {
                        return Err(DownloadError::SizeMismatch {
                            expected: self.layout.size,
                            received: self.received,
                        });
                    }
                }
                Phase::Done => return Ok(None),
            }
        }
    }
}
