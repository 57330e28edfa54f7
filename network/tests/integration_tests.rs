//! Integration tests for the peer-facing network layer, wired against the
//! nullable transport, clock, and store.

use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use whistle_crypto::{encode_b64url, owner_address};
use whistle_network::{
    fetch_bundler_address, ChunkDownloader, DownloadError, FallbackFetcher, FeedbackMode, FetchError, FetcherConfig,
    GatewayIndex, HeightCache, PeerCrawler, PeerDirectory, PeerDirectoryConfig, ReplicaProbe, RequestOptions,
    RetryPolicy,
};
use whistle_nullables::{NullClock, NullNetwork, NullStore, Reply};
use whistle_protocol::{endpoints, ChainIndex, HttpResponse, HttpTransport, TransportError, TxOffset};
use whistle_store::PeerStore;
use whistle_types::params::{praised_trust, CHUNK_SIZE, STARTING_TRUST};
use whistle_types::{Clock, PeerRecord, Timestamp, TxId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const GATEWAY: &str = "https://gw.test";
const P1: &str = "http://10.0.0.1:1984";
const P2: &str = "http://10.0.0.2:1984";
const P3: &str = "http://10.0.0.3:1984";

struct Harness {
    store: Arc<NullStore>,
    net: Arc<NullNetwork>,
    clock: Arc<NullClock>,
    directory: Arc<PeerDirectory>,
    fetcher: Arc<FallbackFetcher>,
}

fn quick_policy(retries: u32) -> RetryPolicy {
    RetryPolicy::new(retries, Duration::from_secs(1)).with_backoff(Duration::ZERO)
}

fn harness() -> Harness {
    let store = Arc::new(NullStore::new());
    let net = Arc::new(NullNetwork::new());
    let clock = Arc::new(NullClock::default());

    let mut dir_config = PeerDirectoryConfig::new(GATEWAY);
    dir_config.probe_policy = quick_policy(0);
    let directory = Arc::new(PeerDirectory::new(store.clone(), net.clone(), clock.clone(), dir_config));

    let mut config = FetcherConfig::new(GATEWAY);
    config.peer_policy = quick_policy(1);
    config.feedback = FeedbackMode::Inline;
    let fetcher = Arc::new(FallbackFetcher::new(Arc::clone(&directory), net.clone(), config));

    Harness {
        store,
        net,
        clock,
        directory,
        fetcher,
    }
}

fn seed_peer(store: &NullStore, url: &str, trust: f64) {
    store
        .insert_peer(&PeerRecord::new(url, trust, Timestamp::new(0)))
        .unwrap();
}

fn trust(store: &NullStore, url: &str) -> f64 {
    store.get_peer(url).unwrap().unwrap().trust
}

fn url(base: &str, path: &str) -> String {
    endpoints::join(base, path)
}

// ---------------------------------------------------------------------------
// Fallback fetches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_success_penalizes_earlier_peers_and_praises_winner() {
    let h = harness();
    seed_peer(&h.store, P1, 30.0);
    seed_peer(&h.store, P2, 20.0);
    seed_peer(&h.store, P3, 10.0);
    h.net.on_get(&url(P1, "/info"), Reply::Timeout);
    h.net.on_get(&url(P2, "/info"), Reply::Timeout);
    h.net.on_get(&url(P3, "/info"), Reply::text("{}"));

    let response = h.fetcher.request("/info", &RequestOptions::default()).await.unwrap();
    assert_eq!(response.text(), "{}");

    assert_eq!(trust(&h.store, P1), 28.0);
    assert_eq!(trust(&h.store, P2), 18.0);
    assert_eq!(trust(&h.store, P3), praised_trust(10.0));
    assert_eq!(
        h.store.get_peer(P3).unwrap().unwrap().last_praised_at,
        Some(h.clock.now())
    );
    // one retry per failing peer, the gateway never reached
    assert_eq!(h.net.count(&url(P1, "/info")), 2);
    assert_eq!(h.net.count(&url(P2, "/info")), 2);
    assert_eq!(h.net.count(&url(GATEWAY, "/info")), 0);
}

#[tokio::test]
async fn total_failure_penalizes_nobody() {
    let h = harness();
    seed_peer(&h.store, P1, 30.0);
    seed_peer(&h.store, P2, 20.0);

    let err = h.fetcher.request("/info", &RequestOptions::default()).await.unwrap_err();
    let FetchError::Exhausted { path, tried, .. } = err;
    assert_eq!(path, "/info");
    assert_eq!(tried, 3);
    assert_eq!(trust(&h.store, P1), 30.0);
    assert_eq!(trust(&h.store, P2), 20.0);
}

#[tokio::test]
async fn gateway_success_is_never_praised() {
    let h = harness();
    seed_peer(&h.store, GATEWAY, 50.0);
    seed_peer(&h.store, P1, 30.0);
    h.net.on_get(&url(GATEWAY, "/info"), Reply::text("ok"));

    h.fetcher.request("/info", &RequestOptions::default()).await.unwrap();

    assert_eq!(trust(&h.store, GATEWAY), 50.0);
    assert_eq!(trust(&h.store, P1), 28.0);
}

#[tokio::test]
async fn return_last_hands_back_final_status() {
    let h = harness();
    h.net.on_get(&url(GATEWAY, "/tx/missing"), Reply::status(404));

    let response = h
        .fetcher
        .request("/tx/missing", &RequestOptions::return_last())
        .await
        .unwrap();
    assert_eq!(response.status, 404);

    assert!(h
        .fetcher
        .request("/tx/missing", &RequestOptions::default())
        .await
        .is_err());
}

#[tokio::test]
async fn shortlist_replaces_directory_selection() {
    let h = harness();
    seed_peer(&h.store, P1, 30.0);
    seed_peer(&h.store, P2, 20.0);
    h.net.on_get(&url(P2, "/info"), Reply::text("p2"));

    let response = h
        .fetcher
        .request("/info", &RequestOptions::shortlist(vec![format!("{P2}/")]))
        .await
        .unwrap();
    assert_eq!(response.text(), "p2");
    assert_eq!(h.net.count(&url(P1, "/info")), 0);
}

// ---------------------------------------------------------------------------
// Chunk downloads
// ---------------------------------------------------------------------------

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn download_yields_chunks_in_order() {
    let h = harness();
    let id = TxId::new([9; 32]);
    let data = payload(3 * CHUNK_SIZE as usize + 100);
    h.net.serve_transaction(GATEWAY, &id, &data, 1_000);

    let downloader = ChunkDownloader::new(Arc::clone(&h.fetcher), 4);
    let stream = downloader.download(id, RequestOptions::gateway_only());
    assert!(h.net.requests().is_empty(), "download must be lazy");

    let chunks: Vec<_> = stream.collect().await;
    assert_eq!(chunks.len(), 4);
    let mut joined = Vec::new();
    for chunk in chunks {
        joined.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(joined, data);
}

#[tokio::test]
async fn short_download_ends_with_size_mismatch() {
    let h = harness();
    let id = TxId::new([8; 32]);
    let data = payload(2 * CHUNK_SIZE as usize + 10);
    let start = 5_000;
    h.net.serve_transaction(GATEWAY, &id, &data, start);
    let claimed = data.len() as u64 + 10;
    h.net.on_get(
        &url(GATEWAY, &endpoints::tx_offset(&id)),
        Reply::json(serde_json::json!({
            "offset": (start + claimed - 1).to_string(),
            "size": claimed.to_string(),
        })),
    );

    let downloader = ChunkDownloader::new(Arc::clone(&h.fetcher), 4);
    let items: Vec<_> = downloader.download(id, RequestOptions::gateway_only()).collect().await;
    assert_eq!(items.len(), 4);
    assert!(items[..3].iter().all(|i| i.is_ok()));
    let err = items[3].clone().unwrap_err();
    assert_eq!(
        err,
        DownloadError::SizeMismatch {
            expected: claimed,
            received: data.len() as u64,
        }
    );
    assert!(err.to_string().contains("expected"));
}

#[tokio::test]
async fn missing_offset_is_a_metadata_error() {
    let h = harness();
    let downloader = ChunkDownloader::new(Arc::clone(&h.fetcher), 2);
    let items: Vec<_> = downloader
        .download(TxId::new([7; 32]), RequestOptions::gateway_only())
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(DownloadError::Metadata(_))));
}

/// Wraps the nullable network and records when each chunk request starts
/// and finishes, plus the most chunk requests ever outstanding at once.
#[derive(Default)]
struct ChunkTimeline {
    inner: NullNetwork,
    outstanding: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<(ChunkEvent, String)>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChunkEvent {
    Start,
    End,
}

impl ChunkTimeline {
    fn record(&self, event: ChunkEvent, url: &str) {
        self.events.lock().unwrap().push((event, url.to_string()));
    }

    fn position(&self, event: ChunkEvent, url: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .position(|(e, u)| *e == event && u == url)
            .unwrap_or_else(|| panic!("no {event:?} for {url}"))
    }

    fn started(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == ChunkEvent::Start)
            .map(|(_, u)| u.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl HttpTransport for ChunkTimeline {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        if !url.contains("/chunk/") {
            return self.inner.get(url, timeout).await;
        }
        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.record(ChunkEvent::Start, url);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        let response = self.inner.get(url, timeout).await;
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.record(ChunkEvent::End, url);
        response
    }

    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.inner.post_json(url, body, timeout).await
    }
}

/// Download `data` served at `start` through a timeline-recording transport.
async fn timed_download(data: &[u8], start: u64, concurrency: usize) -> (Arc<ChunkTimeline>, Vec<u8>) {
    let timeline = Arc::new(ChunkTimeline::default());
    let id = TxId::new([6; 32]);
    timeline.inner.serve_transaction(GATEWAY, &id, data, start);

    let mut dir_config = PeerDirectoryConfig::new(GATEWAY);
    dir_config.probe_policy = quick_policy(0);
    let directory = Arc::new(PeerDirectory::new(
        Arc::new(NullStore::new()),
        timeline.clone(),
        Arc::new(NullClock::default()),
        dir_config,
    ));
    let mut config = FetcherConfig::new(GATEWAY);
    config.peer_policy = quick_policy(0);
    config.feedback = FeedbackMode::Inline;
    let fetcher = Arc::new(FallbackFetcher::new(directory, timeline.clone(), config));

    let mut joined = Vec::new();
    let mut stream = ChunkDownloader::new(fetcher, concurrency).download(id, RequestOptions::gateway_only());
    while let Some(chunk) = stream.next().await {
        joined.extend_from_slice(&chunk.unwrap());
    }
    (timeline, joined)
}

fn chunk_url(start: u64, index: u64) -> String {
    url(GATEWAY, &endpoints::chunk(start + CHUNK_SIZE * index))
}

#[tokio::test]
async fn window_is_bounded_and_tail_waits_for_it_to_drain() {
    let start = 10_000;
    let data = payload(4 * CHUNK_SIZE as usize + 100);
    let (timeline, joined) = timed_download(&data, start, 2).await;
    assert_eq!(joined, data);

    assert_eq!(timeline.peak.load(Ordering::SeqCst), 2);
    let started = timeline.started();
    assert_eq!(started.len(), 5);
    assert_eq!(started[3], chunk_url(start, 3));
    assert_eq!(started[4], chunk_url(start, 4));

    let third_tail = timeline.position(ChunkEvent::Start, &chunk_url(start, 3));
    for index in 0..3 {
        assert!(timeline.position(ChunkEvent::End, &chunk_url(start, index)) < third_tail);
    }
    assert!(
        timeline.position(ChunkEvent::End, &chunk_url(start, 3))
            < timeline.position(ChunkEvent::Start, &chunk_url(start, 4))
    );
}

#[tokio::test]
async fn window_never_exceeds_the_parallel_chunk_count() {
    let start = 0;
    let data = payload(3 * CHUNK_SIZE as usize + 1);
    let (timeline, joined) = timed_download(&data, start, 8).await;
    assert_eq!(joined, data);
    // four chunks: two through the window, two in the tail
    assert_eq!(timeline.peak.load(Ordering::SeqCst), 2);
    assert_eq!(timeline.started().len(), 4);
}

#[tokio::test]
async fn single_chunk_goes_through_the_tail() {
    let start = 7_000;
    let data = payload(100);
    let (timeline, joined) = timed_download(&data, start, 4).await;
    assert_eq!(joined, data);
    assert_eq!(timeline.peak.load(Ordering::SeqCst), 1);
    assert_eq!(timeline.started(), vec![chunk_url(start, 0)]);
}

#[tokio::test]
async fn two_chunks_are_fetched_one_after_another() {
    let start = 7_000;
    let data = payload(CHUNK_SIZE as usize + 50);
    let (timeline, joined) = timed_download(&data, start, 4).await;
    assert_eq!(joined, data);
    assert_eq!(timeline.peak.load(Ordering::SeqCst), 1);
    assert_eq!(timeline.started(), vec![chunk_url(start, 0), chunk_url(start, 1)]);
    assert!(
        timeline.position(ChunkEvent::End, &chunk_url(start, 0))
            < timeline.position(ChunkEvent::Start, &chunk_url(start, 1))
    );
}

// ---------------------------------------------------------------------------
// Peer discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_peers_keeps_supported_releases_only() {
    let h = harness();
    h.net.serve_info(P1, 69, 1_000);
    h.net.serve_info(P2, 50, 1_000);

    let added = h
        .directory
        .add_peers(&[P1.to_string(), P2.to_string(), P3.to_string(), format!("{P1}/")])
        .await
        .unwrap();
    assert_eq!(added, 1);
    assert_eq!(trust(&h.store, P1), STARTING_TRUST);
    assert!(h.store.get_peer(P2).unwrap().is_none());
    assert!(h.store.get_peer(P3).unwrap().is_none());

    // already known peers are not probed again
    h.net.clear_log();
    assert_eq!(h.directory.add_peers(&[P1.to_string()]).await.unwrap(), 0);
    assert!(h.net.requests().is_empty());
}

#[tokio::test]
async fn crawl_walks_peer_lists_to_max_depth() {
    let h = harness();
    let first = "http://1.1.1.1:1984";
    let second = "http://2.2.2.2:1984";
    for node in [GATEWAY, first, second] {
        h.net.serve_info(node, 69, 1_000);
    }
    h.net.on_get(&url(GATEWAY, "/peers"), Reply::json(serde_json::json!(["1.1.1.1:1984"])));
    h.net.on_get(&url(first, "/peers"), Reply::json(serde_json::json!(["2.2.2.2:1984"])));
    h.net.on_get(&url(second, "/peers"), Reply::json(serde_json::json!(["3.3.3.3:1984"])));

    let crawler = PeerCrawler::new(Arc::clone(&h.directory), h.net.clone(), 2).with_policy(quick_policy(0));
    let report = crawler.crawl().await.unwrap();

    assert_eq!(report.visited, 2);
    assert_eq!(report.added, 3);
    assert!(h.store.get_peer(second).unwrap().is_some());
    assert_eq!(h.net.count(&url(second, "/peers")), 0);
}

#[tokio::test]
async fn selection_excludes_gateway_and_ranks_by_trust() {
    let h = harness();
    seed_peer(&h.store, GATEWAY, 99.0);
    seed_peer(&h.store, P1, 5.0);
    seed_peer(&h.store, P2, 50.0);
    seed_peer(&h.store, P3, 20.0);

    let picked = h.directory.select_peers(2, false).unwrap();
    assert_eq!(picked, vec![P2.to_string(), P3.to_string()]);

    let randomized = h.directory.select_peers(4, true).unwrap();
    assert_eq!(randomized.len(), 3);
    assert!(!randomized.iter().any(|p| p == GATEWAY));
}

// ---------------------------------------------------------------------------
// Gateway index, height, replicas, bundler identity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn gateway_index_reads_inclusion() {
    let h = harness();
    let id = TxId::new([5; 32]);
    let parent = TxId::new([6; 32]);
    h.net.on_post(
        &url(GATEWAY, "/graphql"),
        Reply::json(serde_json::json!({
            "data": { "transaction": { "block": { "height": 900 }, "bundledIn": { "id": parent.to_base64url() } } }
        })),
    );

    let index = GatewayIndex::new(h.net.clone(), GATEWAY, 0).with_policy(quick_policy(0));
    let inclusion = index.transaction_inclusion(&id).await.unwrap().unwrap();
    assert_eq!(inclusion.block_height, Some(900));
    assert_eq!(inclusion.bundled_in, Some(parent));

    let request = &h.net.requests()[0];
    assert_eq!(request.body.as_ref().unwrap()["variables"]["id"], id.to_base64url());
}

#[tokio::test]
async fn gateway_index_skips_pending_bundles_and_pages() {
    let h = harness();
    let a = TxId::new([1; 32]);
    let b = TxId::new([2; 32]);
    h.net.on_post(
        &url(GATEWAY, "/graphql"),
        Reply::json(serde_json::json!({
            "data": { "transactions": {
                "pageInfo": { "hasNextPage": true },
                "edges": [
                    { "cursor": "c1", "node": { "id": a.to_base64url(), "tags": [], "block": { "height": 10 } } },
                    { "cursor": "c2", "node": { "id": b.to_base64url(), "tags": [], "block": null } }
                ]
            } }
        })),
    );

    let index = GatewayIndex::new(h.net.clone(), GATEWAY, 0).with_policy(quick_policy(0));
    let page = index.posted_bundles("owner", 0, 100, None).await.unwrap();
    assert_eq!(page.bundles.len(), 1);
    assert_eq!(page.bundles[0].id, a);
    assert_eq!(page.next_cursor.as_deref(), Some("c2"));
}

#[tokio::test]
async fn height_is_cached_until_ttl() {
    let h = harness();
    h.net.serve_info(GATEWAY, 69, 100);
    let cache = HeightCache::new(h.net.clone(), h.clock.clone(), GATEWAY, 10).with_policy(quick_policy(0));

    assert_eq!(cache.height().await.unwrap(), 100);
    h.net.serve_info(GATEWAY, 69, 105);
    h.clock.advance(5);
    assert_eq!(cache.height().await.unwrap(), 100);
    h.clock.advance(6);
    assert_eq!(cache.height().await.unwrap(), 105);
    assert_eq!(h.net.count(&url(GATEWAY, "/info")), 2);

    cache.invalidate().await;
    cache.height().await.unwrap();
    assert_eq!(h.net.count(&url(GATEWAY, "/info")), 3);
}

#[tokio::test]
async fn replica_count_stops_at_minimum() {
    let h = harness();
    seed_peer(&h.store, P1, 30.0);
    seed_peer(&h.store, P2, 20.0);
    seed_peer(&h.store, P3, 10.0);
    let location = TxOffset { offset: 2_000, size: 1_000 };
    let path = endpoints::data_sync_record(location.start().unwrap(), 1);
    let full = Reply::json(serde_json::json!([{ "2000": "1000" }]));
    h.net.on_get(&url(P1, &path), full.clone());
    h.net.on_get(&url(P2, &path), full);
    h.net.on_get(&url(P3, &path), Reply::json(serde_json::json!([{ "1500": "1000" }])));

    let probe = ReplicaProbe::new(h.store.clone(), h.net.clone()).with_policy(quick_policy(0));
    assert_eq!(probe.count_full_replicas(&location, 5).await.unwrap(), 2);
    assert!(probe.has_data(P1, &location).await);
    assert!(!probe.has_data(P3, &location).await);
}

#[tokio::test]
async fn bundler_address_derives_from_public_key() {
    let net = NullNetwork::new();
    let owner = vec![7u8; 512];
    net.on_get(
        "http://bundler.test/public",
        Reply::text(format!("\"{}\"\n", encode_b64url(&owner))),
    );

    let address = fetch_bundler_address(&net, "http://bundler.test").await.unwrap();
    assert_eq!(address, owner_address(&owner));
}
