//! Keyword search end to end: scanned profiles, resolved whitelists and the
//! fail-open / fail-closed contract.

use brainstorm_search::search::{
    ContentSearch, MemoryScanner, PassLimits, SearchCache, SearchError, SearchOrchestrator,
    SearchRequest, WHITELIST_UNAVAILABLE,
};
use brainstorm_search::Metrics;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use trust_cache::{
    FileCustomerRegistry, GraphConfig, Neo4jHttpClient, NoCustomers, PrecomputeManager,
    WhitelistCache, WhitelistConfig, WhitelistOrigin, WhitelistSource,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn hex(c: char) -> String {
    c.to_string().repeat(64)
}

fn event(pubkey: &str, profile: serde_json::Value) -> String {
    json!({
        "id": "0".repeat(64),
        "pubkey": pubkey,
        "created_at": 1_700_000_000,
        "kind": 0,
        "tags": [],
        "content": profile.to_string(),
        "sig": "0".repeat(128),
    })
    .to_string()
}

/// A's name is "alice"; B only mentions alice in their about text.
fn alice_and_bob() -> Arc<MemoryScanner> {
    Arc::new(MemoryScanner::new([
        event(&hex('b'), json!({ "name": "bob", "about": "I love alice's cooking" })),
        event(&hex('a'), json!({ "name": "alice", "content": "" })),
        event(&hex('d'), json!({ "name": "dave" })),
    ]))
}

fn rows_body(keys: &[(char, f64)]) -> serde_json::Value {
    let data: Vec<_> = keys
        .iter()
        .map(|(c, influence)| json!({ "row": [hex(*c), influence, 12, 1, 0], "meta": [] }))
        .collect();
    json!({ "results": [{ "columns": [], "data": data }], "errors": [] })
}

struct Fixture {
    dir: tempfile::TempDir,
    scanner: Arc<MemoryScanner>,
    orchestrator: SearchOrchestrator,
}

impl Fixture {
    /// Graph at `graph_uri`; a whitelist file is written only when given.
    fn new(graph_uri: &str, whitelist_file: Option<serde_json::Value>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("whitelist_pubkeys.json");
        if let Some(contents) = whitelist_file {
            std::fs::write(&file_path, contents.to_string()).unwrap();
        }

        let graph = Arc::new(
            Neo4jHttpClient::new(&GraphConfig {
                uri: graph_uri.to_string(),
                request_timeout_secs: 5,
                ..Default::default()
            })
            .unwrap(),
        );
        let precompute =
            PrecomputeManager::new(graph.clone(), Arc::new(NoCustomers), Duration::from_secs(900));
        let whitelists = WhitelistCache::new(
            precompute,
            graph,
            WhitelistConfig {
                file_path,
                ..Default::default()
            },
        );

        let scanner = alice_and_bob();
        let content = ContentSearch::new(
            scanner.clone(),
            PassLimits::default(),
            SearchCache::new(64, Duration::from_secs(60)),
        );
        let orchestrator = SearchOrchestrator::new(
            content,
            Arc::new(whitelists),
            Arc::new(Metrics::new().unwrap()),
        );
        Self {
            dir,
            scanner,
            orchestrator,
        }
    }
}

/// Nothing listens on port 9 on the loopback interface.
const DEAD_GRAPH: &str = "http://127.0.0.1:9";

fn request(query: &str) -> SearchRequest {
    SearchRequest {
        limit: Some(10),
        ..SearchRequest::new(query)
    }
}

#[tokio::test]
async fn name_match_ranks_before_content_match() {
    let fx = Fixture::new(DEAD_GRAPH, Some(json!([hex('a'), hex('b')])));

    let response = fx.orchestrator.search(request("alice")).await.unwrap();

    assert!(response.success);
    assert_eq!(response.pubkeys, vec![hex('a'), hex('b')]);
    assert_eq!(response.counts.before_filter, 2);
    assert_eq!(response.counts.after_filter, 2);
    assert_eq!(response.counts.whitelist_size, 2);
    assert!(response.whitelist.is_none());
    assert!(response.metrics.is_none());
}

#[tokio::test]
async fn results_are_whitelist_members_only() {
    let fx = Fixture::new(DEAD_GRAPH, Some(json!({ hex('b'): true, hex('a'): false })));

    let response = fx.orchestrator.search(request("alice")).await.unwrap();

    assert_eq!(response.pubkeys, vec![hex('b')]);
    assert_eq!(response.counts.before_filter, 2);
    assert_eq!(response.counts.after_filter, 1);
}

#[tokio::test]
async fn unavailable_whitelist_fails_closed() {
    let fx = Fixture::new(DEAD_GRAPH, None);

    let response = fx.orchestrator.search(request("alice")).await.unwrap();

    assert!(response.success);
    assert!(response.pubkeys.is_empty());
    assert_eq!(response.counts.before_filter, 2);
    assert_eq!(response.counts.after_filter, 0);
    assert_eq!(response.whitelist, Some(WHITELIST_UNAVAILABLE));
    assert!(response.warning.is_none());
}

#[tokio::test]
async fn empty_whitelist_file_counts_as_unavailable() {
    let fx = Fixture::new(DEAD_GRAPH, Some(json!([])));

    let response = fx.orchestrator.search(request("alice")).await.unwrap();

    assert!(response.pubkeys.is_empty());
    assert_eq!(response.whitelist, Some(WHITELIST_UNAVAILABLE));
}

#[tokio::test]
async fn fail_open_returns_unfiltered_with_warning() {
    let fx = Fixture::new(DEAD_GRAPH, None);

    let response = fx
        .orchestrator
        .search(SearchRequest {
            limit: Some(1),
            fail_open: true,
            ..SearchRequest::new("alice")
        })
        .await
        .unwrap();

    assert_eq!(response.pubkeys, vec![hex('a')]);
    assert_eq!(response.counts.before_filter, 2);
    assert_eq!(response.counts.after_filter, 2);
    assert_eq!(response.whitelist, Some(WHITELIST_UNAVAILABLE));
    assert!(response.warning.is_some());
}

#[tokio::test]
async fn repeated_query_served_from_cache() {
    let fx = Fixture::new(DEAD_GRAPH, Some(json!([hex('a'), hex('b')])));

    let first = fx.orchestrator.search(request("alice")).await.unwrap();
    let scans = fx.scanner.scans();
    assert!(scans > 0);

    let second = fx
        .orchestrator
        .search(SearchRequest {
            debug: true,
            ..request("  alice ")
        })
        .await
        .unwrap();

    assert_eq!(fx.scanner.scans(), scans);
    assert_eq!(first.pubkeys, second.pubkeys);
    let debug = second.debug.unwrap();
    assert!(debug.cache_hit);
    assert!(debug.passes.is_empty());
}

#[tokio::test]
async fn no_match_finishes_quickly() {
    let fx = Fixture::new(DEAD_GRAPH, Some(json!([hex('a')])));

    let started = std::time::Instant::now();
    let response = fx
        .orchestrator
        .search(request("zz_no_match"))
        .await
        .unwrap();

    assert!(response.pubkeys.is_empty());
    assert_eq!(response.counts.before_filter, 0);
    assert!(started.elapsed() < PassLimits::default().exhaustive_timeout / 2);
}

#[tokio::test]
async fn invalid_input_never_scans() {
    let fx = Fixture::new(DEAD_GRAPH, Some(json!([hex('a')])));

    let err = fx.orchestrator.search(request("   ")).await.unwrap_err();
    assert!(matches!(err, SearchError::EmptyQuery));

    let err = fx
        .orchestrator
        .search(SearchRequest {
            observer: Some("not-a-pubkey".into()),
            ..request("alice")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidObserver(_)));

    let long = "x".repeat(fx.orchestrator.limits().max_query_len + 1);
    let err = fx.orchestrator.search(request(&long)).await.unwrap_err();
    assert!(matches!(err, SearchError::QueryTooLong { .. }));

    assert_eq!(fx.scanner.scans(), 0);
    assert!(fx.dir.path().exists());
}

#[tokio::test]
async fn neo4j_source_ranks_by_influence_and_attaches_metrics() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/neo4j/tx/commit"))
        .and(body_string_contains("(u:NostrUser)"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(rows_body(&[('b', 0.9), ('a', 0.4)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fx = Fixture::new(&server.uri(), None);
    let response = fx
        .orchestrator
        .search(SearchRequest {
            source: WhitelistSource::Neo4j,
            debug: true,
            ..request("alice")
        })
        .await
        .unwrap();

    assert_eq!(response.pubkeys, vec![hex('b'), hex('a')]);
    let metrics = response.metrics.unwrap();
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[&hex('b')].influence, 0.9);
    let debug = response.debug.unwrap();
    assert!(debug.ranked_by_score);
    assert_eq!(debug.whitelist_origin, Some(WhitelistOrigin::Neo4j));
}

#[tokio::test]
async fn customer_view_uses_precomputed_whitelist() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/neo4j/tx/commit"))
        .and(body_string_contains("NostrUserWotMetricsCard"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows_body(&[('b', 0.3)])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/db/neo4j/tx/commit"))
        .and(body_string_contains("(u:NostrUser)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows_body(&[('a', 0.8)])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let customers = dir.path().join("customers.json");
    std::fs::write(
        &customers,
        json!({ "customers": { "carol": { "pubkey": hex('c'), "status": "active" } } })
            .to_string(),
    )
    .unwrap();
    let graph = Arc::new(
        Neo4jHttpClient::new(&GraphConfig {
            uri: server.uri(),
            ..Default::default()
        })
        .unwrap(),
    );
    let precompute = PrecomputeManager::new(
        graph.clone(),
        Arc::new(FileCustomerRegistry::new(customers)),
        Duration::from_secs(900),
    );
    let report = precompute.refresh_all(true).await;
    assert_eq!(report.succeeded(), 2);

    let whitelists = WhitelistCache::new(
        precompute,
        graph,
        WhitelistConfig {
            file_path: dir.path().join("missing.json"),
            ..Default::default()
        },
    );
    let orchestrator = SearchOrchestrator::new(
        ContentSearch::new(
            alice_and_bob(),
            PassLimits::default(),
            SearchCache::new(64, Duration::from_secs(60)),
        ),
        Arc::new(whitelists),
        Arc::new(Metrics::new().unwrap()),
    );

    let carol = orchestrator
        .search(SearchRequest {
            observer: Some(hex('c')),
            debug: true,
            ..request("alice")
        })
        .await
        .unwrap();
    assert_eq!(carol.observer, hex('c'));
    assert_eq!(carol.pubkeys, vec![hex('b')]);
    assert_eq!(
        carol.debug.unwrap().whitelist_origin,
        Some(WhitelistOrigin::Precomputed)
    );

    let owner = orchestrator.search(request("alice")).await.unwrap();
    assert_eq!(owner.observer, "owner");
    assert_eq!(owner.pubkeys, vec![hex('a')]);
}
