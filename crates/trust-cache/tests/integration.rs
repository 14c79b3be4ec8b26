//! End-to-end trust resolution against a mocked Neo4j HTTP endpoint.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use trust_cache::{
    FileCustomerRegistry, GraphConfig, Neo4jHttpClient, ObserverId, PrecomputeManager,
    WhitelistCache, WhitelistConfig, WhitelistOrigin, WhitelistSource,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn hex(c: char) -> String {
    c.to_string().repeat(64)
}

fn rows_body(keys: &[(char, f64)]) -> serde_json::Value {
    let data: Vec<_> = keys
        .iter()
        .map(|(c, influence)| json!({ "row": [hex(*c), influence, 10, 0, 0], "meta": [] }))
        .collect();
    json!({ "results": [{ "columns": [], "data": data }], "errors": [] })
}

async fn setup(server: &MockServer, dir: &tempfile::TempDir) -> WhitelistCache {
    let customers = dir.path().join("customers.json");
    std::fs::write(
        &customers,
        format!(
            r#"{{"customers": {{"carol": {{"pubkey": "{}", "status": "active"}}}}}}"#,
            hex('c')
        ),
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
    WhitelistCache::new(
        precompute,
        graph,
        WhitelistConfig {
            file_path: dir.path().join("whitelist.json"),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn refresh_all_then_resolve_per_observer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/db/neo4j/tx/commit"))
        .and(body_string_contains("NostrUserWotMetricsCard"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows_body(&[('a', 0.9)])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/db/neo4j/tx/commit"))
        .and(body_string_contains("(u:NostrUser)"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(rows_body(&[('a', 0.5), ('b', 0.2)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache = setup(&server, &dir).await;

    let report = cache.precompute().refresh_all(true).await;
    assert_eq!(report.succeeded(), 2);
    assert!(report.registry_error.is_none());

    let carol = ObserverId::parse(&hex('c'), None).unwrap();
    let wl = cache.resolve(WhitelistSource::File, &carol).await.unwrap();
    assert_eq!(wl.origin, WhitelistOrigin::Precomputed);
    assert_eq!(wl.len(), 1);
    assert_eq!(wl.score(&hex('a')), Some(0.9));

    let owner = cache
        .resolve(WhitelistSource::File, &ObserverId::Owner)
        .await
        .unwrap();
    assert_eq!(owner.len(), 2);
    assert_eq!(owner.score(&hex('a')), Some(0.5));

    let status = cache.precompute().status();
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].observer, "owner");
    assert!(status.iter().all(|s| s.fresh));
}

#[tokio::test]
async fn unreachable_graph_uses_whitelist_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("whitelist.json"),
        format!(r#"{{"{}": 0.7, "{}": false}}"#, hex('a'), hex('b')),
    )
    .unwrap();
    let cache = setup(&server, &dir).await;

    let report = cache.precompute().refresh_all(true).await;
    assert_eq!(report.failed(), 2);

    let carol = ObserverId::parse(&hex('c'), None).unwrap();
    let wl = cache.resolve(WhitelistSource::File, &carol).await.unwrap();
    assert_eq!(wl.origin, WhitelistOrigin::File);
    assert!(wl.contains(&hex('a')));
    assert!(!wl.contains(&hex('b')));
    assert!(wl.has_scores());

    assert!(cache.resolve(WhitelistSource::Neo4j, &carol).await.is_none());
}
