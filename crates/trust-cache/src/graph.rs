//! Graph database access: the two trust query shapes and a Neo4j client.
//!
//! Only two statements are ever issued. The owner view reads trust scores
//! straight off `NostrUser` nodes; a customer's view reads the
//! `NostrUserWotMetricsCard` nodes computed for that observer. Both return
//! `pubkey` plus the four trust attributes, ordered by verified follower
//! count, and both are limited to influence above [`INFLUENCE_THRESHOLD`].

use async_trait::async_trait;
use nostr_core::Pubkey;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;

use crate::config::GraphConfig;
use crate::error::TrustError;
use crate::types::{ObserverId, TrustMetrics, TrustRow, INFLUENCE_THRESHOLD};

const OWNER_STATEMENT: &str = "\
MATCH (u:NostrUser)
WHERE u.influence > $threshold
RETURN u.pubkey AS pubkey,
       u.influence AS influence,
       u.verifiedFollowerCount AS verifiedFollowerCount,
       u.verifiedMuterCount AS verifiedMuterCount,
       u.verifiedReporterCount AS verifiedReporterCount
ORDER BY u.verifiedFollowerCount DESC";

const OBSERVER_STATEMENT: &str = "\
MATCH (c:NostrUserWotMetricsCard {observer_pubkey: $observer})
WHERE c.influence > $threshold
RETURN c.observee_pubkey AS pubkey,
       c.influence AS influence,
       c.verifiedFollowerCount AS verifiedFollowerCount,
       c.verifiedMuterCount AS verifiedMuterCount,
       c.verifiedReporterCount AS verifiedReporterCount
ORDER BY c.verifiedFollowerCount DESC";

/// A parameterised graph statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphQuery {
    pub statement: &'static str,
    pub parameters: Value,
}

/// Build the trust query for an observer.
pub fn trust_query(observer: &ObserverId) -> GraphQuery {
    match observer {
        ObserverId::Owner => GraphQuery {
            statement: OWNER_STATEMENT,
            parameters: json!({ "threshold": INFLUENCE_THRESHOLD }),
        },
        ObserverId::Customer(pk) => GraphQuery {
            statement: OBSERVER_STATEMENT,
            parameters: json!({ "observer": pk.as_str(), "threshold": INFLUENCE_THRESHOLD }),
        },
    }
}

/// Something that runs a graph statement and returns its rows.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Each row is the list of returned column values, in order.
    async fn run(&self, query: &GraphQuery) -> Result<Vec<Vec<Value>>, TrustError>;
}

/// Run the trust query for `observer` and parse its rows.
///
/// Rows whose pubkey is not 64-char hex are skipped; missing or null
/// numeric columns read as zero.
pub async fn fetch_trust_rows(
    client: &dyn GraphClient,
    observer: &ObserverId,
) -> Result<Vec<TrustRow>, TrustError> {
    let rows = client.run(&trust_query(observer)).await?;
    let total = rows.len();
    let parsed: Vec<TrustRow> = rows.into_iter().filter_map(|r| parse_row(&r)).collect();
    if parsed.len() != total {
        debug!(
            observer = %observer,
            skipped = total - parsed.len(),
            "skipped malformed trust rows"
        );
    }
    Ok(parsed)
}

fn parse_row(row: &[Value]) -> Option<TrustRow> {
    let pubkey = Pubkey::parse(row.first()?.as_str()?).ok()?;
    let num = |i: usize| row.get(i).and_then(Value::as_f64).unwrap_or(0.0);
    Some(TrustRow {
        pubkey,
        metrics: TrustMetrics {
            influence: num(1),
            verified_follower_count: num(2),
            verified_muter_count: num(3),
            verified_reporter_count: num(4),
        },
    })
}

// ── Neo4j HTTP client ────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TxRequest<'a> {
    statements: [&'a GraphQuery; 1],
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

/// Client for Neo4j's transactional HTTP endpoint.
#[derive(Clone)]
pub struct Neo4jHttpClient {
    http: reqwest::Client,
    endpoint: String,
    user: String,
    password: String,
}

impl fmt::Debug for Neo4jHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Neo4jHttpClient")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl Neo4jHttpClient {
    pub fn new(config: &GraphConfig) -> Result<Self, TrustError> {
        if !config.uri.starts_with("http://") && !config.uri.starts_with("https://") {
            return Err(TrustError::Config(format!(
                "neo4j uri must start with http:// or https://, got {}",
                config.uri
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.commit_endpoint(),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }
}

#[async_trait]
impl GraphClient for Neo4jHttpClient {
    async fn run(&self, query: &GraphQuery) -> Result<Vec<Vec<Value>>, TrustError> {
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&TxRequest { statements: [query] })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrustError::GraphUnavailable(format!(
                "HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let body: TxResponse = response
            .json()
            .await
            .map_err(|e| TrustError::GraphResponse(e.to_string()))?;

        if let Some(err) = body.errors.into_iter().next() {
            return Err(TrustError::GraphQuery {
                code: err.code,
                message: err.message,
            });
        }

        let rows = body
            .results
            .into_iter()
            .next()
            .map(|r| r.data.into_iter().map(|d| d.row).collect())
            .unwrap_or_default();
        Ok(rows)
    }
}
