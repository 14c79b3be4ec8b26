use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use trust_cache::{ObserverId, ObserverStatus, RefreshReport, WhitelistSource};

use crate::search::{SearchError, SearchOrchestrator, SearchRequest};

const BODY_LIMIT_BYTES: usize = 16 * 1024;

pub type AppState = Arc<SearchOrchestrator>;

#[derive(Debug, Clone)]
pub struct ApiServer {
    bind_address: String,
}

/// Raw keyword query parameters. Everything arrives as text so bad values
/// are reported as `{success: false}` rather than a bare rejection.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordParams {
    pub search_string: Option<String>,
    pub limit: Option<String>,
    pub source: Option<String>,
    pub observer_pubkey: Option<String>,
    pub fail_open: Option<String>,
    pub debug: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshParams {
    pub observer_pubkey: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub max_age_secs: u64,
    pub observers: Vec<ObserverStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshAllResponse {
    pub success: bool,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(flatten)]
    pub report: RefreshReport,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub time: i64,
}

/// JSON error body with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

impl ApiServer {
    pub fn new(bind_address: String) -> Self {
        Self { bind_address }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn start<F>(&self, state: AppState, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.bind_address))?;

        info!("API server listening on {}", self.bind_address);

        axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown)
            .await
            .with_context(|| "API server error")?;

        Ok(())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/search/profiles/keyword", get(handle_keyword_search))
        .route("/api/search/precompute/status", get(handle_precompute_status))
        .route("/api/search/precompute/refresh", post(handle_precompute_refresh))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_keyword_search(
    State(search): State<AppState>,
    params: Result<Query<KeywordParams>, QueryRejection>,
) -> Result<Json<crate::search::SearchResponse>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    debug!("Keyword search: {:?}", params);

    let request = keyword_request(params)?;
    let response = search.search(request).await?;
    Ok(Json(response))
}

/// Turn raw parameters into a request, rejecting malformed values.
fn keyword_request(params: KeywordParams) -> Result<SearchRequest, SearchError> {
    let limit = match params.limit.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<usize>().map_err(|_| SearchError::InvalidParam {
            param: "limit",
            value: raw.to_string(),
        })?),
    };
    let source = match params.source {
        None => WhitelistSource::default(),
        Some(raw) => raw
            .parse::<WhitelistSource>()
            .map_err(|_| SearchError::InvalidSource(raw))?,
    };
    Ok(SearchRequest {
        search_string: params.search_string.unwrap_or_default(),
        limit,
        source,
        observer: params.observer_pubkey,
        fail_open: parse_flag("failOpen", params.fail_open)?,
        debug: parse_flag("debug", params.debug)?,
    })
}

fn parse_flag(param: &'static str, value: Option<String>) -> Result<bool, SearchError> {
    let Some(raw) = value else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SearchError::InvalidParam { param, value: raw }),
    }
}

async fn handle_precompute_status(State(search): State<AppState>) -> Json<StatusResponse> {
    let precompute = search.whitelists().precompute();
    Json(StatusResponse {
        success: true,
        max_age_secs: precompute.max_age().as_secs(),
        observers: precompute.status(),
    })
}

async fn handle_precompute_refresh(
    State(search): State<AppState>,
    params: Result<Query<RefreshParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let precompute = search.whitelists().precompute();

    let Some(raw) = params.observer_pubkey.filter(|o| !o.trim().is_empty()) else {
        let report = precompute.refresh_all(true).await;
        search
            .metrics()
            .record_refresh(report.succeeded(), report.failed());
        if let Some(err) = &report.registry_error {
            warn!("Customer registry unavailable during refresh: {}", err);
        }
        return Ok(Json(RefreshAllResponse {
            success: report.failed() == 0 && report.registry_error.is_none(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            report,
        })
        .into_response());
    };

    let observer = ObserverId::parse(&raw, search.owner()).map_err(SearchError::from)?;
    match precompute.refresh_for_observer(&observer, true).await {
        Ok(entry) => {
            search.metrics().record_refresh(1, 0);
            Ok(Json(json!({
                "success": true,
                "observer": observer.as_str(),
                "size": entry.len(),
            }))
            .into_response())
        }
        Err(e) => {
            search.metrics().record_refresh(0, 1);
            error!("Failed to refresh {}: {}", observer, e);
            Ok((
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "success": false,
                    "observer": observer.as_str(),
                    "error": e.to_string(),
                })),
            )
                .into_response())
        }
    }
}

async fn handle_health(State(_search): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        time: chrono::Utc::now().timestamp(),
    })
}

async fn handle_metrics(State(search): State<AppState>) -> Response {
    let status = search.whitelists().precompute().status();
    let pubkeys = status.iter().map(|s| s.size).sum();
    let metrics = search.metrics();
    metrics.set_precompute_size(status.len(), pubkeys);

    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, metrics.content_type())], body).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
