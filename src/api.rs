//! REST API Server for the Stock Analyst Orchestrator
//!
//! Exposes the supervisor and the retrieval index via HTTP endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Settings;
use crate::error::AnalysisError;
use crate::models::{AgentFailure, Query, Recommendation, SpecialistKind};
use crate::retrieval::{self, IngestionReport, RetrievalIndex};
use crate::supervisor::Supervisor;
use crate::tools::ToolRegistry;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyzeRequest {
    pub stock_ticker: String,
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RagQueryRequest {
    pub query: String,
    pub stock_ticker: String,
    pub k: Option<usize>,
}

/// =============================
/// Response Models
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub stock_ticker: String,
    pub query: String,
    pub timestamp: String,
    pub analysis: String,
    pub recommendation: String,
    pub target_price: Option<f64>,
    pub aggregate_score: f64,
    pub specialists_succeeded: Vec<SpecialistKind>,
    pub specialists_failed: Vec<AgentFailure>,
}

impl AnalyzeResponse {
    fn from_recommendation(rec: Recommendation, settings: &Settings) -> Self {
        Self {
            recommendation: rec.recommendation.label(settings.recommendation_locale).to_string(),
            stock_ticker: rec.ticker,
            query: rec.query,
            timestamp: rec.timestamp.to_rfc3339(),
            analysis: rec.analysis,
            target_price: rec.target_price,
            aggregate_score: rec.aggregate_score,
            specialists_succeeded: rec.specialists_succeeded,
            specialists_failed: rec.specialists_failed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RagHit {
    pub chunk_id: String,
    pub source_document: String,
    pub text: String,
    pub similarity: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RagQueryResponse {
    pub stock_ticker: String,
    pub query: String,
    pub results: Vec<RagHit>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
    pub timestamp: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error_response(status: StatusCode, err: &AnalysisError) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: status.canonical_reason().unwrap_or("error").to_string(),
            detail: err.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }),
    )
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub supervisor: Arc<Supervisor>,
    pub index: Arc<RetrievalIndex>,
    pub tools: ToolRegistry,
    pub settings: Arc<Settings>,
}

/// =============================
/// Info / Health Endpoints
/// =============================

async fn root(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let tools: Vec<serde_json::Value> = state
        .tools
        .list()
        .iter()
        .map(|(name, description)| serde_json::json!({ "name": name, "description": description }))
        .collect();

    Json(serde_json::json!({
        "service": "stock-analyst-orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "specialists": state.supervisor.registered(),
        "tickers": state.index.tickers().await,
        "tools": tools,
        "market_data": state.tools.source_name(),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Analysis Endpoints
/// =============================

async fn analyze(
    State(state): State<ApiState>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    run_analysis(state, req, None).await
}

async fn analyze_single(
    State(state): State<ApiState>,
    Path(kind): Path<SpecialistKind>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    run_analysis(state, req, Some(kind)).await
}

async fn run_analysis(
    state: ApiState,
    req: AnalyzeRequest,
    only: Option<SpecialistKind>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    info!(ticker = %req.stock_ticker, specialist = ?only, "Received analysis request");

    let query = Query::new(&req.stock_ticker, &req.query)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &e))?;

    let result = match only {
        Some(kind) => state.supervisor.only(&query, &[kind]).await,
        None => state.supervisor.analyze(&query).await,
    };

    match result {
        Ok(rec) => Ok(Json(AnalyzeResponse::from_recommendation(rec, &state.settings))),
        Err(e) => {
            let status = analysis_status(&e, state.index.has_ticker(&query.ticker).await);
            warn!(ticker = %query.ticker, status = status.as_u16(), error = %e, "Analysis request failed");
            Err(error_response(status, &e))
        }
    }
}

/// A failed analysis is "not found" only when nothing was ever ingested
/// for the ticker; otherwise the failure came from upstream.
fn analysis_status(err: &AnalysisError, has_documents: bool) -> StatusCode {
    match err {
        AnalysisError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        AnalysisError::SupervisorFailed(_) if !has_documents => StatusCode::NOT_FOUND,
        AnalysisError::SupervisorFailed(_)
        | AnalysisError::LlmError(_)
        | AnalysisError::HttpError(_)
        | AnalysisError::ToolUnavailable(_) => StatusCode::BAD_GATEWAY,
        AnalysisError::RetrievalUnavailable(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Retrieval Endpoints
/// =============================

async fn rag_query(
    State(state): State<ApiState>,
    Json(req): Json<RagQueryRequest>,
) -> Result<Json<RagQueryResponse>, ApiError> {
    let query = Query::new(&req.stock_ticker, &req.query)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, &e))?;
    let k = req.k.unwrap_or(state.settings.retrieval_k).max(1);

    let hits = state
        .index
        .query(&query.ticker, &query.question, k)
        .await
        .map_err(|e| match e {
            AnalysisError::RetrievalUnavailable(_) => error_response(StatusCode::NOT_FOUND, &e),
            other => error_response(analysis_status(&other, true), &other),
        })?;

    Ok(Json(RagQueryResponse {
        stock_ticker: query.ticker,
        query: query.question,
        results: hits
            .into_iter()
            .map(|hit| RagHit {
                chunk_id: hit.chunk.id,
                source_document: hit.chunk.source_document,
                text: hit.chunk.text,
                similarity: hit.similarity,
            })
            .collect(),
    }))
}

async fn rag_initialize(State(state): State<ApiState>) -> Result<Json<IngestionReport>, ApiError> {
    info!(dir = %state.settings.document_directory.display(), "Re-ingesting document directory");

    retrieval::ingest_directory(&state.settings, &state.index)
        .await
        .map(Json)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, &e))
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/analyze/:specialist", post(analyze_single))
        .route("/api/rag/query", post(rag_query))
        .route("/api/rag/initialize", post(rag_initialize))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(state: ApiState) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let address = state.settings.bind_address();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!("API Server listening on http://{}", address);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::models::SourceDocument;
    use crate::retrieval::{ChunkingConfig, HashingEmbedder};
    use crate::tools::StaticMarketData;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    const REPLY: &str = r#"{"score": 8, "rationale": "Strong results.", "confidence": 0.9, "target_price": 180}"#;

    async fn state(model: ScriptedModel) -> ApiState {
        let settings = Settings::default();
        let index = Arc::new(RetrievalIndex::new(
            Arc::new(HashingEmbedder::default()),
            ChunkingConfig::default(),
        ));
        index
            .ingest(&SourceDocument {
                ticker: "AAPL".to_string(),
                source: "AAPL_10K_2024.txt".to_string(),
                text: "Net income grew 20% year over year on strong iPhone revenue.".to_string(),
            })
            .await
            .unwrap();

        let tools = ToolRegistry::new(Arc::new(StaticMarketData::demo()));
        let supervisor = crate::build_supervisor(&settings, index.clone(), tools.clone(), Arc::new(model));

        ApiState {
            supervisor: Arc::new(supervisor),
            index,
            tools,
            settings: Arc::new(settings),
        }
    }

    async fn post_json(router: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let router = create_router(state(ScriptedModel::constant(REPLY)).await);
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_root_lists_specialists_tickers_and_tools() {
        let router = create_router(state(ScriptedModel::constant(REPLY)).await);
        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["tickers"], serde_json::json!(["AAPL"]));
        assert_eq!(json["specialists"].as_array().unwrap().len(), 3);

        let tools: Vec<&str> = json["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert_eq!(tools, vec!["price", "sentiment", "valuation_ratios", "dcf_estimate"]);
        assert!(json["tools"][0]["description"].as_str().is_some_and(|d| !d.is_empty()));
    }

    #[tokio::test]
    async fn test_analyze_returns_recommendation() {
        let router = create_router(state(ScriptedModel::constant(REPLY)).await);
        let (status, body) = post_json(
            router,
            "/api/analyze",
            serde_json::json!({"stock_ticker": "aapl", "query": "Should I buy?"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stock_ticker"], "AAPL");
        assert_eq!(body["recommendation"], "买入");
        assert_eq!(body["target_price"], 180.0);
        assert!(body["analysis"].as_str().unwrap().contains("## Valuation Analysis"));
    }

    #[tokio::test]
    async fn test_single_specialist_endpoint() {
        let router = create_router(state(ScriptedModel::constant(REPLY)).await);
        let (status, body) = post_json(
            router,
            "/api/analyze/market",
            serde_json::json!({"stock_ticker": "AAPL", "query": "What is the price?"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["specialists_succeeded"], serde_json::json!(["market"]));
        assert!(body["target_price"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_query_is_bad_request() {
        let router = create_router(state(ScriptedModel::constant(REPLY)).await);
        let (status, _) = post_json(
            router,
            "/api/analyze",
            serde_json::json!({"stock_ticker": "  ", "query": "Should I buy?"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_failed_analysis_status_depends_on_documents() {
        let router = create_router(state(ScriptedModel::failing("quota exceeded")).await);

        let (status, body) = post_json(
            router.clone(),
            "/api/analyze",
            serde_json::json!({"stock_ticker": "AAPL", "query": "Should I buy?"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["detail"].as_str().unwrap().contains("every specialist failed"));

        let (status, _) = post_json(
            router,
            "/api/analyze",
            serde_json::json!({"stock_ticker": "ZZZZ", "query": "Should I buy?"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rag_query() {
        let router = create_router(state(ScriptedModel::constant(REPLY)).await);

        let (status, body) = post_json(
            router.clone(),
            "/api/rag/query",
            serde_json::json!({"stock_ticker": "AAPL", "query": "net income", "k": 2}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 1);
        assert_eq!(body["results"][0]["source_document"], "AAPL_10K_2024.txt");

        let (status, _) = post_json(
            router,
            "/api/rag/query",
            serde_json::json!({"stock_ticker": "MSFT", "query": "net income"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_mapping() {
        let failed = AnalysisError::SupervisorFailed("every specialist failed".into());
        assert_eq!(analysis_status(&failed, false), StatusCode::NOT_FOUND);
        assert_eq!(analysis_status(&failed, true), StatusCode::BAD_GATEWAY);
        assert_eq!(
            analysis_status(&AnalysisError::InvalidQuery("empty".into()), true),
            StatusCode::BAD_REQUEST
        );
    }
}
