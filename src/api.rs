//! REST API server for the credit risk orchestrator
//!
//! Exposes ingestion, analysis, peer comparison, Q&A and record reads over HTTP.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::agent::{CreditAnalyst, PeerComparison, RankingMetric};
use crate::config::{AnalysisConfig, ServiceConfig};
use crate::embedding::{Embedder, HashingEmbedder, OpenAiEmbedder};
use crate::error::CreditError;
use crate::gemini::GeminiClient;
use crate::indexer::{InMemoryVectorStore, Indexer, VectorStore};
use crate::lakehouse::{self, Lakehouse, RecordFilter};
use crate::llm::{DisabledModel, LanguageModel};
use crate::models::SourceDocument;
use crate::qa::QueryAgent;
use crate::retrieval::RetrievalEngine;
use crate::tools::calculator::{self, Calculation};
use crate::tools::{HttpMarketData, TavilyNews};
use crate::Result;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub entity_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub entities: Vec<String>,
    #[serde(default = "default_metric")]
    pub metric: RankingMetric,
}

fn default_metric() -> RankingMetric {
    RankingMetric::DebtToEquity
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordsQuery {
    pub entity_id: Option<String>,
    pub as_of: Option<u64>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            category: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(err: &CreditError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.user_message()),
            category: Some(err.category().to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn respond<T: Serialize>(result: Result<T>) -> ApiResult {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))),
        Err(e) => {
            warn!(error = %e, category = e.category(), "Request failed");
            (status_for(&e), Json(ApiResponse::error(&e)))
        }
    }
}

fn status_for(err: &CreditError) -> StatusCode {
    match err {
        CreditError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        CreditError::TranslationFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CreditError::ExecutionFailure(_) => StatusCode::NOT_FOUND,
        CreditError::SynthesisParseFailure(_) | CreditError::SourceUnavailable { .. } => {
            StatusCode::BAD_GATEWAY
        }
        CreditError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub indexer: Arc<Indexer>,
    pub analyst: Arc<CreditAnalyst>,
    pub peers: Arc<PeerComparison>,
    pub qa: Arc<QueryAgent>,
    pub lakehouse: Arc<dyn Lakehouse>,
}

impl ApiState {
    pub fn new(indexer: Arc<Indexer>, analyst: Arc<CreditAnalyst>, qa: Arc<QueryAgent>) -> Self {
        Self {
            indexer,
            peers: Arc::new(PeerComparison::new(analyst.clone())),
            lakehouse: analyst.lakehouse(),
            analyst,
            qa,
        }
    }
}

/// Wire every component from configuration. Missing credentials leave the
/// matching adapter in place but reporting itself unavailable.
pub async fn build_state(service: &ServiceConfig, analysis: AnalysisConfig) -> Result<ApiState> {
    let timeouts = analysis.timeouts.clone();

    let embedder: Arc<dyn Embedder> = match &service.openai_api_key {
        Some(key) => {
            info!(model = %service.embedding_model, "Embeddings: OpenAI-compatible endpoint");
            Arc::new(OpenAiEmbedder::new(
                key,
                &service.openai_base_url,
                service.embedding_model.clone(),
                service.embedding_dimension,
                timeouts.embedding,
            )?)
        }
        None => {
            warn!("OPENAI_API_KEY not set, using local hashing embeddings");
            Arc::new(HashingEmbedder::new(service.embedding_dimension))
        }
    };

    let store: Arc<dyn VectorStore> =
        Arc::new(InMemoryVectorStore::open(&service.fragment_store_path).await?);

    let model: Arc<dyn LanguageModel> = match &service.gemini_api_key {
        Some(key) => Arc::new(GeminiClient::new(key.clone(), timeouts.language_model)?),
        None => {
            warn!("GEMINI_API_KEY not set, synthesis and Q&A will report the model unavailable");
            Arc::new(DisabledModel::new("GEMINI_API_KEY not set"))
        }
    };

    let market = Arc::new(HttpMarketData::new(
        service.financial_api_base_url.as_deref(),
        timeouts.market_data,
    )?);
    let news = Arc::new(TavilyNews::new(service.tavily_api_key.clone(), timeouts.news)?);
    let lakehouse = lakehouse::connect(service).await?;

    let indexer = Arc::new(Indexer::new(
        embedder.clone(),
        store.clone(),
        analysis.chunking.clone(),
        timeouts.embedding,
    )?
    .with_workers(analysis.embed_workers));
    let retrieval = Arc::new(RetrievalEngine::new(
        embedder,
        store,
        analysis.retrieval.clone(),
        timeouts.embedding,
    ));
    let analyst = Arc::new(CreditAnalyst::new(
        market,
        news,
        retrieval,
        model.clone(),
        lakehouse.clone(),
        analysis,
    ));
    let qa = Arc::new(QueryAgent::new(model, lakehouse).with_timeout(timeouts.language_model));

    Ok(ApiState::new(indexer, analyst, qa))
}

/// =============================
/// Handlers
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "lakehouse": state.lakehouse.name(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn ingest(State(state): State<ApiState>, Json(document): Json<SourceDocument>) -> ApiResult {
    info!(entity_id = %document.entity_id, document_id = %document.document_id, "Ingest request");
    respond(state.indexer.ingest(&document).await)
}

async fn analyze(State(state): State<ApiState>, Json(req): Json<AnalyzeRequest>) -> ApiResult {
    info!(entity_id = %req.entity_id, "Analysis request");
    respond(state.analyst.run(&req.entity_id).await)
}

async fn compare(State(state): State<ApiState>, Json(req): Json<CompareRequest>) -> ApiResult {
    info!(count = req.entities.len(), metric = ?req.metric, "Comparison request");
    respond(state.peers.compare(&req.entities, req.metric).await)
}

async fn ask(State(state): State<ApiState>, Json(req): Json<AskRequest>) -> ApiResult {
    respond(state.qa.ask(&req.question).await)
}

async fn calculate(Json(req): Json<Calculation>) -> ApiResult {
    respond(calculator::calculate(&req))
}

async fn records(State(state): State<ApiState>, Query(params): Query<RecordsQuery>) -> ApiResult {
    let filter = RecordFilter {
        entity_id: params.entity_id,
        ..Default::default()
    };
    respond(state.lakehouse.read(&filter, params.as_of).await)
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/ingest", post(ingest))
        .route("/api/analyze", post(analyze))
        .route("/api/compare", post(compare))
        .route("/api/ask", post(ask))
        .route("/api/records", get(records))
        .route("/api/calculate", post(calculate))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(state: ApiState, port: u16) -> Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lakehouse::LocalLakehouse;
    use crate::testing::{full_snapshot, FailingNews, ScriptedModel, StaticMarketData};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(replies: &[&str]) -> ApiState {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(64));
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let lakehouse: Arc<dyn Lakehouse> = Arc::new(LocalLakehouse::in_memory());
        let model: Arc<dyn LanguageModel> =
            Arc::new(ScriptedModel::new(replies.iter().map(|r| r.to_string())));
        let analysis = AnalysisConfig::default();

        let indexer = Arc::new(
            Indexer::new(
                embedder.clone(),
                store.clone(),
                analysis.chunking.clone(),
                Duration::from_secs(1),
            )
            .unwrap(),
        );
        let retrieval = Arc::new(RetrievalEngine::new(
            embedder,
            store,
            analysis.retrieval.clone(),
            Duration::from_secs(1),
        ));
        let analyst = Arc::new(CreditAnalyst::new(
            Arc::new(StaticMarketData::new().with(full_snapshot("JPM", 90.0, 0.09))),
            Arc::new(FailingNews),
            retrieval,
            model.clone(),
            lakehouse.clone(),
            analysis,
        ));
        ApiState::new(indexer, analyst, Arc::new(QueryAgent::new(model, lakehouse)))
    }

    async fn call(router: Router, method: &str, uri: &str, body: serde_json::Value) -> (StatusCode, ApiResponse) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(if method == "GET" {
                Body::empty()
            } else {
                Body::from(body.to_string())
            })
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_analyze_then_read_records() {
        let router = create_router(state(&[r#"{"rating": "A"}"#]));

        let (status, body) = call(
            router.clone(),
            "POST",
            "/api/ingest",
            serde_json::json!({
                "entity_id": "JPM",
                "document_id": "10-K",
                "text": "Debt obligations and borrowings are supported by liquidity."
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.success);

        let (status, body) = call(
            router.clone(),
            "POST",
            "/api/analyze",
            serde_json::json!({"entity_id": "JPM"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap()["record"]["rating"], "A");

        let (status, body) = call(router, "GET", "/api/records?entity_id=JPM&as_of=0", serde_json::Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.data.unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ask_reports_translation_category() {
        let router = create_router(state(&["I am not sure."]));
        let (status, body) = call(
            router,
            "POST",
            "/api/ask",
            serde_json::json!({"question": "Who is riskiest?"}),
        )
        .await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!body.success);
        assert_eq!(body.category.as_deref(), Some("translation"));
    }

    #[tokio::test]
    async fn test_calculator_endpoint() {
        let router = create_router(state(&[]));
        let (status, body) = call(
            router.clone(),
            "POST",
            "/api/calculate",
            serde_json::json!({"ratio": "interest_coverage", "ebitda": 120.0, "interest_expense": 40.0}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert_eq!(data["coverage"]["value"], 3.0);
        assert_eq!(data["risk_level"], "moderate");

        let (status, _) = call(
            router,
            "POST",
            "/api/calculate",
            serde_json::json!({"ratio": "debt_to_equity", "debt": 1.0, "equity": 0.0}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unparseable_verdict_is_bad_gateway() {
        let router = create_router(state(&["no verdict today"]));
        let (status, body) = call(
            router,
            "POST",
            "/api/analyze",
            serde_json::json!({"entity_id": "JPM"}),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body.category.as_deref(), Some("synthesis_parse"));
    }
}
