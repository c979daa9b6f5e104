//! # HTTP API
//!
//! Axum routes over the orchestrator, the run store and the live bus feed.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, Response, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use utoipa::{OpenApi, ToSchema};

use assay_core::backend::GenerativeBackend;
use assay_core::error::{CollectionError, PipelineError};
use assay_core::skills::artifact_registry::GenerationParams;
use assay_core::skills::prompts;
use assay_core::state::{transcript, RunStatus, RunStore, RunSummary};
use assay_core::swarm::coordinator::{agent_ids, default_workers};
use assay_core::swarm::{GenerationRequest, MessageBus, Orchestrator, OrchestratorConfig};
use assay_core::tools::{collector_for, DataCollector};

/// Application state
pub struct AppState {
    pub config: OrchestratorConfig,
    pub backend: Arc<dyn GenerativeBackend>,
    /// Shared by every run; carries the live feed behind `/events`
    pub bus: Arc<MessageBus>,
    pub store: Option<Arc<RunStore>>,
    pub github_token: Option<String>,
    /// Serves every target when set instead of picking a collector per target
    pub collector: Option<Arc<dyn DataCollector>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: OrchestratorConfig, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            config,
            backend,
            bus: Arc::new(MessageBus::with_live_feed()),
            store: None,
            github_token: None,
            collector: None,
        }
    }

    fn orchestrator(&self, target: &str) -> anyhow::Result<Orchestrator> {
        let collector = match &self.collector {
            Some(collector) => Arc::clone(collector),
            None => collector_for(target, self.github_token.clone())?,
        };
        let mut orchestrator =
            Orchestrator::new(self.config.clone(), collector, Arc::clone(&self.backend))
                .with_bus(Arc::clone(&self.bus));
        if let Some(store) = &self.store {
            orchestrator = orchestrator.with_store(Arc::clone(store));
        }
        Ok(orchestrator)
    }

    /// Drop finished conversations from the bus; the store keeps them
    fn release_closed(&self) {
        for id in self.bus.conversations() {
            if self.bus.stats(&id).map(|s| s.closed).unwrap_or(false) {
                self.bus.release(&id);
            }
        }
    }

    fn store(&self) -> Result<&RunStore, ApiError> {
        self.store.as_deref().ok_or_else(|| ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            kind: "store_unavailable".into(),
            error: "run store is not configured".into(),
        })
    }
}

// === API Types ===

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AgentInfo {
    pub id: String,
    pub provider: String,
    pub model: String,
    /// Bundled system prompt, when the agent has one
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AgentsResponse {
    pub agents: Vec<AgentInfo>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerateBody {
    /// `owner/repo`, a GitHub URL, a local directory or a snapshot `.json`
    pub target_id: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub time_box_minutes: Option<u32>,
}

impl GenerateBody {
    fn into_request(self) -> GenerationRequest {
        let mut params = GenerationParams::default();
        if let Some(difficulty) = self.difficulty {
            params.difficulty = difficulty;
        }
        params.category = self.category;
        params.time_box_minutes = self.time_box_minutes;
        GenerationRequest::new(self.target_id).with_params(params)
    }
}

/// Full generation report
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(value_type = Object)]
pub struct ReportBody(pub serde_json::Value);

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunItem {
    pub id: String,
    pub target_id: String,
    pub status: String,
    pub approved: bool,
    pub outcome: Option<String>,
    pub overall_score: Option<f64>,
    pub artifact_version: Option<u32>,
    pub error: Option<String>,
    pub finished_at: String,
}

impl From<RunSummary> for RunItem {
    fn from(run: RunSummary) -> Self {
        Self {
            id: run.id,
            target_id: run.target_id,
            status: run.status.as_str().to_string(),
            approved: run.approved,
            outcome: run.outcome,
            overall_score: run.overall_score,
            artifact_version: run.artifact_version,
            error: run.error,
            finished_at: run.finished_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunListResponse {
    pub runs: Vec<RunItem>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RunDetail {
    pub run: RunItem,
    /// Report of a completed run
    #[schema(value_type = Option<Object>)]
    pub report: Option<serde_json::Value>,
    /// Audit trail
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only stream messages of this run
    pub conversation_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub kind: String,
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: String,
    error: String,
}

impl ApiError {
    fn internal(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "Request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "internal".into(),
            error: err.to_string(),
        }
    }

    fn not_found(what: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found".into(),
            error: format!("{} not found", what),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Collection { source, .. } => match source {
                CollectionError::NotFound(_) => StatusCode::NOT_FOUND,
                CollectionError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                CollectionError::AuthFailure(_) => StatusCode::UNAUTHORIZED,
                CollectionError::Unavailable(_) => StatusCode::BAD_GATEWAY,
            },
            PipelineError::Generation(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            kind: err.kind().to_string(),
            error: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(ErrorBody {
                kind: self.kind,
                error: self.error,
            }),
        )
            .into_response()
    }
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Assay API",
        version = "1.0.0",
        description = "Repository-grounded problem generation"
    ),
    paths(health, list_agents, generate, list_runs, get_run, delete_run, get_transcript),
    components(schemas(
        HealthResponse,
        AgentInfo,
        AgentsResponse,
        GenerateBody,
        ReportBody,
        RunItem,
        RunListResponse,
        RunDetail,
        ErrorBody
    )),
    tags(
        (name = "system", description = "Health and agent discovery"),
        (name = "runs", description = "Generation runs")
    )
)]
pub struct ApiDoc;

// === API Handlers ===

/// Liveness probe
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "system",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Agents taking part in a run, with their resolved models
#[utoipa::path(
    get,
    path = "/api/v1/agents",
    tag = "system",
    responses((status = 200, description = "Registered agents", body = AgentsResponse))
)]
async fn list_agents(State(state): State<SharedState>) -> Json<AgentsResponse> {
    let defaults = prompts::all_defaults();
    let agents = agent_ids(&default_workers())
        .into_iter()
        .map(|id| {
            let model = state.config.model_for(id);
            AgentInfo {
                id: id.to_string(),
                provider: model.provider.display_name().to_string(),
                model: model.model,
                prompt: defaults
                    .iter()
                    .find(|(slug, _)| *slug == id)
                    .map(|(_, prompt)| prompt.to_string()),
            }
        })
        .collect();
    Json(AgentsResponse { agents })
}

/// Run the full pipeline for one target
#[utoipa::path(
    post,
    path = "/api/v1/generate",
    tag = "runs",
    request_body = GenerateBody,
    responses(
        (status = 200, description = "Delivered report (approved or best effort)", body = ReportBody),
        (status = 404, description = "Target not found", body = ErrorBody),
        (status = 502, description = "Collector or generator failed", body = ErrorBody)
    )
)]
async fn generate(
    State(state): State<SharedState>,
    Json(body): Json<GenerateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let request = body.into_request();
    let orchestrator = state
        .orchestrator(&request.target_id)
        .map_err(ApiError::internal)?;

    let result = orchestrator.generate(request).await;
    state.release_closed();

    let report = result?;
    let value = serde_json::to_value(&report).map_err(|e| ApiError::internal(e.into()))?;
    Ok(Json(value))
}

/// Most recent runs first
#[utoipa::path(
    get,
    path = "/api/v1/runs",
    tag = "runs",
    params(("limit" = Option<usize>, Query, description = "Maximum runs to return (default 20)")),
    responses((status = 200, description = "Stored runs", body = RunListResponse))
)]
async fn list_runs(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<RunListResponse>, ApiError> {
    let runs = state
        .store()?
        .list_runs(query.limit.unwrap_or(20))
        .map_err(ApiError::internal)?;
    Ok(Json(RunListResponse {
        runs: runs.into_iter().map(RunItem::from).collect(),
    }))
}

/// One stored run with its report and audit trail
#[utoipa::path(
    get,
    path = "/api/v1/runs/{id}",
    tag = "runs",
    params(("id" = String, Path, description = "Run (conversation) id")),
    responses(
        (status = 200, description = "Stored run", body = RunDetail),
        (status = 404, description = "Unknown run", body = ErrorBody)
    )
)]
async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RunDetail>, ApiError> {
    let stored = state
        .store()?
        .load_run(&id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("run"))?;

    let report = match (&stored.report, stored.summary.status) {
        (Some(report), RunStatus::Completed) => {
            Some(serde_json::to_value(report).map_err(|e| ApiError::internal(e.into()))?)
        }
        _ => None,
    };
    let messages = stored
        .messages
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::internal(e.into()))?;

    Ok(Json(RunDetail {
        run: stored.summary.into(),
        report,
        messages,
    }))
}

/// Remove a stored run with its audit trail and every version
#[utoipa::path(
    delete,
    path = "/api/v1/runs/{id}",
    tag = "runs",
    params(("id" = String, Path, description = "Run (conversation) id")),
    responses(
        (status = 204, description = "Run deleted"),
        (status = 404, description = "Unknown run", body = ErrorBody)
    )
)]
async fn delete_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store()?.delete_run(&id).map_err(ApiError::internal)? {
        tracing::info!(run = %id, "Run deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("run"))
    }
}

/// Markdown transcript of a stored run
#[utoipa::path(
    get,
    path = "/api/v1/runs/{id}/transcript",
    tag = "runs",
    params(("id" = String, Path, description = "Run (conversation) id")),
    responses(
        (status = 200, description = "Markdown transcript", body = String, content_type = "text/markdown"),
        (status = 404, description = "Unknown run", body = ErrorBody)
    )
)]
async fn get_transcript(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stored = state
        .store()?
        .load_run(&id)
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("run"))?;

    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        transcript::render_stored(&stored),
    ))
}

/// Live statistics of an in-flight conversation
async fn conversation_stats(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .bus
        .stats(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("conversation"))
}

/// SSE stream of every bus message as it is recorded
async fn events(
    State(state): State<SharedState>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let rx = state.bus.subscribe().ok_or_else(|| ApiError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        kind: "feed_unavailable".into(),
        error: "live feed is disabled".into(),
    })?;

    let stream = BroadcastStream::new(rx).filter_map(move |item| {
        // Lagged receivers skip what they missed
        let message = item.ok()?;
        if let Some(id) = &query.conversation_id {
            if &message.conversation_id != id {
                return None;
            }
        }
        let data = serde_json::to_string(&message).ok()?;
        Some(Ok(Event::default()
            .event(message.kind.as_str())
            .id(message.id)
            .data(data)))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn serve_openapi() -> impl IntoResponse {
    match ApiDoc::openapi().to_json() {
        Ok(spec) => Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(spec))
            .map(IntoResponse::into_response)
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

pub fn router(state: SharedState) -> Router {
    let run_routes = Router::new()
        .route("/", get(list_runs))
        .route("/:id", get(get_run).delete(delete_run))
        .route("/:id/transcript", get(get_transcript));

    Router::new()
        .nest("/api/v1/runs", run_routes)
        .route("/api/v1/health", get(health))
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/generate", post(generate))
        .route("/api/v1/conversations/:id", get(conversation_stats))
        .route("/api/v1/events", get(events))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assay_core::backend::CompletionRequest;
    use assay_core::error::BackendError;
    use assay_core::state::snapshot::{Snapshot, TargetMetadata};
    use assay_core::tools::StaticCollector;
    use async_trait::async_trait;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    /// Answers every agent with a well-formed reply
    struct CannedBackend;

    #[async_trait]
    impl GenerativeBackend for CannedBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, BackendError> {
            let reply = match request.caller.as_str() {
                "generator" => json!({
                    "title": "Rate limiter",
                    "description": "Build a token bucket",
                    "requirements": ["Per-client limits"],
                    "acceptance_criteria": ["Bursts are capped"],
                    "difficulty": "intermediate",
                    "category": "backend",
                }),
                "validator" => json!({
                    "feasibility": 90,
                    "clarity": 90,
                    "technical_fit": 90,
                    "educational_value": 90,
                }),
                _ => json!({
                    "confidence": 0.7,
                    "findings": {"summary": "fine"},
                    "suggested_opportunities": ["Add rate limiting"],
                }),
            };
            Ok(reply.to_string())
        }
    }

    fn state(store: Option<Arc<RunStore>>) -> SharedState {
        let snapshot = Snapshot::new(TargetMetadata {
            id: "acme/widgets".into(),
            name: "widgets".into(),
            full_name: "acme/widgets".into(),
            ..Default::default()
        });
        let mut state = AppState::new(OrchestratorConfig::default(), Arc::new(CannedBackend));
        state.store = store;
        state.collector = Some(Arc::new(StaticCollector::new().with_snapshot(snapshot)));
        Arc::new(state)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_generate(target: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "target_id": target }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(router(state(None)), get_req("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn test_agents_include_prompts() {
        let (status, body) = send(router(state(None)), get_req("/api/v1/agents")).await;
        assert_eq!(status, StatusCode::OK);
        let agents: AgentsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(agents.agents.len(), 7);
        assert_eq!(agents.agents[0].id, "structure_analyzer");
        assert!(agents.agents[0].prompt.is_some());
        let synthesizer = agents.agents.iter().find(|a| a.id == "synthesizer").unwrap();
        assert!(synthesizer.prompt.is_none());
    }

    #[tokio::test]
    async fn test_generate_persists_and_serves_run() {
        let store = Arc::new(RunStore::open_in_memory().unwrap());
        let state = state(Some(store));

        let (status, body) = send(router(state.clone()), post_generate("acme/widgets")).await;
        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["approved"], true);
        assert_eq!(report["artifact"]["body"]["title"], "Rate limiter");
        let id = report["conversation_id"].as_str().unwrap().to_string();
        assert!(state.bus.conversations().is_empty());

        let (status, body) = send(router(state.clone()), get_req("/api/v1/runs")).await;
        assert_eq!(status, StatusCode::OK);
        let runs: RunListResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(runs.runs[0].id, id);

        let (status, body) =
            send(router(state.clone()), get_req(&format!("/api/v1/runs/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        let detail: RunDetail = serde_json::from_slice(&body).unwrap();
        assert!(detail.report.is_some());
        assert!(!detail.messages.is_empty());

        let (status, body) = send(
            router(state.clone()),
            get_req(&format!("/api/v1/runs/{}/transcript", id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("Rate limiter"));

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/api/v1/runs/{}", id))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(router(state.clone()), delete).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(router(state), get_req(&format!("/api/v1/runs/{}", id))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_target_is_404_and_stored_as_failed() {
        let store = Arc::new(RunStore::open_in_memory().unwrap());
        let (status, body) =
            send(router(state(Some(store.clone()))), post_generate("acme/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.kind, "collection_error");

        let runs = store.list_runs(5).unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_runs_without_store_and_missing_run() {
        let (status, _) = send(router(state(None)), get_req("/api/v1/runs")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let store = Arc::new(RunStore::open_in_memory().unwrap());
        let (status, _) = send(router(state(Some(store))), get_req("/api/v1/runs/conv_nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_openapi_lists_paths() {
        let (status, body) = send(router(state(None)), get_req("/api/v1/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        let spec: Value = serde_json::from_slice(&body).unwrap();
        assert!(spec["paths"]["/api/v1/generate"].is_object());
        assert!(spec["paths"]["/api/v1/runs/{id}/transcript"].is_object());
        assert!(spec["paths"]["/api/v1/runs/{id}"]["delete"].is_object());
        assert_eq!(spec["components"]["schemas"]["ReportBody"]["type"], "object");
        assert!(spec["components"]["schemas"]["RunDetail"]["properties"]["messages"].is_object());
    }
}
