//! HTTP surface for the ingestion pipeline (§6): company lifecycle,
//! read-side views over pages/entities/tokens/versions, and batch
//! scheduling. Handlers are thin — all state transitions go through
//! `JobService`/`ProgressService`/`BatchService`/`CheckpointService`; this
//! module only does request parsing, authorization-adjacent status mapping,
//! and response shaping.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::analysis::tokens::TokenTracker;
use crate::checkpoint::CheckpointService;
use crate::jobs::batch::{BatchError, BatchService};
use crate::jobs::progress::{ProgressError, ProgressService};
use crate::jobs::service::{JobError, JobService};
use crate::models::{Company, CompanyConfig};
use crate::storage::Repositories;
use crate::AppState;

/// Uniform error envelope for everything that isn't a bare 404/200.
struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        ApiError { status, code, message: message.into() }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": { "code": self.code, "message": self.message } }))).into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(id) => ApiError::not_found(format!("company not found: {id}")),
            JobError::AlreadyRunning(id) => {
                ApiError::new(StatusCode::CONFLICT, "already_running", format!("company already in progress: {id}"))
            }
            JobError::InvalidTransition(from, to) => ApiError::new(
                StatusCode::CONFLICT,
                "invalid_transition",
                format!("cannot transition from {from:?} to {to:?}"),
            ),
        }
    }
}

impl From<ProgressError> for ApiError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::NotFound(id) => ApiError::not_found(format!("company not found: {id}")),
            ProgressError::InvalidState(status) => {
                ApiError::new(StatusCode::CONFLICT, "invalid_state", format!("invalid state for this operation: {status:?}"))
            }
            ProgressError::LockHeld => {
                ApiError::new(StatusCode::LOCKED, "lock_held", "company is locked by another worker")
            }
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::NotFound(id) => ApiError::not_found(format!("batch not found: {id}")),
        }
    }
}

const API_WORKER_ID: &str = "http-api";

fn jobs(state: &AppState) -> JobService {
    JobService::new(state.repos.clone(), state.cache.clone(), state.broker.clone())
}

fn progress_svc(state: &AppState) -> ProgressService {
    ProgressService::new(state.repos.clone(), state.cache.clone(), state.broker.clone())
}

fn batch_svc(state: &AppState) -> BatchService {
    BatchService::new(state.repos.clone(), state.cache.clone(), state.broker.clone())
}

fn checkpoints(repos: &Repositories) -> CheckpointService {
    CheckpointService::new(repos.clone())
}

async fn get_company_or_404(repos: &Repositories, id: &str) -> Result<Company, ApiError> {
    repos.companies.get(id).await.ok_or_else(|| ApiError::not_found(format!("company not found: {id}")))
}

#[derive(Debug, Deserialize)]
pub struct CreateCompanyRequest {
    pub name: String,
    pub seed_url: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub config: Option<CompanyConfig>,
}

/// POST /companies
pub async fn create_company(
    State(state): State<AppState>,
    Json(payload): Json<CreateCompanyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if url::Url::parse(&payload.seed_url).is_err() {
        return Err(ApiError::bad_request(format!("invalid seed_url: {}", payload.seed_url)));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let mut company = Company::new(id.clone(), payload.name, payload.seed_url, payload.config.unwrap_or_default());
    company.industry = payload.industry;
    company.created_at = crate::time::now_rfc3339();
    state.repos.companies.insert(company.clone()).await;

    tracing::info!(company_id = %id, seed_url = %company.seed_url, "company created");
    jobs(&state).start_job(&id).await?;
    let company = get_company_or_404(&state.repos, &id).await?;
    Ok((StatusCode::CREATED, Json(company)))
}

/// GET /companies
pub async fn list_companies(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.repos.companies.list().await)
}

/// GET /companies/:id
pub async fn get_company(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(get_company_or_404(&state.repos, &id).await?))
}

/// DELETE /companies/:id
pub async fn delete_company(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    get_company_or_404(&state.repos, &id).await?;
    state.repos.companies.delete(&id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /companies/:id/pause
pub async fn pause_company(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(company_id = %id, "pause request");
    progress_svc(&state).pause(&id, API_WORKER_ID).await?;
    Ok(Json(get_company_or_404(&state.repos, &id).await?))
}

/// POST /companies/:id/resume
pub async fn resume_company(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(company_id = %id, "resume request");
    progress_svc(&state).resume(&id, API_WORKER_ID).await?;
    Ok(Json(get_company_or_404(&state.repos, &id).await?))
}

/// POST /companies/:id/rescan — resets a company to QUEUED and re-dispatches
/// the crawl, clearing whatever checkpoint a prior run left behind. A new
/// `Analysis` version is produced naturally once the run reaches ANALYZING.
pub async fn rescan_company(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let mut company = get_company_or_404(&state.repos, &id).await?;
    company.status = crate::models::CompanyStatus::Pending;
    company.phase = crate::models::Phase::Queued;
    company.paused_at = None;
    company.completed_at = None;
    company.updated_at = Some(crate::time::now_rfc3339());
    state.repos.companies.update(company).await.map_err(|_| ApiError::not_found(id.clone()))?;

    checkpoints(&state.repos).clear(&id).await;
    jobs(&state).start_job(&id).await?;
    Ok(Json(get_company_or_404(&state.repos, &id).await?))
}

/// GET /companies/:id/progress
pub async fn company_progress(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let company = get_company_or_404(&state.repos, &id).await?;
    let progress = progress_svc(&state);
    let checkpoint = checkpoints(&state.repos).load(&id).await;

    Ok(Json(json!({
        "company_id": id,
        "status": company.status,
        "phase": company.phase,
        "pages_visited": checkpoint.pages_visited.len(),
        "pages_queued": checkpoint.pages_queued.len(),
        "current_depth": checkpoint.current_depth,
        "entities_extracted_count": checkpoint.entities_extracted_count,
        "analysis_sections_completed": checkpoint.analysis_sections_completed,
        "remaining_seconds": progress.remaining_seconds(&company),
        "last_activity": progress.last_activity(&id).await,
    })))
}

#[derive(Debug, Deserialize, Default)]
pub struct EntityQuery {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
}

/// GET /companies/:id/entities
pub async fn company_entities(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<EntityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    get_company_or_404(&state.repos, &id).await?;
    let mut entities = state.repos.entities.list_by_company(&id).await;
    if let Some(want) = &query.entity_type {
        entities.retain(|e| e.entity_type.as_str() == want);
    }
    Ok(Json(entities))
}

/// GET /companies/:id/pages
pub async fn company_pages(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    get_company_or_404(&state.repos, &id).await?;
    Ok(Json(state.repos.pages.list_by_company(&id).await))
}

/// GET /companies/:id/tokens
pub async fn company_tokens(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    get_company_or_404(&state.repos, &id).await?;
    let tracker = TokenTracker::new(state.repos.clone(), state.config.token_pricing);
    Ok(Json(tracker.get_company_usage(&id).await))
}

/// GET /companies/:id/versions
pub async fn company_versions(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    get_company_or_404(&state.repos, &id).await?;
    let versions: Vec<_> = state
        .repos
        .analyses
        .list_by_company(&id)
        .await
        .into_iter()
        .map(|a| {
            json!({
                "version_number": a.version_number,
                "started_at": a.started_at,
                "completed_at": a.completed_at,
                "success": a.success(),
                "total_tokens": a.total_tokens(),
            })
        })
        .collect();
    Ok(Json(versions))
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub v1: u32,
    pub v2: u32,
}

/// GET /companies/:id/compare?v1=..&v2=..
pub async fn company_compare(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<CompareQuery>,
) -> Result<impl IntoResponse, ApiError> {
    get_company_or_404(&state.repos, &id).await?;
    let a = state
        .repos
        .analyses
        .get_version(&id, query.v1)
        .await
        .ok_or_else(|| ApiError::not_found(format!("version {} not found", query.v1)))?;
    let b = state
        .repos
        .analyses
        .get_version(&id, query.v2)
        .await
        .ok_or_else(|| ApiError::not_found(format!("version {} not found", query.v2)))?;
    Ok(Json(json!({ "a": a, "b": b })))
}

#[derive(Debug, Deserialize, Default)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
}

/// GET /companies/:id/export?format=markdown|json&version=N — `markdown`
/// and `json` are rendered directly; `word`/`pdf` require an external
/// renderer this core does not carry.
pub async fn export_company(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    get_company_or_404(&state.repos, &id).await?;

    let analysis = match query.version {
        Some(v) => state.repos.analyses.get_version(&id, v).await,
        None => state.repos.analyses.get_latest(&id).await,
    }
    .ok_or_else(|| ApiError::not_found("no analysis available for this company"))?;

    let format = query.format.unwrap_or_else(|| "markdown".to_string());
    match format.as_str() {
        "json" => {
            let body = serde_json::to_string_pretty(&analysis).unwrap_or_default();
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/json"),
                    (header::CONTENT_DISPOSITION, "attachment; filename=\"export.json\""),
                ],
                body,
            )
                .into_response())
        }
        "markdown" => {
            let body = analysis.get_full_analysis();
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "text/markdown; charset=utf-8"),
                    (header::CONTENT_DISPOSITION, "attachment; filename=\"export.md\""),
                ],
                body,
            )
                .into_response())
        }
        "word" | "pdf" => Err(ApiError::new(
            StatusCode::NOT_IMPLEMENTED,
            "renderer_unavailable",
            format!("{format} export requires an external document renderer"),
        )),
        other => Err(ApiError::bad_request(format!("unsupported export format: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub company_ids: Vec<String>,
    #[serde(default)]
    pub max_concurrency: Option<u32>,
    #[serde(default)]
    pub priority: Option<u32>,
}

/// POST /batches
pub async fn create_batch(
    State(state): State<AppState>,
    Json(payload): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.company_ids.is_empty() {
        return Err(ApiError::bad_request("company_ids must not be empty"));
    }
    let batch = batch_svc(&state)
        .create(payload.company_ids, payload.max_concurrency.unwrap_or(1), payload.priority.unwrap_or(0))
        .await;
    Ok((StatusCode::CREATED, Json(batch)))
}

/// GET /batches
pub async fn list_batches(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.repos.batches.list().await)
}

/// POST /batches/schedule — sweeps every non-terminal batch and dispatches
/// whatever PENDING member companies fit within each batch's concurrency
/// ceiling. Exposed directly (distinct from `/batches/:id/start`) so an
/// operator or cron can drive the fair-scheduling pass without targeting a
/// single batch.
pub async fn schedule_batches(State(state): State<AppState>) -> impl IntoResponse {
    batch_svc(&state).schedule().await;
    Json(state.repos.batches.list().await)
}

async fn get_batch_or_404(repos: &Repositories, id: &str) -> Result<crate::models::BatchJob, ApiError> {
    repos.batches.get(id).await.ok_or_else(|| ApiError::not_found(format!("batch not found: {id}")))
}

/// GET /batches/:id
pub async fn get_batch(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let batch = get_batch_or_404(&state.repos, &id).await?;
    let progress = batch_svc(&state).progress(&id).await?;
    Ok(Json(json!({ "batch": batch, "progress": progress })))
}

/// POST /batches/:id/start
pub async fn start_batch(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    get_batch_or_404(&state.repos, &id).await?;
    batch_svc(&state).schedule().await;
    Ok(Json(get_batch_or_404(&state.repos, &id).await?))
}

/// POST /batches/:id/pause
pub async fn pause_batch(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    batch_svc(&state).pause(&id, API_WORKER_ID).await?;
    Ok(Json(get_batch_or_404(&state.repos, &id).await?))
}

/// POST /batches/:id/resume
pub async fn resume_batch(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    batch_svc(&state).resume(&id, API_WORKER_ID).await?;
    Ok(Json(get_batch_or_404(&state.repos, &id).await?))
}

/// POST /batches/:id/cancel
pub async fn cancel_batch(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    batch_svc(&state).cancel(&id).await?;
    Ok(Json(get_batch_or_404(&state.repos, &id).await?))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

