use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::SignError;
use crate::progress::BroadcastPublisher;
use crate::queue::{JobPayload, JobRecord, SharedQueue};
use crate::request::RequestWorkflow;

#[derive(Clone)]
pub struct ApiState {
    pub queue: Arc<SharedQueue>,
    pub workflow: Arc<RequestWorkflow>,
    pub publisher: BroadcastPublisher,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    id: String,
    request_id: String,
    user_id: String,
    status: String,
    attempts: u32,
    last_error: Option<String>,
    created_at: String,
}

impl From<&JobRecord> for JobResponse {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.to_string(),
            request_id: record.job.request_id.clone(),
            user_id: record.job.user_id.clone(),
            status: record.status.to_string(),
            attempts: record.attempts,
            last_error: record.last_error.clone(),
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    creator_id: String,
    officer_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RejectRequest {
    officer_id: String,
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfficerRequest {
    officer_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRequest {
    user_id: String,
}

/// HTTP face of a [`SignError`].
pub struct ApiError(SignError);

impl From<SignError> for ApiError {
    fn from(e: SignError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SignError::CourtNotFound(_)
            | SignError::RequestNotFound(_)
            | SignError::DocumentNotFound { .. }
            | SignError::UserNotFound(_)
            | SignError::SignatureNotFound { .. }
            | SignError::TemplateNotFound(_)
            | SignError::JobNotFound(_) => StatusCode::NOT_FOUND,
            SignError::Unauthorized(_) => StatusCode::FORBIDDEN,
            SignError::IllegalTransition { .. } | SignError::Conflict(_) => StatusCode::CONFLICT,
            SignError::InvalidJob(_) | SignError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SignError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Malformed or incomplete bodies are client errors, never 422.
fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| ApiError(SignError::InvalidInput(e.body_text())))
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/jobs", get(list_jobs_handler).post(enqueue_handler))
        .route("/api/jobs/dead", get(dead_jobs_handler))
        .route("/api/jobs/:id/retry", post(retry_job_handler))
        .route("/api/requests/:id/send", post(send_handler))
        .route("/api/requests/:id/reject", post(reject_handler))
        .route("/api/requests/:id/delegate", post(delegate_handler))
        .route("/api/requests/:id/ready", post(ready_handler))
        .route("/api/requests/:id/dispatch", post(dispatch_handler))
        .route(
            "/api/requests/:id/documents/:document_id/reject",
            post(reject_document_handler),
        )
        .route("/api/requests/:id/events", get(events_handler))
        .route("/api/documents/:document_id", get(document_handler))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn run_api(addr: SocketAddr, state: ApiState, shutdown: CancellationToken) {
    tracing::info!(addr = %addr, "Starting API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
            shutdown.cancel();
            return;
        }
    };

    let app = router(state);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "API server failed");
    }
}

async fn enqueue_handler(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<JobPayload>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let job = body(payload)?.into_job();
    let handle = state.queue.enqueue(job).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

async fn list_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let queue = state.queue.read().await;
    let jobs: Vec<JobResponse> = queue.all_jobs().into_iter().map(JobResponse::from).collect();
    Json(jobs)
}

async fn dead_jobs_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let queue = state.queue.read().await;
    let jobs: Vec<JobResponse> = queue.dead_jobs().into_iter().map(JobResponse::from).collect();
    Json(jobs)
}

async fn retry_job_handler(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.queue.retry_dead(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn send_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = body(payload)?;
    let request = state
        .workflow
        .send_for_signature(&id, &req.creator_id, &req.officer_id)
        .await?;
    Ok(Json(request))
}

async fn reject_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<RejectRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = body(payload)?;
    let request = state
        .workflow
        .reject_request(&id, &req.officer_id, &req.reason)
        .await?;
    Ok(Json(request))
}

async fn reject_document_handler(
    State(state): State<ApiState>,
    Path((id, document_id)): Path<(String, String)>,
    payload: std::result::Result<Json<RejectRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = body(payload)?;
    let request = state
        .workflow
        .reject_document(&id, &document_id, &req.officer_id, &req.reason)
        .await?;
    Ok(Json(request))
}

async fn delegate_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<OfficerRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = body(payload)?;
    let request = state.workflow.delegate(&id, &req.officer_id).await?;
    Ok(Json(request))
}

async fn ready_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UserRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = body(payload)?;
    let request = state
        .workflow
        .mark_ready_for_dispatch(&id, &req.user_id)
        .await?;
    Ok(Json(request))
}

async fn dispatch_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<UserRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let req = body(payload)?;
    let request = state.workflow.dispatch(&id, &req.user_id).await?;
    Ok(Json(request))
}

async fn document_handler(
    State(state): State<ApiState>,
    Path(document_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let view = state.workflow.document_lookup(&document_id).await?;
    Ok(Json(view))
}

/// Progress of one request as server-sent events. Events published before the
/// client connected, or dropped while it lagged, are not replayed.
async fn events_handler(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.publisher.subscribe()).filter_map(move |event| {
        match event {
            Ok(event) if event.request_id == id => Event::default()
                .event("progress")
                .json_data(&event)
                .ok()
                .map(Ok),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(request_id = %id, error = %e, "Progress subscriber lagged");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
