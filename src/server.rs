//! HTTP API for the marketing site.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/rag-chat` | Retrieval-augmented reply for `{message, history}` |
//! | `POST` | `/chat/sessions` | Open a chat session |
//! | `POST` | `/chat/sessions/{id}/messages` | Send a user message |
//! | `GET`  | `/chat/sessions/{id}/messages?since=N` | Read the transcript from index N |
//! | `DELETE` | `/chat/sessions/{id}` | Close a session and cancel staged messages |
//! | `POST` | `/contact` | Contact form |
//! | `POST` | `/training-inquiries` | Training inquiry form |
//! | `GET`  | `/jobs` | Open positions |
//! | `GET`  | `/jobs/{slug}` | One position |
//! | `POST` | `/jobs/{slug}/applications` | Job application with a base64 resume |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation", "message": "...", "fields": [ ... ] } }
//! ```
//!
//! Error codes: `bad_request` (400), `validation` (422), `spam` (400),
//! `rate_limited` (429), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the site's frontend
//! can call the API from another origin.

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::conversation::{ChatSession, SessionSettings, SessionStore};
use crate::db;
use crate::forms::{ContactForm, FieldError, JobApplicationForm, TrainingInquiryForm};
use crate::intent::IntentClassifier;
use crate::jobs;
use crate::mailer;
use crate::migrate;
use crate::models::{ConversationMessage, HistoryTurn, Job, RagReply};
use crate::rag::{RagPipeline, ReplyGenerator};
use crate::submit::{SubmissionOutcome, SubmitError, Submissions};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    sessions: Arc<SessionStore>,
    generator: Arc<dyn ReplyGenerator>,
    classifier: Arc<IntentClassifier>,
    submissions: Arc<Submissions>,
}

impl AppState {
    /// Wire up the in-process reply pipeline, notifier, and session store.
    ///
    /// Job titles stored in the database are added to the classifier's
    /// built-in list. This is a snapshot taken at startup: jobs added later
    /// with `siteassist jobs add` are recognised after a restart.
    pub async fn new(config: Arc<Config>, pool: SqlitePool) -> Result<Self> {
        let notifier = mailer::create_notifier(&config.mailer)?;
        let titles = jobs::list_jobs(&pool).await?.into_iter().map(|j| j.title);
        let classifier = IntentClassifier::default().with_job_titles(titles);

        Ok(Self {
            generator: Arc::new(RagPipeline::new(pool.clone(), config.clone())),
            classifier: Arc::new(classifier),
            sessions: Arc::new(SessionStore::new(config.server.max_sessions)),
            submissions: Arc::new(Submissions::new(pool.clone(), &config, notifier)),
            config,
            pool,
        })
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// Opens the database, applies migrations, and runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let state = AppState::new(Arc::new(config.clone()), pool).await?;

    let listener = TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    println!("Listening on http://{}", config.server.bind);

    serve(listener, state).await
}

/// Serve `state` on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Room for the non-resume fields of an application body.
const APPLICATION_FIELDS_HEADROOM: usize = 64 * 1024;

/// Largest application body to buffer: a base64 resume at the configured
/// size cap plus the other fields. Oversized resumes that still fit are
/// reported as field validation errors rather than a rejected body.
fn application_body_limit(resume_max_bytes: usize) -> usize {
    resume_max_bytes
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(APPLICATION_FIELDS_HEADROOM)
}

pub fn router(state: AppState) -> Router {
    let application_limit = application_body_limit(state.config.forms.resume_max_bytes);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rag-chat", post(handle_rag_chat))
        .route("/chat/sessions", post(handle_create_session))
        .route(
            "/chat/sessions/{id}",
            axum::routing::delete(handle_close_session),
        )
        .route(
            "/chat/sessions/{id}/messages",
            post(handle_send_message).get(handle_list_messages),
        )
        .route("/contact", post(handle_contact))
        .route("/training-inquiries", post(handle_training))
        .route("/jobs", get(handle_list_jobs))
        .route("/jobs/{slug}", get(handle_get_job))
        .route(
            "/jobs/{slug}/applications",
            post(handle_apply).layer(DefaultBodyLimit::max(application_limit)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    fields: Option<Vec<FieldError>>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            fields: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                fields: self.fields,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "internal server error",
    )
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        let message = err.to_string();
        match err {
            SubmitError::Validation(v) => {
                let mut e = AppError::new(StatusCode::UNPROCESSABLE_ENTITY, "validation", message);
                e.fields = Some(v.errors);
                e
            }
            SubmitError::Spam => AppError::new(StatusCode::BAD_REQUEST, "spam", message),
            SubmitError::RateLimited => {
                AppError::new(StatusCode::TOO_MANY_REQUESTS, "rate_limited", message)
            }
            SubmitError::JobNotFound(_) => not_found(message),
            SubmitError::Store(e) => internal(e),
        }
    }
}

type ApiResult<T> = std::result::Result<T, AppError>;

// ============ Health ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============ RAG ============

#[derive(Deserialize)]
struct RagChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<HistoryTurn>,
}

async fn handle_rag_chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<RagChatRequest>, JsonRejection>,
) -> ApiResult<Json<RagReply>> {
    let Json(req) = payload?;
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let reply = state
        .generator
        .reply(&req.message, &req.history)
        .await
        .map_err(internal)?;
    Ok(Json(reply))
}

// ============ Chat sessions ============

#[derive(Serialize)]
struct SessionCreated {
    id: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn handle_create_session(
    State(state): State<AppState>,
) -> (StatusCode, Json<SessionCreated>) {
    let session = ChatSession::new(
        state.generator.clone(),
        state.classifier.clone(),
        SessionSettings::from(state.config.as_ref()),
    );
    let session = state.sessions.insert(session).await;
    tracing::info!(session = %session.id(), "chat session opened");
    (
        StatusCode::CREATED,
        Json(SessionCreated {
            id: session.id().to_string(),
            created_at: session.created_at(),
        }),
    )
}

#[derive(Deserialize)]
struct SendMessageRequest {
    text: String,
}

/// Transcript slice plus the index to poll from next.
#[derive(Serialize)]
struct MessagesResponse {
    messages: Vec<ConversationMessage>,
    next: usize,
    agent_name: Option<String>,
    connected: bool,
    awaiting_reply: bool,
}

async fn handle_send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<Json<MessagesResponse>> {
    let Json(req) = payload?;
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| not_found(format!("session not found: {}", id)))?;

    let start = session.transcript().len().await;
    let replies = session.handle_user_message(&req.text).await;
    tracing::debug!(session = %id, replies = replies.len(), "handled user message");

    Ok(Json(messages_response(&session, start).await))
}

#[derive(Deserialize)]
struct SinceQuery {
    #[serde(default)]
    since: usize,
}

async fn handle_list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> ApiResult<Json<MessagesResponse>> {
    let session = state
        .sessions
        .get(&id)
        .await
        .ok_or_else(|| not_found(format!("session not found: {}", id)))?;
    Ok(Json(messages_response(&session, query.since).await))
}

async fn messages_response(session: &ChatSession, since: usize) -> MessagesResponse {
    let messages = session.messages_since(since).await;
    let handoff = session.handoff_state().await;
    MessagesResponse {
        next: since + messages.len(),
        messages,
        agent_name: handoff.agent().map(str::to_string),
        connected: handoff.is_connected(),
        awaiting_reply: session.is_awaiting_reply(),
    }
}

async fn handle_close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.sessions.remove(&id).await {
        tracing::info!(session = %id, "chat session closed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("session not found: {}", id)))
    }
}

// ============ Forms ============

#[derive(Serialize)]
struct SubmissionResponse {
    success: bool,
    id: String,
    notified: bool,
}

impl From<SubmissionOutcome> for SubmissionResponse {
    fn from(outcome: SubmissionOutcome) -> Self {
        Self {
            success: true,
            id: outcome.id().to_string(),
            notified: outcome.notified(),
        }
    }
}

fn client_key(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}

async fn handle_contact(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: std::result::Result<Json<ContactForm>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmissionResponse>)> {
    let Json(form) = payload?;
    let outcome = state
        .submissions
        .submit_contact(&client_key(&addr), &form)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

async fn handle_training(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    payload: std::result::Result<Json<TrainingInquiryForm>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmissionResponse>)> {
    let Json(form) = payload?;
    let outcome = state
        .submissions
        .submit_training(&client_key(&addr), &form)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

// ============ Jobs ============

async fn handle_list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<Job>>> {
    let jobs = jobs::list_jobs(&state.pool).await.map_err(internal)?;
    Ok(Json(jobs))
}

async fn handle_get_job(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<Job>> {
    jobs::get_job_by_slug(&state.pool, &slug)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("job not found: {}", slug)))
}

async fn handle_apply(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(slug): Path<String>,
    payload: std::result::Result<Json<JobApplicationForm>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmissionResponse>)> {
    let Json(form) = payload?;
    let outcome = state
        .submissions
        .submit_application(&client_key(&addr), &slug, &form)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome.into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_limit_covers_encoded_resume() {
        let max: usize = 5 * 1024 * 1024;
        let encoded = 4 * max.div_ceil(3);
        let limit = application_body_limit(max);
        assert!(limit >= encoded + APPLICATION_FIELDS_HEADROOM);
        assert!(limit > 2 * 1024 * 1024);
    }
}
