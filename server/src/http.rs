//! Control API: the HTTP surface in front of the session manager (spec §4.5, §6).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use vibetunnel_core::hub::JoinMode;
use vibetunnel_core::pty::Signal;
use vibetunnel_core::session::{CreateSpec, SessionManager, SessionSnapshot};
use vibetunnel_core::title::TitleMode;

use crate::error::{ApiError, ApiResult};
use crate::sse;

const MAX_NAME_BYTES: usize = 256;
const MAX_INPUT_BYTES: usize = 1024 * 1024;
const MAX_ARGV_TOKENS: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub started_at: Instant,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/activity", get(all_activity))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/input", post(write_input))
        .route("/api/sessions/{id}/resize", post(resize_session))
        .route("/api/sessions/{id}/text", get(text_snapshot))
        .route("/api/sessions/{id}/buffer", get(binary_snapshot))
        .route("/api/sessions/{id}/stream", get(stream_session))
        .route("/api/sessions/{id}/activity", get(session_activity))
        .route("/api/cleanup-exited", post(cleanup_exited))
        .route("/api/health", get(health))
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody {
    command: Vec<String>,
    working_dir: PathBuf,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cols: Option<u16>,
    #[serde(default)]
    rows: Option<u16>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    title_mode: Option<TitleMode>,
    #[serde(default)]
    prevent_title_change: bool,
}

#[derive(Serialize)]
struct CreateSessionResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<Json<CreateSessionResponse>> {
    if body.command.is_empty() {
        return Err(ApiError::BadRequest("command must not be empty".into()));
    }
    if body.command.len() > MAX_ARGV_TOKENS {
        return Err(ApiError::BadRequest(format!(
            "command must have at most {MAX_ARGV_TOKENS} tokens"
        )));
    }
    if let Some(name) = &body.name {
        if name.len() > MAX_NAME_BYTES {
            return Err(ApiError::BadRequest(format!(
                "name must be at most {MAX_NAME_BYTES} bytes"
            )));
        }
    }

    let spec = CreateSpec {
        id: body.session_id,
        name: body.name,
        command: body.command,
        working_dir: body.working_dir,
        cols: body.cols.unwrap_or(80),
        rows: body.rows.unwrap_or(24),
        env: body.env,
        title_mode: body.title_mode.unwrap_or_default(),
        prevent_title_change: body.prevent_title_change,
    };
    let snapshot = state.sessions.create(spec)?;
    Ok(Json(CreateSessionResponse { session_id: snapshot.id }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.sessions.list())
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionSnapshot>> {
    state
        .sessions
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::Core(vibetunnel_core::error::CoreError::NotFound(id)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.sessions.kill(&id, Signal::Term)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct InputBody {
    text: String,
}

async fn write_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<InputBody>,
) -> ApiResult<StatusCode> {
    if body.text.is_empty() {
        return Err(ApiError::BadRequest("input must not be empty".into()));
    }
    if body.text.len() > MAX_INPUT_BYTES {
        return Err(ApiError::BadRequest(format!(
            "input must be at most {MAX_INPUT_BYTES} bytes"
        )));
    }
    state.sessions.write(&id, body.text.as_bytes())?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct ResizeBody {
    cols: u16,
    rows: u16,
}

async fn resize_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResizeBody>,
) -> ApiResult<StatusCode> {
    state.sessions.resize(&id, body.cols, body.rows)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct StylesQuery {
    #[serde(default)]
    styles: bool,
}

async fn text_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StylesQuery>,
) -> ApiResult<Response> {
    let text = state.sessions.text_snapshot(&id, query.styles)?;
    Ok(([("content-type", "text/plain; charset=utf-8")], text).into_response())
}

async fn binary_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StylesQuery>,
) -> ApiResult<Response> {
    let bytes = state.sessions.binary_snapshot(&id, query.styles)?;
    Ok(([("content-type", "application/octet-stream")], bytes).into_response())
}

async fn stream_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let rx = state.sessions.subscribe(&id, JoinMode::FromStart)?;
    Ok(sse::stream_response(rx).into_response())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivityResponse {
    is_active: bool,
    timestamp: chrono::DateTime<chrono::Utc>,
    session: SessionSnapshot,
}

async fn session_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ActivityResponse>> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| ApiError::Core(vibetunnel_core::error::CoreError::NotFound(id.clone())))?;
    let activity = state
        .sessions
        .activity(&id)
        .ok_or_else(|| ApiError::Core(vibetunnel_core::error::CoreError::NotFound(id)))?;
    Ok(Json(ActivityResponse {
        is_active: activity.is_active,
        timestamp: chrono::Utc::now(),
        session,
    }))
}

async fn all_activity(
    State(state): State<AppState>,
) -> Json<HashMap<String, vibetunnel_core::session::Activity>> {
    Json(state.sessions.all_activity())
}

#[derive(Serialize)]
struct CleanupResponse {
    #[serde(rename = "localCleaned")]
    local_cleaned: usize,
}

async fn cleanup_exited(State(state): State<AppState>) -> Json<CleanupResponse> {
    Json(CleanupResponse { local_cleaned: state.sessions.cleanup_exited() })
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    uptime: u64,
    sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        uptime: state.started_at.elapsed().as_secs(),
        sessions: state.sessions.list().len(),
    })
}
