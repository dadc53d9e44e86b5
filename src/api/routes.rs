//! REST endpoints for the operator: session signals and keyword rules.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{DatabaseError, SignalError};
use crate::responder::matcher;
use crate::session::SessionSignalLoop;
use crate::signals::{SignalKey, SignalStore};
use crate::store::{ChatUpsert, Database};

/// Shared state for operator routes.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn Database>,
    pub signals: Arc<dyn SignalStore>,
    pub session: Arc<SessionSignalLoop>,
}

/// Build the operator REST routes.
pub fn operator_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/session", get(session_status))
        .route("/api/session/code", post(request_code))
        .route("/api/session/sign-in", post(submit_code))
        .route("/api/session/logout", post(logout))
        .route("/api/chats", get(list_chats).post(upsert_chat))
        .route("/api/chats/{id}/keywords", get(list_keywords).post(add_keyword))
        .route("/api/keywords/{id}", delete(delete_keyword))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn db_error(e: DatabaseError) -> Response {
    match e {
        DatabaseError::NotFound { .. } => error_json(StatusCode::NOT_FOUND, e.to_string()),
        e => {
            warn!("Database error in operator API: {e}");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn signal_error(e: SignalError) -> Response {
    warn!("Signal store error in operator API: {e}");
    error_json(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
}

fn accepted(status: &str) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": status })),
    )
        .into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "autoreply"
    }))
}

// ── Session signals ─────────────────────────────────────────────────────

/// GET /api/session
///
/// Current session state plus the flags the loop maintains.
async fn session_status(State(state): State<ApiState>) -> Response {
    let flags = async {
        let authed = state.signals.is_raised(SignalKey::Authed).await?;
        let ready = state.signals.is_raised(SignalKey::ReadyToConnect).await?;
        Ok::<_, SignalError>((authed, ready))
    };
    let session_state = state.session.state().await;
    match flags.await {
        Ok((authed, ready)) => Json(serde_json::json!({
            "state": session_state,
            "authed": authed,
            "ready_to_connect": ready,
        }))
        .into_response(),
        Err(e) => signal_error(e),
    }
}

#[derive(Deserialize)]
struct CodeRequestBody {
    phone: String,
}

/// POST /api/session/code
async fn request_code(
    State(state): State<ApiState>,
    Json(body): Json<CodeRequestBody>,
) -> Response {
    let phone = body.phone.trim();
    if phone.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "phone must not be empty");
    }
    let raised = async {
        state.signals.set(SignalKey::Phone, phone).await?;
        state.signals.set(SignalKey::SendKey, "1").await
    };
    match raised.await {
        Ok(()) => {
            info!("Operator requested a verification code");
            accepted("code_requested")
        }
        Err(e) => signal_error(e),
    }
}

#[derive(Deserialize)]
struct SignInBody {
    code: String,
}

/// POST /api/session/sign-in
async fn submit_code(State(state): State<ApiState>, Json(body): Json<SignInBody>) -> Response {
    let code = body.code.trim();
    if code.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "code must not be empty");
    }
    match state.signals.set(SignalKey::SendedCode, code).await {
        Ok(()) => {
            info!("Operator submitted a verification code");
            accepted("code_submitted")
        }
        Err(e) => signal_error(e),
    }
}

/// POST /api/session/logout
async fn logout(State(state): State<ApiState>) -> Response {
    match state.signals.set(SignalKey::Logout, "1").await {
        Ok(()) => {
            info!("Operator requested logout");
            accepted("logout_requested")
        }
        Err(e) => signal_error(e),
    }
}

// ── Chats ───────────────────────────────────────────────────────────────

async fn list_chats(State(state): State<ApiState>) -> Response {
    match state.store.list_chats().await {
        Ok(chats) => Json(chats).into_response(),
        Err(e) => db_error(e),
    }
}

async fn upsert_chat(State(state): State<ApiState>, Json(body): Json<ChatUpsert>) -> Response {
    match state.store.upsert_chat(&body).await {
        Ok(chat) => {
            info!(chat_id = chat.id, "Chat saved");
            Json(chat).into_response()
        }
        Err(e) => db_error(e),
    }
}

// ── Keywords ────────────────────────────────────────────────────────────

async fn list_keywords(State(state): State<ApiState>, Path(chat_id): Path<i64>) -> Response {
    match state.store.get_chat(chat_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Chat not found"),
        Err(e) => return db_error(e),
    }
    match state.store.keywords_for_chat(chat_id).await {
        Ok(keywords) => Json(keywords).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Deserialize)]
struct NewKeyword {
    keyword: String,
    answer: String,
    #[serde(default)]
    answer_in_seconds: u32,
}

/// POST /api/chats/{id}/keywords
///
/// Every comma-separated sub-keyword must compile, and at least one must be
/// non-empty.
async fn add_keyword(
    State(state): State<ApiState>,
    Path(chat_id): Path<i64>,
    Json(body): Json<NewKeyword>,
) -> Response {
    let mut usable = 0;
    for raw in body.keyword.split(',') {
        match matcher::compile(raw) {
            Ok(Some(_)) => usable += 1,
            Ok(None) => {}
            Err(e) => return error_json(StatusCode::BAD_REQUEST, e.to_string()),
        }
    }
    if usable == 0 {
        return error_json(StatusCode::BAD_REQUEST, "keyword has no non-empty entries");
    }

    match state
        .store
        .add_keyword(chat_id, &body.keyword, &body.answer, body.answer_in_seconds)
        .await
    {
        Ok(keyword) => {
            info!(chat_id, keyword_id = keyword.id, "Keyword added");
            (StatusCode::CREATED, Json(keyword)).into_response()
        }
        Err(e) => db_error(e),
    }
}

async fn delete_keyword(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.store.delete_keyword(id).await {
        Ok(true) => {
            info!(keyword_id = id, "Keyword deleted");
            Json(serde_json::json!({ "status": "deleted" })).into_response()
        }
        Ok(false) => error_json(StatusCode::NOT_FOUND, "Keyword not found"),
        Err(e) => db_error(e),
    }
}
