use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::database::{ChatDatabase, MessageRole, Room, RoomSummary, StoredMessage};
use crate::gate::{self, GateVerdict, SkipReason};
use crate::llm_client::CompletionBackend;
use crate::prompt;

#[derive(Clone)]
pub struct ServerState {
    pub db: Arc<ChatDatabase>,
    pub completions: Arc<dyn CompletionBackend>,
    pub config: AppConfig,
    pub auth: BackendAuthConfig,
}

#[derive(Debug, Clone)]
pub struct BackendAuthConfig {
    mode: AuthMode,
    token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMode {
    Required,
    Disabled,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
struct ListRoomsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    name: Option<String>,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub user_name: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    skipped: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SystemMessageRequest {
    action: String,
    user_name: String,
    user_id: String,
}

#[derive(Debug, Serialize)]
struct SystemMessageResponse {
    message: StoredMessage,
}

#[derive(Debug, Serialize)]
struct DeleteRoomResponse {
    ok: bool,
}

/// Result of one non-failed send pipeline run.
pub enum SendOutcome {
    /// The gate decided the assistant should stay silent.
    Suppressed(SkipReason),
    /// An assistant message (reply or upstream-failure notice) was stored.
    Replied(StoredMessage),
}

pub async fn serve(
    db: Arc<ChatDatabase>,
    completions: Arc<dyn CompletionBackend>,
    config: AppConfig,
) -> Result<()> {
    let bind_addr = std::env::var("PARLOR_BIND")
        .unwrap_or_else(|_| "127.0.0.1:8780".to_string())
        .parse::<SocketAddr>()
        .context("Invalid PARLOR_BIND (expected host:port)")?;

    let auth = load_auth_config()?;

    let state = Arc::new(ServerState {
        db,
        completions,
        config,
        auth,
    });

    let protected = Router::new()
        .route("/health", get(health))
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/:id", delete(delete_room))
        .route("/rooms/:id/messages", get(list_messages))
        .route("/rooms/:id/send", post(send_message))
        .route("/rooms/:id/system-message", post(create_system_message))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let app = Router::new().nest("/v1", protected);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", bind_addr))?;
    tracing::info!("Parlor backend listening on http://{}", bind_addr);
    axum::serve(listener, app)
        .await
        .context("Server failed")?;
    Ok(())
}

fn load_auth_config() -> Result<BackendAuthConfig> {
    let mode = parse_auth_mode(std::env::var("PARLOR_AUTH_MODE").ok())?;
    let token = std::env::var("PARLOR_TOKEN")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if mode == AuthMode::Required && token.is_none() {
        return Err(anyhow!(
            "PARLOR_TOKEN is required when auth mode is 'required'"
        ));
    }
    if mode == AuthMode::Disabled {
        tracing::warn!("Auth mode is disabled; all API routes are unauthenticated");
    }

    Ok(BackendAuthConfig { mode, token })
}

fn parse_auth_mode(raw: Option<String>) -> Result<AuthMode> {
    let normalized = raw
        .unwrap_or_else(|| "required".to_string())
        .trim()
        .to_ascii_lowercase();
    match normalized.as_str() {
        "" | "required" | "on" | "enabled" | "true" => Ok(AuthMode::Required),
        "disabled" | "off" | "false" => Ok(AuthMode::Disabled),
        other => Err(anyhow!(
            "Invalid PARLOR_AUTH_MODE '{}'. Expected 'required' or 'disabled'",
            other
        )),
    }
}

async fn auth_middleware(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    authorize(&headers, &state.auth)?;
    Ok(next.run(request).await)
}

fn authorize(headers: &HeaderMap, auth: &BackendAuthConfig) -> Result<(), StatusCode> {
    if auth.mode == AuthMode::Disabled {
        return Ok(());
    }
    let Some(token) = auth.token.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };

    let Some(raw_header) = headers.get(header::AUTHORIZATION) else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let Ok(auth_value) = raw_header.to_str() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let expected = format!("Bearer {}", token);
    if auth_value.trim() != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn list_rooms(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<Json<Vec<RoomSummary>>, (StatusCode, String)> {
    let limit = clamp_limit(query.limit, 100, 1, 1000);
    state.db.list_rooms(limit).map(Json).map_err(internal_error)
}

async fn create_room(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<Json<Room>, (StatusCode, String)> {
    let user_id = body
        .user_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "User ID is required".to_string(),
            )
        })?;

    state
        .db
        .create_room(body.name.as_deref(), user_id)
        .map(Json)
        .map_err(internal_error)
}

async fn delete_room(
    State(state): State<Arc<ServerState>>,
    Path(room_id): Path<String>,
) -> Result<Json<DeleteRoomResponse>, (StatusCode, String)> {
    let deleted = state.db.delete_room(&room_id).map_err(internal_error)?;
    if !deleted {
        return Err(not_found(format!("room '{}' not found", room_id)));
    }
    Ok(Json(DeleteRoomResponse { ok: true }))
}

async fn list_messages(
    State(state): State<Arc<ServerState>>,
    Path(room_id): Path<String>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<StoredMessage>>, (StatusCode, String)> {
    require_room(&state, &room_id)?;
    let limit = clamp_limit(query.limit, 200, 1, 2000);
    state
        .db
        .recent_messages(&room_id, limit)
        .map(Json)
        .map_err(internal_error)
}

/// Membership events become system-role messages in the room log.
async fn create_system_message(
    State(state): State<Arc<ServerState>>,
    Path(room_id): Path<String>,
    Json(body): Json<SystemMessageRequest>,
) -> Result<Json<SystemMessageResponse>, (StatusCode, String)> {
    require_room(&state, &room_id)?;

    let user_name = body.user_name.trim();
    let user_id = body.user_id.trim();
    if body.action.trim().is_empty() || user_name.is_empty() || user_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Missing required fields".to_string(),
        ));
    }

    let content = match body.action.trim() {
        "join" => {
            state
                .db
                .add_participant(&room_id, user_id)
                .map_err(internal_error)?;
            format!("{} joined the chat", user_name)
        }
        "leave" => {
            state
                .db
                .remove_participant(&room_id, user_id)
                .map_err(internal_error)?;
            format!("{} left the chat", user_name)
        }
        _ => {
            return Err((StatusCode::BAD_REQUEST, "Invalid action".to_string()));
        }
    };

    let message = state
        .db
        .insert_message(
            &room_id,
            Some(user_id),
            user_name,
            MessageRole::System,
            &content,
        )
        .map_err(internal_error)?;

    Ok(Json(SystemMessageResponse { message }))
}

async fn send_message(
    State(state): State<Arc<ServerState>>,
    Path(room_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, (StatusCode, String)> {
    require_room(&state, &room_id)?;

    if body.user_name.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "user_name cannot be empty".to_string(),
        ));
    }

    let outcome = run_send_pipeline(
        &state.db,
        state.completions.as_ref(),
        &state.config,
        &room_id,
        &body,
    )
    .await
    .map_err(bad_request)?;

    match outcome {
        SendOutcome::Suppressed(_) => Ok(Json(SendMessageResponse {
            ok: true,
            skipped: Some(true),
        })),
        SendOutcome::Replied(_) => Ok(Json(SendMessageResponse {
            ok: true,
            skipped: None,
        })),
    }
}

/// One assistant turn: persist the user message, evaluate the gate over the
/// room window, and either stop or store exactly one assistant message.
///
/// Only the two persistence steps can fail the call. A history-fetch failure
/// degrades to an empty window; a completion failure becomes a visible
/// warning message so the turn is never silently dropped.
pub async fn run_send_pipeline(
    db: &ChatDatabase,
    completions: &dyn CompletionBackend,
    config: &AppConfig,
    room_id: &str,
    request: &SendMessageRequest,
) -> Result<SendOutcome> {
    db.insert_message(
        room_id,
        request.user_id.as_deref(),
        &request.user_name,
        MessageRole::User,
        &request.content,
    )
    .context("Failed to persist user message")?;

    let window = match db.recent_messages(room_id, config.history_window) {
        Ok(window) => window,
        Err(error) => {
            tracing::warn!("History fetch failed for room {}: {:#}", room_id, error);
            Vec::new()
        }
    };

    let participant_names = prompt::distinct_user_names(&window);

    match gate::evaluate(&request.content, &participant_names, &request.user_name) {
        GateVerdict::Suppress(reason) => {
            tracing::debug!(
                "Assistant reply suppressed for room {}: {:?}",
                room_id,
                reason
            );
            return Ok(SendOutcome::Suppressed(reason));
        }
        GateVerdict::Respond => {}
    }

    let input = prompt::build_prompt(
        &window,
        &participant_names,
        &request.user_name,
        &config.assistant_name,
    );

    let reply = match completions.complete(input).await {
        Ok(text) => text,
        Err(error) => {
            tracing::warn!("Completion failed for room {}: {:#}", room_id, error);
            format!("⚠️ upstream error: {:#}", error)
        }
    };

    let stored = db
        .insert_message(
            room_id,
            None,
            &config.assistant_name,
            MessageRole::Assistant,
            &reply,
        )
        .context("Failed to persist assistant message")?;

    Ok(SendOutcome::Replied(stored))
}

fn require_room(state: &ServerState, room_id: &str) -> Result<Room, (StatusCode, String)> {
    state
        .db
        .get_room(room_id)
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("room '{}' not found", room_id)))
}

fn clamp_limit(value: Option<usize>, default: usize, min: usize, max: usize) -> usize {
    value.unwrap_or(default).clamp(min, max)
}

fn not_found(message: String) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, message)
}

fn bad_request(error: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, error.to_string())
}

fn internal_error(error: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}
