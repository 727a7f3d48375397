use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use snare_core::{
    ChannelMetadata, InboundMessage, IntelKind, IntelligenceItem, ScammerProfile, Sender,
};
use snare_engine::{Orchestrator, PersistenceError, SessionSnapshot, SqlitePersistence};
use snare_storage::{
    DashboardStats, IntelStore, NetworkGraph, StorageError, StoredMessage, StoredSession,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub store: Arc<SqlitePersistence>,
    pub api_key: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid API key")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("internal error")]
    Internal(#[from] PersistenceError),
    #[error("internal error")]
    TaskFailed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(err) => {
                error!(event = "api_internal_error", error = %err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::TaskFailed(err) => {
                error!(event = "api_task_failed", error = %err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({"status": "error", "detail": self.to_string()}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Millis(i64),
    Text(String),
}

impl WireTimestamp {
    /// Epoch milliseconds, a numeric string of them, or RFC 3339.
    pub fn resolve(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(ms) => Utc.timestamp_millis_opt(*ms).single(),
            WireTimestamp::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Utc.timestamp_millis_opt(ms).single();
                }
                DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|value| value.with_timezone(&Utc))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub sender: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WireMetadata {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
}

impl From<WireMetadata> for ChannelMetadata {
    fn from(wire: WireMetadata) -> Self {
        let defaults = ChannelMetadata::default();
        Self {
            channel: wire.channel.unwrap_or(defaults.channel),
            language: wire.language.unwrap_or(defaults.language),
            locale: wire.locale.unwrap_or(defaults.locale),
        }
    }
}

/// Inbound request body. `conversationHistory` is accepted but the engine's
/// own session history is authoritative.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoneypotRequest {
    #[serde(default)]
    pub session_id: String,
    pub message: WireMessage,
    #[serde(default)]
    pub conversation_history: Vec<Value>,
    #[serde(default)]
    pub metadata: Option<WireMetadata>,
}

impl HoneypotRequest {
    pub fn into_inbound(self, received_at: DateTime<Utc>) -> Result<InboundMessage, ApiError> {
        let session_id = self.session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(ApiError::BadRequest("sessionId is required".to_string()));
        }
        let sender: Sender = self.message.sender.parse().map_err(ApiError::BadRequest)?;
        if !self.conversation_history.is_empty() {
            debug!(
                event = "client_history_ignored",
                session_id = %session_id,
                turns = self.conversation_history.len()
            );
        }
        let timestamp = match &self.message.timestamp {
            Some(wire) => wire.resolve().unwrap_or_else(|| {
                debug!(event = "timestamp_unreadable", session_id = %session_id);
                received_at
            }),
            None => received_at,
        };
        Ok(InboundMessage {
            session_id,
            sender,
            text: self.message.text,
            timestamp,
            metadata: self.metadata.map(ChannelMetadata::from),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct HoneypotResponse {
    pub status: &'static str,
    pub reply: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntelligenceCount {
    pub bank_accounts: usize,
    pub upi_ids: usize,
    pub links: usize,
    pub phones: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: u32,
    pub scam_detected: bool,
    pub callback_sent: bool,
    pub created_at: DateTime<Utc>,
    pub intelligence_count: IntelligenceCount,
}

impl From<&SessionSnapshot> for SessionSummary {
    fn from(snapshot: &SessionSnapshot) -> Self {
        let intel = &snapshot.intelligence;
        Self {
            session_id: snapshot.session_id.clone(),
            message_count: snapshot.message_count,
            scam_detected: snapshot.scam_detected,
            callback_sent: snapshot.callback_sent,
            created_at: snapshot.created_at,
            intelligence_count: IntelligenceCount {
                bank_accounts: intel.count(IntelKind::BankAccount),
                upi_ids: intel.count(IntelKind::PaymentHandle),
                links: intel.count(IntelKind::PhishingLink),
                phones: intel.count(IntelKind::PhoneNumber),
            },
        }
    }
}

/// A stored session row with its transcript and extracted items. Outlives
/// the in-memory session once the idle reaper evicts it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSessionDetail {
    pub session: StoredSession,
    pub messages: Vec<StoredMessage>,
    pub intelligence: Vec<IntelligenceItem>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/honeypot", post(honeypot))
        .route("/api/session/:session_id", get(session_detail))
        .route("/api/sessions", get(list_sessions))
        .route("/api/intel/sessions/:session_id", get(stored_session_detail))
        .route("/api/intel/stats", get(intel_stats))
        .route("/api/intel/scammers", get(list_scammers))
        .route("/api/intel/scammers/:identifier", get(scammer_detail))
        .route("/api/intel/network", get(network_graph))
        .route("/health", get(health))
        .with_state(state)
}

/// Runs a store read on the blocking pool so SQLite I/O stays off the
/// async workers.
async fn read_store<T, F>(store: &Arc<SqlitePersistence>, action: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&IntelStore) -> Result<T, StorageError> + Send + 'static,
{
    let store = store.clone();
    let result = tokio::task::spawn_blocking(move || store.with_store(action))
        .await
        .map_err(|err| ApiError::TaskFailed(err.to_string()))?;
    Ok(result?)
}

fn authorize(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if expected.is_empty() || provided != expected {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

async fn honeypot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<HoneypotRequest>, JsonRejection>,
) -> Result<Json<HoneypotResponse>, ApiError> {
    authorize(&headers, &state.api_key)?;
    let Json(request) = body.map_err(|rejection| {
        warn!(event = "request_rejected", error = %rejection.body_text());
        ApiError::BadRequest(rejection.body_text())
    })?;
    let inbound = request.into_inbound(Utc::now())?;
    let outcome = state.orchestrator.process_message(inbound).await;
    Ok(Json(HoneypotResponse {
        status: "success",
        reply: outcome.reply,
    }))
}

async fn session_detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    authorize(&headers, &state.api_key)?;
    state
        .orchestrator
        .snapshot(&session_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&headers, &state.api_key)?;
    let snapshots = state.orchestrator.registry().snapshots().await;
    let sessions: Vec<SessionSummary> = snapshots.iter().map(SessionSummary::from).collect();
    Ok(Json(json!({"total": sessions.len(), "sessions": sessions})))
}

async fn stored_session_detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<StoredSessionDetail>, ApiError> {
    authorize(&headers, &state.api_key)?;
    let detail = read_store(&state.store, move |store| {
        let Some(session) = store.session(&session_id)? else {
            return Ok(None);
        };
        Ok(Some(StoredSessionDetail {
            session,
            messages: store.messages_for_session(&session_id)?,
            intelligence: store.intelligence_for_session(&session_id)?,
        }))
    })
    .await?
    .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;
    Ok(Json(detail))
}

async fn intel_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DashboardStats>, ApiError> {
    authorize(&headers, &state.api_key)?;
    let stats = read_store(&state.store, |store| store.dashboard_stats()).await?;
    Ok(Json(stats))
}

async fn list_scammers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&headers, &state.api_key)?;
    let profiles = read_store(&state.store, |store| store.scammer_profiles()).await?;
    Ok(Json(json!({"total": profiles.len(), "scammers": profiles})))
}

async fn scammer_detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(identifier): Path<String>,
) -> Result<Json<ScammerProfile>, ApiError> {
    authorize(&headers, &state.api_key)?;
    let profile = read_store(&state.store, move |store| store.scammer_profile(&identifier))
        .await?
        .ok_or_else(|| ApiError::NotFound("Scammer not found".to_string()))?;
    Ok(Json(profile))
}

async fn network_graph(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<NetworkGraph>, ApiError> {
    authorize(&headers, &state.api_key)?;
    let graph = read_store(&state.store, |store| store.network_graph()).await?;
    Ok(Json(graph))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "activeSessions": state.orchestrator.registry().len().await,
        "llmConfigured": state.orchestrator.has_generator(),
    }))
}
