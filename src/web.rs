//! Single-page web chat.
//!
//! The server owns exactly one [`ChatSession`]; requests are queued on its
//! mutex so at most one exchange is in flight.
//!
//! This is a single-user host. Every client that reaches the listener reads
//! and extends the same conversation, and `/api/reset` clears it for all of
//! them. Keep `WEB_BIND_ADDR` on a loopback address unless that is intended.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ChatError, FailureKind};
use crate::model::Message;
use crate::session::ChatSession;
use crate::transport::HttpTransport;

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Clone)]
pub struct AppState {
    session: Arc<Mutex<ChatSession<HttpTransport>>>,
}

impl AppState {
    pub fn new(session: ChatSession<HttpTransport>) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: String,
    detail: String,
}

enum AppError {
    BadRequest(String),
    Upstream(ChatError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request".to_string(), msg),
            AppError::Upstream(err) => {
                let status = match err.kind() {
                    FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, err.kind().as_str().to_string(), err.detail())
            }
        };

        let body = Json(ErrorBody {
            error: ErrorDetail { kind, detail },
        });
        (status, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/chat", post(chat))
        .route("/api/history", get(history))
        .route("/api/reset", post(reset))
        .with_state(state)
}

pub async fn serve(session: ChatSession<HttpTransport>, cfg: &Config) -> Result<()> {
    let listener = TcpListener::bind(&cfg.web_bind_addr)
        .await
        .with_context(|| format!("Failed to bind web chat to '{}'", cfg.web_bind_addr))?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read bound web chat address")?;
    info!(addr = %local_addr, model = %cfg.generation.model, "serving web chat");
    if exposes_shared_session(&local_addr) {
        warn!(
            addr = %local_addr,
            "web chat is reachable beyond this host; every client shares one conversation"
        );
    }

    axum::serve(listener, router(AppState::new(session)))
        .await
        .context("Web chat server stopped unexpectedly")
}

fn exposes_shared_session(addr: &SocketAddr) -> bool {
    !addr.ip().is_loopback()
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(AppError::BadRequest("message must not be empty".to_string()));
    }

    let mut session = state.session.lock().await;
    match session.send(message).await {
        Ok(reply) => Ok(Json(ChatResponse { reply })),
        Err(err) => {
            warn!(kind = %err.kind(), "web chat request failed");
            Err(AppError::Upstream(err))
        }
    }
}

async fn history(State(state): State<AppState>) -> Json<HistoryResponse> {
    let session = state.session.lock().await;
    Json(HistoryResponse {
        messages: session.history().to_vec(),
    })
}

async fn reset(State(state): State<AppState>) -> Json<ResetResponse> {
    state.session.lock().await.reset();
    info!("web chat conversation reset");
    Json(ResetResponse { ok: true })
}
