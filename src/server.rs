//! HTTP surface.
//!
//! Routes:
//! - `GET /` health
//! - `POST /api/v1/chat/chat` handle one message
//! - `GET /api/v1/chat/chat/history/:session_id` session history

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::core::{Orchestrator, SessionError, Termination};
use crate::domain::Turn;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Turns returned with each reply
    pub response_limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub context: Option<BTreeMap<String, String>>,
}

impl ChatRequest {
    /// Request context with `repo_url` folded in
    fn context(&self) -> BTreeMap<String, String> {
        let mut context = self.context.clone().unwrap_or_default();
        if let Some(repo_url) = self.repo_url.as_ref().filter(|u| !u.trim().is_empty()) {
            context.insert("repo_url".to_string(), repo_url.clone());
        }
        context
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response_text: String,
    pub termination: Termination,
    pub history: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub history: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub response_text: String,
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, session_id: Option<&str>, response_text: String, error: String) -> Self {
        Self {
            status,
            body: ErrorBody {
                session_id: session_id.map(str::to_string),
                response_text,
                error,
            },
        }
    }

    fn from_session(session_id: &str, err: SessionError) -> Self {
        let status = match &err {
            SessionError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let response_text = err.response_text();
        Self::new(status, Some(session_id), response_text, format!("{:#}", anyhow::Error::new(err)))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/v1/chat/chat", post(chat))
        .route("/api/v1/chat/chat/history/:session_id", get(history))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(state: Arc<AppState>, address: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!(%address, "Listening");

    axum::serve(listener, router(state))
        .await
        .context("Server error")
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "foreman"}))
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let context = request.context();
    let reply = state
        .orchestrator
        .handle(&request.session_id, &request.message, &context)
        .await
        .map_err(|e| {
            error!(session_id = %request.session_id, error = %e, "Chat request failed");
            ApiError::from_session(&request.session_id, e)
        })?;

    let history = state
        .orchestrator
        .history(&reply.session_id, Some(state.response_limit))
        .await
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(&reply.session_id),
                reply.response_text.clone(),
                e.to_string(),
            )
        })?;

    Ok(Json(ChatResponse {
        session_id: reply.session_id,
        response_text: reply.response_text,
        termination: reply.termination,
        history,
    }))
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let turns = state
        .orchestrator
        .history(&session_id, None)
        .await
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(&session_id),
                "Failed to load history".to_string(),
                e.to_string(),
            )
        })?;

    if turns.is_empty() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            Some(&session_id),
            format!("No history found for session {}", session_id),
            "not found".to_string(),
        ));
    }

    Ok(Json(HistoryResponse {
        session_id,
        history: turns,
    }))
}
