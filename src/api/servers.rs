use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::middleware::{authenticate, TokenBody};
use crate::api::AppState;
use crate::error::{AgentError, AgentResult};
use crate::sandbox::types::StartData;

#[derive(Debug, Deserialize)]
pub struct ServerIdRequest {
    pub token: String,
    pub server_id: String,
    pub user_uuid: String,
}

impl TokenBody for ServerIdRequest {
    fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Debug, Serialize)]
pub struct SimpleStatus {
    pub status: &'static str,
}

/// `/api/v1/servers/create` — admin only.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ServerIdRequest>,
) -> AgentResult<Json<SimpleStatus>> {
    authenticate(&body, &state.config.token)?;
    if !state.remote.admin_permission(&body.user_uuid).await {
        return Err(AgentError::AuthRejected);
    }

    state.registry.create(body.server_id.clone())?;
    Ok(Json(SimpleStatus { status: "success" }))
}

/// `/api/v1/servers/delete` — admin only.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ServerIdRequest>,
) -> AgentResult<Json<SimpleStatus>> {
    authenticate(&body, &state.config.token)?;
    if !state.remote.admin_permission(&body.user_uuid).await {
        return Err(AgentError::AuthRejected);
    }

    let instance = state
        .registry
        .get(&body.server_id)
        .ok_or_else(|| AgentError::NotFound(body.server_id.clone()))?;
    instance.delete().await?;
    state.registry.remove(&body.server_id)?;
    Ok(Json(SimpleStatus { status: "success" }))
}

#[derive(Debug, Serialize)]
pub struct ServerStatusResponse {
    pub status: &'static str,
    pub server_status: &'static str,
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ServerIdRequest>,
) -> AgentResult<Json<ServerStatusResponse>> {
    authenticate(&body, &state.config.token)?;
    if !state.remote.has_permission(&body.user_uuid, &body.server_id).await {
        return Err(AgentError::AuthRejected);
    }

    let instance = state
        .registry
        .get(&body.server_id)
        .ok_or_else(|| AgentError::NotFound(body.server_id.clone()))?;
    let running = instance.get_status().await;

    Ok(Json(ServerStatusResponse {
        status: "success",
        server_status: if running { "running" } else { "stopped" },
    }))
}

#[derive(Debug, Serialize)]
pub struct UsageBody {
    pub cpu: f64,
    pub memory: u64,
    pub memory_limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<i64>,
    pub state: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub status: &'static str,
    pub usage: UsageBody,
}

pub async fn usage(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ServerIdRequest>,
) -> AgentResult<Json<UsageResponse>> {
    authenticate(&body, &state.config.token)?;
    if !state.remote.has_permission(&body.user_uuid, &body.server_id).await {
        return Err(AgentError::AuthRejected);
    }

    let instance = state
        .registry
        .get(&body.server_id)
        .ok_or_else(|| AgentError::NotFound(body.server_id.clone()))?;
    let running = instance.get_status().await;
    let usage = instance.get_usages().await?;
    let started_at = instance.started_at();

    let memory_percent = if usage.memory_limit_bytes > 0 {
        Some((usage.memory_bytes as f64 / usage.memory_limit_bytes as f64 * 100.0 * 100.0).round() / 100.0)
    } else {
        None
    };
    let uptime_ms = started_at.map(|s| (Utc::now() - s).num_milliseconds());

    Ok(Json(UsageResponse {
        status: "success",
        usage: UsageBody {
            cpu: usage.cpu_percent,
            memory: usage.memory_bytes,
            memory_limit: usage.memory_limit_bytes,
            memory_percent,
            started_at,
            uptime_ms,
            state: if running { "running" } else { "stopped" },
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub token: String,
    pub server_id: String,
    pub user_uuid: String,
    pub action: String,
    #[serde(flatten)]
    pub extra: Value,
}

impl TokenBody for ActionRequest {
    fn token(&self) -> &str {
        &self.token
    }
}

pub async fn action(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ActionRequest>,
) -> AgentResult<Json<SimpleStatus>> {
    authenticate(&body, &state.config.token)?;
    if !state.remote.has_permission(&body.user_uuid, &body.server_id).await {
        return Err(AgentError::AuthRejected);
    }

    let instance = state
        .registry
        .get(&body.server_id)
        .ok_or_else(|| AgentError::NotFound(body.server_id.clone()))?;

    match body.action.as_str() {
        "start" => {
            let start_data: StartData = serde_json::from_value(body.extra)
                .map_err(|e| AgentError::InputInvalid(format!("invalid start payload: {e}")))?;
            instance.start(start_data).await?;
        }
        "restart" => {
            let start_data: StartData = serde_json::from_value(body.extra)
                .map_err(|e| AgentError::InputInvalid(format!("invalid start payload: {e}")))?;
            instance.restart(start_data).await?;
        }
        "stop" => {
            let command = body
                .extra
                .get("command")
                .and_then(Value::as_str)
                .ok_or_else(|| AgentError::InputInvalid("stop requires command".to_string()))?;
            instance.stop(Some(command)).await;
        }
        "kill" => instance.kill().await,
        "command" => {
            let command = body
                .extra
                .get("command")
                .and_then(Value::as_str)
                .ok_or_else(|| AgentError::InputInvalid("command requires command".to_string()))?;
            instance.send_command(command).await?;
        }
        other => return Err(AgentError::InputInvalid(format!("unknown action: {other}"))),
    }

    Ok(Json(SimpleStatus { status: "success" }))
}
