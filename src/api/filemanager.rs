//! HTTP handlers for the File Manager Service (C8), mounted at
//! `/api/v1/servers/filemanager/{op}` (spec §4.8).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::error::{AgentError, AgentResult};
use crate::filemanager;
use crate::sandbox::instance::ServerInstance;
use crate::sandbox::path::PathResolver;

/// Common preconditions shared by every file manager operation: token,
/// permission, and a resolver rooted at the server's sandbox (spec §4.8's
/// "common preconditions" paragraph).
async fn resolver_for(state: &AppState, token: &str, server_id: &str, user_uuid: &str) -> AgentResult<PathResolver> {
    if token.is_empty() {
        return Err(AgentError::AuthMissing);
    }
    if token != state.config.token {
        return Err(AgentError::AuthRejected);
    }
    if server_id.is_empty() || user_uuid.is_empty() {
        return Err(AgentError::InputInvalid("serverId and userUuid are required".to_string()));
    }
    if !state.remote.has_permission(user_uuid, server_id).await {
        return Err(AgentError::AuthRejected);
    }

    let instance: Arc<ServerInstance> = state.registry.get(server_id).ok_or_else(|| AgentError::NotFound(server_id.to_string()))?;
    PathResolver::new(instance.sandbox_root())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathBody {
    pub token: String,
    pub server_id: String,
    pub user_uuid: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    status: &'static str,
    entries: Vec<filemanager::Entry>,
}

pub async fn list(State(state): State<Arc<AppState>>, Json(body): Json<PathBody>) -> AgentResult<Json<ListResponse>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    let entries = filemanager::list(&resolver, &body.path)?;
    Ok(Json(ListResponse { status: "success", entries }))
}

#[derive(Debug, Serialize)]
struct ReadResponse {
    status: &'static str,
    #[serde(flatten)]
    result: filemanager::ReadResult,
}

pub async fn read(State(state): State<Arc<AppState>>, Json(body): Json<PathBody>) -> AgentResult<Json<ReadResponse>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    let result = filemanager::read(&resolver, &body.path)?;
    Ok(Json(ReadResponse { status: "success", result }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteBody {
    pub token: String,
    pub server_id: String,
    pub user_uuid: String,
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct StatusOnly {
    status: &'static str,
}

pub async fn write(State(state): State<Arc<AppState>>, Json(body): Json<WriteBody>) -> AgentResult<Json<StatusOnly>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    filemanager::write(&resolver, &body.path, &body.content)?;
    Ok(Json(StatusOnly { status: "success" }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    pub token: String,
    pub server_id: String,
    pub user_uuid: String,
    pub path: String,
    pub new_name: String,
}

#[derive(Debug, Serialize)]
struct RenameResponse {
    status: &'static str,
    #[serde(flatten)]
    result: filemanager::RenameResult,
}

pub async fn rename(State(state): State<Arc<AppState>>, Json(body): Json<RenameBody>) -> AgentResult<Json<RenameResponse>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    let result = filemanager::rename(&resolver, &body.path, &body.new_name)?;
    Ok(Json(RenameResponse { status: "success", result }))
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    status: &'static str,
    #[serde(flatten)]
    result: filemanager::DownloadResult,
}

pub async fn download(State(state): State<Arc<AppState>>, Json(body): Json<PathBody>) -> AgentResult<Json<DownloadResponse>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    let result = filemanager::download(&resolver, &body.path)?;
    Ok(Json(DownloadResponse { status: "success", result }))
}

#[derive(Debug, Serialize)]
struct MkdirResponse {
    status: &'static str,
    path: String,
}

pub async fn mkdir(State(state): State<Arc<AppState>>, Json(body): Json<PathBody>) -> AgentResult<Json<MkdirResponse>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    let path = filemanager::mkdir(&resolver, &body.path)?;
    Ok(Json(MkdirResponse { status: "success", path }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveBody {
    pub token: String,
    pub server_id: String,
    pub user_uuid: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Serialize)]
struct MoveResponse {
    status: &'static str,
    #[serde(flatten)]
    result: filemanager::MoveResult,
}

pub async fn mv(State(state): State<Arc<AppState>>, Json(body): Json<MoveBody>) -> AgentResult<Json<MoveResponse>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    let result = filemanager::mv(&resolver, &body.from, &body.to)?;
    Ok(Json(MoveResponse { status: "success", result }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBody {
    pub token: String,
    pub server_id: String,
    pub user_uuid: String,
    pub path: String,
    #[serde(default)]
    pub content_base64: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    status: &'static str,
    #[serde(flatten)]
    result: filemanager::UploadResult,
}

pub async fn upload(State(state): State<Arc<AppState>>, Json(body): Json<UploadBody>) -> AgentResult<Json<UploadResponse>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    let bytes = match (body.content_base64, body.content) {
        (Some(b64), _) => filemanager::base64_decode(&b64)?,
        (None, Some(content)) => content.into_bytes(),
        (None, None) => return Err(AgentError::InputInvalid("upload requires content or contentBase64".to_string())),
    };
    let result = filemanager::upload(&resolver, &body.path, &bytes)?;
    Ok(Json(UploadResponse { status: "success", result }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MassBody {
    pub token: String,
    pub server_id: String,
    pub user_uuid: String,
    pub paths: Vec<String>,
    pub action: String,
    #[serde(default)]
    pub archive_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct MassResponse {
    status: &'static str,
    #[serde(flatten)]
    result: filemanager::MassResult,
}

pub async fn mass(State(state): State<Arc<AppState>>, Json(body): Json<MassBody>) -> AgentResult<Json<MassResponse>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    let result = match body.action.as_str() {
        "delete" => filemanager::mass_delete(&resolver, &body.paths),
        "archive" => filemanager::mass_archive(&resolver, &body.paths, body.archive_name.as_deref())?,
        other => return Err(AgentError::InputInvalid(format!("unknown mass action: {other}"))),
    };
    Ok(Json(MassResponse { status: "success", result }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnarchiveBody {
    pub token: String,
    pub server_id: String,
    pub user_uuid: String,
    pub path: String,
    #[serde(default)]
    pub destination: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnarchiveResponse {
    status: &'static str,
    #[serde(flatten)]
    result: filemanager::UnarchiveResult,
}

pub async fn unarchive(State(state): State<Arc<AppState>>, Json(body): Json<UnarchiveBody>) -> AgentResult<Json<UnarchiveResponse>> {
    let resolver = resolver_for(&state, &body.token, &body.server_id, &body.user_uuid).await?;
    let result = filemanager::unarchive(&resolver, &body.path, body.destination.as_deref())?;
    Ok(Json(UnarchiveResponse { status: "success", result }))
}
