use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::middleware::{authenticate, TokenBody, TokenOnly};
use crate::api::AppState;
use crate::error::AgentResult;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TokenOnly>,
) -> AgentResult<Json<StatusResponse>> {
    authenticate(&body, &state.config.token)?;
    Ok(Json(StatusResponse { status: "success" }))
}
