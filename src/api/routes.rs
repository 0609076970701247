use std::sync::Arc;

use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use hyper::header;
use hyper::StatusCode;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use super::{console, filemanager, servers, status, AppState};

pub fn build_router(state: Arc<AppState>) -> Router {
    let health_routes = Router::new().route(
        "/",
        get(|| async {
            Json(json!({
                "status": "ok",
            }))
        }),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_router())
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
}

fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", post(status::status))
        .route("/servers/create", post(servers::create))
        .route("/servers/delete", post(servers::delete))
        .route("/servers/status", post(servers::status))
        .route("/servers/usage", post(servers::usage))
        .route("/servers/action", post(servers::action))
        .route("/servers/console", get(console::console_upgrade))
        .route("/servers/filemanager/list", post(filemanager::list))
        .route("/servers/filemanager/read", post(filemanager::read))
        .route("/servers/filemanager/write", post(filemanager::write))
        .route("/servers/filemanager/rename", post(filemanager::rename))
        .route("/servers/filemanager/download", post(filemanager::download))
        .route("/servers/filemanager/mkdir", post(filemanager::mkdir))
        .route("/servers/filemanager/move", post(filemanager::mv))
        .route("/servers/filemanager/upload", post(filemanager::upload))
        .route("/servers/filemanager/mass", post(filemanager::mass))
        .route("/servers/filemanager/unarchive", post(filemanager::unarchive))
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}
