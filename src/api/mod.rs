pub mod console;
pub mod filemanager;
pub mod middleware;
pub mod routes;
pub mod servers;
pub mod status;

use std::sync::Arc;

use axum::Router;

use crate::config::Config;
use crate::remote::RemoteClient;
use crate::sandbox::registry::ServerRegistry;

/// Shared state handed to every HTTP handler: the loaded config (for the
/// shared token), the Server Registry, and the remote helper client.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ServerRegistry>,
    pub remote: Arc<RemoteClient>,
}

pub fn create_app(state: Arc<AppState>) -> Router {
    routes::build_router(state)
}
