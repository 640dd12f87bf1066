use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::handlers::resources;

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
}

/// Assemble the route table. Separate from `start_server` so tests can
/// drive the router without binding a socket.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/namespaces", get(resources::list_namespaces))
        // core group: pods
        .route(
            "/api/v1/namespaces/{ns}/pods",
            post(resources::create_pod).get(resources::list_pods),
        )
        .route(
            "/api/v1/namespaces/{ns}/pods/{name}",
            get(resources::get_pod)
                .put(resources::update_pod)
                .delete(resources::delete_pod),
        )
        // core group: services
        .route(
            "/api/v1/namespaces/{ns}/services",
            post(resources::create_service).get(resources::list_services),
        )
        .route(
            "/api/v1/namespaces/{ns}/services/{name}",
            get(resources::get_service)
                .put(resources::update_service)
                .delete(resources::delete_service),
        )
        // apps group: replicasets
        .route(
            "/api/apps/v1/namespaces/{ns}/replicasets",
            post(resources::create_replicaset).get(resources::list_replicasets),
        )
        .route(
            "/api/apps/v1/namespaces/{ns}/replicasets/{name}",
            get(resources::get_replicaset)
                .put(resources::update_replicaset)
                .delete(resources::delete_replicaset),
        )
        .with_state(state)
}

/// The engine is already running by the time the listener binds, so a
/// reachable server implies a started engine.
async fn healthz() -> &'static str {
    "ok"
}

pub async fn start_server(config: ServerConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    info!("Starting API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
