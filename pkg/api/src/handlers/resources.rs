use axum::{
    Json,
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, warn};

use pkg_types::pod::Pod;
use pkg_types::replicaset::ReplicaSet;
use pkg_types::service::Service;
use pkg_types::{Error, Kind, Resource, ResourceKey};

use crate::AppState;

/// Map a control-plane error onto its HTTP status.
fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::AlreadyExists { .. } => StatusCode::CONFLICT,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!("internal error surfaced to client: {}", err);
    }
    (
        status,
        Json(json!({"status": "Failure", "message": err.to_string()})),
    )
        .into_response()
}

fn list_response(kind: Kind, items: Vec<Resource>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "apiVersion": kind.api_version(),
            "kind": format!("{}List", kind.as_str()),
            "items": items,
        })),
    )
        .into_response()
}

fn deleted_response(key: &ResourceKey) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "Success",
            "message": format!("{} {}/{} deleted", key.kind, key.namespace, key.name),
        })),
    )
        .into_response()
}

fn wrong_kind(expected: Kind, got: &str) -> Response {
    error_response(Error::Validation(format!(
        "expected kind {}, got '{}'",
        expected, got
    )))
}

// ============================================================
// Pods
// ============================================================

pub async fn create_pod(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
    Json(mut pod): Json<Pod>,
) -> Response {
    if pod.kind != Kind::Pod.as_str() {
        return wrong_kind(Kind::Pod, &pod.kind);
    }
    pod.metadata.namespace = ns.clone();
    match state.store.create(Resource::Pod(pod)).await {
        Ok(created) => {
            info!("Created pod {}/{}", ns, created.meta().name);
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn list_pods(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
) -> Response {
    list_response(Kind::Pod, state.store.list(Kind::Pod, &ns, None).await)
}

pub async fn get_pod(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    let key = ResourceKey::new(Kind::Pod, ns, name);
    match state.store.get(&key).await {
        Ok(pod) => (StatusCode::OK, Json(pod)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn update_pod(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
    Json(mut pod): Json<Pod>,
) -> Response {
    if pod.kind != Kind::Pod.as_str() {
        return wrong_kind(Kind::Pod, &pod.kind);
    }
    pod.metadata.namespace = ns;
    pod.metadata.name = name;
    match state.store.update(Resource::Pod(pod)).await {
        Ok(updated) => (StatusCode::OK, Json(updated)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete_pod(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    let key = ResourceKey::new(Kind::Pod, ns, name);
    match state.store.delete(&key).await {
        Ok(_) => {
            info!("Deleted pod {}/{}", key.namespace, key.name);
            deleted_response(&key)
        }
        Err(e) => error_response(e),
    }
}

// ============================================================
// Services
// ============================================================

pub async fn create_service(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
    Json(mut svc): Json<Service>,
) -> Response {
    if svc.kind != Kind::Service.as_str() {
        return wrong_kind(Kind::Service, &svc.kind);
    }
    svc.metadata.namespace = ns.clone();
    match state.store.create(Resource::Service(svc)).await {
        Ok(created) => {
            info!("Created service {}/{}", ns, created.meta().name);
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn list_services(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
) -> Response {
    list_response(Kind::Service, state.store.list(Kind::Service, &ns, None).await)
}

pub async fn get_service(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    let key = ResourceKey::new(Kind::Service, ns, name);
    match state.store.get(&key).await {
        Ok(svc) => (StatusCode::OK, Json(svc)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn update_service(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
    Json(mut svc): Json<Service>,
) -> Response {
    if svc.kind != Kind::Service.as_str() {
        return wrong_kind(Kind::Service, &svc.kind);
    }
    svc.metadata.namespace = ns;
    svc.metadata.name = name;
    match state.store.update(Resource::Service(svc)).await {
        Ok(updated) => (StatusCode::OK, Json(updated)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete_service(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    let key = ResourceKey::new(Kind::Service, ns, name);
    match state.store.delete(&key).await {
        Ok(_) => {
            info!("Deleted service {}/{}", key.namespace, key.name);
            deleted_response(&key)
        }
        Err(e) => error_response(e),
    }
}

// ============================================================
// ReplicaSets
// ============================================================

pub async fn create_replicaset(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
    Json(mut rs): Json<ReplicaSet>,
) -> Response {
    if rs.kind != Kind::ReplicaSet.as_str() {
        return wrong_kind(Kind::ReplicaSet, &rs.kind);
    }
    rs.metadata.namespace = ns.clone();
    match state.store.create(Resource::ReplicaSet(rs)).await {
        Ok(created) => {
            info!("Created replicaset {}/{}", ns, created.meta().name);
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Err(e) => error_response(e),
    }
}

pub async fn list_replicasets(
    State(state): State<AppState>,
    AxumPath(ns): AxumPath<String>,
) -> Response {
    list_response(
        Kind::ReplicaSet,
        state.store.list(Kind::ReplicaSet, &ns, None).await,
    )
}

pub async fn get_replicaset(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    let key = ResourceKey::new(Kind::ReplicaSet, ns, name);
    match state.store.get(&key).await {
        Ok(rs) => (StatusCode::OK, Json(rs)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn update_replicaset(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
    Json(mut rs): Json<ReplicaSet>,
) -> Response {
    if rs.kind != Kind::ReplicaSet.as_str() {
        return wrong_kind(Kind::ReplicaSet, &rs.kind);
    }
    rs.metadata.namespace = ns;
    rs.metadata.name = name;
    match state.store.update(Resource::ReplicaSet(rs)).await {
        Ok(updated) => (StatusCode::OK, Json(updated)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn delete_replicaset(
    State(state): State<AppState>,
    AxumPath((ns, name)): AxumPath<(String, String)>,
) -> Response {
    let key = ResourceKey::new(Kind::ReplicaSet, ns, name);
    match state.store.delete(&key).await {
        Ok(_) => {
            info!("Deleted replicaset {}/{} (cascade)", key.namespace, key.name);
            deleted_response(&key)
        }
        Err(e) => error_response(e),
    }
}

// ============================================================
// Namespaces
// ============================================================

/// Single-namespace-by-default layout: the list is static.
pub async fn list_namespaces() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "apiVersion": "v1",
            "kind": "NamespaceList",
            "items": [
                {"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "default"}}
            ],
        })),
    )
        .into_response()
}
