pub mod handlers;
pub mod server;

use pkg_state::ResourceStore;

/// Shared application state injected into all Axum handlers. The API is a
/// thin mapping of REST verbs onto store operations; controllers observe
/// the writes and converge asynchronously.
#[derive(Clone)]
pub struct AppState {
    pub store: ResourceStore,
}
