use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use pkg_api::AppState;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::network::DEFAULT_API_PORT;
use pkg_container::{ContainerRuntime, FakeRuntime, PodmanRuntime};
use pkg_controllers::{Engine, PodLifecycleController, ReplicaSetController, ServiceController};
use pkg_state::ResourceStore;

#[derive(Parser, Debug)]
#[command(name = "podplane-server", about = "podplane single-host control plane")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_API_PORT)]
    port: u16,
}

/// Prefer Podman; fall back to the in-memory backend so the control plane
/// stays usable for development on hosts without a container engine.
fn detect_runtime() -> Arc<dyn ContainerRuntime> {
    match PodmanRuntime::detect() {
        Ok(podman) => Arc::new(podman),
        Err(e) => {
            warn!("Podman not available ({}), using in-memory runtime", e);
            Arc::new(FakeRuntime::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    info!("Starting podplane-server on port {}", cli.port);

    let runtime = detect_runtime();

    // State is in-memory only: discard whatever a previous run left in the
    // runtime rather than adopting it.
    match runtime.sweep_labeled().await {
        Ok(0) => {}
        Ok(n) => info!("Discarded {} leftover containers", n),
        Err(e) => warn!("Startup sweep failed: {}", e),
    }

    // Startup order: store → engine → API.
    let store = ResourceStore::new();
    let mut engine = Engine::new(store.clone());
    engine
        .register(Arc::new(PodLifecycleController::new(
            store.clone(),
            runtime.clone(),
        )))
        .await;
    engine
        .register(Arc::new(ReplicaSetController::new(store.clone())))
        .await;
    engine
        .register(Arc::new(ServiceController::new(store.clone(), runtime)))
        .await;

    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], cli.port)),
    };
    let state = AppState { store };

    tokio::select! {
        result = start_server(config, state) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
        }
    }

    // Teardown is the reverse of startup; in-flight runtime calls get the
    // engine's grace window.
    engine.shutdown().await;
    info!("podplane-server stopped");
    Ok(())
}
