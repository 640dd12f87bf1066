use async_trait::async_trait;
use std::collections::HashMap;

/// Result type alias for runtime adapter operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Errors crossing the runtime boundary. Only `ImagePullFailed` is fatal
/// for the object that hit it; everything else is retried with backoff.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Image cannot be pulled; will not self-heal for this pod.
    #[error("failed to pull image '{image}': {detail}")]
    ImagePullFailed { image: String, detail: String },

    /// The requested container name is already taken in the runtime.
    #[error("container name '{0}' already in use")]
    NameConflict(String),

    /// The runtime call exceeded its deadline.
    #[error("runtime operation '{operation}' timed out")]
    Timeout { operation: String },

    /// Anything else the runtime reported.
    #[error("runtime error: {0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::ImagePullFailed { .. })
    }
}

/// What the runtime knows about a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited(i64),
    /// The runtime has no record of the container.
    Missing,
}

#[derive(Debug, Clone)]
pub struct RunContainerRequest {
    /// Runtime container name, `<namespace>-<podName>`.
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    /// Runtime labels: the pod's own labels plus the orchestrator tags.
    pub labels: HashMap<String, String>,
    /// DNS aliases on the shared network (the bare pod name).
    pub network_aliases: Vec<String>,
    pub network: String,
}

#[derive(Debug, Clone)]
pub struct RunningContainer {
    pub id: String,
    pub ip: String,
}

/// A backend address the load balancer forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbEndpoint {
    pub ip: String,
    pub port: u16,
}

impl std::fmt::Display for LbEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct StartLbRequest {
    pub namespace: String,
    pub service: String,
    /// Listener ports, each published on the host.
    pub ports: Vec<u16>,
    pub endpoints: Vec<LbEndpoint>,
    pub network: String,
}

/// The capability set the control plane needs from a container engine.
/// All calls may block on process spawns or network operations and are
/// never made under the store's write lock.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create the shared bridge network if absent. Idempotent; returns the
    /// network name.
    async fn ensure_network(&self) -> RuntimeResult<String>;

    /// Start a detached container on the shared network.
    async fn run_container(&self, req: RunContainerRequest) -> RuntimeResult<RunningContainer>;

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerState>;

    /// Best-effort stop and remove. Idempotent; never fails fatally.
    async fn stop_and_remove(&self, id: &str);

    /// Start (or reconfigure) the L4 proxy container for a service.
    /// Returns the load balancer's container id.
    async fn start_load_balancer(&self, req: StartLbRequest) -> RuntimeResult<String>;

    /// Push a new endpoint set. Backends that cannot reconfigure in place
    /// restart the balancer; the returned id is current either way.
    async fn update_load_balancer(
        &self,
        id: &str,
        endpoints: &[LbEndpoint],
    ) -> RuntimeResult<String>;

    /// Idempotent.
    async fn stop_load_balancer(&self, id: &str);

    /// Remove every container carrying the orchestrator namespace label.
    /// Called once at startup: state is not persisted, so leftovers from a
    /// previous run are discarded rather than adopted. Returns the count
    /// removed.
    async fn sweep_labeled(&self) -> RuntimeResult<usize>;
}

/// Runtime name of a pod container: `<namespace>-<podName>`.
pub fn pod_container_name(namespace: &str, pod: &str) -> String {
    format!("{}-{}", namespace, pod)
}

/// Runtime name of a service's LB container: `<namespace>-svc-<serviceName>`.
pub fn lb_container_name(namespace: &str, service: &str) -> String {
    format!("{}-svc-{}", namespace, service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_convention() {
        assert_eq!(pod_container_name("default", "web-abc12"), "default-web-abc12");
        assert_eq!(lb_container_name("default", "health"), "default-svc-health");
    }

    #[test]
    fn only_image_pull_is_fatal() {
        assert!(
            RuntimeError::ImagePullFailed {
                image: "x".to_string(),
                detail: "manifest unknown".to_string()
            }
            .is_fatal()
        );
        assert!(!RuntimeError::NameConflict("a".to_string()).is_fatal());
        assert!(
            !RuntimeError::Timeout {
                operation: "run".to_string()
            }
            .is_fatal()
        );
        assert!(!RuntimeError::Other("x".to_string()).is_fatal());
    }
}
