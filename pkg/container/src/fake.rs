use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::info;

use pkg_constants::network::NETWORK_NAME;

use crate::adapter::{
    ContainerRuntime, ContainerState, LbEndpoint, RunContainerRequest, RunningContainer,
    RuntimeError, RuntimeResult, StartLbRequest,
};

/// In-memory runtime backend. Serves two purposes: the substrate for
/// controller tests (scriptable failures, out-of-band kills, LB config
/// recording) and the dev fallback when podman is not on PATH.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub ip: String,
    pub state: ContainerState,
}

#[derive(Debug, Clone)]
pub struct FakeLb {
    pub id: String,
    pub namespace: String,
    pub service: String,
    pub ports: Vec<u16>,
    pub endpoints: Vec<LbEndpoint>,
    /// Bumped on every start or update; tests use it to tell an in-place
    /// update from a restart.
    pub generation: u32,
}

#[derive(Default)]
struct FakeState {
    network_created: bool,
    containers: HashMap<String, FakeContainer>,
    lbs: HashMap<String, FakeLb>,
    next_id: u64,
    next_ip: u8,
    failing_images: HashSet<String>,
    transient_run_failures: u32,
    mutations: u64,
}

impl FakeState {
    fn next_container_id(&mut self) -> String {
        self.next_id += 1;
        format!("c-{:08x}", self.next_id)
    }

    fn next_lb_id(&mut self) -> String {
        self.next_id += 1;
        format!("lb-{:08x}", self.next_id)
    }

    fn next_ip(&mut self) -> String {
        self.next_ip += 1;
        format!("10.89.0.{}", self.next_ip.wrapping_add(1))
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    // --- test scripting ---

    /// Every `run_container` for this image fails with ImagePullFailed.
    pub fn fail_pulls(&self, image: &str) {
        self.state.lock().unwrap().failing_images.insert(image.to_string());
    }

    /// The next `n` `run_container` calls fail with a transient error.
    pub fn fail_next_runs(&self, n: u32) {
        self.state.lock().unwrap().transient_run_failures = n;
    }

    /// Simulate an out-of-band `rm -f`: the runtime loses all record of
    /// the container and inspect reports Missing.
    pub fn kill_container(&self, id: &str) {
        self.state.lock().unwrap().containers.remove(id);
    }

    /// Simulate the container process exiting with `code`.
    pub fn exit_container(&self, id: &str, code: i64) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(id) {
            c.state = ContainerState::Exited(code);
        }
    }

    // --- test observation ---

    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .filter(|c| c.state == ContainerState::Running)
            .count()
    }

    pub fn containers(&self) -> Vec<FakeContainer> {
        self.state.lock().unwrap().containers.values().cloned().collect()
    }

    pub fn container_named(&self, name: &str) -> Option<FakeContainer> {
        self.state
            .lock()
            .unwrap()
            .containers
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn lbs(&self) -> Vec<FakeLb> {
        self.state.lock().unwrap().lbs.values().cloned().collect()
    }

    pub fn lb_for_service(&self, namespace: &str, service: &str) -> Option<FakeLb> {
        self.state
            .lock()
            .unwrap()
            .lbs
            .values()
            .find(|lb| lb.namespace == namespace && lb.service == service)
            .cloned()
    }

    /// Count of state-changing runtime calls (runs, removals, LB changes).
    /// Inspections are reads and not counted: a quiescent control plane
    /// inspects every tick but mutates nothing.
    pub fn mutation_count(&self) -> u64 {
        self.state.lock().unwrap().mutations
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_network(&self) -> RuntimeResult<String> {
        let mut state = self.state.lock().unwrap();
        if !state.network_created {
            state.network_created = true;
            info!("[fake] created network {}", NETWORK_NAME);
        }
        Ok(NETWORK_NAME.to_string())
    }

    async fn run_container(&self, req: RunContainerRequest) -> RuntimeResult<RunningContainer> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        if state.transient_run_failures > 0 {
            state.transient_run_failures -= 1;
            return Err(RuntimeError::Other("scripted transient failure".to_string()));
        }
        if state.failing_images.contains(&req.image) {
            return Err(RuntimeError::ImagePullFailed {
                image: req.image,
                detail: "manifest unknown".to_string(),
            });
        }
        if state.containers.values().any(|c| c.name == req.name) {
            return Err(RuntimeError::NameConflict(req.name));
        }
        let id = state.next_container_id();
        let ip = state.next_ip();
        state.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: req.name,
                image: req.image,
                env: req.env,
                labels: req.labels,
                ip: ip.clone(),
                state: ContainerState::Running,
            },
        );
        Ok(RunningContainer { id, ip })
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerState> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.state)
            .unwrap_or(ContainerState::Missing))
    }

    async fn stop_and_remove(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        // podman accepts either the id or the name
        let by_name: Option<String> = state
            .containers
            .values()
            .find(|c| c.name == id)
            .map(|c| c.id.clone());
        state.containers.remove(id);
        if let Some(resolved) = by_name {
            state.containers.remove(&resolved);
        }
    }

    async fn start_load_balancer(&self, req: StartLbRequest) -> RuntimeResult<String> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        let previous_generation = state
            .lbs
            .values()
            .find(|lb| lb.namespace == req.namespace && lb.service == req.service)
            .map(|lb| lb.generation)
            .unwrap_or(0);
        state
            .lbs
            .retain(|_, lb| !(lb.namespace == req.namespace && lb.service == req.service));
        let id = state.next_lb_id();
        state.lbs.insert(
            id.clone(),
            FakeLb {
                id: id.clone(),
                namespace: req.namespace,
                service: req.service,
                ports: req.ports,
                endpoints: req.endpoints,
                generation: previous_generation + 1,
            },
        );
        Ok(id)
    }

    async fn update_load_balancer(
        &self,
        id: &str,
        endpoints: &[LbEndpoint],
    ) -> RuntimeResult<String> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        match state.lbs.get_mut(id) {
            Some(lb) => {
                lb.endpoints = endpoints.to_vec();
                lb.generation += 1;
                Ok(id.to_string())
            }
            None => Err(RuntimeError::Other(format!("unknown load balancer id {}", id))),
        }
    }

    async fn stop_load_balancer(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        state.lbs.remove(id);
    }

    async fn sweep_labeled(&self) -> RuntimeResult<usize> {
        let mut state = self.state.lock().unwrap();
        let count = state.containers.len() + state.lbs.len();
        state.containers.clear();
        state.lbs.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_request(name: &str, image: &str) -> RunContainerRequest {
        RunContainerRequest {
            name: name.to_string(),
            image: image.to_string(),
            env: HashMap::new(),
            labels: HashMap::new(),
            network_aliases: vec![],
            network: NETWORK_NAME.to_string(),
        }
    }

    #[tokio::test]
    async fn container_lifecycle() {
        let runtime = FakeRuntime::new();
        let running = runtime
            .run_container(run_request("default-web", "nginx"))
            .await
            .unwrap();
        assert!(!running.ip.is_empty());
        assert_eq!(
            runtime.inspect(&running.id).await.unwrap(),
            ContainerState::Running
        );

        runtime.exit_container(&running.id, 0);
        assert_eq!(
            runtime.inspect(&running.id).await.unwrap(),
            ContainerState::Exited(0)
        );

        runtime.stop_and_remove(&running.id).await;
        assert_eq!(
            runtime.inspect(&running.id).await.unwrap(),
            ContainerState::Missing
        );
    }

    #[tokio::test]
    async fn scripted_failures() {
        let runtime = FakeRuntime::new();
        runtime.fail_pulls("ghost:latest");
        let err = runtime
            .run_container(run_request("a", "ghost:latest"))
            .await
            .unwrap_err();
        assert!(err.is_fatal());

        runtime.fail_next_runs(1);
        assert!(runtime.run_container(run_request("b", "nginx")).await.is_err());
        assert!(runtime.run_container(run_request("b", "nginx")).await.is_ok());
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let runtime = FakeRuntime::new();
        runtime.run_container(run_request("a", "nginx")).await.unwrap();
        let err = runtime.run_container(run_request("a", "nginx")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NameConflict(_)));
    }

    #[tokio::test]
    async fn lb_update_is_in_place() {
        let runtime = FakeRuntime::new();
        let id = runtime
            .start_load_balancer(StartLbRequest {
                namespace: "default".to_string(),
                service: "health".to_string(),
                ports: vec![2000],
                endpoints: vec![],
                network: NETWORK_NAME.to_string(),
            })
            .await
            .unwrap();

        let new_id = runtime
            .update_load_balancer(
                &id,
                &[LbEndpoint {
                    ip: "10.89.0.2".to_string(),
                    port: 5000,
                }],
            )
            .await
            .unwrap();
        assert_eq!(id, new_id);
        let lb = runtime.lb_for_service("default", "health").unwrap();
        assert_eq!(lb.endpoints.len(), 1);
        assert_eq!(lb.generation, 2);
    }

    #[tokio::test]
    async fn sweep_clears_everything() {
        let runtime = FakeRuntime::new();
        runtime.run_container(run_request("a", "nginx")).await.unwrap();
        runtime.run_container(run_request("b", "nginx")).await.unwrap();
        assert_eq!(runtime.sweep_labeled().await.unwrap(), 2);
        assert_eq!(runtime.running_count(), 0);
    }
}
