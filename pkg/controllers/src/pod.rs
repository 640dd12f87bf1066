use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use pkg_constants::runtime::{LABEL_NAMESPACE, LABEL_POD};
use pkg_container::{ContainerRuntime, ContainerState, RunContainerRequest, pod_container_name};
use pkg_state::{Event, ResourceStore};
use pkg_types::pod::{Pod, PodPhase};
use pkg_types::{Condition, Error, Kind, Resource, ResourceKey, Result};

use crate::engine::Reconciler;

/// Drives each Pod through its phase machine: Pending pods get a
/// container, Running pods are re-inspected every tick, terminal pods are
/// left alone, and tombstones are torn down and finalized.
pub struct PodLifecycleController {
    store: ResourceStore,
    runtime: Arc<dyn ContainerRuntime>,
}

impl PodLifecycleController {
    pub fn new(store: ResourceStore, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { store, runtime }
    }

    /// Pending pod without a container: create one. ImagePullFailed is
    /// terminal for this pod; a controller may replace it with a new one.
    async fn start_container(&self, pod: &Pod) -> Result<()> {
        let network = self
            .runtime
            .ensure_network()
            .await
            .map_err(|e| Error::RuntimeTransient(e.to_string()))?;

        let container = pod.container();
        let mut labels: HashMap<String, String> = pod.metadata.labels.clone();
        labels.insert(LABEL_POD.to_string(), pod.metadata.name.clone());
        labels.insert(LABEL_NAMESPACE.to_string(), pod.metadata.namespace.clone());

        let name = pod_container_name(&pod.metadata.namespace, &pod.metadata.name);
        let request = RunContainerRequest {
            name: name.clone(),
            image: container.image.clone(),
            env: container.env.clone(),
            labels,
            network_aliases: vec![pod.metadata.name.clone()],
            network,
        };

        match self.runtime.run_container(request).await {
            Ok(running) => {
                let mut updated = pod.clone();
                updated.status.phase = PodPhase::Running;
                updated.status.container_id = running.id;
                updated.status.pod_ip = running.ip;
                info!(
                    "Pod {}/{} → Running ({})",
                    pod.metadata.namespace, pod.metadata.name, updated.status.pod_ip
                );
                self.store.update_status(Resource::Pod(updated)).await?;
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                warn!(
                    "Pod {}/{} failed to start: {}",
                    pod.metadata.namespace, pod.metadata.name, e
                );
                self.mark_failed(pod, "ImagePullFailed", &e.to_string()).await
            }
            Err(pkg_container::RuntimeError::NameConflict(_)) => {
                // A stale container holds our name, likely from an earlier
                // attempt that lost its status write. Clear it and retry.
                self.runtime.stop_and_remove(&name).await;
                Err(Error::RuntimeTransient(format!(
                    "container name {} was stale",
                    name
                )))
            }
            Err(e) => Err(Error::RuntimeTransient(e.to_string())),
        }
    }

    /// Re-inspect a pod that should have a running container and map the
    /// observed container state back onto the phase machine.
    async fn check_container(&self, pod: &Pod) -> Result<()> {
        let state = self
            .runtime
            .inspect(&pod.status.container_id)
            .await
            .map_err(|e| Error::RuntimeTransient(e.to_string()))?;

        match state {
            ContainerState::Running => {
                if pod.status.phase != PodPhase::Running {
                    let mut updated = pod.clone();
                    updated.status.phase = PodPhase::Running;
                    self.store.update_status(Resource::Pod(updated)).await?;
                }
                Ok(())
            }
            ContainerState::Exited(0) => {
                info!(
                    "Pod {}/{} → Succeeded",
                    pod.metadata.namespace, pod.metadata.name
                );
                let mut updated = pod.clone();
                updated.status.phase = PodPhase::Succeeded;
                self.store.update_status(Resource::Pod(updated)).await?;
                Ok(())
            }
            ContainerState::Exited(code) => {
                warn!(
                    "Pod {}/{} container exited with code {}",
                    pod.metadata.namespace, pod.metadata.name, code
                );
                self.mark_failed(pod, "ContainerFailed", &format!("container exited with code {}", code))
                    .await
            }
            ContainerState::Missing => {
                warn!(
                    "Pod {}/{} container disappeared from the runtime",
                    pod.metadata.namespace, pod.metadata.name
                );
                self.mark_failed(
                    pod,
                    "ContainerDisappeared",
                    "runtime has no record of the pod's container",
                )
                .await
            }
        }
    }

    async fn mark_failed(&self, pod: &Pod, reason: &str, message: &str) -> Result<()> {
        let mut updated = pod.clone();
        updated.status.phase = PodPhase::Failed;
        let mut resource = Resource::Pod(updated);
        resource.set_condition(Condition::new("Failed", reason, message));
        self.store.update_status(resource).await?;
        Ok(())
    }

    /// Deletion: remove the container, then confirm removal of the entry.
    /// Idempotent against concurrent cascade sweeps — a second pass finds
    /// nothing left to do.
    async fn tear_down(&self, pod: &Pod, key: &ResourceKey) -> Result<()> {
        if !pod.status.container_id.is_empty() {
            self.runtime.stop_and_remove(&pod.status.container_id).await;
        }
        self.store.finalize(key).await;
        info!("Pod {}/{} removed", pod.metadata.namespace, pod.metadata.name);
        Ok(())
    }
}

#[async_trait]
impl Reconciler for PodLifecycleController {
    fn name(&self) -> &'static str {
        "pod-lifecycle"
    }

    fn kind(&self) -> Kind {
        Kind::Pod
    }

    async fn triggers(&self, event: &Event) -> Vec<ResourceKey> {
        vec![event.key()]
    }

    async fn reconcile(&self, key: &ResourceKey) -> Result<()> {
        let Some(resource) = self.store.get_any(key).await else {
            return Ok(());
        };
        let Resource::Pod(pod) = resource else {
            return Err(Error::Internal(format!("{} is not a pod", key)));
        };

        if pod.metadata.is_terminating() {
            return self.tear_down(&pod, key).await;
        }

        match pod.status.phase {
            PodPhase::Pending if pod.status.container_id.is_empty() => {
                self.start_container(&pod).await
            }
            PodPhase::Pending | PodPhase::Running => self.check_container(&pod).await,
            _ => Ok(()),
        }
    }
}
