use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use pkg_container::{ContainerRuntime, LbEndpoint, StartLbRequest};
use pkg_state::{Event, ResourceStore};
use pkg_types::pod::PodPhase;
use pkg_types::service::{Endpoint, Service};
use pkg_types::{Error, Kind, Resource, ResourceKey, Result, selector};

use crate::engine::Reconciler;

/// Maintains each Service's endpoint list from the live pod set and keeps
/// the L4 load balancer programmed to match. Endpoint-only changes are
/// pushed in place; a changed port set restarts the balancer, since host
/// bindings cannot be altered on a running container.
pub struct ServiceController {
    store: ResourceStore,
    runtime: Arc<dyn ContainerRuntime>,
}

impl ServiceController {
    pub fn new(store: ResourceStore, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { store, runtime }
    }

    /// Endpoints of a service: Running pods in its namespace with a
    /// non-empty podIP whose labels match the selector, crossed with the
    /// service's target ports. Sorted so comparisons are deterministic.
    async fn compute_endpoints(&self, svc: &Service) -> Vec<Endpoint> {
        let pods = self
            .store
            .list(Kind::Pod, &svc.metadata.namespace, Some(&svc.spec.selector))
            .await;
        let mut endpoints = Vec::new();
        for resource in pods {
            let Resource::Pod(pod) = resource else { continue };
            if pod.status.phase != PodPhase::Running || pod.status.pod_ip.is_empty() {
                continue;
            }
            for port in &svc.spec.ports {
                endpoints.push(Endpoint {
                    pod_ip: pod.status.pod_ip.clone(),
                    port: port.target(),
                });
            }
        }
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }

    async fn start_lb(
        &self,
        svc: &Service,
        ports: &[u16],
        endpoints: &[Endpoint],
    ) -> Result<String> {
        let network = self
            .runtime
            .ensure_network()
            .await
            .map_err(|e| Error::RuntimeTransient(e.to_string()))?;
        let request = StartLbRequest {
            namespace: svc.metadata.namespace.clone(),
            service: svc.metadata.name.clone(),
            ports: ports.to_vec(),
            endpoints: to_lb_endpoints(endpoints),
            network,
        };
        self.runtime
            .start_load_balancer(request)
            .await
            .map_err(map_runtime_error)
    }
}

fn to_lb_endpoints(endpoints: &[Endpoint]) -> Vec<LbEndpoint> {
    endpoints
        .iter()
        .map(|e| LbEndpoint {
            ip: e.pod_ip.clone(),
            port: e.port,
        })
        .collect()
}

fn map_runtime_error(e: pkg_container::RuntimeError) -> Error {
    if e.is_fatal() {
        Error::RuntimeFatal {
            reason: "ImagePullFailed".to_string(),
            message: e.to_string(),
        }
    } else {
        Error::RuntimeTransient(e.to_string())
    }
}

#[async_trait]
impl Reconciler for ServiceController {
    fn name(&self) -> &'static str {
        "service"
    }

    fn kind(&self) -> Kind {
        Kind::Service
    }

    fn watches(&self) -> Vec<Kind> {
        vec![Kind::Service, Kind::Pod]
    }

    async fn triggers(&self, event: &Event) -> Vec<ResourceKey> {
        match event.resource() {
            Resource::Service(_) => vec![event.key()],
            Resource::Pod(pod) => {
                // Wake every service whose selector matches the pod on
                // either side of the transition.
                let mut label_sets = vec![&pod.metadata.labels];
                if let Event::Updated { old: Resource::Pod(old), .. } = event {
                    label_sets.push(&old.metadata.labels);
                }
                self.store
                    .list(Kind::Service, &pod.metadata.namespace, None)
                    .await
                    .into_iter()
                    .filter(|svc| {
                        let sel = match svc {
                            Resource::Service(s) => &s.spec.selector,
                            _ => return false,
                        };
                        label_sets.iter().any(|labels| selector::matches(sel, labels))
                    })
                    .map(|svc| svc.key())
                    .collect()
            }
            _ => vec![],
        }
    }

    async fn reconcile(&self, key: &ResourceKey) -> Result<()> {
        let Some(resource) = self.store.get_any(key).await else {
            return Ok(());
        };
        let Resource::Service(svc) = resource else {
            return Err(Error::Internal(format!("{} is not a service", key)));
        };

        if svc.metadata.is_terminating() {
            if !svc.status.load_balancer_id.is_empty() {
                self.runtime
                    .stop_load_balancer(&svc.status.load_balancer_id)
                    .await;
            }
            self.store.finalize(key).await;
            info!(
                "Service {}/{} removed",
                svc.metadata.namespace, svc.metadata.name
            );
            return Ok(());
        }

        let endpoints = self.compute_endpoints(&svc).await;
        let mut ports: Vec<u16> = svc.spec.ports.iter().map(|p| p.port).collect();
        ports.sort_unstable();
        ports.dedup();

        let mut status = svc.status.clone();
        if status.load_balancer_id.is_empty() {
            let id = self.start_lb(&svc, &ports, &endpoints).await?;
            info!(
                "Service {}/{}: load balancer started on ports {:?}",
                svc.metadata.namespace, svc.metadata.name, ports
            );
            status.load_balancer_id = id;
            status.forwarded_ports = ports;
            status.endpoints = endpoints;
        } else if status.forwarded_ports != ports {
            // Host bindings change with the port set; replace the balancer.
            self.runtime
                .stop_load_balancer(&status.load_balancer_id)
                .await;
            let id = self.start_lb(&svc, &ports, &endpoints).await?;
            info!(
                "Service {}/{}: load balancer restarted for new ports {:?}",
                svc.metadata.namespace, svc.metadata.name, ports
            );
            status.load_balancer_id = id;
            status.forwarded_ports = ports;
            status.endpoints = endpoints;
        } else if status.endpoints != endpoints {
            let pushed = self
                .runtime
                .update_load_balancer(&status.load_balancer_id, &to_lb_endpoints(&endpoints))
                .await;
            match pushed {
                Ok(id) => {
                    status.load_balancer_id = id;
                    status.endpoints = endpoints;
                }
                Err(e) => {
                    // The balancer may be gone; reprogram from scratch.
                    warn!(
                        "Service {}/{}: endpoint push failed ({}), restarting balancer",
                        svc.metadata.namespace, svc.metadata.name, e
                    );
                    let id = self.start_lb(&svc, &ports, &endpoints).await?;
                    status.load_balancer_id = id;
                    status.endpoints = endpoints;
                }
            }
            info!(
                "Service {}/{}: {} endpoint(s)",
                svc.metadata.namespace,
                svc.metadata.name,
                status.endpoints.len()
            );
        }

        if status != svc.status {
            let mut updated = svc.clone();
            updated.status = status;
            self.store.update_status(Resource::Service(updated)).await?;
        }
        Ok(())
    }
}
