use async_trait::async_trait;
use rand::Rng;
use std::cmp::Reverse;
use tracing::{info, warn};

use pkg_state::{Event, ResourceStore};
use pkg_types::pod::{Pod, PodPhase};
use pkg_types::replicaset::ReplicaSet;
use pkg_types::{
    Error, Kind, ObjectMeta, OwnerReference, Resource, ResourceKey, Result, selector,
};

use crate::engine::Reconciler;

/// Collision retries when naming a template pod.
const NAME_ATTEMPTS: usize = 5;

const SUFFIX_LEN: usize = 5;
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// Reconciles the count of owned, non-terminal pods against
/// `spec.replicas`. Ownership is by uid through `ownerReferences`; pods
/// that stop matching the selector are released, terminal pods are reaped
/// so they always provoke a replacement.
pub struct ReplicaSetController {
    store: ResourceStore,
}

impl ReplicaSetController {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }

    /// Pods carrying a controller owner reference to this ReplicaSet.
    async fn owned_pods(&self, rs: &ReplicaSet) -> Vec<Pod> {
        self.store
            .list(Kind::Pod, &rs.metadata.namespace, None)
            .await
            .into_iter()
            .filter_map(|r| match r {
                Resource::Pod(p) => Some(p),
                _ => None,
            })
            .filter(|p| {
                p.metadata
                    .controller_owner()
                    .is_some_and(|o| o.uid == rs.metadata.uid)
            })
            .collect()
    }

    async fn create_pod(&self, rs: &ReplicaSet) -> Result<()> {
        let owner = OwnerReference {
            kind: Kind::ReplicaSet,
            name: rs.metadata.name.clone(),
            uid: rs.metadata.uid.clone(),
            controller: true,
        };
        for attempt in 1..=NAME_ATTEMPTS {
            let name = format!("{}-{}", rs.metadata.name, random_suffix());
            let pod = Pod {
                api_version: Kind::Pod.api_version().to_string(),
                kind: Kind::Pod.as_str().to_string(),
                metadata: ObjectMeta {
                    name: name.clone(),
                    namespace: rs.metadata.namespace.clone(),
                    labels: rs.spec.template.metadata.labels.clone(),
                    owner_references: vec![owner.clone()],
                    ..Default::default()
                },
                spec: rs.spec.template.spec.clone(),
                status: Default::default(),
            };
            match self.store.create(Resource::Pod(pod)).await {
                Ok(_) => {
                    info!(
                        "ReplicaSet {}/{}: created pod {}",
                        rs.metadata.namespace, rs.metadata.name, name
                    );
                    return Ok(());
                }
                Err(Error::AlreadyExists { .. }) if attempt < NAME_ATTEMPTS => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Internal(format!(
            "could not find a free pod name for ReplicaSet {}/{}",
            rs.metadata.namespace, rs.metadata.name
        )))
    }
}

/// Scale-down victim order: Pending pods go before Running ones (no
/// runtime cost yet), newer pods before older within a phase, names
/// ascending as the final tie-break. Keeps steady-state replicas alive.
fn scale_down_order(pods: &mut [Pod]) {
    pods.sort_by(|a, b| {
        let rank = |p: &Pod| match p.status.phase {
            PodPhase::Pending => 0,
            _ => 1,
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| {
                Reverse(a.metadata.creation_timestamp).cmp(&Reverse(b.metadata.creation_timestamp))
            })
            .then_with(|| a.metadata.name.cmp(&b.metadata.name))
    });
}

#[async_trait]
impl Reconciler for ReplicaSetController {
    fn name(&self) -> &'static str {
        "replicaset"
    }

    fn kind(&self) -> Kind {
        Kind::ReplicaSet
    }

    fn watches(&self) -> Vec<Kind> {
        vec![Kind::ReplicaSet, Kind::Pod]
    }

    async fn triggers(&self, event: &Event) -> Vec<ResourceKey> {
        match event.resource() {
            Resource::ReplicaSet(_) => vec![event.key()],
            Resource::Pod(pod) => pod
                .metadata
                .controller_owner()
                .filter(|o| o.kind == Kind::ReplicaSet)
                .map(|o| {
                    vec![ResourceKey::new(
                        Kind::ReplicaSet,
                        &pod.metadata.namespace,
                        &o.name,
                    )]
                })
                .unwrap_or_default(),
            _ => vec![],
        }
    }

    async fn reconcile(&self, key: &ResourceKey) -> Result<()> {
        // Deleted ReplicaSets leave the store as soon as their cascade is
        // marked; anything still resolvable here is live.
        let Some(resource) = self.store.get_any(key).await else {
            return Ok(());
        };
        let Resource::ReplicaSet(rs) = resource else {
            return Err(Error::Internal(format!("{} is not a replicaset", key)));
        };
        if rs.metadata.is_terminating() {
            return Ok(());
        }

        let mut owned = self.owned_pods(&rs).await;

        // Release pods that no longer match the selector: clear the owner
        // reference, keep the pod. Adoption of matching strays is
        // deliberately not done; it invites cross-controller fights.
        let mut released = Vec::new();
        owned.retain(|p| {
            if selector::matches(&rs.spec.selector, &p.metadata.labels) {
                true
            } else {
                released.push(p.clone());
                false
            }
        });
        for pod in released {
            let refs: Vec<OwnerReference> = pod
                .metadata
                .owner_references
                .iter()
                .filter(|o| o.uid != rs.metadata.uid)
                .cloned()
                .collect();
            warn!(
                "ReplicaSet {}/{}: releasing pod {} (labels no longer match)",
                rs.metadata.namespace, rs.metadata.name, pod.metadata.name
            );
            match self.store.set_owner_references(&pod.key(), refs).await {
                Ok(_) | Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        // Reap terminal pods before counting, so a Failed pod always
        // provokes a replacement.
        let mut reaped = Vec::new();
        owned.retain(|p| {
            if p.status.phase.is_terminal() {
                reaped.push(p.key());
                false
            } else {
                true
            }
        });
        for pod_key in reaped {
            match self.store.delete(&pod_key).await {
                Ok(_) | Err(Error::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let desired = rs.spec.replicas.max(0) as usize;
        let actual = owned.len();

        if actual < desired {
            for _ in 0..(desired - actual) {
                self.create_pod(&rs).await?;
            }
        } else if actual > desired {
            scale_down_order(&mut owned);
            for pod in owned.iter().take(actual - desired) {
                info!(
                    "ReplicaSet {}/{}: deleting pod {} (scale down to {})",
                    rs.metadata.namespace, rs.metadata.name, pod.metadata.name, desired
                );
                match self.store.delete(&pod.key()).await {
                    Ok(_) | Err(Error::NotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        // Recount from the store so the status reflects this pass's
        // creations and deletions.
        let owned_now = self.owned_pods(&rs).await;
        let mut status = rs.status.clone();
        status.replicas = owned_now
            .iter()
            .filter(|p| !p.status.phase.is_terminal())
            .count() as i32;
        status.ready_replicas = owned_now
            .iter()
            .filter(|p| p.status.phase == PodPhase::Running)
            .count() as i32;
        if status != rs.status {
            let mut updated = rs.clone();
            updated.status = status;
            self.store.update_status(Resource::ReplicaSet(updated)).await?;
        }
        Ok(())
    }
}
