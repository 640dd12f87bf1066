//! End-to-end controller tests against the in-memory runtime backend.
//!
//! Each test stands up the store, the fake runtime, and the engine with
//! all three controllers registered, then drives convergence through
//! store writes alone, the way the API layer does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pkg_container::{ContainerRuntime, FakeRuntime};
use pkg_controllers::{Engine, PodLifecycleController, ReplicaSetController, ServiceController};
use pkg_state::ResourceStore;
use pkg_types::pod::{ContainerSpec, Pod, PodPhase, PodSpec};
use pkg_types::replicaset::{PodTemplate, ReplicaSet, ReplicaSetSpec, TemplateMeta};
use pkg_types::service::{Service, ServicePort, ServiceSpec};
use pkg_types::{Kind, ObjectMeta, Resource, ResourceKey};

const WAIT: Duration = Duration::from_secs(5);

/// Poll `$cond` until it holds or the window closes; true on success.
macro_rules! wait_until {
    ($cond:expr) => {
        tokio::time::timeout(WAIT, async {
            loop {
                if $cond {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    };
}

struct Harness {
    store: ResourceStore,
    runtime: FakeRuntime,
    engine: Engine,
}

async fn start_harness() -> Harness {
    let store = ResourceStore::new();
    let runtime = FakeRuntime::new();
    let shared: Arc<dyn ContainerRuntime> = Arc::new(runtime.clone());

    let mut engine = Engine::with_resync(store.clone(), Duration::from_millis(50));
    engine
        .register(Arc::new(PodLifecycleController::new(
            store.clone(),
            shared.clone(),
        )))
        .await;
    engine
        .register(Arc::new(ReplicaSetController::new(store.clone())))
        .await;
    engine
        .register(Arc::new(ServiceController::new(store.clone(), shared)))
        .await;

    Harness {
        store,
        runtime,
        engine,
    }
}

fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn pod_manifest(name: &str, pod_labels: HashMap<String, String>, image: &str) -> Resource {
    Resource::Pod(Pod {
        api_version: "v1".to_string(),
        kind: "Pod".to_string(),
        metadata: ObjectMeta {
            name: name.to_string(),
            labels: pod_labels,
            ..Default::default()
        },
        spec: PodSpec {
            containers: vec![ContainerSpec {
                name: "main".to_string(),
                image: image.to_string(),
                env: HashMap::new(),
            }],
        },
        status: Default::default(),
    })
}

fn rs_manifest(name: &str, replicas: i32, app: &str) -> Resource {
    let selector = labels(&[("app", app)]);
    Resource::ReplicaSet(ReplicaSet {
        api_version: "apps/v1".to_string(),
        kind: "ReplicaSet".to_string(),
        metadata: ObjectMeta::named(name),
        spec: ReplicaSetSpec {
            replicas,
            selector: selector.clone(),
            template: PodTemplate {
                metadata: TemplateMeta { labels: selector },
                spec: PodSpec {
                    containers: vec![ContainerSpec {
                        name: "main".to_string(),
                        image: "worker:latest".to_string(),
                        env: HashMap::new(),
                    }],
                },
            },
        },
        status: Default::default(),
    })
}

fn svc_manifest(name: &str, app: &str, port: u16, target: u16) -> Resource {
    Resource::Service(Service {
        api_version: "v1".to_string(),
        kind: "Service".to_string(),
        metadata: ObjectMeta::named(name),
        spec: ServiceSpec {
            selector: labels(&[("app", app)]),
            ports: vec![ServicePort {
                protocol: "TCP".to_string(),
                port,
                target_port: Some(target),
            }],
            service_type: Default::default(),
        },
        status: Default::default(),
    })
}

async fn running_owned_pods(store: &ResourceStore, rs_uid: &str) -> Vec<Pod> {
    store
        .list(Kind::Pod, "default", None)
        .await
        .into_iter()
        .filter_map(|r| match r {
            Resource::Pod(p) => Some(p),
            _ => None,
        })
        .filter(|p| {
            p.metadata
                .controller_owner()
                .is_some_and(|o| o.uid == rs_uid)
        })
        .filter(|p| p.status.phase == PodPhase::Running)
        .collect()
}

async fn service_endpoint_count(store: &ResourceStore, key: &ResourceKey) -> usize {
    store
        .get(key)
        .await
        .ok()
        .and_then(|r| r.as_service().map(|s| s.status.endpoints.len()))
        .unwrap_or(0)
}

#[tokio::test]
async fn replicaset_scales_up_to_running_pods() {
    let h = start_harness().await;
    let rs = h.store.create(rs_manifest("web", 3, "web")).await.unwrap();
    let rs_uid = rs.meta().uid.clone();

    assert!(
        wait_until!(running_owned_pods(&h.store, &rs_uid).await.len() == 3),
        "expected 3 running owned pods"
    );
    assert_eq!(h.runtime.running_count(), 3);

    let pods = running_owned_pods(&h.store, &rs_uid).await;
    for pod in &pods {
        assert!(pod.metadata.name.starts_with("web-"));
        assert!(!pod.status.container_id.is_empty());
        assert!(!pod.status.pod_ip.is_empty());
        let owner = pod.metadata.controller_owner().unwrap();
        assert_eq!(owner.kind, Kind::ReplicaSet);
        assert_eq!(owner.name, "web");
    }

    assert!(
        wait_until!({
            let fetched = h.store.get(&rs.key()).await.unwrap();
            let fetched = fetched.as_replicaset().unwrap();
            fetched.status.replicas == 3 && fetched.status.ready_replicas == 3
        }),
        "status should report 3/3"
    );
    h.engine.shutdown().await;
}

#[tokio::test]
async fn scale_down_keeps_the_oldest_running_pods() {
    let h = start_harness().await;
    let rs = h.store.create(rs_manifest("web", 3, "web")).await.unwrap();
    let rs_uid = rs.meta().uid.clone();
    assert!(wait_until!(running_owned_pods(&h.store, &rs_uid).await.len() == 3));

    // scale 3 → 5
    h.store.update(rs_manifest("web", 5, "web")).await.unwrap();
    assert!(wait_until!(running_owned_pods(&h.store, &rs_uid).await.len() == 5));

    let mut pods = running_owned_pods(&h.store, &rs_uid).await;
    pods.sort_by_key(|p| p.metadata.creation_timestamp);
    let mut expected_survivors: Vec<String> = pods
        .iter()
        .take(2)
        .map(|p| p.metadata.name.clone())
        .collect();
    expected_survivors.sort();

    // scale 5 → 2: the newest pods go first
    h.store.update(rs_manifest("web", 2, "web")).await.unwrap();
    assert!(wait_until!(running_owned_pods(&h.store, &rs_uid).await.len() == 2));

    let mut survivors: Vec<String> = running_owned_pods(&h.store, &rs_uid)
        .await
        .into_iter()
        .map(|p| p.metadata.name)
        .collect();
    survivors.sort();
    assert_eq!(survivors, expected_survivors);
    assert_eq!(h.runtime.running_count(), 2);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn drift_recovery_replaces_a_killed_container() {
    let h = start_harness().await;
    let rs = h.store.create(rs_manifest("web", 2, "web")).await.unwrap();
    let rs_uid = rs.meta().uid.clone();
    assert!(wait_until!(running_owned_pods(&h.store, &rs_uid).await.len() == 2));

    let victim = running_owned_pods(&h.store, &rs_uid).await.remove(0);
    h.runtime.kill_container(&victim.status.container_id);

    // the dead pod is marked Failed, reaped, and replaced by a fresh one
    assert!(
        wait_until!({
            let pods = running_owned_pods(&h.store, &rs_uid).await;
            pods.len() == 2 && pods.iter().all(|p| p.metadata.name != victim.metadata.name)
        }),
        "expected a replacement pod with a new name"
    );
    let pods = running_owned_pods(&h.store, &rs_uid).await;
    assert!(pods.iter().all(|p| p.metadata.uid != victim.metadata.uid));
    assert_eq!(h.runtime.running_count(), 2);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn deleting_a_replicaset_cascades_to_its_pods() {
    let h = start_harness().await;
    let rs = h.store.create(rs_manifest("web", 2, "web")).await.unwrap();
    let rs_uid = rs.meta().uid.clone();
    assert!(wait_until!(running_owned_pods(&h.store, &rs_uid).await.len() == 2));

    h.store.delete(&rs.key()).await.unwrap();

    assert!(
        wait_until!(
            h.store.list(Kind::Pod, "default", None).await.is_empty()
                && h.store.keys(Kind::Pod).await.is_empty()
                && h.runtime.running_count() == 0
        ),
        "cascade should remove pods and containers"
    );
    assert!(h.store.get_any(&rs.key()).await.is_none());
    h.engine.shutdown().await;
}

#[tokio::test]
async fn service_tracks_matching_running_pods() {
    let h = start_harness().await;
    let svc = h
        .store
        .create(svc_manifest("health-service", "health", 2000, 5000))
        .await
        .unwrap();
    let svc_key = svc.key();

    h.store
        .create(pod_manifest("health-1", labels(&[("app", "health")]), "health:latest"))
        .await
        .unwrap();

    assert!(
        wait_until!(service_endpoint_count(&h.store, &svc_key).await == 1),
        "one matching pod, one endpoint"
    );
    let fetched = h.store.get(&svc_key).await.unwrap();
    let endpoints = fetched.as_service().unwrap().status.endpoints.clone();
    assert_eq!(endpoints[0].port, 5000);

    let lb = h.runtime.lb_for_service("default", "health-service").unwrap();
    assert_eq!(lb.ports, vec![2000]);
    assert_eq!(lb.endpoints.len(), 1);

    // a pod that does not match the selector is invisible to the service
    h.store
        .create(pod_manifest("other", labels(&[("app", "other")]), "health:latest"))
        .await
        .unwrap();

    // a second matching pod becomes a second endpoint
    h.store
        .create(pod_manifest("health-2", labels(&[("app", "health")]), "health:latest"))
        .await
        .unwrap();
    assert!(wait_until!(service_endpoint_count(&h.store, &svc_key).await == 2));

    // deleting one brings it back down
    h.store
        .delete(&ResourceKey::new(Kind::Pod, "default", "health-1"))
        .await
        .unwrap();
    assert!(wait_until!(service_endpoint_count(&h.store, &svc_key).await == 1));

    let lb = h.runtime.lb_for_service("default", "health-service").unwrap();
    assert_eq!(lb.endpoints.len(), 1);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn deleting_a_service_stops_its_load_balancer() {
    let h = start_harness().await;
    let svc = h
        .store
        .create(svc_manifest("health-service", "health", 2000, 5000))
        .await
        .unwrap();
    assert!(wait_until!(
        h.runtime.lb_for_service("default", "health-service").is_some()
    ));

    h.store.delete(&svc.key()).await.unwrap();
    assert!(
        wait_until!(
            h.runtime.lb_for_service("default", "health-service").is_none()
                && h.store.get_any(&svc.key()).await.is_none()
        ),
        "balancer and tombstone should both be gone"
    );
    h.engine.shutdown().await;
}

#[tokio::test]
async fn changing_service_ports_restarts_the_balancer() {
    let h = start_harness().await;
    h.store
        .create(svc_manifest("api", "api", 2000, 5000))
        .await
        .unwrap();
    assert!(wait_until!(h.runtime.lb_for_service("default", "api").is_some()));
    let before = h.runtime.lb_for_service("default", "api").unwrap();

    h.store
        .update(svc_manifest("api", "api", 2001, 5000))
        .await
        .unwrap();
    assert!(
        wait_until!(
            h.runtime
                .lb_for_service("default", "api")
                .is_some_and(|lb| lb.ports == vec![2001])
        ),
        "balancer should be rebound to the new port"
    );
    let after = h.runtime.lb_for_service("default", "api").unwrap();
    assert_ne!(before.id, after.id);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn quiescent_state_causes_no_runtime_mutations() {
    let h = start_harness().await;
    let rs = h.store.create(rs_manifest("web", 2, "web")).await.unwrap();
    let rs_uid = rs.meta().uid.clone();
    h.store
        .create(svc_manifest("web-svc", "web", 8080, 8080))
        .await
        .unwrap();

    assert!(wait_until!(
        running_owned_pods(&h.store, &rs_uid).await.len() == 2
            && h.runtime
                .lb_for_service("default", "web-svc")
                .is_some_and(|lb| lb.endpoints.len() == 2)
    ));

    // let any in-flight work settle, then watch for stray mutations
    tokio::time::sleep(Duration::from_millis(200)).await;
    let settled = h.runtime.mutation_count();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        h.runtime.mutation_count(),
        settled,
        "ticks over a converged world must not touch the runtime"
    );
    h.engine.shutdown().await;
}

#[tokio::test]
async fn image_pull_failure_is_terminal_for_the_pod() {
    let h = start_harness().await;
    h.runtime.fail_pulls("ghost:latest");

    let pod = h
        .store
        .create(pod_manifest("doomed", HashMap::new(), "ghost:latest"))
        .await
        .unwrap();
    let key = pod.key();

    assert!(wait_until!(
        h.store
            .get(&key)
            .await
            .ok()
            .and_then(|r| r.as_pod().map(|p| p.status.phase == PodPhase::Failed))
            .unwrap_or(false)
    ));
    let fetched = h.store.get(&key).await.unwrap();
    let fetched = fetched.as_pod().unwrap().clone();
    assert!(
        fetched
            .status
            .conditions
            .iter()
            .any(|c| c.reason == "ImagePullFailed")
    );

    // terminal: no further pull attempts for this pod
    let attempts = h.runtime.mutation_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.runtime.mutation_count(), attempts);
    h.engine.shutdown().await;
}

#[tokio::test]
async fn transient_runtime_failure_is_retried() {
    let h = start_harness().await;
    h.runtime.fail_next_runs(1);

    let pod = h
        .store
        .create(pod_manifest("sturdy", HashMap::new(), "worker:latest"))
        .await
        .unwrap();
    let key = pod.key();

    // first attempt fails, backoff kicks in, second attempt succeeds
    assert!(
        wait_until!(
            h.store
                .get(&key)
                .await
                .ok()
                .and_then(|r| r.as_pod().map(|p| p.status.phase == PodPhase::Running))
                .unwrap_or(false)
        ),
        "pod should recover from a transient runtime failure"
    );
    h.engine.shutdown().await;
}

#[tokio::test]
async fn deleting_a_pod_finalizes_after_teardown() {
    let h = start_harness().await;
    let pod = h
        .store
        .create(pod_manifest("solo", HashMap::new(), "worker:latest"))
        .await
        .unwrap();
    let key = pod.key();
    assert!(wait_until!(h.runtime.running_count() == 1));

    h.store.delete(&key).await.unwrap();
    assert!(
        wait_until!(h.runtime.running_count() == 0 && h.store.get_any(&key).await.is_none()),
        "container removed, then store entry confirmed gone"
    );
    h.engine.shutdown().await;
}
