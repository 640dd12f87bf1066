use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use pkg_constants::engine::{BACKOFF_BASE, BACKOFF_CAP, RESYNC_INTERVAL, SHUTDOWN_GRACE};
use pkg_state::{Event, ResourceStore};
use pkg_types::{Condition, Error, Kind, ResourceKey, Result};

/// A reconcile function over one store key, plus the trigger selectors
/// that map store events onto keys to wake.
///
/// Reconciles must be idempotent: they compare observed and desired state
/// and compute actions from the comparison, never from an event diff. The
/// engine may run them on an unchanged world at any time.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// The kind whose keys are enumerated on every resync tick.
    fn kind(&self) -> Kind;

    /// Kinds whose event feeds this reconciler subscribes to.
    fn watches(&self) -> Vec<Kind> {
        vec![self.kind()]
    }

    /// Map one store event onto the keys that should be reconciled.
    async fn triggers(&self, event: &Event) -> Vec<ResourceKey>;

    async fn reconcile(&self, key: &ResourceKey) -> Result<()>;
}

enum Msg {
    /// Event or tick wakeup.
    Wake(ResourceKey),
    /// Backoff timer fired.
    Retry(ResourceKey),
    /// An in-flight reconcile finished.
    Done(ResourceKey, Result<()>),
}

#[derive(Default)]
struct KeyState {
    inflight: bool,
    /// A wakeup arrived while in flight; run once more on completion.
    pending: bool,
    /// A retry timer is armed; plain wakeups are redundant until it fires.
    retry_armed: bool,
    failures: u32,
}

/// Multiplexes all controllers. Per reconciler it runs an event pump per
/// watched kind, a resync ticker, and a keyed dispatcher that guarantees
/// at most one in-flight and at most one pending reconcile per key.
pub struct Engine {
    store: ResourceStore,
    resync: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn new(store: ResourceStore) -> Self {
        Self::with_resync(store, RESYNC_INTERVAL)
    }

    /// Tests shrink the resync interval to keep convergence fast.
    pub fn with_resync(store: ResourceStore, resync: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            resync,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Subscribe a reconciler and start its tasks. Existing objects are
    /// replayed to it as a synthetic Created backlog.
    pub async fn register(&mut self, reconciler: Arc<dyn Reconciler>) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel::<Msg>();
        info!("Engine: registering {}", reconciler.name());

        // Event pumps, one per watched kind.
        for kind in reconciler.watches() {
            let (backlog, mut rx) = self.store.watch(kind).await;
            let tx = msg_tx.clone();
            let r = reconciler.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(async move {
                for event in backlog {
                    for key in r.triggers(&event).await {
                        let _ = tx.send(Msg::Wake(key));
                    }
                }
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        received = rx.recv() => match received {
                            Ok(event) => {
                                for key in r.triggers(&event).await {
                                    let _ = tx.send(Msg::Wake(key));
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                // Dropped events are repaired by the resync tick.
                                warn!("{}: event feed lagged by {}", r.name(), n);
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            }));
        }

        // Resync ticker: every key of the reconciler's kind, tombstones
        // included so finalizers keep running.
        {
            let tx = msg_tx.clone();
            let store = self.store.clone();
            let kind = reconciler.kind();
            let resync = self.resync;
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(resync);
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        _ = interval.tick() => {
                            for key in store.keys(kind).await {
                                let _ = tx.send(Msg::Wake(key));
                            }
                        }
                    }
                }
            }));
        }

        // Keyed dispatcher.
        let store = self.store.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks.push(tokio::spawn(dispatch(
            reconciler, store, msg_tx, msg_rx, shutdown_rx,
        )));
    }

    /// Signal all tasks to stop and wait out the grace window for
    /// in-flight reconciles.
    pub async fn shutdown(self) {
        info!("Engine: shutting down");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
        }
    }
}

fn backoff_delay(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(6);
    BACKOFF_CAP.min(BACKOFF_BASE * 2u32.pow(exp))
}

async fn dispatch(
    reconciler: Arc<dyn Reconciler>,
    store: ResourceStore,
    msg_tx: mpsc::UnboundedSender<Msg>,
    mut msg_rx: mpsc::UnboundedReceiver<Msg>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut states: HashMap<ResourceKey, KeyState> = HashMap::new();

    let spawn_reconcile = |key: ResourceKey| {
        let r = reconciler.clone();
        let tx = msg_tx.clone();
        tokio::spawn(async move {
            let result = r.reconcile(&key).await;
            let _ = tx.send(Msg::Done(key, result));
        });
    };

    loop {
        let msg = tokio::select! {
            _ = shutdown_rx.changed() => break,
            msg = msg_rx.recv() => match msg {
                Some(m) => m,
                None => break,
            },
        };

        match msg {
            Msg::Wake(key) => {
                let state = states.entry(key.clone()).or_default();
                if state.inflight {
                    state.pending = true;
                } else if !state.retry_armed {
                    state.inflight = true;
                    spawn_reconcile(key);
                }
            }
            Msg::Retry(key) => {
                let state = states.entry(key.clone()).or_default();
                state.retry_armed = false;
                if state.inflight {
                    state.pending = true;
                } else {
                    state.inflight = true;
                    spawn_reconcile(key);
                }
            }
            Msg::Done(key, Ok(())) => {
                let state = states.entry(key.clone()).or_default();
                state.inflight = false;
                state.failures = 0;
                if state.pending {
                    state.pending = false;
                    state.inflight = true;
                    spawn_reconcile(key);
                } else if !state.retry_armed {
                    states.remove(&key);
                }
            }
            Msg::Done(key, Err(err)) => {
                // NotFound during cleanup is success, not a failure.
                if err.is_not_found() {
                    states.remove(&key);
                    continue;
                }
                let state = states.entry(key.clone()).or_default();
                state.inflight = false;
                state.pending = false;
                state.failures += 1;
                // Fatal errors are not expected to self-heal; revisit only
                // at the backoff ceiling in case the world changed anyway.
                let delay = if matches!(err, Error::RuntimeFatal { .. }) {
                    BACKOFF_CAP
                } else {
                    backoff_delay(state.failures)
                };
                warn!(
                    "{}: reconcile {} failed (attempt {}, retry in {:?}): {}",
                    reconciler.name(),
                    key,
                    state.failures,
                    delay,
                    err
                );
                record_failure(&store, &key, &err).await;
                state.retry_armed = true;
                let tx = msg_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Msg::Retry(key));
                });
            }
        }
    }

    // Grace window: let in-flight reconciles report back before dropping.
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while states.values().any(|s| s.inflight) {
        match tokio::time::timeout_at(deadline, msg_rx.recv()).await {
            Ok(Some(Msg::Done(key, _))) => {
                if let Some(state) = states.get_mut(&key) {
                    state.inflight = false;
                }
            }
            Ok(Some(_)) => {}
            _ => break,
        }
    }
    debug!("{}: dispatcher stopped", reconciler.name());
}

/// Surface a reconcile failure on the object's status conditions. Skipped
/// when the condition already says the same thing, so a steadily failing
/// object does not generate an event storm.
async fn record_failure(store: &ResourceStore, key: &ResourceKey, err: &Error) {
    let Some(mut resource) = store.get_any(key).await else {
        return;
    };
    let reason = err.reason();
    let message = err.to_string();
    let already_recorded = {
        let conditions = match &resource {
            pkg_types::Resource::Pod(p) => &p.status.conditions,
            pkg_types::Resource::ReplicaSet(rs) => &rs.status.conditions,
            pkg_types::Resource::Service(svc) => &svc.status.conditions,
        };
        conditions
            .iter()
            .any(|c| c.condition_type == "ReconcileError" && c.reason == reason && c.message == message)
    };
    if already_recorded {
        return;
    }
    resource.set_condition(Condition::new("ReconcileError", reason, message));
    let _ = store.update_status(resource).await;
}
