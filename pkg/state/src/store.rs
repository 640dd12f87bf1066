use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

use pkg_types::{Error, Kind, OwnerReference, Resource, ResourceKey, Result, selector, validate};

use crate::watch::{Event, WatchHub};

/// In-memory resource store. The single synchronization point of the
/// process: readers take snapshots, writers commit under the write lock,
/// and events are published before the lock is released so per-key event
/// order always equals the order of writes.
///
/// Deletion is two-phase: `delete` marks the object (and, cascading, every
/// object that owner-references it) and emits Deleted; the entry itself
/// stays as a tombstone, invisible to reads, until the finalizing
/// controller confirms with `finalize`. ReplicaSets have no runtime
/// footprint to tear down and are removed as soon as their cascade is
/// marked.
#[derive(Clone)]
pub struct ResourceStore {
    inner: Arc<RwLock<HashMap<ResourceKey, Resource>>>,
    hub: WatchHub,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            hub: WatchHub::new(1024),
        }
    }

    /// Validate and insert a new resource. Assigns `uid` and
    /// `creationTimestamp`; status is reset to its default, never taken
    /// from the caller. Fails with AlreadyExists while the key is taken,
    /// including by a tombstone still awaiting finalization.
    pub async fn create(&self, mut resource: Resource) -> Result<Resource> {
        validate::validate_resource(&resource)?;
        let key = resource.key();
        let mut map = self.inner.write().await;
        if map.contains_key(&key) {
            return Err(Error::already_exists(&key));
        }
        {
            let meta = resource.meta_mut();
            meta.uid = Uuid::new_v4().to_string();
            meta.creation_timestamp = Some(Utc::now());
            meta.deletion_timestamp = None;
        }
        resource.reset_status();
        map.insert(key.clone(), resource.clone());
        info!("created {}", key);
        self.hub.publish(Event::Created(resource.clone()));
        Ok(resource)
    }

    /// Deep copy of a live resource, or NotFound.
    pub async fn get(&self, key: &ResourceKey) -> Result<Resource> {
        let map = self.inner.read().await;
        map.get(key)
            .filter(|r| !r.meta().is_terminating())
            .cloned()
            .ok_or_else(|| Error::not_found(key))
    }

    /// Like `get`, but tombstones are visible. Finalizing controllers use
    /// this to read what is left to tear down.
    pub async fn get_any(&self, key: &ResourceKey) -> Option<Resource> {
        self.inner.read().await.get(key).cloned()
    }

    /// All live resources of a kind in a namespace, optionally filtered by
    /// label selector. Ordering is unspecified.
    pub async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        label_selector: Option<&HashMap<String, String>>,
    ) -> Vec<Resource> {
        let map = self.inner.read().await;
        map.values()
            .filter(|r| r.kind() == kind && r.meta().namespace == namespace)
            .filter(|r| !r.meta().is_terminating())
            .filter(|r| match label_selector {
                Some(sel) => selector::matches(sel, &r.meta().labels),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Every key of a kind, tombstones included, so the resync tick keeps
    /// waking finalizers until teardown completes.
    pub async fn keys(&self, kind: Kind) -> Vec<ResourceKey> {
        let map = self.inner.read().await;
        map.keys().filter(|k| k.kind == kind).cloned().collect()
    }

    /// Replace spec and labels of an existing resource. `uid`,
    /// `creationTimestamp`, owner references, and the server-managed
    /// status all survive from the stored copy.
    pub async fn update(&self, mut resource: Resource) -> Result<Resource> {
        validate::validate_resource(&resource)?;
        let key = resource.key();
        let mut map = self.inner.write().await;
        let old = map
            .get(&key)
            .filter(|r| !r.meta().is_terminating())
            .cloned()
            .ok_or_else(|| Error::not_found(&key))?;
        {
            let meta = resource.meta_mut();
            meta.uid = old.meta().uid.clone();
            meta.creation_timestamp = old.meta().creation_timestamp;
            meta.deletion_timestamp = None;
            meta.owner_references = old.meta().owner_references.clone();
        }
        resource.copy_status_from(&old);
        map.insert(key.clone(), resource.clone());
        debug!("updated {}", key);
        self.hub.publish(Event::Updated {
            old,
            new: resource.clone(),
        });
        Ok(resource)
    }

    /// Controller path: replace status only. Works on tombstones too, so a
    /// failing teardown can still be reported on the object.
    pub async fn update_status(&self, resource: Resource) -> Result<Resource> {
        let key = resource.key();
        let mut map = self.inner.write().await;
        let old = map.get(&key).cloned().ok_or_else(|| Error::not_found(&key))?;
        let mut new = old.clone();
        new.copy_status_from(&resource);
        map.insert(key.clone(), new.clone());
        self.hub.publish(Event::Updated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    /// Controller path for adopt/release: replace the owner reference list.
    /// The ownership graph is a forest; a write that would close a cycle is
    /// rejected.
    pub async fn set_owner_references(
        &self,
        key: &ResourceKey,
        refs: Vec<OwnerReference>,
    ) -> Result<Resource> {
        let mut map = self.inner.write().await;
        let old = map
            .get(key)
            .filter(|r| !r.meta().is_terminating())
            .cloned()
            .ok_or_else(|| Error::not_found(key))?;
        if owner_chain_contains(&map, &refs, &old.meta().uid) {
            return Err(Error::Internal(format!(
                "owner references on {} would create a cycle",
                key
            )));
        }
        let mut new = old.clone();
        new.meta_mut().owner_references = refs;
        map.insert(key.clone(), new.clone());
        self.hub.publish(Event::Updated {
            old,
            new: new.clone(),
        });
        Ok(new)
    }

    /// Mark a resource deleted and cascade over the ownership forest:
    /// every live object owner-referencing a deleted object is deleted
    /// too, recursively. Each marked object emits a Deleted event with its
    /// final snapshot. Returns the root's snapshot; a second delete of the
    /// same key is NotFound.
    pub async fn delete(&self, key: &ResourceKey) -> Result<Resource> {
        let mut map = self.inner.write().await;
        let root = map
            .get(key)
            .filter(|r| !r.meta().is_terminating())
            .ok_or_else(|| Error::not_found(key))?;

        let now = Utc::now();
        let mut marked = vec![key.clone()];
        let mut frontier = vec![root.meta().uid.clone()];
        while let Some(uid) = frontier.pop() {
            for (k, r) in map.iter() {
                if r.meta().is_terminating() || marked.contains(k) {
                    continue;
                }
                if r.meta().owner_references.iter().any(|o| o.uid == uid) {
                    marked.push(k.clone());
                    frontier.push(r.meta().uid.clone());
                }
            }
        }

        let mut root_snapshot = None;
        for k in &marked {
            let r = map.get_mut(k).expect("marked keys exist");
            r.meta_mut().deletion_timestamp = Some(now);
            let snapshot = r.clone();
            if k == key {
                root_snapshot = Some(snapshot.clone());
            }
            info!("deleted {}", k);
            self.hub.publish(Event::Deleted(snapshot));
        }

        // No controller finalizes a ReplicaSet; drop those entries now.
        for k in &marked {
            if k.kind == Kind::ReplicaSet {
                map.remove(k);
            }
        }

        Ok(root_snapshot.expect("root is marked"))
    }

    /// Confirm teardown of a tombstone and remove the entry. Idempotent;
    /// live objects are left alone.
    pub async fn finalize(&self, key: &ResourceKey) {
        let mut map = self.inner.write().await;
        if map.get(key).is_some_and(|r| r.meta().is_terminating()) {
            map.remove(key);
            debug!("finalized {}", key);
        }
    }

    /// Subscribe to a kind's event feed. Returns a synthetic Created
    /// backlog for every existing live object plus the live receiver; the
    /// read lock held across subscription means no event can fall between
    /// the two.
    pub async fn watch(&self, kind: Kind) -> (Vec<Event>, broadcast::Receiver<Event>) {
        let map = self.inner.read().await;
        let rx = self.hub.subscribe(kind);
        let backlog = map
            .values()
            .filter(|r| r.kind() == kind && !r.meta().is_terminating())
            .cloned()
            .map(Event::Created)
            .collect();
        (backlog, rx)
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the owner chain starting from `refs`; true if it reaches
/// `target_uid`.
fn owner_chain_contains(
    map: &HashMap<ResourceKey, Resource>,
    refs: &[OwnerReference],
    target_uid: &str,
) -> bool {
    let mut frontier: Vec<String> = refs.iter().map(|o| o.uid.clone()).collect();
    let mut seen = HashSet::new();
    while let Some(uid) = frontier.pop() {
        if uid == target_uid {
            return true;
        }
        if !seen.insert(uid.clone()) {
            continue;
        }
        if let Some(owner) = map.values().find(|r| r.meta().uid == uid) {
            frontier.extend(owner.meta().owner_references.iter().map(|o| o.uid.clone()));
        }
    }
    false
}
