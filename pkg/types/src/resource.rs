use serde::{Serialize, Serializer};

use crate::meta::{Condition, Kind, ObjectMeta, ResourceKey, upsert_condition};
use crate::pod::Pod;
use crate::replicaset::ReplicaSet;
use crate::service::Service;

/// A stored resource of any kind. The store holds these; controllers and
/// handlers match out the concrete type they work on.
#[derive(Debug, Clone)]
pub enum Resource {
    Pod(Pod),
    ReplicaSet(ReplicaSet),
    Service(Service),
}

impl Resource {
    pub fn kind(&self) -> Kind {
        match self {
            Resource::Pod(_) => Kind::Pod,
            Resource::ReplicaSet(_) => Kind::ReplicaSet,
            Resource::Service(_) => Kind::Service,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Resource::Pod(p) => &p.metadata,
            Resource::ReplicaSet(rs) => &rs.metadata,
            Resource::Service(svc) => &svc.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Resource::Pod(p) => &mut p.metadata,
            Resource::ReplicaSet(rs) => &mut rs.metadata,
            Resource::Service(svc) => &mut svc.metadata,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), &self.meta().namespace, &self.meta().name)
    }

    pub fn as_pod(&self) -> Option<&Pod> {
        match self {
            Resource::Pod(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_replicaset(&self) -> Option<&ReplicaSet> {
        match self {
            Resource::ReplicaSet(rs) => Some(rs),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&Service> {
        match self {
            Resource::Service(svc) => Some(svc),
            _ => None,
        }
    }

    /// Reset status to its kind-specific default. Used by the store's
    /// create path: status is server-managed and never taken from input.
    pub fn reset_status(&mut self) {
        match self {
            Resource::Pod(p) => p.status = Default::default(),
            Resource::ReplicaSet(rs) => rs.status = Default::default(),
            Resource::Service(svc) => svc.status = Default::default(),
        }
    }

    /// Copy the status out of `other` (same kind). Used by the store's
    /// update path to keep status server-managed across spec replacement.
    pub fn copy_status_from(&mut self, other: &Resource) {
        match (self, other) {
            (Resource::Pod(a), Resource::Pod(b)) => a.status = b.status.clone(),
            (Resource::ReplicaSet(a), Resource::ReplicaSet(b)) => a.status = b.status.clone(),
            (Resource::Service(a), Resource::Service(b)) => a.status = b.status.clone(),
            _ => debug_assert!(false, "status copy across kinds"),
        }
    }

    /// Attach or replace a status condition, whichever kind this is.
    pub fn set_condition(&mut self, cond: Condition) {
        let conditions = match self {
            Resource::Pod(p) => &mut p.status.conditions,
            Resource::ReplicaSet(rs) => &mut rs.status.conditions,
            Resource::Service(svc) => &mut svc.status.conditions,
        };
        upsert_condition(conditions, cond);
    }
}

impl Serialize for Resource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Resource::Pod(p) => p.serialize(serializer),
            Resource::ReplicaSet(rs) => rs.serialize(serializer),
            Resource::Service(svc) => svc.serialize(serializer),
        }
    }
}

impl From<Pod> for Resource {
    fn from(pod: Pod) -> Self {
        Resource::Pod(pod)
    }
}

impl From<ReplicaSet> for Resource {
    fn from(rs: ReplicaSet) -> Self {
        Resource::ReplicaSet(rs)
    }
}

impl From<Service> for Resource {
    fn from(svc: Service) -> Self {
        Resource::Service(svc)
    }
}
