use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- Kinds ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Pod,
    ReplicaSet,
    Service,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Pod => "Pod",
            Kind::ReplicaSet => "ReplicaSet",
            Kind::Service => "Service",
        }
    }

    /// Lowercase plural, as used in registry keys and API paths.
    pub fn plural(&self) -> &'static str {
        match self {
            Kind::Pod => "pods",
            Kind::ReplicaSet => "replicasets",
            Kind::Service => "services",
        }
    }

    /// The `apiVersion` group this kind is served under.
    pub fn api_version(&self) -> &'static str {
        match self {
            Kind::ReplicaSet => "apps/v1",
            _ => "v1",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Store key ---

/// Identity of a resource in the store: (kind, namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "/registry/{}/{}/{}",
            self.kind.plural(),
            self.namespace,
            self.name
        )
    }
}

// --- Owner references ---

/// Reference to the object that manages this one. Deleting the owner
/// cascades to everything that references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: Kind,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

// --- Conditions ---

/// A controller-reported observation attached to a resource's status.
/// Conditions are keyed by `type`; writing one replaces its predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status: "True".to_string(),
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Insert `cond` into `conditions`, replacing any entry of the same type.
pub fn upsert_condition(conditions: &mut Vec<Condition>, cond: Condition) {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == cond.condition_type)
    {
        Some(existing) => *existing = cond,
        None => conditions.push(cond),
    }
}

// --- Object metadata ---

/// Common metadata envelope shared by all resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Server-assigned opaque identifier, stable for the resource's lifetime.
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set when deletion has been requested; the object stays visible only
    /// to its finalizing controller until removal is confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

pub fn default_namespace() -> String {
    "default".to_string()
}

impl Default for ObjectMeta {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: default_namespace(),
            labels: HashMap::new(),
            uid: String::new(),
            owner_references: Vec::new(),
            creation_timestamp: None,
            deletion_timestamp: None,
        }
    }
}

impl ObjectMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The controller owner, if any. A resource has at most one.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_key_format() {
        let key = ResourceKey::new(Kind::ReplicaSet, "default", "web");
        assert_eq!(key.to_string(), "/registry/replicasets/default/web");
    }

    #[test]
    fn metadata_defaults_namespace() {
        let meta: ObjectMeta = serde_json::from_str(r#"{"name": "web"}"#).unwrap();
        assert_eq!(meta.namespace, "default");
        assert!(meta.labels.is_empty());
        assert!(meta.owner_references.is_empty());
    }

    #[test]
    fn owner_references_round_trip_camel_case() {
        let mut meta = ObjectMeta::named("web-abc12");
        meta.owner_references.push(OwnerReference {
            kind: Kind::ReplicaSet,
            name: "web".to_string(),
            uid: "u-1".to_string(),
            controller: true,
        });
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["ownerReferences"][0]["controller"], true);
        assert_eq!(json["ownerReferences"][0]["kind"], "ReplicaSet");
    }

    #[test]
    fn upsert_condition_replaces_same_type() {
        let mut conditions = Vec::new();
        upsert_condition(&mut conditions, Condition::new("ReconcileError", "A", "first"));
        upsert_condition(&mut conditions, Condition::new("ReconcileError", "B", "second"));
        upsert_condition(&mut conditions, Condition::new("ImagePullFailed", "C", "other"));
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].reason, "B");
    }
}
