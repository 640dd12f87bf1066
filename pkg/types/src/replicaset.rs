use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::meta::{Condition, Kind, ObjectMeta, ResourceKey};
use crate::pod::PodSpec;

// --- Pod template ---

/// Labels stamped onto pods created from the template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMeta {
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default)]
    pub metadata: TemplateMeta,
    pub spec: PodSpec,
}

// --- ReplicaSet spec / status ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetSpec {
    pub replicas: i32,
    #[serde(default)]
    pub selector: HashMap<String, String>,
    pub template: PodTemplate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetStatus {
    /// Non-terminal pods owned by this ReplicaSet.
    #[serde(default)]
    pub replicas: i32,
    /// Owned pods in Running phase.
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// --- ReplicaSet ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSet {
    #[serde(default = "rs_api_version")]
    pub api_version: String,
    #[serde(default = "rs_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ReplicaSetSpec,
    #[serde(default)]
    pub status: ReplicaSetStatus,
}

fn rs_api_version() -> String {
    Kind::ReplicaSet.api_version().to_string()
}

fn rs_kind() -> String {
    Kind::ReplicaSet.as_str().to_string()
}

impl ReplicaSet {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(
            Kind::ReplicaSet,
            &self.metadata.namespace,
            &self.metadata.name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_kubectl_style_manifest() {
        let rs: ReplicaSet = serde_json::from_str(
            r#"{
                "apiVersion": "apps/v1",
                "kind": "ReplicaSet",
                "metadata": {"name": "web"},
                "spec": {
                    "replicas": 3,
                    "selector": {"app": "web"},
                    "template": {
                        "metadata": {"labels": {"app": "web"}},
                        "spec": {"containers": [{"name": "web", "image": "nginx"}]}
                    }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(rs.spec.replicas, 3);
        assert_eq!(rs.spec.template.metadata.labels["app"], "web");
        assert_eq!(rs.status, ReplicaSetStatus::default());
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = ReplicaSetStatus {
            replicas: 3,
            ready_replicas: 2,
            conditions: vec![],
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["readyReplicas"], 2);
    }
}
