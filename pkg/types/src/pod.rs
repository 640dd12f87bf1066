use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::meta::{Condition, Kind, ObjectMeta, ResourceKey};

// --- Container spec ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// --- Pod phase ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Terminal phases get no further runtime interaction.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

// --- Pod spec / status ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub phase: PodPhase,
    /// The container's IP on the shared network; empty while Pending.
    #[serde(default, rename = "podIP")]
    pub pod_ip: String,
    /// Runtime-assigned container identifier; empty until the container runs.
    #[serde(default, rename = "containerID")]
    pub container_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// --- Pod ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    #[serde(default = "pod_api_version")]
    pub api_version: String,
    #[serde(default = "pod_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

fn pod_api_version() -> String {
    Kind::Pod.api_version().to_string()
}

fn pod_kind() -> String {
    Kind::Pod.as_str().to_string()
}

impl Pod {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(Kind::Pod, &self.metadata.namespace, &self.metadata.name)
    }

    /// The single container of this pod. Validation guarantees exactly one.
    pub fn container(&self) -> &ContainerSpec {
        &self.spec.containers[0]
    }
}
