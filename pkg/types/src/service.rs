use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::meta::{Condition, Kind, ObjectMeta, ResourceKey};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::ClusterIP => write!(f, "ClusterIP"),
            ServiceType::NodePort => write!(f, "NodePort"),
            ServiceType::LoadBalancer => write!(f, "LoadBalancer"),
        }
    }
}

// --- Ports and endpoints ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Port the load balancer listens on; also published on the host.
    pub port: u16,
    #[serde(default)]
    pub target_port: Option<u16>,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

impl ServicePort {
    /// The backend port, defaulting to `port` when unset.
    pub fn target(&self) -> u16 {
        self.target_port.unwrap_or(self.port)
    }
}

/// A `(podIP, port)` pair reachable inside the cluster network.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(rename = "podIP")]
    pub pod_ip: String,
    pub port: u16,
}

// --- Service spec / status ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub selector: HashMap<String, String>,
    pub ports: Vec<ServicePort>,
    #[serde(default, rename = "type")]
    pub service_type: ServiceType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Endpoints derived from Running pods matching the selector,
    /// sorted for deterministic comparison.
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Runtime id of the load balancer container serving this service.
    #[serde(default, rename = "loadBalancerID")]
    pub load_balancer_id: String,
    /// Host ports last programmed into the load balancer. A differing set
    /// on reconcile means the LB must be restarted, since host bindings
    /// cannot change in place.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forwarded_ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

// --- Service ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(default = "service_api_version")]
    pub api_version: String,
    #[serde(default = "service_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ServiceSpec,
    #[serde(default)]
    pub status: ServiceStatus,
}

fn service_api_version() -> String {
    Kind::Service.api_version().to_string()
}

fn service_kind() -> String {
    Kind::Service.as_str().to_string()
}

impl Service {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(Kind::Service, &self.metadata.namespace, &self.metadata.name)
    }
}
