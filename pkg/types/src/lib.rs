//! Resource model for the podplane control plane.
//!
//! Every resource shares the Kubernetes-style envelope (`apiVersion`, `kind`,
//! `metadata`, `spec`, `status`) and serializes camelCase so the REST surface
//! speaks the conventional wire format.

pub mod error;
pub mod meta;
pub mod pod;
pub mod replicaset;
pub mod resource;
pub mod selector;
pub mod service;
pub mod validate;

pub use error::{Error, Result};
pub use meta::{Condition, Kind, ObjectMeta, OwnerReference, ResourceKey};
pub use resource::Resource;
