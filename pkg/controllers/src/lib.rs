//! The reconciliation engine and the three controllers it drives.
//!
//! Each controller is a plain reconcile function over one store key plus a
//! trigger mapping; the engine owns all scheduling — event dispatch,
//! periodic resync, single-writer-per-key discipline, and backoff.

pub mod engine;
pub mod pod;
pub mod replicaset;
pub mod service;

pub use engine::{Engine, Reconciler};
pub use pod::PodLifecycleController;
pub use replicaset::ReplicaSetController;
pub use service::ServiceController;
