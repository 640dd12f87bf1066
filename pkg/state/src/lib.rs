//! Concurrency-safe in-memory resource store with a typed watch feed.
//!
//! All control-plane state lives here and is lost on restart; the process
//! rebuilds by sweeping orchestrator-labeled containers at startup.

pub mod store;
pub mod watch;

pub use store::ResourceStore;
pub use watch::Event;
