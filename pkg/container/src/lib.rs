//! Runtime adapter: the boundary between the control plane and the
//! container engine. `ContainerRuntime` is the capability set; `Podman`
//! backs it in production and `FakeRuntime` in tests and podman-less dev.

pub mod adapter;
pub mod fake;
pub mod podman;

pub use adapter::{
    ContainerRuntime, ContainerState, LbEndpoint, RunContainerRequest, RunningContainer,
    RuntimeError, RuntimeResult, StartLbRequest, lb_container_name, pod_container_name,
};
pub use fake::FakeRuntime;
pub use podman::PodmanRuntime;
