//! Container runtime constants.

/// Image used for per-service L4 load balancer containers.
pub const LB_IMAGE: &str = "orchestrator-lb";

/// Runtime label carrying the pod name on every pod container.
pub const LABEL_POD: &str = "orchestrator/pod";

/// Runtime label carrying the service name on every LB container.
pub const LABEL_SERVICE: &str = "orchestrator/service";

/// Runtime label carrying the namespace on every container we own.
/// Sweeping on this single label finds pods and load balancers alike.
pub const LABEL_NAMESPACE: &str = "orchestrator/namespace";

/// Timeout for starting a container, in seconds.
pub const START_TIMEOUT_SECS: u64 = 30;

/// Timeout for stopping/removing a container, in seconds.
pub const STOP_TIMEOUT_SECS: u64 = 10;

/// Timeout for inspecting a container, in seconds.
pub const INSPECT_TIMEOUT_SECS: u64 = 5;
