use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Output;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use pkg_constants::network::NETWORK_NAME;
use pkg_constants::runtime::{
    INSPECT_TIMEOUT_SECS, LABEL_NAMESPACE, LABEL_SERVICE, LB_IMAGE, START_TIMEOUT_SECS,
    STOP_TIMEOUT_SECS,
};

use crate::adapter::{
    ContainerRuntime, ContainerState, LbEndpoint, RunContainerRequest, RunningContainer,
    RuntimeError, RuntimeResult, StartLbRequest, lb_container_name,
};

/// Podman CLI backend. Every operation shells out to `podman` under a
/// deadline; stderr is classified into the adapter's error kinds.
pub struct PodmanRuntime {
    podman_path: String,
    /// Config of each live LB container, kept so an endpoint update can
    /// re-run the balancer. LB containers are configured by environment at
    /// start, so "update" on this backend is a restart under the same name.
    lb_configs: Mutex<HashMap<String, StartLbRequest>>,
}

impl PodmanRuntime {
    /// Detect podman by locating the binary and probing the version.
    pub fn detect() -> anyhow::Result<Self> {
        let which_output = std::process::Command::new("which").arg("podman").output()?;
        if !which_output.status.success() {
            anyhow::bail!("podman not found in PATH");
        }
        let podman_path = String::from_utf8_lossy(&which_output.stdout)
            .trim()
            .to_string();

        let version_output = std::process::Command::new(&podman_path)
            .args(["version", "--format", "{{.Client.Version}}"])
            .output()?;
        if !version_output.status.success() {
            anyhow::bail!("podman found but not responding");
        }
        let version = String::from_utf8_lossy(&version_output.stdout)
            .trim()
            .to_string();
        info!("Using Podman runtime: {} ({})", podman_path, version);

        Ok(Self {
            podman_path,
            lb_configs: Mutex::new(HashMap::new()),
        })
    }

    /// Run a podman command under a deadline. A non-zero exit is returned
    /// as `Ok` output for the caller to classify against its context.
    async fn podman(
        &self,
        args: &[String],
        timeout: Duration,
        operation: &str,
    ) -> RuntimeResult<Output> {
        debug!("podman {}", args.join(" "));
        let fut = tokio::process::Command::new(&self.podman_path)
            .args(args)
            .output();
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(RuntimeError::Other(format!(
                "failed to spawn podman: {}",
                e
            ))),
            Err(_) => Err(RuntimeError::Timeout {
                operation: operation.to_string(),
            }),
        }
    }

    async fn inspect_json(&self, id: &str) -> RuntimeResult<Option<serde_json::Value>> {
        let output = self
            .podman(
                &["inspect".to_string(), id.to_string()],
                Duration::from_secs(INSPECT_TIMEOUT_SECS),
                "inspect",
            )
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| RuntimeError::Other(format!("unparseable inspect output: {}", e)))?;
        Ok(parsed.get(0).cloned())
    }

    /// The container's IP on the shared network, per inspect.
    async fn container_ip(&self, id: &str) -> RuntimeResult<String> {
        let Some(info) = self.inspect_json(id).await? else {
            return Err(RuntimeError::Other(format!(
                "container {} vanished right after start",
                id
            )));
        };
        let ip = info
            .pointer(&format!(
                "/NetworkSettings/Networks/{}/IPAddress",
                NETWORK_NAME
            ))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if ip.is_empty() {
            return Err(RuntimeError::Other(format!(
                "container {} has no address on {}",
                id, NETWORK_NAME
            )));
        }
        Ok(ip)
    }

    async fn run_and_classify(
        &self,
        args: Vec<String>,
        name: &str,
        image: &str,
    ) -> RuntimeResult<String> {
        let output = self
            .podman(&args, Duration::from_secs(START_TIMEOUT_SECS), "run")
            .await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        Err(classify_run_error(&stderr, name, image))
    }
}

/// Map podman's stderr onto the adapter error kinds.
fn classify_run_error(stderr: &str, name: &str, image: &str) -> RuntimeError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("already in use") {
        return RuntimeError::NameConflict(name.to_string());
    }
    if lowered.contains("manifest unknown")
        || lowered.contains("image not known")
        || lowered.contains("access to the requested resource is not authorized")
        || lowered.contains("name unknown")
    {
        return RuntimeError::ImagePullFailed {
            image: image.to_string(),
            detail: stderr.trim().to_string(),
        };
    }
    RuntimeError::Other(stderr.trim().to_string())
}

/// Argument list for `podman run` on a pod container.
fn pod_run_args(req: &RunContainerRequest) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        req.name.clone(),
        "--network".to_string(),
        req.network.clone(),
    ];
    for alias in &req.network_aliases {
        args.push("--network-alias".to_string());
        args.push(alias.clone());
    }
    for (k, v) in &req.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", k, v));
    }
    for (k, v) in &req.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", k, v));
    }
    args.push(req.image.clone());
    args
}

/// Argument list for `podman run` on an LB container. The balancer image
/// reads its listener port and backend list from the environment.
fn lb_run_args(req: &StartLbRequest) -> Vec<String> {
    let name = lb_container_name(&req.namespace, &req.service);
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name,
        "--network".to_string(),
        req.network.clone(),
        "--network-alias".to_string(),
        req.service.clone(),
    ];
    for port in &req.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}", port, port));
    }
    let backends: Vec<String> = req.endpoints.iter().map(|e| e.to_string()).collect();
    args.push("-e".to_string());
    args.push(format!("SERVICE_NAME={}", req.service));
    args.push("-e".to_string());
    args.push(format!(
        "SERVICE_PORT={}",
        req.ports.first().copied().unwrap_or_default()
    ));
    args.push("-e".to_string());
    args.push(format!("BACKENDS={}", backends.join(",")));
    args.push("--label".to_string());
    args.push(format!("{}={}", LABEL_SERVICE, req.service));
    args.push("--label".to_string());
    args.push(format!("{}={}", LABEL_NAMESPACE, req.namespace));
    args.push(LB_IMAGE.to_string());
    args
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    async fn ensure_network(&self) -> RuntimeResult<String> {
        let output = self
            .podman(
                &[
                    "network".to_string(),
                    "ls".to_string(),
                    "--format".to_string(),
                    "{{.Name}}".to_string(),
                ],
                Duration::from_secs(INSPECT_TIMEOUT_SECS),
                "network ls",
            )
            .await?;
        let listed = String::from_utf8_lossy(&output.stdout);
        if listed.lines().any(|n| n.trim() == NETWORK_NAME) {
            return Ok(NETWORK_NAME.to_string());
        }

        info!("Creating network {}", NETWORK_NAME);
        let output = self
            .podman(
                &[
                    "network".to_string(),
                    "create".to_string(),
                    NETWORK_NAME.to_string(),
                ],
                Duration::from_secs(INSPECT_TIMEOUT_SECS),
                "network create",
            )
            .await?;
        // A concurrent worker may have created it between ls and create.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("already exists") {
                return Err(RuntimeError::Other(stderr.trim().to_string()));
            }
        }
        Ok(NETWORK_NAME.to_string())
    }

    async fn run_container(&self, req: RunContainerRequest) -> RuntimeResult<RunningContainer> {
        let id = self
            .run_and_classify(pod_run_args(&req), &req.name, &req.image)
            .await?;
        let ip = self.container_ip(&id).await?;
        info!("Started container {} ({})", req.name, &id[..id.len().min(12)]);
        Ok(RunningContainer { id, ip })
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerState> {
        let Some(info) = self.inspect_json(id).await? else {
            return Ok(ContainerState::Missing);
        };
        let running = info
            .pointer("/State/Running")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if running {
            return Ok(ContainerState::Running);
        }
        let code = info
            .pointer("/State/ExitCode")
            .and_then(|v| v.as_i64())
            .unwrap_or(-1);
        Ok(ContainerState::Exited(code))
    }

    async fn stop_and_remove(&self, id: &str) {
        let result = self
            .podman(
                &["rm".to_string(), "-f".to_string(), id.to_string()],
                Duration::from_secs(STOP_TIMEOUT_SECS),
                "rm",
            )
            .await;
        match result {
            Ok(output) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                // Removing an already-gone container is success for us.
                if !stderr.contains("no such container") {
                    warn!("podman rm {} failed: {}", id, stderr.trim());
                }
            }
            Err(e) => warn!("podman rm {} failed: {}", id, e),
            _ => {}
        }
    }

    async fn start_load_balancer(&self, req: StartLbRequest) -> RuntimeResult<String> {
        let name = lb_container_name(&req.namespace, &req.service);
        // Reconfigure semantics: replace whatever holds the name.
        self.stop_and_remove(&name).await;
        let id = self.run_and_classify(lb_run_args(&req), &name, LB_IMAGE).await?;
        info!(
            "Started load balancer {} for {}/{} ({} backends)",
            name,
            req.namespace,
            req.service,
            req.endpoints.len()
        );
        self.lb_configs.lock().await.insert(id.clone(), req);
        Ok(id)
    }

    async fn update_load_balancer(
        &self,
        id: &str,
        endpoints: &[LbEndpoint],
    ) -> RuntimeResult<String> {
        let config = {
            let configs = self.lb_configs.lock().await;
            configs.get(id).cloned()
        };
        let Some(mut config) = config else {
            return Err(RuntimeError::Other(format!(
                "unknown load balancer id {}",
                id
            )));
        };
        // Env-configured balancer: no in-place push, restart under the
        // same name with the new backend set.
        config.endpoints = endpoints.to_vec();
        self.lb_configs.lock().await.remove(id);
        self.start_load_balancer(config).await
    }

    async fn stop_load_balancer(&self, id: &str) {
        self.lb_configs.lock().await.remove(id);
        self.stop_and_remove(id).await;
    }

    async fn sweep_labeled(&self) -> RuntimeResult<usize> {
        let output = self
            .podman(
                &[
                    "ps".to_string(),
                    "-a".to_string(),
                    "--filter".to_string(),
                    format!("label={}", LABEL_NAMESPACE),
                    "--format".to_string(),
                    "{{.ID}}".to_string(),
                ],
                Duration::from_secs(INSPECT_TIMEOUT_SECS),
                "ps",
            )
            .await?;
        let ids: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        for id in &ids {
            self.stop_and_remove(id).await;
        }
        if !ids.is_empty() {
            info!("Swept {} leftover containers from a previous run", ids.len());
        }
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_run_args_include_network_env_and_labels() {
        let req = RunContainerRequest {
            name: "default-web".to_string(),
            image: "nginx".to_string(),
            env: [("PORT".to_string(), "5000".to_string())].into_iter().collect(),
            labels: [("orchestrator/pod".to_string(), "web".to_string())]
                .into_iter()
                .collect(),
            network_aliases: vec!["web".to_string()],
            network: "orchestrator-net".to_string(),
        };
        let args = pod_run_args(&req);
        let joined = args.join(" ");
        assert!(joined.starts_with("run -d --name default-web --network orchestrator-net"));
        assert!(joined.contains("--network-alias web"));
        assert!(joined.contains("-e PORT=5000"));
        assert!(joined.contains("--label orchestrator/pod=web"));
        assert_eq!(args.last().unwrap(), "nginx");
    }

    #[test]
    fn lb_run_args_publish_ports_and_backends() {
        let req = StartLbRequest {
            namespace: "default".to_string(),
            service: "health".to_string(),
            ports: vec![2000],
            endpoints: vec![
                LbEndpoint {
                    ip: "10.89.0.2".to_string(),
                    port: 5000,
                },
                LbEndpoint {
                    ip: "10.89.0.3".to_string(),
                    port: 5000,
                },
            ],
            network: "orchestrator-net".to_string(),
        };
        let joined = lb_run_args(&req).join(" ");
        assert!(joined.contains("--name default-svc-health"));
        assert!(joined.contains("--network-alias health"));
        assert!(joined.contains("-p 2000:2000"));
        assert!(joined.contains("-e SERVICE_PORT=2000"));
        assert!(joined.contains("-e BACKENDS=10.89.0.2:5000,10.89.0.3:5000"));
        assert!(joined.ends_with("orchestrator-lb"));
    }

    #[test]
    fn run_errors_are_classified() {
        assert!(matches!(
            classify_run_error("the container name \"default-web\" is already in use", "default-web", "nginx"),
            RuntimeError::NameConflict(_)
        ));
        assert!(matches!(
            classify_run_error("manifest unknown: manifest unknown", "x", "nope"),
            RuntimeError::ImagePullFailed { .. }
        ));
        assert!(matches!(
            classify_run_error("cannot connect to the socket", "x", "nginx"),
            RuntimeError::Other(_)
        ));
    }
}
