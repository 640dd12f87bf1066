use crate::error::{Error, Result};
use crate::pod::PodSpec;
use crate::resource::Resource;
use crate::selector;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Validation("name must not be empty".to_string()));
    }
    if name.len() > 63 {
        return Err(Error::Validation(format!(
            "name '{}' exceeds 63 characters (got {})",
            name,
            name.len()
        )));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(Error::Validation(format!(
            "name '{}' must not start or end with a hyphen",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::Validation(format!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        )));
    }
    Ok(())
}

fn validate_pod_spec(spec: &PodSpec) -> Result<()> {
    if spec.containers.len() != 1 {
        return Err(Error::Validation(format!(
            "spec.containers must contain exactly 1 container (got {})",
            spec.containers.len()
        )));
    }
    let container = &spec.containers[0];
    if container.name.is_empty() {
        return Err(Error::Validation(
            "container name must not be empty".to_string(),
        ));
    }
    if container.image.is_empty() {
        return Err(Error::Validation(
            "container image must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validate a resource before it enters the store.
pub fn validate_resource(resource: &Resource) -> Result<()> {
    let meta = resource.meta();
    validate_name(&meta.name)?;
    validate_name(&meta.namespace)?;

    match resource {
        Resource::Pod(pod) => validate_pod_spec(&pod.spec),
        Resource::ReplicaSet(rs) => {
            if rs.spec.replicas < 0 {
                return Err(Error::Validation(format!(
                    "spec.replicas must be non-negative (got {})",
                    rs.spec.replicas
                )));
            }
            if rs.spec.selector.is_empty() {
                return Err(Error::Validation(
                    "spec.selector must have at least one key".to_string(),
                ));
            }
            if !selector::matches(&rs.spec.selector, &rs.spec.template.metadata.labels) {
                return Err(Error::Validation(
                    "spec.template labels must satisfy spec.selector".to_string(),
                ));
            }
            validate_pod_spec(&rs.spec.template.spec)
        }
        Resource::Service(svc) => {
            if svc.spec.ports.is_empty() {
                return Err(Error::Validation(
                    "spec.ports must have at least one entry".to_string(),
                ));
            }
            for port in &svc.spec.ports {
                if port.port == 0 {
                    return Err(Error::Validation("spec.ports port must be > 0".to_string()));
                }
                if port.protocol != "TCP" {
                    return Err(Error::Validation(format!(
                        "unsupported protocol '{}' (only TCP)",
                        port.protocol
                    )));
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ObjectMeta;
    use crate::pod::{ContainerSpec, Pod};
    use crate::replicaset::{PodTemplate, ReplicaSet, ReplicaSetSpec, TemplateMeta};
    use std::collections::HashMap;

    #[test]
    fn valid_names() {
        assert!(validate_name("nginx").is_ok());
        assert!(validate_name("my-app").is_ok());
        assert!(validate_name("app-123").is_ok());
        assert!(validate_name("a").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("My-App").is_err());
        assert!(validate_name("my_app").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("trailing-").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    fn pod(name: &str, containers: Vec<ContainerSpec>) -> Resource {
        Resource::Pod(Pod {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: ObjectMeta::named(name),
            spec: PodSpec { containers },
            status: Default::default(),
        })
    }

    fn container(image: &str) -> ContainerSpec {
        ContainerSpec {
            name: "main".to_string(),
            image: image.to_string(),
            env: HashMap::new(),
        }
    }

    #[test]
    fn pod_requires_exactly_one_container() {
        assert!(validate_resource(&pod("web", vec![container("nginx")])).is_ok());
        assert!(validate_resource(&pod("web", vec![])).is_err());
        assert!(
            validate_resource(&pod("web", vec![container("nginx"), container("redis")])).is_err()
        );
    }

    #[test]
    fn replicaset_rejects_negative_replicas_and_empty_selector() {
        let make = |replicas: i32, selector: HashMap<String, String>| {
            Resource::ReplicaSet(ReplicaSet {
                api_version: "apps/v1".to_string(),
                kind: "ReplicaSet".to_string(),
                metadata: ObjectMeta::named("web"),
                spec: ReplicaSetSpec {
                    replicas,
                    selector: selector.clone(),
                    template: PodTemplate {
                        metadata: TemplateMeta { labels: selector },
                        spec: PodSpec {
                            containers: vec![container("nginx")],
                        },
                    },
                },
                status: Default::default(),
            })
        };
        let selector: HashMap<String, String> =
            [("app".to_string(), "web".to_string())].into_iter().collect();
        assert!(validate_resource(&make(3, selector.clone())).is_ok());
        assert!(validate_resource(&make(-1, selector)).is_err());
        assert!(validate_resource(&make(3, HashMap::new())).is_err());
    }

    #[test]
    fn replicaset_template_must_match_selector() {
        let selector: HashMap<String, String> =
            [("app".to_string(), "web".to_string())].into_iter().collect();
        let rs = Resource::ReplicaSet(ReplicaSet {
            api_version: "apps/v1".to_string(),
            kind: "ReplicaSet".to_string(),
            metadata: ObjectMeta::named("web"),
            spec: ReplicaSetSpec {
                replicas: 1,
                selector,
                template: PodTemplate {
                    metadata: TemplateMeta {
                        labels: HashMap::new(),
                    },
                    spec: PodSpec {
                        containers: vec![container("nginx")],
                    },
                },
            },
            status: Default::default(),
        });
        assert!(validate_resource(&rs).is_err());
    }
}
