use k8s_openapi::api::core::v1::Pod;
use serde_json::{Value, json};

use crate::config::OperatorConfig;
use crate::resources::{CPU, ContainerResources, MEMORY};

/* ============================= TYPES ============================= */

/// Result of evaluating a pod against the admission checks.
#[derive(Debug, Clone)]
pub struct AdmissionVerdict {
    pub allowed: bool,
    pub message: Option<String>,
    pub violations: Vec<String>,
}

impl AdmissionVerdict {
    fn allow() -> Self {
        Self {
            allowed: true,
            message: None,
            violations: Vec::new(),
        }
    }
}

/* ============================= VALIDATION ============================= */

/// Validate a pod creation against structural sanity and the operator's
/// hard resource bounds.
///
/// Only declared resources are judged: a container with no requests is
/// legal (it is simply BestEffort/Burstable and will never be resized
/// into a different class). Pods without a spec are allowed (fail-open).
pub fn validate_pod_admission(pod: &Pod, config: &OperatorConfig) -> AdmissionVerdict {
    let Some(spec) = &pod.spec else {
        return AdmissionVerdict::allow();
    };

    let mut violations = Vec::new();

    for container in &spec.containers {
        let r = ContainerResources::from_container(container);
        let name = &container.name;

        if let (Some(req), Some(lim)) = (r.cpu_request_milli, r.cpu_limit_milli)
            && req > lim
        {
            violations.push(format!("container '{name}' cpu request exceeds limit"));
        }
        if let (Some(req), Some(lim)) = (r.memory_request_bytes, r.memory_limit_bytes)
            && req > lim
        {
            violations.push(format!("container '{name}' memory request exceeds limit"));
        }

        if r.cpu_request_milli.is_some_and(|v| v < config.min_cpu_request_milli) {
            violations.push(format!(
                "container '{name}' cpu request below operator minimum"
            ));
        }
        if r.memory_request_bytes
            .is_some_and(|v| v < config.min_memory_request_bytes)
        {
            violations.push(format!(
                "container '{name}' memory request below operator minimum"
            ));
        }
        if r.cpu_limit_milli.is_some_and(|v| v > config.max_cpu_limit_milli) {
            violations.push(format!(
                "container '{name}' cpu limit above operator maximum"
            ));
        }
        if r.memory_limit_bytes
            .is_some_and(|v| v > config.max_memory_limit_bytes)
        {
            violations.push(format!(
                "container '{name}' memory limit above operator maximum"
            ));
        }
    }

    if violations.is_empty() {
        AdmissionVerdict::allow()
    } else {
        let message = format_denial_message(&violations);
        AdmissionVerdict {
            allowed: false,
            message: Some(message),
            violations,
        }
    }
}

/// Format a human-readable denial message from a list of violations.
pub fn format_denial_message(violations: &[String]) -> String {
    format!("Denied by right-sizer admission policy: {}", violations.join(", "))
}

/* ============================= MUTATION ============================= */

/// JSON-Patch operations injecting `resizePolicy: NotRequired` entries
/// where a container declares none.
///
/// Off unless the updateResizePolicy feature is on. Idempotent: existing
/// declarations (including deliberate RestartContainer) are preserved,
/// and `None` is returned when nothing needs to change.
pub fn mutate_pod_admission(pod: &Pod, config: &OperatorConfig) -> Option<Vec<Value>> {
    if !config.update_resize_policy {
        return None;
    }
    let spec = pod.spec.as_ref()?;

    let mut operations = Vec::new();

    for (index, container) in spec.containers.iter().enumerate() {
        let declared: Vec<&str> = container
            .resize_policy
            .as_ref()
            .map(|ps| ps.iter().map(|p| p.resource_name.as_str()).collect())
            .unwrap_or_default();

        let missing: Vec<&str> = [CPU, MEMORY]
            .into_iter()
            .filter(|r| !declared.contains(r))
            .collect();
        if missing.is_empty() {
            continue;
        }

        match &container.resize_policy {
            None => {
                let entries: Vec<Value> = missing
                    .iter()
                    .map(|r| json!({ "resourceName": r, "restartPolicy": "NotRequired" }))
                    .collect();
                operations.push(json!({
                    "op": "add",
                    "path": format!("/spec/containers/{index}/resizePolicy"),
                    "value": entries,
                }));
            }
            Some(existing) => {
                let mut entries: Vec<Value> = existing
                    .iter()
                    .map(|p| {
                        json!({
                            "resourceName": p.resource_name,
                            "restartPolicy": p.restart_policy,
                        })
                    })
                    .collect();
                for r in &missing {
                    entries.push(json!({ "resourceName": r, "restartPolicy": "NotRequired" }));
                }
                operations.push(json!({
                    "op": "replace",
                    "path": format!("/spec/containers/{index}/resizePolicy"),
                    "value": entries,
                }));
            }
        }
    }

    if operations.is_empty() {
        None
    } else {
        Some(operations)
    }
}

/* ============================= TESTS ============================= */
