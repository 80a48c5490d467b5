use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/* ============================= CONSTANTS ============================= */

pub const CPU: &str = "cpu";
pub const MEMORY: &str = "memory";

const MIB: u64 = 1024 * 1024;

/* ============================= QUANTITY PARSING ============================= */

/// Parse a CPU quantity string (e.g. "100m", "1", "0.5", "500000n") to millicores.
///
/// Unparseable input yields 0 so callers can treat it like a missing sample
/// instead of failing the whole pod.
pub fn parse_cpu_millis(quantity: &str) -> u64 {
    let quantity = quantity.trim();

    if let Some(val) = quantity.strip_suffix('n') {
        // Nanocores to millicores
        val.parse::<u64>().map(|n| n / 1_000_000).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('u') {
        // Microcores to millicores
        val.parse::<u64>().map(|u| u / 1_000).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('m') {
        val.parse::<u64>().unwrap_or(0)
    } else {
        // Whole cores to millicores
        quantity
            .parse::<f64>()
            .map(|c| (c * 1000.0).round() as u64)
            .unwrap_or(0)
    }
}

/// Parse a memory quantity string (e.g. "128Mi", "1Gi", "500M", "1048576") to bytes.
pub fn parse_memory_bytes(quantity: &str) -> u64 {
    let quantity = quantity.trim();

    if let Some(val) = quantity.strip_suffix("Ki") {
        val.parse::<u64>().map(|k| k * 1024).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix("Mi") {
        val.parse::<u64>().map(|m| m * MIB).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix("Gi") {
        val.parse::<u64>().map(|g| g * 1024 * MIB).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix("Ti") {
        val.parse::<u64>().map(|t| t * 1024 * 1024 * MIB).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('k').or_else(|| quantity.strip_suffix('K')) {
        val.parse::<u64>().map(|k| k * 1000).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('M') {
        val.parse::<u64>().map(|m| m * 1_000_000).unwrap_or(0)
    } else if let Some(val) = quantity.strip_suffix('G') {
        val.parse::<u64>().map(|g| g * 1_000_000_000).unwrap_or(0)
    } else {
        quantity.parse::<u64>().unwrap_or(0)
    }
}

/* ============================= QUANTITY FORMATTING ============================= */

/// Format millicores as a Kubernetes CPU quantity ("360m").
pub fn format_cpu(millis: u64) -> String {
    format!("{millis}m")
}

/// Format bytes as a Kubernetes memory quantity.
///
/// Values aligned to 1Mi render as "240Mi"; anything else falls back to
/// plain bytes so the round-trip stays exact.
pub fn format_memory(bytes: u64) -> String {
    if bytes > 0 && bytes % MIB == 0 {
        format!("{}Mi", bytes / MIB)
    } else {
        format!("{bytes}")
    }
}

/// Round bytes up to the nearest MiB boundary.
pub fn round_up_mib(bytes: u64) -> u64 {
    if bytes == 0 {
        return 0;
    }
    bytes.div_ceil(MIB) * MIB
}

/* ============================= CONTAINER RESOURCES ============================= */

/// Resolved requests/limits of a single container, in millicores and bytes.
///
/// `None` means the field is absent on the container spec, which matters
/// for QoS classification — it is not the same as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerResources {
    pub name: String,
    pub cpu_request_milli: Option<u64>,
    pub cpu_limit_milli: Option<u64>,
    pub memory_request_bytes: Option<u64>,
    pub memory_limit_bytes: Option<u64>,
}

impl ContainerResources {
    pub fn from_container(container: &Container) -> Self {
        let resources = container.resources.as_ref();

        fn get<'a>(map: Option<&'a BTreeMap<String, Quantity>>, key: &str) -> Option<&'a Quantity> {
            map.and_then(|m| m.get(key))
        }

        let requests = resources.and_then(|r| r.requests.as_ref());
        let limits = resources.and_then(|r| r.limits.as_ref());

        Self {
            name: container.name.clone(),
            cpu_request_milli: get(requests, CPU).map(|q| parse_cpu_millis(&q.0)),
            cpu_limit_milli: get(limits, CPU).map(|q| parse_cpu_millis(&q.0)),
            memory_request_bytes: get(requests, MEMORY).map(|q| parse_memory_bytes(&q.0)),
            memory_limit_bytes: get(limits, MEMORY).map(|q| parse_memory_bytes(&q.0)),
        }
    }

    pub fn from_pod(pod: &Pod) -> Vec<Self> {
        pod.spec
            .as_ref()
            .map(|s| s.containers.iter().map(Self::from_container).collect())
            .unwrap_or_default()
    }

    fn has_any(&self) -> bool {
        self.cpu_request_milli.is_some()
            || self.cpu_limit_milli.is_some()
            || self.memory_request_bytes.is_some()
            || self.memory_limit_bytes.is_some()
    }

    fn is_guaranteed(&self) -> bool {
        matches!(
            (self.cpu_request_milli, self.cpu_limit_milli),
            (Some(req), Some(lim)) if req == lim
        ) && matches!(
            (self.memory_request_bytes, self.memory_limit_bytes),
            (Some(req), Some(lim)) if req == lim
        )
    }
}

/* ============================= QOS ============================= */

/// Kubernetes QoS class derived from a pod's container resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosClass {
    Guaranteed,
    Burstable,
    BestEffort,
}

impl QosClass {
    /// Classify a set of containers the way the kubelet does:
    /// Guaranteed requires req==lim for cpu and memory on every container,
    /// BestEffort requires no requests or limits anywhere, everything else
    /// is Burstable.
    pub fn of_containers(containers: &[ContainerResources]) -> Self {
        if containers.is_empty() || containers.iter().all(|c| !c.has_any()) {
            return QosClass::BestEffort;
        }
        if containers.iter().all(|c| c.is_guaranteed()) {
            return QosClass::Guaranteed;
        }
        QosClass::Burstable
    }

    pub fn of_pod(pod: &Pod) -> Self {
        Self::of_containers(&ContainerResources::from_pod(pod))
    }
}

impl std::fmt::Display for QosClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QosClass::Guaranteed => "Guaranteed",
            QosClass::Burstable => "Burstable",
            QosClass::BestEffort => "BestEffort",
        };
        f.write_str(s)
    }
}

/* ============================= RESIZE POLICY ============================= */

/// Per-resource container restart requirement for in-place resizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartRequirement {
    NotRequired,
    RestartContainer,
}

/// Read the restart requirement a container declares for `resource`.
///
/// Absent resizePolicy entries default to NotRequired, matching the
/// apiserver's defaulting.
pub fn restart_requirement(container: &Container, resource: &str) -> RestartRequirement {
    let declared = container
        .resize_policy
        .as_ref()
        .and_then(|policies| {
            policies
                .iter()
                .find(|p| p.resource_name == resource)
                .map(|p| p.restart_policy.clone())
        });

    match declared.as_deref() {
        Some("RestartContainer") => RestartRequirement::RestartContainer,
        _ => RestartRequirement::NotRequired,
    }
}

/* ============================= TESTS ============================= */
