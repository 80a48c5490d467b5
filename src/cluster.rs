use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{LimitRange, Node, Pod, ResourceQuota};

use crate::resources::{CPU, MEMORY, parse_cpu_millis, parse_memory_bytes};

/* ============================= VIEWS ============================= */

/// Capacity picture of one node: what the scheduler may hand out and
/// what pods already claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeView {
    pub name: String,
    pub allocatable_cpu_milli: u64,
    pub allocatable_memory_bytes: u64,
    pub requested_cpu_milli: u64,
    pub requested_memory_bytes: u64,
}

impl NodeView {
    /// Headroom available to a pod that currently requests
    /// (`pod_cpu`, `pod_memory`): its own requests are handed back before
    /// comparing, since a resize replaces them rather than adding on top.
    pub fn headroom(&self, pod_cpu_milli: u64, pod_memory_bytes: u64) -> (u64, u64) {
        let other_cpu = self.requested_cpu_milli.saturating_sub(pod_cpu_milli);
        let other_memory = self.requested_memory_bytes.saturating_sub(pod_memory_bytes);
        (
            self.allocatable_cpu_milli.saturating_sub(other_cpu),
            self.allocatable_memory_bytes.saturating_sub(other_memory),
        )
    }
}

/// One ResourceQuota, reduced to the compute resources the sizer touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaView {
    pub name: String,
    pub hard_request_cpu: Option<u64>,
    pub hard_request_memory: Option<u64>,
    pub hard_limit_cpu: Option<u64>,
    pub hard_limit_memory: Option<u64>,
    pub used_request_cpu: u64,
    pub used_request_memory: u64,
    pub used_limit_cpu: u64,
    pub used_limit_memory: u64,
}

/// One LimitRange, reduced to container/pod compute constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitRangeView {
    pub name: String,
    pub container_min_cpu: Option<u64>,
    pub container_min_memory: Option<u64>,
    pub container_max_cpu: Option<u64>,
    pub container_max_memory: Option<u64>,
    pub max_limit_request_ratio_cpu: Option<f64>,
    pub max_limit_request_ratio_memory: Option<f64>,
    pub pod_max_cpu: Option<u64>,
    pub pod_max_memory: Option<u64>,
}

/* ============================= CACHE ============================= */

/// TTL-stamped snapshots of the cluster objects the validator consults.
///
/// Single writer (the reconciler's watch/refresh path), many readers.
/// `invalidate_*` marks a section stale so the next cycle refreshes it
/// before trusting the data again.
#[derive(Debug, Default)]
pub struct ClusterCache {
    nodes: HashMap<String, NodeView>,
    nodes_refreshed: Option<DateTime<Utc>>,

    quotas: HashMap<String, Vec<QuotaView>>,
    quotas_refreshed: Option<DateTime<Utc>>,

    limit_ranges: HashMap<String, Vec<LimitRangeView>>,
    limit_ranges_refreshed: Option<DateTime<Utc>>,
}

impl ClusterCache {
    pub fn refresh_nodes(&mut self, nodes: &[Node], pods: &[Pod], now: DateTime<Utc>) {
        let mut views: HashMap<String, NodeView> = nodes
            .iter()
            .filter_map(|n| {
                let name = n.metadata.name.clone()?;
                let allocatable = n.status.as_ref().and_then(|s| s.allocatable.as_ref());
                Some((
                    name.clone(),
                    NodeView {
                        name,
                        allocatable_cpu_milli: allocatable
                            .and_then(|a| a.get(CPU))
                            .map(|q| parse_cpu_millis(&q.0))
                            .unwrap_or(0),
                        allocatable_memory_bytes: allocatable
                            .and_then(|a| a.get(MEMORY))
                            .map(|q| parse_memory_bytes(&q.0))
                            .unwrap_or(0),
                        requested_cpu_milli: 0,
                        requested_memory_bytes: 0,
                    },
                ))
            })
            .collect();

        for pod in pods {
            if is_terminal(pod) {
                continue;
            }
            let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) else {
                continue;
            };
            let Some(view) = views.get_mut(node_name) else {
                continue;
            };
            let (cpu, memory) = pod_requested(pod);
            view.requested_cpu_milli += cpu;
            view.requested_memory_bytes += memory;
        }

        self.nodes = views;
        self.nodes_refreshed = Some(now);
    }

    pub fn refresh_quotas(&mut self, quotas: &[ResourceQuota], now: DateTime<Utc>) {
        let mut map: HashMap<String, Vec<QuotaView>> = HashMap::new();
        for quota in quotas {
            let namespace = quota.metadata.namespace.clone().unwrap_or_default();
            map.entry(namespace).or_default().push(quota_view(quota));
        }
        self.quotas = map;
        self.quotas_refreshed = Some(now);
    }

    pub fn refresh_limit_ranges(&mut self, ranges: &[LimitRange], now: DateTime<Utc>) {
        let mut map: HashMap<String, Vec<LimitRangeView>> = HashMap::new();
        for range in ranges {
            let namespace = range.metadata.namespace.clone().unwrap_or_default();
            map.entry(namespace).or_default().push(limit_range_view(range));
        }
        self.limit_ranges = map;
        self.limit_ranges_refreshed = Some(now);
    }

    pub fn node(&self, name: &str) -> Option<&NodeView> {
        self.nodes.get(name)
    }

    pub fn quotas_in(&self, namespace: &str) -> &[QuotaView] {
        self.quotas.get(namespace).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn limit_ranges_in(&self, namespace: &str) -> &[LimitRangeView] {
        self.limit_ranges
            .get(namespace)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn nodes_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        fresh(self.nodes_refreshed, now, ttl)
    }

    pub fn quotas_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        fresh(self.quotas_refreshed, now, ttl)
    }

    pub fn limit_ranges_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        fresh(self.limit_ranges_refreshed, now, ttl)
    }

    pub fn invalidate_nodes(&mut self) {
        self.nodes_refreshed = None;
    }

    pub fn invalidate_quotas(&mut self) {
        self.quotas_refreshed = None;
    }

    pub fn invalidate_limit_ranges(&mut self) {
        self.limit_ranges_refreshed = None;
    }
}

fn fresh(refreshed: Option<DateTime<Utc>>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match refreshed {
        Some(at) => now.signed_duration_since(at).to_std().unwrap_or_default() <= ttl,
        None => false,
    }
}

/* ============================= EXTRACTION ============================= */

fn is_terminal(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Sum of a pod's container CPU/memory requests.
pub fn pod_requested(pod: &Pod) -> (u64, u64) {
    let mut cpu = 0;
    let mut memory = 0;
    if let Some(spec) = &pod.spec {
        for container in &spec.containers {
            if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref())
            {
                cpu += requests.get(CPU).map(|q| parse_cpu_millis(&q.0)).unwrap_or(0);
                memory += requests
                    .get(MEMORY)
                    .map(|q| parse_memory_bytes(&q.0))
                    .unwrap_or(0);
            }
        }
    }
    (cpu, memory)
}

fn quota_view(quota: &ResourceQuota) -> QuotaView {
    let hard = quota.spec.as_ref().and_then(|s| s.hard.as_ref());
    let used = quota.status.as_ref().and_then(|s| s.used.as_ref());

    let get_cpu = |map: Option<&std::collections::BTreeMap<
        String,
        k8s_openapi::apimachinery::pkg::api::resource::Quantity,
    >>,
                   keys: &[&str]| {
        map.and_then(|m| keys.iter().find_map(|k| m.get(*k)))
            .map(|q| parse_cpu_millis(&q.0))
    };
    let get_memory = |map: Option<&std::collections::BTreeMap<
        String,
        k8s_openapi::apimachinery::pkg::api::resource::Quantity,
    >>,
                      keys: &[&str]| {
        map.and_then(|m| keys.iter().find_map(|k| m.get(*k)))
            .map(|q| parse_memory_bytes(&q.0))
    };

    QuotaView {
        name: quota.metadata.name.clone().unwrap_or_default(),
        // Bare "cpu"/"memory" in a quota mean requests.
        hard_request_cpu: get_cpu(hard, &["requests.cpu", "cpu"]),
        hard_request_memory: get_memory(hard, &["requests.memory", "memory"]),
        hard_limit_cpu: get_cpu(hard, &["limits.cpu"]),
        hard_limit_memory: get_memory(hard, &["limits.memory"]),
        used_request_cpu: get_cpu(used, &["requests.cpu", "cpu"]).unwrap_or(0),
        used_request_memory: get_memory(used, &["requests.memory", "memory"]).unwrap_or(0),
        used_limit_cpu: get_cpu(used, &["limits.cpu"]).unwrap_or(0),
        used_limit_memory: get_memory(used, &["limits.memory"]).unwrap_or(0),
    }
}

fn limit_range_view(range: &LimitRange) -> LimitRangeView {
    let mut view = LimitRangeView {
        name: range.metadata.name.clone().unwrap_or_default(),
        ..Default::default()
    };

    let Some(spec) = &range.spec else {
        return view;
    };

    for item in &spec.limits {
        let get_cpu = |m: &Option<
            std::collections::BTreeMap<
                String,
                k8s_openapi::apimachinery::pkg::api::resource::Quantity,
            >,
        >| m.as_ref().and_then(|m| m.get(CPU)).map(|q| parse_cpu_millis(&q.0));
        let get_memory = |m: &Option<
            std::collections::BTreeMap<
                String,
                k8s_openapi::apimachinery::pkg::api::resource::Quantity,
            >,
        >| {
            m.as_ref()
                .and_then(|m| m.get(MEMORY))
                .map(|q| parse_memory_bytes(&q.0))
        };

        match item.type_.as_str() {
            "Container" => {
                view.container_min_cpu = get_cpu(&item.min);
                view.container_min_memory = get_memory(&item.min);
                view.container_max_cpu = get_cpu(&item.max);
                view.container_max_memory = get_memory(&item.max);
                view.max_limit_request_ratio_cpu = item
                    .max_limit_request_ratio
                    .as_ref()
                    .and_then(|m| m.get(CPU))
                    .and_then(|q| q.0.parse::<f64>().ok());
                view.max_limit_request_ratio_memory = item
                    .max_limit_request_ratio
                    .as_ref()
                    .and_then(|m| m.get(MEMORY))
                    .and_then(|q| q.0.parse::<f64>().ok());
            }
            "Pod" => {
                view.pod_max_cpu = get_cpu(&item.max);
                view.pod_max_memory = get_memory(&item.max);
            }
            _ => {}
        }
    }

    view
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, LimitRangeItem, LimitRangeSpec, NodeStatus, PodSpec, PodStatus,
        ResourceQuotaSpec, ResourceQuotaStatus, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    const MIB: u64 = 1024 * 1024;

    fn node(name: &str, cpu: &str, memory: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                allocatable: Some(BTreeMap::from([
                    (CPU.to_string(), Quantity(cpu.to_string())),
                    (MEMORY.to_string(), Quantity(memory.to_string())),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_on(node_name: &str, cpu_request: &str, memory_request: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("p".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node_name.to_string()),
                containers: vec![Container {
                    name: "main".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(BTreeMap::from([
                            (CPU.to_string(), Quantity(cpu_request.to_string())),
                            (MEMORY.to_string(), Quantity(memory_request.to_string())),
                        ])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_node_refresh_sums_requests() {
        let mut cache = ClusterCache::default();
        let now = Utc::now();
        cache.refresh_nodes(
            &[node("n1", "4", "8Gi")],
            &[
                pod_on("n1", "500m", "512Mi", "Running"),
                pod_on("n1", "250m", "256Mi", "Running"),
                pod_on("n1", "1", "1Gi", "Succeeded"), // terminal, ignored
                pod_on("n2", "1", "1Gi", "Running"),   // other node
            ],
            now,
        );

        let view = cache.node("n1").unwrap();
        assert_eq!(view.allocatable_cpu_milli, 4000);
        assert_eq!(view.allocatable_memory_bytes, 8 * 1024 * MIB);
        assert_eq!(view.requested_cpu_milli, 750);
        assert_eq!(view.requested_memory_bytes, 768 * MIB);
    }

    #[test]
    fn test_node_headroom_returns_own_requests() {
        let view = NodeView {
            name: "n1".to_string(),
            allocatable_cpu_milli: 4000,
            allocatable_memory_bytes: 8 * 1024 * MIB,
            requested_cpu_milli: 3800,
            requested_memory_bytes: 6 * 1024 * MIB,
        };
        // The pod itself requests 500m/1Gi of that total.
        let (cpu, memory) = view.headroom(500, 1024 * MIB);
        assert_eq!(cpu, 700);
        assert_eq!(memory, 3 * 1024 * MIB);
    }

    #[test]
    fn test_freshness_and_invalidation() {
        let mut cache = ClusterCache::default();
        let now = Utc::now();
        let ttl = Duration::from_secs(30);

        assert!(!cache.nodes_fresh(now, ttl));
        cache.refresh_nodes(&[node("n1", "1", "1Gi")], &[], now);
        assert!(cache.nodes_fresh(now, ttl));
        assert!(!cache.nodes_fresh(now + chrono::Duration::seconds(31), ttl));

        cache.invalidate_nodes();
        assert!(!cache.nodes_fresh(now, ttl));
        // The data itself survives invalidation; only trust expires.
        assert!(cache.node("n1").is_some());
    }

    #[test]
    fn test_quota_view_parsing() {
        let quota = ResourceQuota {
            metadata: ObjectMeta {
                name: Some("compute".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec: Some(ResourceQuotaSpec {
                hard: Some(BTreeMap::from([
                    ("requests.cpu".to_string(), Quantity("10".to_string())),
                    ("limits.memory".to_string(), Quantity("32Gi".to_string())),
                ])),
                ..Default::default()
            }),
            status: Some(ResourceQuotaStatus {
                used: Some(BTreeMap::from([
                    ("requests.cpu".to_string(), Quantity("9500m".to_string())),
                    ("limits.memory".to_string(), Quantity("30Gi".to_string())),
                ])),
                ..Default::default()
            }),
        };

        let mut cache = ClusterCache::default();
        cache.refresh_quotas(&[quota], Utc::now());

        let views = cache.quotas_in("prod");
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].hard_request_cpu, Some(10_000));
        assert_eq!(views[0].used_request_cpu, 9500);
        assert_eq!(views[0].hard_limit_memory, Some(32 * 1024 * MIB));
        assert_eq!(views[0].hard_request_memory, None);
        assert!(cache.quotas_in("dev").is_empty());
    }

    #[test]
    fn test_bare_cpu_quota_key_means_requests() {
        let quota = ResourceQuota {
            metadata: ObjectMeta {
                name: Some("legacy".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec: Some(ResourceQuotaSpec {
                hard: Some(BTreeMap::from([(
                    CPU.to_string(),
                    Quantity("2".to_string()),
                )])),
                ..Default::default()
            }),
            status: None,
        };

        let mut cache = ClusterCache::default();
        cache.refresh_quotas(&[quota], Utc::now());
        assert_eq!(cache.quotas_in("prod")[0].hard_request_cpu, Some(2000));
    }

    #[test]
    fn test_limit_range_view_parsing() {
        let range = LimitRange {
            metadata: ObjectMeta {
                name: Some("bounds".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec: Some(LimitRangeSpec {
                limits: vec![
                    LimitRangeItem {
                        type_: "Container".to_string(),
                        min: Some(BTreeMap::from([(
                            CPU.to_string(),
                            Quantity("50m".to_string()),
                        )])),
                        max: Some(BTreeMap::from([(
                            MEMORY.to_string(),
                            Quantity("2Gi".to_string()),
                        )])),
                        max_limit_request_ratio: Some(BTreeMap::from([(
                            CPU.to_string(),
                            Quantity("4".to_string()),
                        )])),
                        ..Default::default()
                    },
                    LimitRangeItem {
                        type_: "Pod".to_string(),
                        max: Some(BTreeMap::from([(
                            CPU.to_string(),
                            Quantity("8".to_string()),
                        )])),
                        ..Default::default()
                    },
                ],
            }),
        };

        let mut cache = ClusterCache::default();
        cache.refresh_limit_ranges(&[range], Utc::now());

        let views = cache.limit_ranges_in("prod");
        assert_eq!(views[0].container_min_cpu, Some(50));
        assert_eq!(views[0].container_max_memory, Some(2048 * MIB));
        assert_eq!(views[0].max_limit_request_ratio_cpu, Some(4.0));
        assert_eq!(views[0].pod_max_cpu, Some(8000));
    }
}
