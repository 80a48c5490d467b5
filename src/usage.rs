use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::api::{Api, ApiResource, DynamicObject};
use kube::Client;

use crate::error::{Result, SizingError};
use crate::resources::{parse_cpu_millis, parse_memory_bytes};

/* ============================= TYPES ============================= */

/// Observed usage of one container at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerUsage {
    pub cpu_milli: u64,
    pub memory_bytes: u64,
}

/// Usage of every container in a pod, plus when it was sampled.
#[derive(Debug, Clone, Default)]
pub struct PodUsage {
    pub containers: HashMap<String, ContainerUsage>,
    pub sampled_at: Option<DateTime<Utc>>,
}

impl PodUsage {
    /// Age of the sample relative to `now`; `None` when the provider did
    /// not stamp it.
    pub fn sample_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.sampled_at
            .map(|t| now.signed_duration_since(t).to_std().unwrap_or_default())
    }

    /// A sample older than `max_age` must not drive a resize.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.sample_age(now) {
            Some(age) => age > max_age,
            None => false,
        }
    }
}

/* ============================= SOURCE TRAIT ============================= */

/// Where per-container usage samples come from.
///
/// Implementations return `MetricsUnavailable` when the provider cannot
/// answer at all; a transiently missing reading inside an otherwise valid
/// response is reported as a zero-valued entry so callers can skip the
/// container without treating the whole pod as failed.
pub trait MetricsSource: Send + Sync {
    fn fetch(
        &self,
        namespace: &str,
        pod: &str,
    ) -> impl Future<Output = Result<PodUsage>> + Send;
}

/* ============================= METRICS API SOURCE ============================= */

/// Reads `metrics.k8s.io/v1beta1` pod metrics (metrics-server).
#[derive(Clone)]
pub struct MetricsApiSource {
    client: Client,
}

impl MetricsApiSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_resource() -> ApiResource {
        ApiResource {
            group: "metrics.k8s.io".to_string(),
            version: "v1beta1".to_string(),
            api_version: "metrics.k8s.io/v1beta1".to_string(),
            kind: "PodMetrics".to_string(),
            plural: "pods".to_string(),
        }
    }
}

impl MetricsSource for MetricsApiSource {
    async fn fetch(&self, namespace: &str, pod: &str) -> Result<PodUsage> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &Self::api_resource());

        let obj = api
            .get(pod)
            .await
            .map_err(|e| SizingError::MetricsUnavailable(e.to_string()))?;

        Ok(parse_pod_metrics(&obj.data))
    }
}

/// Decode the wire form of a PodMetrics object into `PodUsage`.
///
/// Unparseable usage strings become zero-valued entries, never missing
/// keys, so a flaky provider degrades to "skip this container".
pub fn parse_pod_metrics(data: &serde_json::Value) -> PodUsage {
    let sampled_at = data["timestamp"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    let mut containers = HashMap::new();
    if let Some(entries) = data["containers"].as_array() {
        for entry in entries {
            let Some(name) = entry["name"].as_str() else {
                continue;
            };
            let cpu = entry["usage"]["cpu"].as_str().map(parse_cpu_millis).unwrap_or(0);
            let memory = entry["usage"]["memory"]
                .as_str()
                .map(parse_memory_bytes)
                .unwrap_or(0);
            containers.insert(
                name.to_string(),
                ContainerUsage {
                    cpu_milli: cpu,
                    memory_bytes: memory,
                },
            );
        }
    }

    PodUsage {
        containers,
        sampled_at,
    }
}

/* ============================= TESTS ============================= */
