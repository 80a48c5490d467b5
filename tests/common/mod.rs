#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::{
    Container, ContainerResizePolicy, Pod, PodSpec, PodStatus, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ErrorResponse;
use serde_json::Value;

use right_sizer::api::{ControlPlane, PodEvent};
use right_sizer::error::{Result, SizingError};
use right_sizer::usage::{ContainerUsage, MetricsSource, PodUsage};
use right_sizer::workload::WorkloadRef;

pub const MIB: u64 = 1024 * 1024;

/* ============================= POD BUILDERS ============================= */

pub struct ContainerSpec<'a> {
    pub name: &'a str,
    pub cpu_request: &'a str,
    pub cpu_limit: &'a str,
    pub memory_request: &'a str,
    pub memory_limit: &'a str,
    /// (resource, restartPolicy) resizePolicy entries.
    pub resize_policy: &'a [(&'a str, &'a str)],
}

impl<'a> ContainerSpec<'a> {
    pub fn new(
        name: &'a str,
        cpu_request: &'a str,
        cpu_limit: &'a str,
        memory_request: &'a str,
        memory_limit: &'a str,
    ) -> Self {
        Self {
            name,
            cpu_request,
            cpu_limit,
            memory_request,
            memory_limit,
            resize_policy: &[],
        }
    }
}

pub fn make_sized_pod(namespace: &str, name: &str, node: &str, containers: &[ContainerSpec<'_>]) -> Pod {
    let containers: Vec<Container> = containers
        .iter()
        .map(|c| Container {
            name: c.name.to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity(c.cpu_request.to_string())),
                    ("memory".to_string(), Quantity(c.memory_request.to_string())),
                ])),
                limits: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity(c.cpu_limit.to_string())),
                    ("memory".to_string(), Quantity(c.memory_limit.to_string())),
                ])),
                ..Default::default()
            }),
            resize_policy: if c.resize_policy.is_empty() {
                None
            } else {
                Some(
                    c.resize_policy
                        .iter()
                        .map(|(resource, policy)| ContainerResizePolicy {
                            resource_name: resource.to_string(),
                            restart_policy: policy.to_string(),
                        })
                        .collect(),
                )
            },
            ..Default::default()
        })
        .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            containers,
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

pub fn with_priority(mut pod: Pod, priority: i32) -> Pod {
    if let Some(spec) = &mut pod.spec {
        spec.priority = Some(priority);
    }
    pod
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
}

pub fn make_node(name: &str, cpu: &str, memory: &str) -> k8s_openapi::api::core::v1::Node {
    k8s_openapi::api::core::v1::Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(k8s_openapi::api::core::v1::NodeStatus {
            allocatable: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(cpu.to_string())),
                ("memory".to_string(), Quantity(memory.to_string())),
            ])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/* ============================= FAKE METRICS ============================= */

/// Canned usage samples keyed by `namespace/pod`.
#[derive(Default)]
pub struct FakeMetrics {
    samples: Mutex<HashMap<String, PodUsage>>,
}

impl FakeMetrics {
    pub fn set(&self, namespace: &str, pod: &str, container: &str, cpu_milli: u64, memory_bytes: u64) {
        let mut samples = self.samples.lock().unwrap();
        let usage = samples.entry(format!("{namespace}/{pod}")).or_default();
        usage.containers.insert(
            container.to_string(),
            ContainerUsage {
                cpu_milli,
                memory_bytes,
            },
        );
    }

    pub fn clear(&self, namespace: &str, pod: &str) {
        self.samples.lock().unwrap().remove(&format!("{namespace}/{pod}"));
    }
}

impl MetricsSource for FakeMetrics {
    async fn fetch(&self, namespace: &str, pod: &str) -> Result<PodUsage> {
        self.samples
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{pod}"))
            .cloned()
            .ok_or_else(|| SizingError::MetricsUnavailable("no sample".to_string()))
    }
}

/* ============================= FAKE CONTROL PLANE ============================= */

/// Everything the core wrote, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Resize {
        namespace: String,
        pod: String,
        patch: Value,
    },
    Status {
        namespace: String,
        pod: String,
        patch: Value,
    },
    Annotate {
        namespace: String,
        pod: String,
        patch: Value,
    },
    WorkloadPatch {
        workload: String,
        patch: Value,
    },
    Event(PodEvent),
}

/// Records every write and can inject API failures, so full pipeline
/// runs execute without a cluster while still asserting wire behavior.
#[derive(Default)]
pub struct FakeControlPlane {
    pub calls: Mutex<Vec<ApiCall>>,
    resize_errors: Mutex<VecDeque<(u16, String)>>,
    template_containers: Mutex<Vec<Container>>,
}

impl FakeControlPlane {
    /// Fail the next resize call with this API error.
    pub fn push_resize_error(&self, code: u16, message: &str) {
        self.resize_errors
            .lock()
            .unwrap()
            .push_back((code, message.to_string()));
    }

    pub fn set_template_containers(&self, containers: Vec<Container>) {
        *self.template_containers.lock().unwrap() = containers;
    }

    pub fn all_calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Resize patches only, in the order they were issued.
    pub fn resize_calls(&self) -> Vec<Value> {
        self.all_calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Resize { patch, .. } => Some(patch),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<PodEvent> {
        self.all_calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn event_reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }

    pub fn workload_patches(&self) -> Vec<(String, Value)> {
        self.all_calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::WorkloadPatch { workload, patch } => Some((workload, patch)),
                _ => None,
            })
            .collect()
    }

    pub fn status_patches(&self) -> Vec<Value> {
        self.all_calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Status { patch, .. } => Some(patch),
                _ => None,
            })
            .collect()
    }

    pub fn annotation_patches(&self) -> Vec<Value> {
        self.all_calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::Annotate { patch, .. } => Some(patch),
                _ => None,
            })
            .collect()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl ControlPlane for FakeControlPlane {
    async fn resize_pod(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        if let Some((code, message)) = self.resize_errors.lock().unwrap().pop_front() {
            return Err(SizingError::Api(kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message,
                reason: String::new(),
                code,
            })));
        }
        self.calls.lock().unwrap().push(ApiCall::Resize {
            namespace: namespace.to_string(),
            pod: name.to_string(),
            patch: patch.clone(),
        });
        Ok(())
    }

    async fn patch_pod_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        self.calls.lock().unwrap().push(ApiCall::Status {
            namespace: namespace.to_string(),
            pod: name.to_string(),
            patch: patch.clone(),
        });
        Ok(())
    }

    async fn annotate_pod(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        self.calls.lock().unwrap().push(ApiCall::Annotate {
            namespace: namespace.to_string(),
            pod: name.to_string(),
            patch: patch.clone(),
        });
        Ok(())
    }

    async fn workload_containers(&self, _workload: &WorkloadRef) -> Result<Vec<Container>> {
        Ok(self.template_containers.lock().unwrap().clone())
    }

    async fn patch_workload(&self, workload: &WorkloadRef, patch: &Value) -> Result<()> {
        self.calls.lock().unwrap().push(ApiCall::WorkloadPatch {
            workload: workload.key(),
            patch: patch.clone(),
        });
        Ok(())
    }

    async fn publish_event(&self, event: PodEvent) -> Result<()> {
        self.calls.lock().unwrap().push(ApiCall::Event(event));
        Ok(())
    }
}
