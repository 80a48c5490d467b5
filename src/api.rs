use std::future::Future;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Container, ObjectReference, Pod};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use serde_json::Value;

use crate::error::Result;
use crate::workload::WorkloadRef;

/// Field manager recorded on every write this operator makes.
pub const FIELD_MANAGER: &str = "right-sizer";

/* ============================= EVENTS ============================= */

/// A pod event about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodEvent {
    pub namespace: String,
    pub pod: String,
    pub reason: String,
    pub note: String,
    pub warning: bool,
}

/* ============================= SEAM ============================= */

/// Every write the sizing core performs against the control plane.
///
/// The operator wires in the kube-backed implementation; tests substitute
/// a recording fake so full pipeline runs need no cluster.
pub trait ControlPlane: Send + Sync {
    /// `PATCH pods/{name}/resize` — the only way resources on a running
    /// pod are ever changed.
    fn resize_pod(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Strategic-merge patch on the pod status subresource (conditions).
    fn patch_pod_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Merge patch on pod metadata (the observed-generation annotation).
    fn annotate_pod(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Read the containers of a workload's pod template.
    fn workload_containers(
        &self,
        workload: &WorkloadRef,
    ) -> impl Future<Output = Result<Vec<Container>>> + Send;

    /// Strategic-merge patch on a workload's pod template. The single
    /// permitted workload write: adding resizePolicy entries. Resources
    /// are never patched here.
    fn patch_workload(
        &self,
        workload: &WorkloadRef,
        patch: &Value,
    ) -> impl Future<Output = Result<()>> + Send;

    fn publish_event(&self, event: PodEvent) -> impl Future<Output = Result<()>> + Send;
}

/* ============================= KUBE IMPLEMENTATION ============================= */

#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
    reporter: Reporter,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.to_string(),
                instance: std::env::var("HOSTNAME").ok(),
            },
        }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER)
    }
}

impl ControlPlane for KubeControlPlane {
    async fn resize_pod(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        self.pods(namespace)
            .patch_subresource("resize", name, &Self::params(), &Patch::Strategic(patch))
            .await?;
        Ok(())
    }

    async fn patch_pod_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        self.pods(namespace)
            .patch_status(name, &Self::params(), &Patch::Strategic(patch))
            .await?;
        Ok(())
    }

    async fn annotate_pod(&self, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        self.pods(namespace)
            .patch(name, &Self::params(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn workload_containers(&self, workload: &WorkloadRef) -> Result<Vec<Container>> {
        let containers = match workload.kind.as_str() {
            "Deployment" => {
                let api: Api<Deployment> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.get(&workload.name)
                    .await?
                    .spec
                    .and_then(|s| s.template.spec)
                    .map(|s| s.containers)
            }
            "StatefulSet" => {
                let api: Api<StatefulSet> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.get(&workload.name)
                    .await?
                    .spec
                    .and_then(|s| s.template.spec)
                    .map(|s| s.containers)
            }
            "DaemonSet" => {
                let api: Api<DaemonSet> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.get(&workload.name)
                    .await?
                    .spec
                    .and_then(|s| s.template.spec)
                    .map(|s| s.containers)
            }
            _ => None,
        };
        Ok(containers.unwrap_or_default())
    }

    async fn patch_workload(&self, workload: &WorkloadRef, patch: &Value) -> Result<()> {
        match workload.kind.as_str() {
            "Deployment" => {
                let api: Api<Deployment> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch(&workload.name, &Self::params(), &Patch::Strategic(patch))
                    .await?;
            }
            "StatefulSet" => {
                let api: Api<StatefulSet> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch(&workload.name, &Self::params(), &Patch::Strategic(patch))
                    .await?;
            }
            "DaemonSet" => {
                let api: Api<DaemonSet> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch(&workload.name, &Self::params(), &Patch::Strategic(patch))
                    .await?;
            }
            other => {
                return Err(crate::error::SizingError::Fatal(format!(
                    "unsupported workload kind: {other}"
                )));
            }
        }
        Ok(())
    }

    async fn publish_event(&self, event: PodEvent) -> Result<()> {
        let reference = ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            namespace: Some(event.namespace.clone()),
            name: Some(event.pod.clone()),
            ..Default::default()
        };
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), reference);
        recorder
            .publish(Event {
                type_: if event.warning {
                    EventType::Warning
                } else {
                    EventType::Normal
                },
                reason: event.reason,
                note: Some(event.note),
                action: "Resize".to_string(),
                secondary: None,
            })
            .await?;
        Ok(())
    }
}
