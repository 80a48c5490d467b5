use k8s_openapi::api::core::v1::Pod;

/* ============================= TYPES ============================= */

/// Identifies a parent workload (Deployment, StatefulSet, or DaemonSet).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl WorkloadRef {
    /// Canonical key used for deduplication: "kind/namespace/name".
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.kind.to_lowercase(), self.namespace, self.name)
    }
}

/* ============================= OWNER RESOLUTION ============================= */

/// Attempt to resolve the parent workload from a pod's owner_references.
///
/// Walks owner_references to find a Deployment, StatefulSet, or DaemonSet.
/// For pods owned by a ReplicaSet, strips the hash suffix to derive the
/// Deployment name (offline heuristic, no API round-trip).
pub fn resolve_owner(pod: &Pod) -> Option<WorkloadRef> {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let owners = pod.metadata.owner_references.as_ref()?;

    for owner in owners {
        match owner.kind.as_str() {
            "Deployment" | "StatefulSet" | "DaemonSet" => {
                return Some(WorkloadRef {
                    kind: owner.kind.clone(),
                    name: owner.name.clone(),
                    namespace,
                });
            }
            "ReplicaSet" => {
                let deployment_name = strip_replicaset_hash(&owner.name);
                return Some(WorkloadRef {
                    kind: "Deployment".to_string(),
                    name: deployment_name,
                    namespace,
                });
            }
            _ => continue,
        }
    }

    None
}

/// Strip the ReplicaSet pod-template-hash suffix to derive the Deployment name.
///
/// A ReplicaSet name like `"web-app-5d4f8b9c7f"` becomes `"web-app"`.
/// If there is no `-` in the name, returns the name unchanged.
pub fn strip_replicaset_hash(rs_name: &str) -> String {
    match rs_name.rfind('-') {
        Some(pos) if pos > 0 => rs_name[..pos].to_string(),
        _ => rs_name.to_string(),
    }
}

/* ============================= TESTS ============================= */
