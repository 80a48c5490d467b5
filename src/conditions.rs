use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde_json::{Value, json};

/* ============================= CONSTANTS ============================= */

pub const CONDITION_PENDING: &str = "PodResizePending";
pub const CONDITION_IN_PROGRESS: &str = "PodResizeInProgress";

/// Mirror of the reconciled generation for clusters where
/// `status.observedGeneration` is not writable on pods.
pub const OBSERVED_GENERATION_ANNOTATION: &str = "right-sizer.io/observed-generation";

// Event reasons attached to pods.
pub const EVENT_RESIZE_STARTED: &str = "ResizeStarted";
pub const EVENT_RESIZE_SUCCEEDED: &str = "ResizeSucceeded";
pub const EVENT_RESIZE_DEFERRED: &str = "ResizeDeferred";
pub const EVENT_RESIZE_REJECTED: &str = "ResizeRejected";
pub const EVENT_RESIZE_SKIPPED_MEMORY_DECREASE: &str = "ResizeSkippedMemoryDecrease";

/* ============================= PATCH BUILDERS ============================= */

fn condition(
    type_: &str,
    active: bool,
    reason: &str,
    message: &str,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Value {
    json!({
        "type": type_,
        "status": if active { "True" } else { "False" },
        "reason": reason,
        "message": message,
        "lastTransitionTime": now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "observedGeneration": generation,
    })
}

/// Status patch marking a resize as in flight. The two condition types
/// are mutually exclusive, so entering InProgress clears Pending.
pub fn in_progress_patch(
    message: &str,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Value {
    json!({
        "status": {
            "conditions": [
                condition(CONDITION_IN_PROGRESS, true, "InPlaceResize", message, generation, now),
                condition(CONDITION_PENDING, false, "ResizeDispatched", "", generation, now),
            ]
        }
    })
}

/// Status patch parking a resize as deferred (capacity, quota).
pub fn pending_patch(
    reason: &str,
    message: &str,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Value {
    json!({
        "status": {
            "conditions": [
                condition(CONDITION_IN_PROGRESS, false, reason, "", generation, now),
                condition(CONDITION_PENDING, true, reason, message, generation, now),
            ]
        }
    })
}

/// Status patch clearing both conditions after success or terminal failure.
pub fn cleared_patch(message: &str, generation: Option<i64>, now: DateTime<Utc>) -> Value {
    json!({
        "status": {
            "conditions": [
                condition(CONDITION_IN_PROGRESS, false, "ResizeComplete", message, generation, now),
                condition(CONDITION_PENDING, false, "ResizeComplete", "", generation, now),
            ]
        }
    })
}

/// Metadata patch mirroring the reconciled generation into an annotation.
pub fn observed_generation_patch(generation: i64) -> Value {
    json!({
        "metadata": {
            "annotations": {
                OBSERVED_GENERATION_ANNOTATION: generation.to_string(),
            }
        }
    })
}

/* ============================= READING ============================= */

/// Is the named condition currently True on the pod, and with what reason?
pub fn condition_state(pod: &Pod, type_: &str) -> Option<(bool, String)> {
    pod.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| (c.status == "True", c.reason.clone().unwrap_or_default()))
}

/// Generation the operator last fully reconciled, read from the
/// annotation mirror.
pub fn observed_generation(pod: &Pod) -> Option<i64> {
    pod.metadata
        .annotations
        .as_ref()?
        .get(OBSERVED_GENERATION_ANNOTATION)?
        .parse()
        .ok()
}

/// A deferred resize is stale once the pod's generation has advanced past
/// what the deferral observed: new user intent supersedes ours.
pub fn pending_is_stale(pod: &Pod, deferred_generation: Option<i64>) -> bool {
    match (pod.metadata.generation, deferred_generation) {
        (Some(current), Some(observed)) => current > observed,
        _ => false,
    }
}

/* ============================= TESTS ============================= */
