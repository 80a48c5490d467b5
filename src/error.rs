use thiserror::Error;

/* ============================= ERROR TYPES ============================= */

/// Errors surfaced by the sizing core.
///
/// The reconciler — not the component that produced the error — decides
/// whether a failure is retried in place, deferred, or terminal for the
/// cycle. Components only describe what went wrong.
#[derive(Debug, Error)]
pub enum SizingError {
    /// Live metrics could not be fetched or were too stale to act on.
    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),

    /// A configuration update violated an invariant; the previous
    /// snapshot stays in force.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The Kubernetes API rejected or failed a call.
    #[error("api error: {0}")]
    Api(#[from] kube::Error),

    /// Loss of leadership, cache sync failure — the process must exit
    /// so the next replica can take over.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, SizingError>;

/* ============================= API CLASSIFICATION ============================= */

/// How a failed control-plane write should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFailure {
    /// 409 or timeout — retry the same phase with backoff.
    ConflictOrTimeout,
    /// The apiserver says the resize cannot fit right now
    /// (node allocatable, quota) — defer and retry later.
    Infeasible,
    /// 403 — terminal for this pod.
    Forbidden,
    /// 404 — the pod is gone; drop all queued work for it.
    NotFound,
    /// Anything else — treated as transient.
    Other,
}

/// Classify a kube API error into the retry/defer/terminal buckets.
///
/// 422s whose message points at capacity ("exceeds", "insufficient",
/// "quota") are infeasibility, not malformed input: the same patch can
/// succeed once the node or namespace frees up.
pub fn classify_api_failure(err: &kube::Error) -> ApiFailure {
    match err {
        kube::Error::Api(resp) => match resp.code {
            409 => ApiFailure::ConflictOrTimeout,
            403 => ApiFailure::Forbidden,
            404 => ApiFailure::NotFound,
            422 | 500 if looks_infeasible(&resp.message) => ApiFailure::Infeasible,
            _ => ApiFailure::Other,
        },
        kube::Error::HyperError(_) | kube::Error::Service(_) => ApiFailure::ConflictOrTimeout,
        _ => ApiFailure::Other,
    }
}

fn looks_infeasible(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("exceeds")
        || msg.contains("insufficient")
        || msg.contains("quota")
        || msg.contains("allocatable")
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, message: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: message.to_string(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn test_conflict_is_retryable() {
        let e = api_error(409, "the object has been modified");
        assert_eq!(classify_api_failure(&e), ApiFailure::ConflictOrTimeout);
    }

    #[test]
    fn test_forbidden_is_terminal() {
        let e = api_error(403, "pods \"web-1\" is forbidden");
        assert_eq!(classify_api_failure(&e), ApiFailure::Forbidden);
    }

    #[test]
    fn test_not_found() {
        let e = api_error(404, "pods \"web-1\" not found");
        assert_eq!(classify_api_failure(&e), ApiFailure::NotFound);
    }

    #[test]
    fn test_capacity_message_is_infeasible() {
        let e = api_error(422, "requested resize exceeds node allocatable");
        assert_eq!(classify_api_failure(&e), ApiFailure::Infeasible);
    }

    #[test]
    fn test_quota_message_is_infeasible() {
        let e = api_error(500, "exceeded quota: compute-resources");
        assert_eq!(classify_api_failure(&e), ApiFailure::Infeasible);
    }

    #[test]
    fn test_plain_422_is_other() {
        let e = api_error(422, "field is immutable");
        assert_eq!(classify_api_failure(&e), ApiFailure::Other);
    }

    #[test]
    fn test_error_display() {
        let e = SizingError::InvalidConfig("cpuRequestMultiplier must be > 0".to_string());
        assert!(e.to_string().contains("invalid configuration"));
    }
}
