use std::collections::HashMap;
use std::sync::LazyLock;

use prometheus::{
    Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};

/* ============================= IDENTITY ============================= */

/// Cluster identity read once from the environment and stamped onto every
/// metric as constant labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub cluster_id: Option<String>,
    pub cluster_name: Option<String>,
    pub environment: Option<String>,
    pub operator_version: String,
}

impl ClusterIdentity {
    pub fn from_env() -> Self {
        Self {
            cluster_id: std::env::var("CLUSTER_ID").ok(),
            cluster_name: std::env::var("CLUSTER_NAME").ok(),
            environment: std::env::var("ENVIRONMENT").ok(),
            operator_version: std::env::var("OPERATOR_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    pub fn labels(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        if let Some(v) = &self.cluster_id {
            labels.insert("cluster_id".to_string(), v.clone());
        }
        if let Some(v) = &self.cluster_name {
            labels.insert("cluster_name".to_string(), v.clone());
        }
        if let Some(v) = &self.environment {
            labels.insert("environment".to_string(), v.clone());
        }
        labels.insert("operator_version".to_string(), self.operator_version.clone());
        labels
    }
}

/* ============================= REGISTRY ============================= */

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    Registry::new_custom(Some("rightsizer".to_string()), Some(ClusterIdentity::from_env().labels()))
        .expect("registry options are valid")
});

/* ============================= METRICS ============================= */

pub static PROCESSED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("processed_total", "Pods run through the sizing pipeline"),
        &["namespace"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static RESIZED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("resized_total", "Successful resource resizes"),
        &["namespace", "resource", "direction"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static CHANGE_PERCENTAGE: LazyLock<HistogramVec> = LazyLock::new(|| {
    let h = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "change_percentage",
            "Fractional size of applied changes per resource",
        )
        .buckets(vec![0.05, 0.1, 0.2, 0.3, 0.5, 0.8, 1.0, 2.0]),
        &["resource", "direction"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

pub static PROCESSING_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let h = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "processing_duration_seconds",
            "Time spent per pipeline phase",
        ),
        &["phase"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

pub static SAFETY_THRESHOLD_VIOLATIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "safety_threshold_violations_total",
        "Proposals rejected for exceeding the per-step safety threshold",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static RETRY_ATTEMPTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("retry_attempts_total", "Deferred resize retry attempts"),
        &["reason"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static CIRCUIT_BREAKER_STATE: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new(
        "circuit_breaker_state",
        "Circuit breaker state (0=closed, 1=open)",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static DEFERRED_QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("deferred_queue_depth", "Resizes waiting in the deferred queue")
        .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static QOS_VIOLATIONS_PREVENTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "qos_violations_prevented_total",
        "Proposals rejected because they would change a pod's QoS class",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static IGNORED_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "ignored_errors_total",
            "Errors intentionally discarded (shutdown races, best-effort cleanup)",
        ),
        &["context"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static WORKER_PANICS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "worker_panics_total",
        "Per-pod handlers that panicked and were recovered",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static PROCESSING_DURATION_TOTAL: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(
        "cycle_duration_seconds",
        "Duration of whole reconcile cycles",
    ))
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

/// Force-init every metric so /metrics shows the full set before the
/// first resize happens. LazyLock makes re-registration impossible.
pub fn force_metrics() {
    LazyLock::force(&PROCESSED_TOTAL);
    LazyLock::force(&RESIZED_TOTAL);
    LazyLock::force(&CHANGE_PERCENTAGE);
    LazyLock::force(&PROCESSING_DURATION);
    LazyLock::force(&SAFETY_THRESHOLD_VIOLATIONS);
    LazyLock::force(&RETRY_ATTEMPTS);
    LazyLock::force(&CIRCUIT_BREAKER_STATE);
    LazyLock::force(&DEFERRED_QUEUE_DEPTH);
    LazyLock::force(&QOS_VIOLATIONS_PREVENTED);
    LazyLock::force(&IGNORED_ERRORS);
    LazyLock::force(&WORKER_PANICS);
    LazyLock::force(&PROCESSING_DURATION_TOTAL);
}

/// Render the registry in Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/* ============================= TESTS ============================= */
