use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::crd::{MetricsProvider, RightSizerConfigSpec};
use crate::error::SizingError;
use crate::resources::{parse_cpu_millis, parse_memory_bytes};

/* ============================= SNAPSHOT ============================= */

/// Fully-resolved operator configuration.
///
/// Every optional CRD field has been defaulted and validated; readers hold
/// an `Arc` snapshot for the duration of their work and never observe a
/// partial update.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    // Global
    pub enabled: bool,
    pub dry_run: bool,
    pub resize_interval: Duration,
    pub metrics_source: MetricsProvider,
    pub log_level: String,

    // Sizing defaults
    pub cpu_request_multiplier: f64,
    pub memory_request_multiplier: f64,
    pub cpu_limit_multiplier: f64,
    pub memory_limit_multiplier: f64,
    pub min_cpu_request_milli: u64,
    pub min_memory_request_bytes: u64,
    pub max_cpu_limit_milli: u64,
    pub max_memory_limit_bytes: u64,

    // Safety
    pub safety_threshold_fraction: f64,
    pub max_retries: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_backoff_factor: f64,
    pub max_deferral_time: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,

    // Prediction
    pub prediction_enabled: bool,
    pub confidence_threshold: f64,
    pub predictor_window: Duration,

    // Features
    pub in_place_resize_enabled: bool,
    pub update_resize_policy: bool,
    pub policy_based_sizing: bool,

    // Filters
    pub namespace_include: Vec<String>,
    pub namespace_exclude: Vec<String>,
    /// Keep hands off kube-*, *-system, and the common infrastructure
    /// namespaces unless one is listed in namespace_include explicitly.
    pub protect_system_namespaces: bool,
    pub skip_annotations: Vec<String>,

    // Caches
    pub cluster_cache_ttl: Duration,
    pub decision_cache_expiry: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: false,
            resize_interval: Duration::from_secs(60),
            metrics_source: MetricsProvider::Kubernetes,
            log_level: "info".to_string(),

            cpu_request_multiplier: 1.2,
            memory_request_multiplier: 1.2,
            cpu_limit_multiplier: 2.0,
            memory_limit_multiplier: 2.0,
            min_cpu_request_milli: 10,
            min_memory_request_bytes: 64 * 1024 * 1024,
            max_cpu_limit_milli: 4000,
            max_memory_limit_bytes: 8 * 1024 * 1024 * 1024,

            safety_threshold_fraction: 0.5,
            max_retries: 3,
            retry_initial_delay: Duration::from_secs(5),
            retry_max_delay: Duration::from_secs(300),
            retry_backoff_factor: 2.0,
            max_deferral_time: Duration::from_secs(3600),
            circuit_breaker_threshold: 5,
            circuit_breaker_cooldown: Duration::from_secs(300),

            prediction_enabled: false,
            confidence_threshold: 0.6,
            predictor_window: Duration::from_secs(3600),

            in_place_resize_enabled: true,
            update_resize_policy: false,
            policy_based_sizing: true,

            namespace_include: Vec::new(),
            namespace_exclude: Vec::new(),
            protect_system_namespaces: true,
            skip_annotations: vec!["right-sizer.io/skip".to_string()],

            cluster_cache_ttl: Duration::from_secs(30),
            decision_cache_expiry: Duration::from_secs(600),
        }
    }
}

impl OperatorConfig {
    /// Resolve a CRD spec onto the built-in defaults, then validate.
    ///
    /// Returns `SizingError::InvalidConfig` without touching the running
    /// configuration when any invariant is violated.
    pub fn from_spec(spec: &RightSizerConfigSpec) -> crate::error::Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = spec.enabled {
            cfg.enabled = v;
        }
        if let Some(v) = spec.dry_run {
            cfg.dry_run = v;
        }
        if let Some(v) = spec.resize_interval_seconds {
            cfg.resize_interval = Duration::from_secs(v);
        }
        if let Some(v) = &spec.metrics_source {
            cfg.metrics_source = v.clone();
        }
        if let Some(v) = &spec.log_level {
            cfg.log_level = v.clone();
        }

        if let Some(m) = &spec.multipliers {
            if let Some(v) = m.cpu_request {
                cfg.cpu_request_multiplier = v;
            }
            if let Some(v) = m.memory_request {
                cfg.memory_request_multiplier = v;
            }
            if let Some(v) = m.cpu_limit {
                cfg.cpu_limit_multiplier = v;
            }
            if let Some(v) = m.memory_limit {
                cfg.memory_limit_multiplier = v;
            }
        }

        if let Some(b) = &spec.bounds {
            if let Some(v) = &b.min_cpu_request {
                cfg.min_cpu_request_milli = parse_cpu_millis(v);
            }
            if let Some(v) = &b.min_memory_request {
                cfg.min_memory_request_bytes = parse_memory_bytes(v);
            }
            if let Some(v) = &b.max_cpu_limit {
                cfg.max_cpu_limit_milli = parse_cpu_millis(v);
            }
            if let Some(v) = &b.max_memory_limit {
                cfg.max_memory_limit_bytes = parse_memory_bytes(v);
            }
        }

        if let Some(s) = &spec.safety {
            if let Some(v) = s.threshold_fraction {
                cfg.safety_threshold_fraction = v;
            }
            if let Some(v) = s.max_retries {
                cfg.max_retries = v;
            }
            if let Some(v) = s.retry_initial_delay_seconds {
                cfg.retry_initial_delay = Duration::from_secs(v);
            }
            if let Some(v) = s.retry_max_delay_seconds {
                cfg.retry_max_delay = Duration::from_secs(v);
            }
            if let Some(v) = s.retry_backoff_factor {
                cfg.retry_backoff_factor = v;
            }
            if let Some(v) = s.max_deferral_seconds {
                cfg.max_deferral_time = Duration::from_secs(v);
            }
            if let Some(v) = s.circuit_breaker_threshold {
                cfg.circuit_breaker_threshold = v;
            }
            if let Some(v) = s.circuit_breaker_cooldown_seconds {
                cfg.circuit_breaker_cooldown = Duration::from_secs(v);
            }
        }

        if let Some(p) = &spec.prediction {
            if let Some(v) = p.enabled {
                cfg.prediction_enabled = v;
            }
            if let Some(v) = p.confidence_threshold {
                cfg.confidence_threshold = v;
            }
            if let Some(v) = p.window_seconds {
                cfg.predictor_window = Duration::from_secs(v);
            }
        }

        if let Some(f) = &spec.features {
            if let Some(v) = f.in_place_resize {
                cfg.in_place_resize_enabled = v;
            }
            if let Some(v) = f.update_resize_policy {
                cfg.update_resize_policy = v;
            }
            if let Some(v) = f.policy_based_sizing {
                cfg.policy_based_sizing = v;
            }
        }

        if let Some(f) = &spec.filters {
            cfg.namespace_include = f.namespace_include.clone();
            cfg.namespace_exclude = f.namespace_exclude.clone();
            if let Some(v) = f.protect_system_namespaces {
                cfg.protect_system_namespaces = v;
            }
            if !f.skip_annotations.is_empty() {
                cfg.skip_annotations = f.skip_annotations.clone();
            }
        }

        if let Some(c) = &spec.cache {
            if let Some(v) = c.ttl_seconds {
                cfg.cluster_cache_ttl = Duration::from_secs(v);
            }
            if let Some(v) = c.decision_expiry_seconds {
                cfg.decision_cache_expiry = Duration::from_secs(v);
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> crate::error::Result<()> {
        let invalid = |msg: String| Err(SizingError::InvalidConfig(msg));

        for (name, v) in [
            ("multipliers.cpuRequest", self.cpu_request_multiplier),
            ("multipliers.memoryRequest", self.memory_request_multiplier),
            ("multipliers.cpuLimit", self.cpu_limit_multiplier),
            ("multipliers.memoryLimit", self.memory_limit_multiplier),
        ] {
            if v <= 0.0 || !v.is_finite() {
                return invalid(format!("{name} must be a positive finite number, got {v}"));
            }
        }

        if self.cpu_limit_multiplier < 1.0 || self.memory_limit_multiplier < 1.0 {
            return invalid("limit multipliers must be >= 1 so requests never exceed limits".into());
        }

        if self.min_cpu_request_milli > self.max_cpu_limit_milli {
            return invalid(format!(
                "bounds.minCpuRequest ({}m) exceeds bounds.maxCpuLimit ({}m)",
                self.min_cpu_request_milli, self.max_cpu_limit_milli
            ));
        }
        if self.min_memory_request_bytes > self.max_memory_limit_bytes {
            return invalid(format!(
                "bounds.minMemoryRequest ({}) exceeds bounds.maxMemoryLimit ({})",
                self.min_memory_request_bytes, self.max_memory_limit_bytes
            ));
        }

        if !(0.0..=1.0).contains(&self.safety_threshold_fraction) {
            return invalid(format!(
                "safety.thresholdFraction must be within [0, 1], got {}",
                self.safety_threshold_fraction
            ));
        }

        if self.retry_backoff_factor < 1.0 {
            return invalid(format!(
                "safety.retryBackoffFactor must be >= 1, got {}",
                self.retry_backoff_factor
            ));
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return invalid(format!(
                "prediction.confidenceThreshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }

        if self.resize_interval.is_zero() {
            return invalid("resizeIntervalSeconds must be positive".into());
        }
        if self.predictor_window.is_zero() {
            return invalid("prediction.windowSeconds must be positive".into());
        }
        if self.retry_initial_delay > self.retry_max_delay {
            return invalid("safety.retryInitialDelaySeconds exceeds retryMaxDelaySeconds".into());
        }

        Ok(())
    }

    /// Should the operator look at pods in this namespace at all?
    ///
    /// The exclude list always wins. An explicit include entry wins next,
    /// including over the system-namespace rail, so an operator who
    /// really wants kube-system resized can say so. Otherwise protected
    /// system namespaces are off limits, and a non-empty include list
    /// admits only its members.
    pub fn namespace_allowed(&self, namespace: &str) -> bool {
        if self.namespace_exclude.iter().any(|n| n == namespace) {
            return false;
        }
        if self.namespace_include.iter().any(|n| n == namespace) {
            return true;
        }
        if self.protect_system_namespaces && is_system_namespace(namespace) {
            return false;
        }
        self.namespace_include.is_empty()
    }
}

/// Namespaces hosting cluster infrastructure, never resized without an
/// explicit include entry.
fn is_system_namespace(ns: &str) -> bool {
    ns.starts_with("kube-")
        || ns.ends_with("-system")
        || matches!(
            ns,
            "cert-manager" | "istio-system" | "monitoring" | "observability" | "argocd"
        )
}

/* ============================= STORE ============================= */

/// Process-wide configuration holder (single writer, many readers).
///
/// `snapshot()` hands out the current `Arc`; updates swap the whole value
/// and bump the version counter so the reconciler can tell whether a full
/// requeue is warranted.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<OperatorConfig>>,
    version: AtomicU64,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(OperatorConfig::default())
    }
}

impl ConfigStore {
    pub fn new(config: OperatorConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            version: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> Arc<OperatorConfig> {
        self.current.read().expect("config lock not poisoned").clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Validate and install a new spec; on failure the previous snapshot
    /// stays in force and the error is returned for status reporting.
    pub fn update(&self, spec: &RightSizerConfigSpec) -> crate::error::Result<u64> {
        let next = OperatorConfig::from_spec(spec)?;

        let mut guard = self.current.write().expect("config lock not poisoned");
        if **guard == next {
            return Ok(self.version.load(Ordering::Acquire));
        }
        *guard = Arc::new(next);
        drop(guard);

        Ok(self.version.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Multipliers, PredictionSpec, ResourceBounds, SafetySpec};

    #[test]
    fn test_defaults_are_valid() {
        OperatorConfig::default().validate().expect("defaults must pass validation");
    }

    #[test]
    fn test_empty_spec_resolves_to_defaults() {
        let cfg = OperatorConfig::from_spec(&RightSizerConfigSpec::default()).unwrap();
        assert_eq!(cfg, OperatorConfig::default());
    }

    #[test]
    fn test_spec_overrides_applied() {
        let spec = RightSizerConfigSpec {
            dry_run: Some(true),
            resize_interval_seconds: Some(120),
            multipliers: Some(Multipliers {
                cpu_request: Some(1.5),
                ..Default::default()
            }),
            bounds: Some(ResourceBounds {
                max_memory_limit: Some("16Gi".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cfg = OperatorConfig::from_spec(&spec).unwrap();
        assert!(cfg.dry_run);
        assert_eq!(cfg.resize_interval, Duration::from_secs(120));
        assert_eq!(cfg.cpu_request_multiplier, 1.5);
        assert_eq!(cfg.memory_request_multiplier, 1.2);
        assert_eq!(cfg.max_memory_limit_bytes, 16 * 1024 * 1024 * 1024);
    }

    #[test]
    fn test_reject_non_positive_multiplier() {
        let spec = RightSizerConfigSpec {
            multipliers: Some(Multipliers {
                cpu_request: Some(0.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(OperatorConfig::from_spec(&spec).is_err());
    }

    #[test]
    fn test_reject_limit_multiplier_below_one() {
        let spec = RightSizerConfigSpec {
            multipliers: Some(Multipliers {
                cpu_limit: Some(0.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(OperatorConfig::from_spec(&spec).is_err());
    }

    #[test]
    fn test_reject_min_above_max() {
        let spec = RightSizerConfigSpec {
            bounds: Some(ResourceBounds {
                min_cpu_request: Some("8".to_string()),
                max_cpu_limit: Some("4".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(OperatorConfig::from_spec(&spec).is_err());
    }

    #[test]
    fn test_reject_backoff_below_one() {
        let spec = RightSizerConfigSpec {
            safety: Some(SafetySpec {
                retry_backoff_factor: Some(0.9),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(OperatorConfig::from_spec(&spec).is_err());
    }

    #[test]
    fn test_reject_confidence_out_of_range() {
        let spec = RightSizerConfigSpec {
            prediction: Some(PredictionSpec {
                confidence_threshold: Some(1.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(OperatorConfig::from_spec(&spec).is_err());
    }

    #[test]
    fn test_reject_zero_interval() {
        let spec = RightSizerConfigSpec {
            resize_interval_seconds: Some(0),
            ..Default::default()
        };
        assert!(OperatorConfig::from_spec(&spec).is_err());
    }

    #[test]
    fn test_namespace_filtering() {
        let mut cfg = OperatorConfig::default();
        cfg.namespace_include = vec!["prod".to_string(), "staging".to_string()];
        cfg.namespace_exclude = vec!["staging".to_string()];

        assert!(cfg.namespace_allowed("prod"));
        assert!(!cfg.namespace_allowed("staging")); // exclude wins
        assert!(!cfg.namespace_allowed("dev"));

        cfg.namespace_include.clear();
        assert!(cfg.namespace_allowed("dev"));
        assert!(!cfg.namespace_allowed("staging"));
    }

    // ── System namespace rail ──

    #[test]
    fn test_system_namespace_detection() {
        assert!(is_system_namespace("kube-system"));
        assert!(is_system_namespace("kube-public"));
        assert!(is_system_namespace("kube-node-lease"));
        assert!(is_system_namespace("gatekeeper-system"));
        assert!(is_system_namespace("cert-manager"));
        assert!(is_system_namespace("argocd"));
        assert!(!is_system_namespace("default"));
        assert!(!is_system_namespace("production"));
    }

    #[test]
    fn test_system_namespaces_blocked_by_default() {
        let cfg = OperatorConfig::default();
        assert!(!cfg.namespace_allowed("kube-system"));
        assert!(!cfg.namespace_allowed("istio-system"));
        assert!(cfg.namespace_allowed("prod"));
    }

    #[test]
    fn test_explicit_include_overrides_system_rail() {
        let mut cfg = OperatorConfig::default();
        cfg.namespace_include = vec!["kube-system".to_string()];

        assert!(cfg.namespace_allowed("kube-system"));
        // Other system namespaces stay protected, and the include list
        // still narrows everything else.
        assert!(!cfg.namespace_allowed("kube-public"));
        assert!(!cfg.namespace_allowed("prod"));
    }

    #[test]
    fn test_exclude_beats_include_for_system_namespace() {
        let mut cfg = OperatorConfig::default();
        cfg.namespace_include = vec!["kube-system".to_string()];
        cfg.namespace_exclude = vec!["kube-system".to_string()];
        assert!(!cfg.namespace_allowed("kube-system"));
    }

    #[test]
    fn test_system_rail_can_be_disabled() {
        let spec = RightSizerConfigSpec {
            filters: Some(crate::crd::FilterSpec {
                protect_system_namespaces: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cfg = OperatorConfig::from_spec(&spec).unwrap();
        assert!(!cfg.protect_system_namespaces);
        assert!(cfg.namespace_allowed("kube-system"));
    }

    // ── Store behavior ──

    #[test]
    fn test_store_update_bumps_version() {
        let store = ConfigStore::default();
        let v0 = store.version();

        let spec = RightSizerConfigSpec {
            dry_run: Some(true),
            ..Default::default()
        };
        let v1 = store.update(&spec).unwrap();
        assert!(v1 > v0);
        assert!(store.snapshot().dry_run);
    }

    #[test]
    fn test_store_noop_update_keeps_version() {
        let store = ConfigStore::default();
        let v0 = store.version();
        let v1 = store.update(&RightSizerConfigSpec::default()).unwrap();
        assert_eq!(v0, v1);
    }

    #[test]
    fn test_store_invalid_update_keeps_previous() {
        let store = ConfigStore::default();
        let good = RightSizerConfigSpec {
            resize_interval_seconds: Some(42),
            ..Default::default()
        };
        store.update(&good).unwrap();

        let bad = RightSizerConfigSpec {
            resize_interval_seconds: Some(0),
            ..Default::default()
        };
        assert!(store.update(&bad).is_err());
        assert_eq!(store.snapshot().resize_interval, Duration::from_secs(42));
    }

    #[test]
    fn test_snapshot_is_isolated_from_updates() {
        let store = ConfigStore::default();
        let before = store.snapshot();

        let spec = RightSizerConfigSpec {
            dry_run: Some(true),
            ..Default::default()
        };
        store.update(&spec).unwrap();

        assert!(!before.dry_run);
        assert!(store.snapshot().dry_run);
    }
}
