use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/* ============================= SHARED TYPES ============================= */

/// Where container usage samples come from.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum MetricsProvider {
    #[default]
    Kubernetes,
    Prometheus,
}

/// Reconciliation phase reported on both custom resources.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Active,
    Updating,
    Error,
}

/// Per-resource sizing multipliers applied to observed usage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Multipliers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<f64>,
}

/// Absolute resource bounds, as Kubernetes quantity strings ("10m", "64Mi").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cpu_request: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_memory_request: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu_limit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_memory_limit: Option<String>,
}

/// Fixed resource values that bypass multipliers entirely.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FixedResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

/* ============================= CONFIG SPEC ============================= */

/// Safety rails for how fast and how often resizes may happen.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SafetySpec {
    /// Maximum allowed single-step fractional change per resource (e.g. 0.5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_fraction: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_initial_delay_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_max_delay_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff_factor: Option<f64>,

    /// How long a deferred resize may wait before being dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_deferral_seconds: Option<u64>,

    /// Consecutive transient failures before the circuit opens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_threshold: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_cooldown_seconds: Option<u64>,
}

/// Forecast-driven sizing knobs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PredictionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Minimum forecast confidence before a proposal may be raised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,

    /// Rolling window of samples the forecaster looks at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<u64>,
}

/// Feature gates.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_place_resize: Option<bool>,

    /// Whether the operator may add container resizePolicies to workload
    /// pod templates (and the mutating webhook to new pods).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_resize_policy: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_based_sizing: Option<bool>,
}

/// Namespace and annotation filters for candidate pods.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_include: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespace_exclude: Vec<String>,

    /// Leave system namespaces (kube-*, *-system, common infrastructure)
    /// alone unless namespaceInclude names one explicitly. On by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protect_system_namespaces: Option<bool>,

    /// Pods carrying any of these annotations are never resized.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_annotations: Vec<String>,
}

/// Cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CacheSpec {
    /// TTL for node/quota/limit-range snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,

    /// How long a per-container resize decision suppresses duplicate logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_expiry_seconds: Option<u64>,
}

/// RightSizerConfig configures the operator as a whole.
///
/// A singleton per operator namespace; every field is optional and falls
/// back to a built-in default, so an empty spec is a valid configuration.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "right-sizer.io",
    version = "v1",
    kind = "RightSizerConfig",
    plural = "rightsizerconfigs",
    status = "RightSizerConfigStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RightSizerConfigSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Evaluate and log decisions without issuing any patch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize_interval_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_source: Option<MetricsProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipliers: Option<Multipliers>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<ResourceBounds>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSpec>,
}

/// Observed state of a RightSizerConfig.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RightSizerConfigStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// ISO 8601 timestamp of the last successful reconcile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/* ============================= POLICY SPEC ============================= */

/// A single time-of-day window, "HH:MM" inclusive start, exclusive end.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

/// When a rule is active. Outside the union of windows the rule is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_ranges: Vec<TimeRange>,

    /// Weekday names ("Mon".."Sun"); empty means every day.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub days_of_week: Vec<String>,

    /// "UTC" or a fixed offset like "+02:00"; defaults to UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

/// Which pods a rule applies to. All present selectors must match.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicySelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Container name globs ("*" wildcard); empty matches all containers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name_regex: Option<String>,

    /// Guaranteed / Burstable / BestEffort.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos_class: Option<String>,

    /// Deployment / StatefulSet / DaemonSet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_kind: Option<String>,
}

/// What the winning rule does to matched pods.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyActions {
    /// Leave matched pods alone entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipliers: Option<Multipliers>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<ResourceBounds>,

    /// Fixed values bypass multipliers; bounds still post-clamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<FixedResources>,

    /// Permit a one-shot change past the safety threshold
    /// (scheduled boosts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_threshold_override: Option<bool>,
}

/// RightSizerPolicy is one prioritized sizing rule.
///
/// Exactly one rule wins per pod; higher priority wins, ties break
/// lexicographically by name.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "right-sizer.io",
    version = "v1",
    kind = "RightSizerPolicy",
    plural = "rightsizerpolicies",
    status = "RightSizerPolicyStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RightSizerPolicySpec {
    /// Higher wins. Signed so "worse than defaults" rules are expressible.
    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<PolicySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<PolicyActions>,
}

/// Observed state of a RightSizerPolicy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RightSizerPolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<String>,

    /// Pods the rule currently governs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_pods: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_config_crd_generates_valid_yaml() {
        let crd = RightSizerConfig::crd();
        let yaml = serde_yaml::to_string(&crd).expect("CRD should serialize to YAML");
        assert!(yaml.contains("right-sizer.io"));
        assert!(yaml.contains("RightSizerConfig"));
        assert!(yaml.contains("rightsizerconfigs"));
    }

    #[test]
    fn test_policy_crd_generates_valid_yaml() {
        let crd = RightSizerPolicy::crd();
        let yaml = serde_yaml::to_string(&crd).expect("CRD should serialize to YAML");
        assert!(yaml.contains("RightSizerPolicy"));
        assert!(yaml.contains("rightsizerpolicies"));
    }

    #[test]
    fn test_both_crds_namespaced() {
        assert_eq!(RightSizerConfig::crd().spec.scope, "Namespaced");
        assert_eq!(RightSizerPolicy::crd().spec.scope, "Namespaced");
    }

    #[test]
    fn test_crd_version() {
        let crd = RightSizerConfig::crd();
        assert!(!crd.spec.versions.is_empty());
        assert_eq!(crd.spec.versions[0].name, "v1");
    }

    #[test]
    fn test_empty_config_spec_deserializes() {
        let spec: RightSizerConfigSpec = serde_json::from_str("{}").expect("empty object");
        assert_eq!(spec.enabled, None);
        assert_eq!(spec.multipliers, None);
        assert_eq!(spec.safety, None);
        assert_eq!(spec.filters, None);
    }

    #[test]
    fn test_config_spec_roundtrip() {
        let spec = RightSizerConfigSpec {
            enabled: Some(true),
            dry_run: Some(false),
            resize_interval_seconds: Some(60),
            metrics_source: Some(MetricsProvider::Prometheus),
            multipliers: Some(Multipliers {
                cpu_request: Some(1.2),
                memory_request: Some(1.2),
                cpu_limit: Some(2.0),
                memory_limit: Some(2.0),
            }),
            bounds: Some(ResourceBounds {
                min_cpu_request: Some("10m".to_string()),
                min_memory_request: Some("64Mi".to_string()),
                max_cpu_limit: Some("4".to_string()),
                max_memory_limit: Some("8Gi".to_string()),
            }),
            safety: Some(SafetySpec {
                threshold_fraction: Some(0.5),
                max_retries: Some(5),
                retry_backoff_factor: Some(2.0),
                ..Default::default()
            }),
            ..Default::default()
        };

        let json = serde_json::to_string(&spec).expect("should serialize");
        assert!(json.contains("cpuRequest"));
        assert!(json.contains("thresholdFraction"));

        let back: RightSizerConfigSpec = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(back.resize_interval_seconds, Some(60));
        assert_eq!(back.metrics_source, Some(MetricsProvider::Prometheus));
        assert_eq!(back.multipliers.unwrap().cpu_limit, Some(2.0));
        assert_eq!(back.safety.unwrap().threshold_fraction, Some(0.5));
    }

    #[test]
    fn test_filter_spec_roundtrip() {
        let spec = FilterSpec {
            namespace_include: vec!["kube-system".to_string()],
            protect_system_namespaces: Some(false),
            ..Default::default()
        };
        let json = serde_json::to_string(&spec).expect("should serialize");
        assert!(json.contains("protectSystemNamespaces"));
        assert!(json.contains("namespaceInclude"));

        let back: FilterSpec = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(back.protect_system_namespaces, Some(false));
        assert_eq!(back.namespace_include, vec!["kube-system"]);

        // Omitted field stays unset so the built-in default applies.
        let empty: FilterSpec = serde_json::from_str("{}").expect("empty object");
        assert_eq!(empty.protect_system_namespaces, None);
    }

    #[test]
    fn test_metrics_provider_wire_form() {
        assert_eq!(
            serde_json::to_string(&MetricsProvider::Kubernetes).unwrap(),
            r#""kubernetes""#
        );
        assert_eq!(
            serde_json::to_string(&MetricsProvider::Prometheus).unwrap(),
            r#""prometheus""#
        );
    }

    #[test]
    fn test_phase_wire_form() {
        assert_eq!(serde_json::to_string(&Phase::Active).unwrap(), r#""Active""#);
        assert_eq!(serde_json::to_string(&Phase::Error).unwrap(), r#""Error""#);
    }

    #[test]
    fn test_policy_spec_roundtrip() {
        let spec = RightSizerPolicySpec {
            priority: 100,
            selector: Some(PolicySelector {
                namespaces: vec!["prod".to_string()],
                labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
                pod_name_regex: Some("^web-.*".to_string()),
                qos_class: Some("Burstable".to_string()),
                ..Default::default()
            }),
            schedule: Some(ScheduleSpec {
                time_ranges: vec![TimeRange {
                    start: "09:00".to_string(),
                    end: "18:00".to_string(),
                }],
                days_of_week: vec!["Mon".to_string(), "Fri".to_string()],
                timezone: Some("+02:00".to_string()),
            }),
            actions: Some(PolicyActions {
                multipliers: Some(Multipliers {
                    cpu_request: Some(1.5),
                    ..Default::default()
                }),
                allow_threshold_override: Some(true),
                ..Default::default()
            }),
        };

        let json = serde_json::to_string(&spec).expect("should serialize");
        assert!(json.contains("podNameRegex"));
        assert!(json.contains("timeRanges"));
        assert!(json.contains("allowThresholdOverride"));

        let back: RightSizerPolicySpec = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(back.priority, 100);
        assert_eq!(back.selector.unwrap().namespaces, vec!["prod"]);
        assert_eq!(back.schedule.unwrap().time_ranges.len(), 1);
    }

    #[test]
    fn test_policy_default_priority_zero() {
        let spec: RightSizerPolicySpec = serde_json::from_str("{}").expect("empty object");
        assert_eq!(spec.priority, 0);
    }

    #[test]
    fn test_status_omits_none_fields() {
        let status = RightSizerConfigStatus {
            phase: Some(Phase::Active),
            ..Default::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("phase"));
        assert!(!json.contains("observedGeneration"));
        assert!(!json.contains("message"));
    }

    #[test]
    fn test_policy_status_matched_pods() {
        let status = RightSizerPolicyStatus {
            phase: Some(Phase::Active),
            observed_generation: Some(2),
            matched_pods: Some(7),
            ..Default::default()
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("matchedPods"));
        let back: RightSizerPolicyStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back.matched_pods, Some(7));
    }

    #[test]
    fn test_two_crds_distinct() {
        assert_ne!(
            RightSizerConfig::crd().spec.names.kind,
            RightSizerPolicy::crd().spec.names.kind
        );
    }
}
