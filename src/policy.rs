use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Timelike, Utc};
use k8s_openapi::api::core::v1::Pod;
use regex::Regex;
use tracing::warn;

use crate::config::OperatorConfig;
use crate::crd::{RightSizerPolicy, ScheduleSpec};
use crate::resources::{QosClass, parse_cpu_millis, parse_memory_bytes};
use crate::workload::resolve_owner;

/* ============================= STRATEGY ============================= */

/// The fully-merged sizing parameters governing one pod:
/// rule actions layered over the config defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingStrategy {
    pub cpu_request_multiplier: f64,
    pub memory_request_multiplier: f64,
    pub cpu_limit_multiplier: f64,
    pub memory_limit_multiplier: f64,

    pub min_cpu_request_milli: u64,
    pub min_memory_request_bytes: u64,
    pub max_cpu_limit_milli: u64,
    pub max_memory_limit_bytes: u64,

    /// Fixed values bypass the multipliers; bounds still post-clamp.
    pub fixed_cpu_request_milli: Option<u64>,
    pub fixed_cpu_limit_milli: Option<u64>,
    pub fixed_memory_request_bytes: Option<u64>,
    pub fixed_memory_limit_bytes: Option<u64>,

    /// One-shot permission to cross the safety threshold.
    pub allow_threshold_override: bool,

    /// Container name globs the rule narrows to; empty means all.
    pub container_globs: Vec<String>,
}

impl SizingStrategy {
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self {
            cpu_request_multiplier: config.cpu_request_multiplier,
            memory_request_multiplier: config.memory_request_multiplier,
            cpu_limit_multiplier: config.cpu_limit_multiplier,
            memory_limit_multiplier: config.memory_limit_multiplier,
            min_cpu_request_milli: config.min_cpu_request_milli,
            min_memory_request_bytes: config.min_memory_request_bytes,
            max_cpu_limit_milli: config.max_cpu_limit_milli,
            max_memory_limit_bytes: config.max_memory_limit_bytes,
            fixed_cpu_request_milli: None,
            fixed_cpu_limit_milli: None,
            fixed_memory_request_bytes: None,
            fixed_memory_limit_bytes: None,
            allow_threshold_override: false,
            container_globs: Vec::new(),
        }
    }

    /// Does this strategy govern the named container?
    pub fn applies_to_container(&self, name: &str) -> bool {
        self.container_globs.is_empty()
            || self.container_globs.iter().any(|g| glob_match(g, name))
    }
}

/* ============================= EVALUATION ============================= */

/// Name used when no rule matches and the config defaults govern the pod.
pub const DEFAULTS_RULE: &str = "defaults";

/// Outcome of policy selection for one pod.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub rule_name: String,
    pub priority: i32,
    pub strategy: SizingStrategy,
    pub skip: bool,
    pub reason: String,
}

/* ============================= ENGINE ============================= */

struct CompiledRule {
    name: String,
    spec: crate::crd::RightSizerPolicySpec,
    name_regex: Option<Regex>,
}

/// Selects the single winning rule per pod and merges its actions onto
/// the config defaults. Pure with respect to the cluster: everything it
/// needs arrives as arguments.
#[derive(Default)]
pub struct PolicyEngine {
    rules: Vec<CompiledRule>,
}

impl PolicyEngine {
    /// Replace the rule set. Rules with an unparseable podNameRegex are
    /// kept but can never match; the error is reported for status.
    pub fn set_rules(&mut self, policies: &[RightSizerPolicy]) -> Vec<(String, String)> {
        use kube::ResourceExt;

        let mut errors = Vec::new();
        let mut compiled: Vec<CompiledRule> = policies
            .iter()
            .map(|p| {
                let name = p.name_any();
                let name_regex = p
                    .spec
                    .selector
                    .as_ref()
                    .and_then(|s| s.pod_name_regex.as_deref())
                    .and_then(|pattern| match Regex::new(pattern) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!(rule = %name, error = %e, "policy_regex_invalid");
                            errors.push((name.clone(), format!("invalid podNameRegex: {e}")));
                            None
                        }
                    });
                CompiledRule {
                    name,
                    spec: p.spec.clone(),
                    name_regex,
                }
            })
            .collect();

        // Higher priority first; ties resolved by name so selection is
        // deterministic across replicas.
        compiled.sort_by(|a, b| {
            b.spec
                .priority
                .cmp(&a.spec.priority)
                .then_with(|| a.name.cmp(&b.name))
        });

        self.rules = compiled;
        errors
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Count pods a named rule currently matches, for status reporting.
    pub fn matched_pods(&self, rule_name: &str, pods: &[Pod], now: DateTime<Utc>) -> u32 {
        let Some(rule) = self.rules.iter().find(|r| r.name == rule_name) else {
            return 0;
        };
        pods.iter().filter(|p| rule_matches(rule, p, now)).count() as u32
    }

    /// Select the winning rule for `pod` and produce the effective strategy.
    pub fn evaluate(&self, pod: &Pod, config: &OperatorConfig, now: DateTime<Utc>) -> Evaluation {
        // Opt-out annotations win over everything, including rules.
        if let Some(annotations) = &pod.metadata.annotations {
            for key in &config.skip_annotations {
                if let Some(value) = annotations.get(key)
                    && value != "false"
                {
                    return Evaluation {
                        rule_name: DEFAULTS_RULE.to_string(),
                        priority: 0,
                        strategy: SizingStrategy::from_config(config),
                        skip: true,
                        reason: format!("pod opted out via annotation {key}"),
                    };
                }
            }
        }

        let winner = if config.policy_based_sizing {
            self.rules.iter().find(|r| rule_matches(r, pod, now))
        } else {
            None
        };

        match winner {
            Some(rule) => {
                let actions = rule.spec.actions.clone().unwrap_or_default();
                let skip = actions.skip.unwrap_or(false);
                let strategy = merge_strategy(config, rule);
                Evaluation {
                    rule_name: rule.name.clone(),
                    priority: rule.spec.priority,
                    strategy,
                    skip,
                    reason: if skip {
                        format!("rule {} says skip", rule.name)
                    } else {
                        format!("rule {} (priority {})", rule.name, rule.spec.priority)
                    },
                }
            }
            None => Evaluation {
                rule_name: DEFAULTS_RULE.to_string(),
                priority: 0,
                strategy: SizingStrategy::from_config(config),
                skip: false,
                reason: "no rule matched; defaults apply".to_string(),
            },
        }
    }
}

/* ============================= MATCHING ============================= */

fn rule_matches(rule: &CompiledRule, pod: &Pod, now: DateTime<Utc>) -> bool {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();

    if let Some(selector) = &rule.spec.selector {
        if !selector.namespaces.is_empty()
            && !selector.namespaces.iter().any(|n| n == namespace)
        {
            return false;
        }
        if selector.exclude_namespaces.iter().any(|n| n == namespace) {
            return false;
        }

        if !selector.labels.is_empty() {
            let Some(labels) = &pod.metadata.labels else {
                return false;
            };
            if !selector
                .labels
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|have| have == v))
            {
                return false;
            }
        }

        if !selector.annotations.is_empty() {
            let Some(annotations) = &pod.metadata.annotations else {
                return false;
            };
            if !selector
                .annotations
                .iter()
                .all(|(k, v)| annotations.get(k).is_some_and(|have| have == v))
            {
                return false;
            }
        }

        if selector.pod_name_regex.is_some() {
            // A rule with an invalid regex can never match.
            let Some(re) = &rule.name_regex else {
                return false;
            };
            if !re.is_match(pod_name) {
                return false;
            }
        }

        if let Some(wanted) = &selector.qos_class
            && !wanted.eq_ignore_ascii_case(&QosClass::of_pod(pod).to_string())
        {
            return false;
        }

        if let Some(kind) = &selector.workload_kind {
            match resolve_owner(pod) {
                Some(owner) if owner.kind.eq_ignore_ascii_case(kind) => {}
                _ => return false,
            }
        }

        if !selector.container_names.is_empty() {
            let any_container_matches = pod
                .spec
                .as_ref()
                .map(|s| {
                    s.containers.iter().any(|c| {
                        selector
                            .container_names
                            .iter()
                            .any(|g| glob_match(g, &c.name))
                    })
                })
                .unwrap_or(false);
            if !any_container_matches {
                return false;
            }
        }
    }

    schedule_active(rule.spec.schedule.as_ref(), now)
}

/// Is the rule's schedule window open at `now`? No schedule means always.
fn schedule_active(schedule: Option<&ScheduleSpec>, now: DateTime<Utc>) -> bool {
    let Some(schedule) = schedule else {
        return true;
    };

    let offset = parse_timezone(schedule.timezone.as_deref());
    let local = now.with_timezone(&offset);

    if !schedule.days_of_week.is_empty() {
        let today = weekday_name(local.weekday());
        if !schedule
            .days_of_week
            .iter()
            .any(|d| d.eq_ignore_ascii_case(today))
        {
            return false;
        }
    }

    if schedule.time_ranges.is_empty() {
        return true;
    }

    let minute_of_day = local.hour() * 60 + local.minute();
    schedule.time_ranges.iter().any(|range| {
        match (parse_hhmm(&range.start), parse_hhmm(&range.end)) {
            (Some(start), Some(end)) => {
                if start <= end {
                    (start..end).contains(&minute_of_day)
                } else {
                    // Overnight window, e.g. 22:00–06:00
                    minute_of_day >= start || minute_of_day < end
                }
            }
            // Malformed ranges never open.
            _ => false,
        }
    })
}

fn parse_timezone(tz: Option<&str>) -> FixedOffset {
    let utc = FixedOffset::east_opt(0).expect("zero offset is valid");
    match tz {
        None => utc,
        Some(s) if s.eq_ignore_ascii_case("utc") || s.eq_ignore_ascii_case("z") => utc,
        Some(s) => DateTime::parse_from_rfc3339(&format!("2000-01-01T00:00:00{s}"))
            .map(|dt| *dt.offset())
            .unwrap_or(utc),
    }
}

fn parse_hhmm(s: &str) -> Option<u32> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .ok()
        .map(|t| t.hour() * 60 + t.minute())
}

fn weekday_name(day: chrono::Weekday) -> &'static str {
    match day {
        chrono::Weekday::Mon => "Mon",
        chrono::Weekday::Tue => "Tue",
        chrono::Weekday::Wed => "Wed",
        chrono::Weekday::Thu => "Thu",
        chrono::Weekday::Fri => "Fri",
        chrono::Weekday::Sat => "Sat",
        chrono::Weekday::Sun => "Sun",
    }
}

/* ============================= MERGING ============================= */

fn merge_strategy(config: &OperatorConfig, rule: &CompiledRule) -> SizingStrategy {
    let mut strategy = SizingStrategy::from_config(config);

    if let Some(selector) = &rule.spec.selector {
        strategy.container_globs = selector.container_names.clone();
    }

    let Some(actions) = &rule.spec.actions else {
        return strategy;
    };

    if let Some(m) = &actions.multipliers {
        if let Some(v) = m.cpu_request {
            strategy.cpu_request_multiplier = v;
        }
        if let Some(v) = m.memory_request {
            strategy.memory_request_multiplier = v;
        }
        if let Some(v) = m.cpu_limit {
            strategy.cpu_limit_multiplier = v;
        }
        if let Some(v) = m.memory_limit {
            strategy.memory_limit_multiplier = v;
        }
    }

    if let Some(b) = &actions.bounds {
        if let Some(v) = &b.min_cpu_request {
            strategy.min_cpu_request_milli = parse_cpu_millis(v);
        }
        if let Some(v) = &b.min_memory_request {
            strategy.min_memory_request_bytes = parse_memory_bytes(v);
        }
        if let Some(v) = &b.max_cpu_limit {
            strategy.max_cpu_limit_milli = parse_cpu_millis(v);
        }
        if let Some(v) = &b.max_memory_limit {
            strategy.max_memory_limit_bytes = parse_memory_bytes(v);
        }
    }

    if let Some(f) = &actions.fixed {
        strategy.fixed_cpu_request_milli = f.cpu_request.as_deref().map(parse_cpu_millis);
        strategy.fixed_cpu_limit_milli = f.cpu_limit.as_deref().map(parse_cpu_millis);
        strategy.fixed_memory_request_bytes = f.memory_request.as_deref().map(parse_memory_bytes);
        strategy.fixed_memory_limit_bytes = f.memory_limit.as_deref().map(parse_memory_bytes);
    }

    strategy.allow_threshold_override = actions.allow_threshold_override.unwrap_or(false);

    strategy
}

/* ============================= GLOB ============================= */

/// Minimal `*` glob match, enough for container name patterns like
/// "sidecar-*" or "*".
pub fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        FixedResources, Multipliers, PolicyActions, PolicySelector, ResourceBounds,
        RightSizerPolicySpec, TimeRange,
    };
    use chrono::TimeZone;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn policy(name: &str, priority: i32, spec_fn: impl FnOnce(&mut RightSizerPolicySpec)) -> RightSizerPolicy {
        let mut spec = RightSizerPolicySpec {
            priority,
            ..Default::default()
        };
        spec_fn(&mut spec);
        RightSizerPolicy {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    fn pod(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: if labels.is_empty() {
                    None
                } else {
                    Some(
                        labels
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect::<BTreeMap<_, _>>(),
                    )
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn noon() -> DateTime<Utc> {
        // A Wednesday.
        Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap()
    }

    // ── Glob ──

    #[test]
    fn test_glob_star_matches_everything() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn test_glob_prefix() {
        assert!(glob_match("sidecar-*", "sidecar-proxy"));
        assert!(!glob_match("sidecar-*", "main"));
    }

    #[test]
    fn test_glob_exact() {
        assert!(glob_match("main", "main"));
        assert!(!glob_match("main", "main2"));
    }

    #[test]
    fn test_glob_middle_star() {
        assert!(glob_match("app-*-worker", "app-payments-worker"));
        assert!(!glob_match("app-*-worker", "app-payments"));
    }

    // ── Selection / priority ──

    #[test]
    fn test_no_rules_returns_defaults() {
        let engine = PolicyEngine::default();
        let config = OperatorConfig::default();
        let eval = engine.evaluate(&pod("prod", "web-1", &[]), &config, noon());
        assert_eq!(eval.rule_name, DEFAULTS_RULE);
        assert!(!eval.skip);
        assert_eq!(eval.strategy, SizingStrategy::from_config(&config));
    }

    #[test]
    fn test_higher_priority_wins() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[
            policy("low", 10, |s| {
                s.actions = Some(PolicyActions {
                    multipliers: Some(Multipliers {
                        cpu_request: Some(1.1),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }),
            policy("high", 100, |s| {
                s.actions = Some(PolicyActions {
                    multipliers: Some(Multipliers {
                        cpu_request: Some(9.0),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }),
        ]);

        let eval = engine.evaluate(&pod("prod", "web-1", &[]), &OperatorConfig::default(), noon());
        assert_eq!(eval.rule_name, "high");
        assert_eq!(eval.strategy.cpu_request_multiplier, 9.0);
    }

    #[test]
    fn test_equal_priority_breaks_by_name() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[
            policy("zebra", 50, |_| {}),
            policy("alpha", 50, |_| {}),
        ]);
        let eval = engine.evaluate(&pod("prod", "web-1", &[]), &OperatorConfig::default(), noon());
        assert_eq!(eval.rule_name, "alpha");
    }

    #[test]
    fn test_policy_based_sizing_disabled_ignores_rules() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[policy("any", 50, |_| {})]);
        let mut config = OperatorConfig::default();
        config.policy_based_sizing = false;

        let eval = engine.evaluate(&pod("prod", "web-1", &[]), &config, noon());
        assert_eq!(eval.rule_name, DEFAULTS_RULE);
    }

    // ── Selectors ──

    #[test]
    fn test_namespace_selector() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[policy("prod-only", 10, |s| {
            s.selector = Some(PolicySelector {
                namespaces: vec!["prod".to_string()],
                ..Default::default()
            });
        })]);

        let config = OperatorConfig::default();
        assert_eq!(
            engine.evaluate(&pod("prod", "a", &[]), &config, noon()).rule_name,
            "prod-only"
        );
        assert_eq!(
            engine.evaluate(&pod("dev", "a", &[]), &config, noon()).rule_name,
            DEFAULTS_RULE
        );
    }

    #[test]
    fn test_exclude_namespace_selector() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[policy("not-staging", 10, |s| {
            s.selector = Some(PolicySelector {
                exclude_namespaces: vec!["staging".to_string()],
                ..Default::default()
            });
        })]);

        let config = OperatorConfig::default();
        assert_eq!(
            engine.evaluate(&pod("staging", "a", &[]), &config, noon()).rule_name,
            DEFAULTS_RULE
        );
        assert_eq!(
            engine.evaluate(&pod("prod", "a", &[]), &config, noon()).rule_name,
            "not-staging"
        );
    }

    #[test]
    fn test_label_selector_requires_all() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[policy("web", 10, |s| {
            s.selector = Some(PolicySelector {
                labels: BTreeMap::from([
                    ("app".to_string(), "web".to_string()),
                    ("tier".to_string(), "frontend".to_string()),
                ]),
                ..Default::default()
            });
        })]);

        let config = OperatorConfig::default();
        assert_eq!(
            engine
                .evaluate(
                    &pod("prod", "a", &[("app", "web"), ("tier", "frontend")]),
                    &config,
                    noon()
                )
                .rule_name,
            "web"
        );
        assert_eq!(
            engine
                .evaluate(&pod("prod", "a", &[("app", "web")]), &config, noon())
                .rule_name,
            DEFAULTS_RULE
        );
    }

    #[test]
    fn test_pod_name_regex() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[policy("web-pods", 10, |s| {
            s.selector = Some(PolicySelector {
                pod_name_regex: Some("^web-[0-9]+$".to_string()),
                ..Default::default()
            });
        })]);

        let config = OperatorConfig::default();
        assert_eq!(
            engine.evaluate(&pod("prod", "web-12", &[]), &config, noon()).rule_name,
            "web-pods"
        );
        assert_eq!(
            engine.evaluate(&pod("prod", "api-12", &[]), &config, noon()).rule_name,
            DEFAULTS_RULE
        );
    }

    #[test]
    fn test_invalid_regex_never_matches_and_reports() {
        let mut engine = PolicyEngine::default();
        let errors = engine.set_rules(&[policy("broken", 10, |s| {
            s.selector = Some(PolicySelector {
                pod_name_regex: Some("(unclosed".to_string()),
                ..Default::default()
            });
        })]);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "broken");

        let eval = engine.evaluate(&pod("prod", "web-1", &[]), &OperatorConfig::default(), noon());
        assert_eq!(eval.rule_name, DEFAULTS_RULE);
    }

    // ── Skip paths ──

    #[test]
    fn test_rule_skip_action() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[policy("hands-off", 10, |s| {
            s.actions = Some(PolicyActions {
                skip: Some(true),
                ..Default::default()
            });
        })]);

        let eval = engine.evaluate(&pod("prod", "web-1", &[]), &OperatorConfig::default(), noon());
        assert!(eval.skip);
        assert_eq!(eval.rule_name, "hands-off");
    }

    #[test]
    fn test_skip_annotation_wins_over_rules() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[policy("boost", 10, |_| {})]);

        let mut p = pod("prod", "web-1", &[]);
        p.metadata.annotations = Some(BTreeMap::from([(
            "right-sizer.io/skip".to_string(),
            "true".to_string(),
        )]));

        let eval = engine.evaluate(&p, &OperatorConfig::default(), noon());
        assert!(eval.skip);
    }

    #[test]
    fn test_skip_annotation_false_value_ignored() {
        let engine = PolicyEngine::default();
        let mut p = pod("prod", "web-1", &[]);
        p.metadata.annotations = Some(BTreeMap::from([(
            "right-sizer.io/skip".to_string(),
            "false".to_string(),
        )]));

        let eval = engine.evaluate(&p, &OperatorConfig::default(), noon());
        assert!(!eval.skip);
    }

    // ── Strategy merge ──

    #[test]
    fn test_fixed_values_and_bounds_merge() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[policy("fixed", 10, |s| {
            s.actions = Some(PolicyActions {
                fixed: Some(FixedResources {
                    cpu_request: Some("250m".to_string()),
                    ..Default::default()
                }),
                bounds: Some(ResourceBounds {
                    max_cpu_limit: Some("2".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        })]);

        let eval = engine.evaluate(&pod("prod", "web-1", &[]), &OperatorConfig::default(), noon());
        assert_eq!(eval.strategy.fixed_cpu_request_milli, Some(250));
        assert_eq!(eval.strategy.max_cpu_limit_milli, 2000);
        // Untouched fields fall through from config defaults.
        assert_eq!(eval.strategy.memory_request_multiplier, 1.2);
    }

    // ── Schedules ──

    #[test]
    fn test_schedule_window_open() {
        assert!(schedule_active(
            Some(&ScheduleSpec {
                time_ranges: vec![TimeRange {
                    start: "09:00".to_string(),
                    end: "18:00".to_string(),
                }],
                ..Default::default()
            }),
            noon()
        ));
    }

    #[test]
    fn test_schedule_window_closed() {
        assert!(!schedule_active(
            Some(&ScheduleSpec {
                time_ranges: vec![TimeRange {
                    start: "18:00".to_string(),
                    end: "22:00".to_string(),
                }],
                ..Default::default()
            }),
            noon()
        ));
    }

    #[test]
    fn test_schedule_overnight_window() {
        let schedule = ScheduleSpec {
            time_ranges: vec![TimeRange {
                start: "22:00".to_string(),
                end: "06:00".to_string(),
            }],
            ..Default::default()
        };
        let night = Utc.with_ymd_and_hms(2026, 3, 4, 23, 30, 0).unwrap();
        let morning = Utc.with_ymd_and_hms(2026, 3, 4, 5, 0, 0).unwrap();
        assert!(schedule_active(Some(&schedule), night));
        assert!(schedule_active(Some(&schedule), morning));
        assert!(!schedule_active(Some(&schedule), noon()));
    }

    #[test]
    fn test_schedule_day_filter() {
        let schedule = ScheduleSpec {
            days_of_week: vec!["Sat".to_string(), "Sun".to_string()],
            ..Default::default()
        };
        // noon() is a Wednesday.
        assert!(!schedule_active(Some(&schedule), noon()));

        let saturday = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert!(schedule_active(Some(&schedule), saturday));
    }

    #[test]
    fn test_schedule_timezone_offset_shifts_window() {
        let schedule = ScheduleSpec {
            time_ranges: vec![TimeRange {
                start: "13:00".to_string(),
                end: "14:00".to_string(),
            }],
            timezone: Some("+02:00".to_string()),
            ..Default::default()
        };
        // 12:00 UTC is 14:00 at +02:00 — window already closed.
        assert!(!schedule_active(Some(&schedule), noon()));
        // 11:30 UTC is 13:30 at +02:00 — inside.
        let inside = Utc.with_ymd_and_hms(2026, 3, 4, 11, 30, 0).unwrap();
        assert!(schedule_active(Some(&schedule), inside));
    }

    #[test]
    fn test_no_schedule_always_active() {
        assert!(schedule_active(None, noon()));
    }

    // ── Matched pod counting ──

    #[test]
    fn test_matched_pods_count() {
        let mut engine = PolicyEngine::default();
        engine.set_rules(&[policy("prod-only", 10, |s| {
            s.selector = Some(PolicySelector {
                namespaces: vec!["prod".to_string()],
                ..Default::default()
            });
        })]);

        let pods = vec![
            pod("prod", "a", &[]),
            pod("prod", "b", &[]),
            pod("dev", "c", &[]),
        ];
        assert_eq!(engine.matched_pods("prod-only", &pods, noon()), 2);
        assert_eq!(engine.matched_pods("missing", &pods, noon()), 0);
    }
}
