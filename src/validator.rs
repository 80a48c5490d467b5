use std::collections::HashMap;

use k8s_openapi::api::core::v1::Pod;

use crate::calculator::ProposedResources;
use crate::cluster::{LimitRangeView, NodeView, QuotaView};
use crate::policy::SizingStrategy;
use crate::resources::{
    ContainerResources, MEMORY, QosClass, RestartRequirement, restart_requirement,
};

/* ============================= OUTCOME ============================= */

/// Why a proposal cannot be applied right now but may fit later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfeasibleCode {
    NodeCapacity,
    QuotaExceeded,
    LimitRange,
}

impl InfeasibleCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfeasibleCode::NodeCapacity => "NodeResourceConstraint",
            InfeasibleCode::QuotaExceeded => "QuotaExceeded",
            InfeasibleCode::LimitRange => "LimitRangeConstraint",
        }
    }
}

/// Why a proposal is terminally rejected for this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    Structural,
    ConfigBounds,
    SafetyThreshold,
    QosChange,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectCode::Structural => "StructuralViolation",
            RejectCode::ConfigBounds => "BoundsViolation",
            RejectCode::SafetyThreshold => "SafetyThresholdViolation",
            RejectCode::QosChange => "QoSGuaranteedViolation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    /// Temporarily blocked on capacity/quota; the retry manager takes it.
    Infeasible { code: InfeasibleCode, reason: String },
    /// Policy violation; no retry this cycle.
    Reject { code: RejectCode, reason: String },
}

/// Full validation result. `effective` holds the proposals after the
/// memory-decrease rule has elided what must not shrink in place;
/// the executor must apply these, not the raw input.
#[derive(Debug, Clone)]
pub struct Validation {
    pub outcome: Outcome,
    pub warnings: Vec<String>,
    /// Containers whose memory decrease was skipped (CPU still proceeds).
    pub memory_elided: Vec<String>,
    pub effective: HashMap<String, ProposedResources>,
}

/* ============================= INPUT ============================= */

pub struct ValidationInput<'a> {
    pub pod: &'a Pod,
    pub proposals: &'a HashMap<String, ProposedResources>,
    pub strategy: &'a SizingStrategy,
    pub safety_threshold_fraction: f64,
    /// The pod's node, when known and fresh.
    pub node: Option<&'a NodeView>,
    pub quotas: &'a [QuotaView],
    pub limit_ranges: &'a [LimitRangeView],
}

/* ============================= VALIDATION ============================= */

/// Run every check in order. The first failure fixes the outcome, but the
/// remaining checks still contribute warnings so operators see the whole
/// picture in one event.
pub fn validate(input: &ValidationInput<'_>) -> Validation {
    let current: HashMap<String, ContainerResources> = ContainerResources::from_pod(input.pod)
        .into_iter()
        .map(|c| (c.name.clone(), c))
        .collect();

    let mut warnings = Vec::new();

    // Memory-decrease rule first: it reshapes the proposal the later
    // checks (and the executor) must see. A decrease whose container
    // declares RestartContainer for memory would force a restart, so it
    // is elided rather than applied or rejected.
    let (effective, memory_elided) = elide_memory_decreases(input, &current);

    if effective.is_empty() {
        return Validation {
            outcome: Outcome::Allowed,
            warnings,
            memory_elided,
            effective,
        };
    }

    let mut outcome = Outcome::Allowed;
    let mut record = |candidate: Outcome, warnings: &mut Vec<String>| {
        let text = match &candidate {
            Outcome::Infeasible { reason, .. } | Outcome::Reject { reason, .. } => reason.clone(),
            Outcome::Allowed => return,
        };
        warnings.push(text);
        if outcome == Outcome::Allowed {
            outcome = candidate;
        }
    };

    // 1. Structural
    if let Some(bad) = check_structural(&effective) {
        record(bad, &mut warnings);
    }

    // 2. Strategy bounds
    if let Some(bad) = check_bounds(&effective, input.strategy) {
        record(bad, &mut warnings);
    }

    // 3. Safety threshold
    if !input.strategy.allow_threshold_override
        && let Some(bad) =
            check_safety_threshold(&effective, &current, input.safety_threshold_fraction)
    {
        record(bad, &mut warnings);
    }

    // 4. QoS preservation
    if let Some(bad) = check_qos(&effective, &current) {
        record(bad, &mut warnings);
    }

    // 5. Node capacity
    match input.node {
        Some(node) => {
            if let Some(bad) = check_node_capacity(&effective, &current, node) {
                record(bad, &mut warnings);
            }
        }
        None => warnings.push("node capacity unknown; skipping capacity check".to_string()),
    }

    // 6. Namespace quota
    if let Some(bad) = check_quotas(&effective, &current, input.quotas) {
        record(bad, &mut warnings);
    }

    // 7. Limit ranges
    if let Some(bad) = check_limit_ranges(&effective, input.limit_ranges) {
        record(bad, &mut warnings);
    }

    Validation {
        outcome,
        warnings,
        memory_elided,
        effective,
    }
}

/* ============================= RULE 8: MEMORY DECREASE ============================= */

fn elide_memory_decreases(
    input: &ValidationInput<'_>,
    current: &HashMap<String, ContainerResources>,
) -> (HashMap<String, ProposedResources>, Vec<String>) {
    let mut effective = HashMap::new();
    let mut elided = Vec::new();

    let containers = input
        .pod
        .spec
        .as_ref()
        .map(|s| s.containers.as_slice())
        .unwrap_or(&[]);

    for (name, proposal) in input.proposals {
        let Some(cur) = current.get(name) else {
            continue;
        };
        let mut proposal = *proposal;

        let decreases = cur
            .memory_request_bytes
            .is_some_and(|old| proposal.memory_request_bytes < old)
            || cur
                .memory_limit_bytes
                .is_some_and(|old| proposal.memory_limit_bytes < old);

        if decreases {
            let requires_restart = containers
                .iter()
                .find(|c| c.name == *name)
                .map(|c| restart_requirement(c, MEMORY) == RestartRequirement::RestartContainer)
                .unwrap_or(false);

            if requires_restart {
                // Keep memory where it is; the CPU portion still proceeds.
                if let Some(old) = cur.memory_request_bytes {
                    proposal.memory_request_bytes = old;
                }
                if let Some(old) = cur.memory_limit_bytes {
                    proposal.memory_limit_bytes = old;
                }
                elided.push(name.clone());
            }
        }

        // Elision may have turned the container into a no-op.
        if !proposal.matches_current(cur) {
            effective.insert(name.clone(), proposal);
        }
    }

    elided.sort();
    (effective, elided)
}

/* ============================= CHECKS ============================= */

fn check_structural(proposals: &HashMap<String, ProposedResources>) -> Option<Outcome> {
    for (name, p) in proposals {
        if p.cpu_request_milli == 0 || p.memory_request_bytes == 0 {
            return Some(Outcome::Reject {
                code: RejectCode::Structural,
                reason: format!("container {name}: zero request proposed"),
            });
        }
        if p.cpu_request_milli > p.cpu_limit_milli {
            return Some(Outcome::Reject {
                code: RejectCode::Structural,
                reason: format!(
                    "container {name}: cpu request {}m exceeds limit {}m",
                    p.cpu_request_milli, p.cpu_limit_milli
                ),
            });
        }
        if p.memory_request_bytes > p.memory_limit_bytes {
            return Some(Outcome::Reject {
                code: RejectCode::Structural,
                reason: format!(
                    "container {name}: memory request {} exceeds limit {}",
                    p.memory_request_bytes, p.memory_limit_bytes
                ),
            });
        }
    }
    None
}

fn check_bounds(
    proposals: &HashMap<String, ProposedResources>,
    strategy: &SizingStrategy,
) -> Option<Outcome> {
    for (name, p) in proposals {
        if p.cpu_request_milli < strategy.min_cpu_request_milli
            || p.memory_request_bytes < strategy.min_memory_request_bytes
        {
            return Some(Outcome::Reject {
                code: RejectCode::ConfigBounds,
                reason: format!("container {name}: proposal below configured minimum request"),
            });
        }
        if p.cpu_limit_milli > strategy.max_cpu_limit_milli
            || p.memory_limit_bytes > strategy.max_memory_limit_bytes
        {
            return Some(Outcome::Reject {
                code: RejectCode::ConfigBounds,
                reason: format!("container {name}: proposal above configured maximum limit"),
            });
        }
    }
    None
}

fn check_safety_threshold(
    proposals: &HashMap<String, ProposedResources>,
    current: &HashMap<String, ContainerResources>,
    fraction: f64,
) -> Option<Outcome> {
    // The step is measured against the value being moved to, which
    // bounds growth to 1/(1-f) per cycle and clamps down hard on large
    // decreases (the risky direction for a running workload).
    let over = |old: Option<u64>, new: u64| -> bool {
        match old {
            Some(old) if old > 0 && new > 0 => {
                let change = (new as f64 - old as f64).abs() / new as f64;
                change > fraction
            }
            // A container gaining its first explicit value has no
            // baseline to measure a step against.
            _ => false,
        }
    };

    for (name, p) in proposals {
        let Some(cur) = current.get(name) else {
            continue;
        };
        let checks = [
            ("cpu request", cur.cpu_request_milli, p.cpu_request_milli),
            ("cpu limit", cur.cpu_limit_milli, p.cpu_limit_milli),
            ("memory request", cur.memory_request_bytes, p.memory_request_bytes),
            ("memory limit", cur.memory_limit_bytes, p.memory_limit_bytes),
        ];
        for (what, old, new) in checks {
            if over(old, new) {
                return Some(Outcome::Reject {
                    code: RejectCode::SafetyThreshold,
                    reason: format!(
                        "container {name}: {what} change exceeds safety threshold ({:.0}%)",
                        fraction * 100.0
                    ),
                });
            }
        }
    }
    None
}

fn check_qos(
    proposals: &HashMap<String, ProposedResources>,
    current: &HashMap<String, ContainerResources>,
) -> Option<Outcome> {
    let before: Vec<ContainerResources> = current.values().cloned().collect();

    // Recomputed over every container, proposed values overlaid; a single
    // container slipping from req==lim breaks Guaranteed for the pod.
    let after: Vec<ContainerResources> = current
        .values()
        .map(|c| match proposals.get(&c.name) {
            Some(p) => ContainerResources {
                name: c.name.clone(),
                cpu_request_milli: Some(p.cpu_request_milli),
                cpu_limit_milli: Some(p.cpu_limit_milli),
                memory_request_bytes: Some(p.memory_request_bytes),
                memory_limit_bytes: Some(p.memory_limit_bytes),
            },
            None => c.clone(),
        })
        .collect();

    let qos_before = QosClass::of_containers(&before);
    let qos_after = QosClass::of_containers(&after);

    if qos_before != qos_after {
        return Some(Outcome::Reject {
            code: RejectCode::QosChange,
            reason: format!("resize would change QoS class {qos_before} -> {qos_after}"),
        });
    }
    None
}

fn check_node_capacity(
    proposals: &HashMap<String, ProposedResources>,
    current: &HashMap<String, ContainerResources>,
    node: &NodeView,
) -> Option<Outcome> {
    let (pod_current_cpu, pod_current_memory) = pod_totals_current(current);
    let (pod_proposed_cpu, pod_proposed_memory) = pod_totals_proposed(proposals, current);

    let (headroom_cpu, headroom_memory) = node.headroom(pod_current_cpu, pod_current_memory);

    if pod_proposed_cpu > headroom_cpu {
        return Some(Outcome::Infeasible {
            code: InfeasibleCode::NodeCapacity,
            reason: format!(
                "node {}: requested {}m cpu but only {}m allocatable headroom",
                node.name, pod_proposed_cpu, headroom_cpu
            ),
        });
    }
    if pod_proposed_memory > headroom_memory {
        return Some(Outcome::Infeasible {
            code: InfeasibleCode::NodeCapacity,
            reason: format!(
                "node {}: requested {} bytes memory but only {} allocatable headroom",
                node.name, pod_proposed_memory, headroom_memory
            ),
        });
    }
    None
}

fn check_quotas(
    proposals: &HashMap<String, ProposedResources>,
    current: &HashMap<String, ContainerResources>,
    quotas: &[QuotaView],
) -> Option<Outcome> {
    let (cur_req_cpu, cur_req_memory) = pod_totals_current(current);
    let (new_req_cpu, new_req_memory) = pod_totals_proposed(proposals, current);
    let (cur_lim_cpu, cur_lim_memory) = pod_limit_totals_current(current);
    let (new_lim_cpu, new_lim_memory) = pod_limit_totals_proposed(proposals, current);

    let fits = |hard: Option<u64>, used: u64, cur: u64, new: u64| -> bool {
        match hard {
            // used already counts this pod's current share.
            Some(hard) => used as i128 - cur as i128 + new as i128 <= hard as i128,
            None => true,
        }
    };

    for quota in quotas {
        let violations = [
            (
                "requests.cpu",
                fits(quota.hard_request_cpu, quota.used_request_cpu, cur_req_cpu, new_req_cpu),
            ),
            (
                "requests.memory",
                fits(
                    quota.hard_request_memory,
                    quota.used_request_memory,
                    cur_req_memory,
                    new_req_memory,
                ),
            ),
            (
                "limits.cpu",
                fits(quota.hard_limit_cpu, quota.used_limit_cpu, cur_lim_cpu, new_lim_cpu),
            ),
            (
                "limits.memory",
                fits(
                    quota.hard_limit_memory,
                    quota.used_limit_memory,
                    cur_lim_memory,
                    new_lim_memory,
                ),
            ),
        ];

        for (what, ok) in violations {
            if !ok {
                return Some(Outcome::Infeasible {
                    code: InfeasibleCode::QuotaExceeded,
                    reason: format!("quota {}: {what} would be exceeded", quota.name),
                });
            }
        }
    }
    None
}

fn check_limit_ranges(
    proposals: &HashMap<String, ProposedResources>,
    ranges: &[LimitRangeView],
) -> Option<Outcome> {
    for range in ranges {
        for (name, p) in proposals {
            if range
                .container_min_cpu
                .is_some_and(|min| p.cpu_request_milli < min)
                || range
                    .container_min_memory
                    .is_some_and(|min| p.memory_request_bytes < min)
            {
                return Some(Outcome::Infeasible {
                    code: InfeasibleCode::LimitRange,
                    reason: format!(
                        "limit range {}: container {name} request below minimum",
                        range.name
                    ),
                });
            }
            if range
                .container_max_cpu
                .is_some_and(|max| p.cpu_limit_milli > max)
                || range
                    .container_max_memory
                    .is_some_and(|max| p.memory_limit_bytes > max)
            {
                return Some(Outcome::Infeasible {
                    code: InfeasibleCode::LimitRange,
                    reason: format!(
                        "limit range {}: container {name} limit above maximum",
                        range.name
                    ),
                });
            }

            let ratio_violated = |max_ratio: Option<f64>, req: u64, lim: u64| -> bool {
                match max_ratio {
                    Some(r) if req > 0 => lim as f64 / req as f64 > r + 1e-9,
                    _ => false,
                }
            };
            if ratio_violated(range.max_limit_request_ratio_cpu, p.cpu_request_milli, p.cpu_limit_milli)
                || ratio_violated(
                    range.max_limit_request_ratio_memory,
                    p.memory_request_bytes,
                    p.memory_limit_bytes,
                )
            {
                return Some(Outcome::Infeasible {
                    code: InfeasibleCode::LimitRange,
                    reason: format!(
                        "limit range {}: container {name} limit/request ratio too high",
                        range.name
                    ),
                });
            }
        }

        if range.pod_max_cpu.is_some() || range.pod_max_memory.is_some() {
            let total_lim_cpu: u64 = proposals.values().map(|p| p.cpu_limit_milli).sum();
            let total_lim_memory: u64 = proposals.values().map(|p| p.memory_limit_bytes).sum();
            if range.pod_max_cpu.is_some_and(|max| total_lim_cpu > max)
                || range.pod_max_memory.is_some_and(|max| total_lim_memory > max)
            {
                return Some(Outcome::Infeasible {
                    code: InfeasibleCode::LimitRange,
                    reason: format!("limit range {}: pod total limits above maximum", range.name),
                });
            }
        }
    }
    None
}

/* ============================= TOTALS ============================= */

fn pod_totals_current(current: &HashMap<String, ContainerResources>) -> (u64, u64) {
    current.values().fold((0, 0), |(cpu, memory), c| {
        (
            cpu + c.cpu_request_milli.unwrap_or(0),
            memory + c.memory_request_bytes.unwrap_or(0),
        )
    })
}

fn pod_totals_proposed(
    proposals: &HashMap<String, ProposedResources>,
    current: &HashMap<String, ContainerResources>,
) -> (u64, u64) {
    current.values().fold((0, 0), |(cpu, memory), c| {
        match proposals.get(&c.name) {
            Some(p) => (cpu + p.cpu_request_milli, memory + p.memory_request_bytes),
            None => (
                cpu + c.cpu_request_milli.unwrap_or(0),
                memory + c.memory_request_bytes.unwrap_or(0),
            ),
        }
    })
}

fn pod_limit_totals_current(current: &HashMap<String, ContainerResources>) -> (u64, u64) {
    current.values().fold((0, 0), |(cpu, memory), c| {
        (
            cpu + c.cpu_limit_milli.unwrap_or(0),
            memory + c.memory_limit_bytes.unwrap_or(0),
        )
    })
}

fn pod_limit_totals_proposed(
    proposals: &HashMap<String, ProposedResources>,
    current: &HashMap<String, ContainerResources>,
) -> (u64, u64) {
    current.values().fold((0, 0), |(cpu, memory), c| {
        match proposals.get(&c.name) {
            Some(p) => (cpu + p.cpu_limit_milli, memory + p.memory_limit_bytes),
            None => (
                cpu + c.cpu_limit_milli.unwrap_or(0),
                memory + c.memory_limit_bytes.unwrap_or(0),
            ),
        }
    })
}

/* ============================= TESTS ============================= */
