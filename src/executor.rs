use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::api::ControlPlane;
use crate::config::OperatorConfig;
use crate::error::{ApiFailure, SizingError, classify_api_failure};
use crate::calculator::ProposedResources;
use crate::observe;
use crate::resources::{CPU, ContainerResources, MEMORY, format_cpu, format_memory};
use crate::workload::resolve_owner;

/* ============================= OUTCOME ============================= */

/// What one execution pass did for a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Nothing differed from the live spec; no call was made.
    NoOp,
    Applied {
        cpu_applied: bool,
        memory_applied: bool,
    },
    /// CPU landed but the memory portion is infeasible right now.
    MemoryDeferred { cpu_applied: bool, error: String },
    /// Nothing landed; the whole proposal waits for capacity.
    Deferred { error: String },
    /// Terminal for this cycle (forbidden, gone, retries exhausted).
    Failed { error: String },
    /// The breaker is open; the resize path is paused.
    CircuitOpen,
}

enum PhaseResult {
    Ok,
    Infeasible(String),
    Terminal(String),
}

/* ============================= DECISION CACHE ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DecisionPair {
    old_cpu: u64,
    new_cpu: u64,
    old_memory: u64,
    new_memory: u64,
}

#[derive(Debug, Clone, Copy)]
struct DecisionEntry {
    pair: DecisionPair,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Per-container memory of the last logged decision, used purely to keep
/// steady-state log and event volume bounded. One mutex covers read and
/// write so the check-then-update pair cannot race.
#[derive(Debug, Default)]
pub struct DecisionCache {
    entries: Mutex<HashMap<(String, String, String), DecisionEntry>>,
}

impl DecisionCache {
    /// Refresh the entry and report whether this decision deserves a log
    /// line (new pair, or the old one expired).
    fn should_log(
        &self,
        key: (String, String, String),
        pair: DecisionPair,
        now: DateTime<Utc>,
        expiry: Duration,
    ) -> bool {
        let mut entries = self.entries.lock().expect("decision cache lock not poisoned");

        let max_age = chrono::Duration::from_std(expiry).unwrap_or_else(|_| chrono::Duration::days(1));
        entries.retain(|_, e| now.signed_duration_since(e.last_seen) <= max_age);

        match entries.get_mut(&key) {
            Some(entry) if entry.pair == pair => {
                entry.last_seen = now;
                false
            }
            _ => {
                entries.insert(
                    key,
                    DecisionEntry {
                        pair,
                        first_seen: now,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("decision cache lock not poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/* ============================= CIRCUIT BREAKER ============================= */

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<DateTime<Utc>>,
}

/// Opens after N consecutive transient failures and pauses the resize
/// path for the cooldown.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().expect("breaker lock not poisoned");
        match state.open_until {
            Some(until) if now < until => true,
            Some(_) => {
                state.open_until = None;
                state.consecutive_failures = 0;
                observe::CIRCUIT_BREAKER_STATE.set(0);
                false
            }
            None => false,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker lock not poisoned");
        state.consecutive_failures = 0;
    }

    /// Returns true when this failure opened the circuit.
    pub fn record_failure(&self, now: DateTime<Utc>, threshold: u32, cooldown: Duration) -> bool {
        let mut state = self.state.lock().expect("breaker lock not poisoned");
        state.consecutive_failures += 1;
        if state.open_until.is_none() && state.consecutive_failures >= threshold {
            state.open_until =
                Some(now + chrono::Duration::from_std(cooldown).unwrap_or_else(|_| chrono::Duration::minutes(5)));
            observe::CIRCUIT_BREAKER_STATE.set(1);
            return true;
        }
        false
    }
}

/* ============================= POD LOCKS ============================= */

/// Striped per-pod locks: unrelated pods proceed in parallel while two
/// workers can never act on the same `namespace/name` concurrently.
pub struct PodLocks {
    stripes: Vec<tokio::sync::Mutex<()>>,
}

impl Default for PodLocks {
    fn default() -> Self {
        Self::new(64)
    }
}

impl PodLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| tokio::sync::Mutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, key: &str) -> tokio::sync::MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[index].lock().await
    }
}

/* ============================= EXECUTOR ============================= */

pub struct ExecutionContext<'a> {
    pub pod: &'a Pod,
    pub namespace: &'a str,
    pub pod_name: &'a str,
    pub current: &'a HashMap<String, ContainerResources>,
    pub effective: &'a HashMap<String, ProposedResources>,
    pub config: &'a OperatorConfig,
    pub now: DateTime<Utc>,
}

/// Applies accepted proposals through the resize subresource:
/// resizePolicy template fix-up first, then CPU, then memory.
pub struct Executor {
    pub locks: PodLocks,
    pub decisions: DecisionCache,
    pub breaker: CircuitBreaker,
    patched_workloads: Mutex<HashSet<String>>,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            locks: PodLocks::default(),
            decisions: DecisionCache::default(),
            breaker: CircuitBreaker::default(),
            patched_workloads: Mutex::new(HashSet::new()),
        }
    }
}

impl Executor {
    pub async fn execute<C: ControlPlane>(&self, cp: &C, ctx: &ExecutionContext<'_>) -> ExecOutcome {
        let key = format!("{}/{}", ctx.namespace, ctx.pod_name);
        let _guard = self.locks.lock(&key).await;

        if self.breaker.is_open(ctx.now) {
            return ExecOutcome::CircuitOpen;
        }

        let cpu_changes = cpu_changes(ctx.current, ctx.effective);
        let memory_changes = memory_changes(ctx.current, ctx.effective);

        if cpu_changes.is_empty() && memory_changes.is_empty() {
            return ExecOutcome::NoOp;
        }

        self.log_decisions(ctx);

        // Phase A: make sure in-place resizing stays restart-free by
        // declaring resizePolicy on the parent workload's template. Never
        // on the live pod, and never touching resources.
        if ctx.config.update_resize_policy {
            self.ensure_resize_policy(cp, ctx).await;
        }

        // Phase B: CPU, always safe in place.
        let cpu_applied = if cpu_changes.is_empty() {
            false
        } else {
            let patch = resize_patch(&cpu_changes, ResizeField::Cpu);
            match self.patch_with_retry(cp, ctx, &patch, "cpu").await {
                PhaseResult::Ok => {
                    record_applied(ctx, &cpu_changes, ResizeField::Cpu);
                    true
                }
                PhaseResult::Infeasible(e) => return ExecOutcome::Deferred { error: e },
                PhaseResult::Terminal(e) => return ExecOutcome::Failed { error: e },
            }
        };

        // Phase C: memory, isolated so a deferred memory step never holds
        // the CPU change hostage.
        let memory_applied = if memory_changes.is_empty() {
            false
        } else {
            let patch = resize_patch(&memory_changes, ResizeField::Memory);
            match self.patch_with_retry(cp, ctx, &patch, "memory").await {
                PhaseResult::Ok => {
                    record_applied(ctx, &memory_changes, ResizeField::Memory);
                    true
                }
                PhaseResult::Infeasible(e) => {
                    return ExecOutcome::MemoryDeferred {
                        cpu_applied,
                        error: e,
                    };
                }
                PhaseResult::Terminal(e) => return ExecOutcome::Failed { error: e },
            }
        };

        ExecOutcome::Applied {
            cpu_applied,
            memory_applied,
        }
    }

    fn log_decisions(&self, ctx: &ExecutionContext<'_>) {
        for (name, proposal) in ctx.effective {
            let Some(current) = ctx.current.get(name) else {
                continue;
            };
            let pair = DecisionPair {
                old_cpu: current.cpu_request_milli.unwrap_or(0),
                new_cpu: proposal.cpu_request_milli,
                old_memory: current.memory_request_bytes.unwrap_or(0),
                new_memory: proposal.memory_request_bytes,
            };
            let cache_key = (
                ctx.namespace.to_string(),
                ctx.pod_name.to_string(),
                name.clone(),
            );
            if self.decisions.should_log(cache_key, pair, ctx.now, ctx.config.decision_cache_expiry)
            {
                info!(
                    pod = %format!("{}/{}", ctx.namespace, ctx.pod_name),
                    container = %name,
                    cpu = %format!("{}->{}", format_cpu(pair.old_cpu), format_cpu(pair.new_cpu)),
                    memory = %format!(
                        "{}->{}",
                        format_memory(pair.old_memory),
                        format_memory(pair.new_memory)
                    ),
                    "resize_decided"
                );
            }
        }
    }

    async fn ensure_resize_policy<C: ControlPlane>(&self, cp: &C, ctx: &ExecutionContext<'_>) {
        if !pod_missing_resize_policy(ctx.pod) {
            return;
        }
        let Some(workload) = resolve_owner(ctx.pod) else {
            return;
        };

        {
            let patched = self
                .patched_workloads
                .lock()
                .expect("workload set lock not poisoned");
            if patched.contains(&workload.key()) {
                return;
            }
        }

        let containers = match cp.workload_containers(&workload).await {
            Ok(c) => c,
            Err(e) => {
                warn!(workload = %workload.key(), error = %e, "resize_policy_template_read_failed");
                return;
            }
        };

        let Some(patch) = resize_policy_patch(&containers) else {
            // Template already declares policies; remember so we skip the
            // read next time.
            self.patched_workloads
                .lock()
                .expect("workload set lock not poisoned")
                .insert(workload.key());
            return;
        };

        match cp.patch_workload(&workload, &patch).await {
            Ok(()) => {
                info!(workload = %workload.key(), "resize_policy_declared");
                self.patched_workloads
                    .lock()
                    .expect("workload set lock not poisoned")
                    .insert(workload.key());
            }
            Err(e) => {
                warn!(workload = %workload.key(), error = %e, "resize_policy_patch_failed");
            }
        }
    }

    async fn patch_with_retry<C: ControlPlane>(
        &self,
        cp: &C,
        ctx: &ExecutionContext<'_>,
        patch: &Value,
        phase: &str,
    ) -> PhaseResult {
        // Per-phase wall-clock budget; a hung patch counts as a timeout
        // and goes through the same transient-retry path as a conflict.
        const PATCH_DEADLINE: Duration = Duration::from_secs(10);

        let config = ctx.config;
        let mut delay = config.retry_initial_delay;

        for attempt in 0..=config.max_retries {
            let _timer = observe::PROCESSING_DURATION
                .with_label_values(&[phase])
                .start_timer();

            let result = tokio::time::timeout(
                PATCH_DEADLINE,
                cp.resize_pod(ctx.namespace, ctx.pod_name, patch),
            )
            .await
            .unwrap_or_else(|_| {
                Err(SizingError::Api(kube::Error::Api(kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!("{phase} patch deadline exceeded"),
                    reason: "Timeout".to_string(),
                    code: 504,
                })))
            });

            match result {
                Ok(()) => {
                    self.breaker.record_success();
                    return PhaseResult::Ok;
                }
                Err(SizingError::Api(e)) => match classify_api_failure(&e) {
                    ApiFailure::Infeasible => {
                        return PhaseResult::Infeasible(e.to_string());
                    }
                    ApiFailure::Forbidden | ApiFailure::NotFound => {
                        return PhaseResult::Terminal(e.to_string());
                    }
                    ApiFailure::ConflictOrTimeout | ApiFailure::Other => {
                        let opened = self.breaker.record_failure(
                            ctx.now,
                            config.circuit_breaker_threshold,
                            config.circuit_breaker_cooldown,
                        );
                        if opened {
                            warn!(
                                pod = %format!("{}/{}", ctx.namespace, ctx.pod_name),
                                "circuit_breaker_opened"
                            );
                        }
                        if attempt == config.max_retries {
                            return PhaseResult::Terminal(format!(
                                "{phase} patch failed after {} attempts: {e}",
                                attempt + 1
                            ));
                        }
                        tokio::time::sleep(delay).await;
                        delay = Duration::from_secs_f64(
                            (delay.as_secs_f64() * config.retry_backoff_factor)
                                .min(config.retry_max_delay.as_secs_f64()),
                        );
                    }
                },
                Err(e) => return PhaseResult::Terminal(e.to_string()),
            }
        }

        PhaseResult::Terminal(format!("{phase} patch retries exhausted"))
    }
}

/* ============================= CHANGE SETS ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResizeField {
    Cpu,
    Memory,
}

#[derive(Debug, Clone)]
struct ContainerChange {
    name: String,
    request: u64,
    limit: u64,
    old_request: u64,
}

fn cpu_changes(
    current: &HashMap<String, ContainerResources>,
    effective: &HashMap<String, ProposedResources>,
) -> Vec<ContainerChange> {
    let mut changes: Vec<ContainerChange> = effective
        .iter()
        .filter_map(|(name, p)| {
            let cur = current.get(name)?;
            let unchanged = cur.cpu_request_milli == Some(p.cpu_request_milli)
                && cur.cpu_limit_milli == Some(p.cpu_limit_milli);
            (!unchanged).then(|| ContainerChange {
                name: name.clone(),
                request: p.cpu_request_milli,
                limit: p.cpu_limit_milli,
                old_request: cur.cpu_request_milli.unwrap_or(0),
            })
        })
        .collect();
    changes.sort_by(|a, b| a.name.cmp(&b.name));
    changes
}

fn memory_changes(
    current: &HashMap<String, ContainerResources>,
    effective: &HashMap<String, ProposedResources>,
) -> Vec<ContainerChange> {
    let mut changes: Vec<ContainerChange> = effective
        .iter()
        .filter_map(|(name, p)| {
            let cur = current.get(name)?;
            let unchanged = cur.memory_request_bytes == Some(p.memory_request_bytes)
                && cur.memory_limit_bytes == Some(p.memory_limit_bytes);
            (!unchanged).then(|| ContainerChange {
                name: name.clone(),
                request: p.memory_request_bytes,
                limit: p.memory_limit_bytes,
                old_request: cur.memory_request_bytes.unwrap_or(0),
            })
        })
        .collect();
    changes.sort_by(|a, b| a.name.cmp(&b.name));
    changes
}

/* ============================= PATCH BUILDERS ============================= */

/// Strategic-merge resize patch carrying exactly one resource's fields.
fn resize_patch(changes: &[ContainerChange], field: ResizeField) -> Value {
    let containers: Vec<Value> = changes
        .iter()
        .map(|c| {
            let (key, request, limit) = match field {
                ResizeField::Cpu => (CPU, format_cpu(c.request), format_cpu(c.limit)),
                ResizeField::Memory => (MEMORY, format_memory(c.request), format_memory(c.limit)),
            };
            json!({
                "name": c.name,
                "resources": {
                    "requests": { key: request },
                    "limits": { key: limit },
                }
            })
        })
        .collect();

    json!({ "spec": { "containers": containers } })
}

/// Workload template patch declaring `restartPolicy: NotRequired` where a
/// container has no explicit entry. Existing declarations are carried
/// through untouched (the list replaces wholesale on merge), so a
/// deliberate RestartContainer is never overridden.
///
/// Returns `None` when every container already declares both resources.
pub fn resize_policy_patch(containers: &[k8s_openapi::api::core::v1::Container]) -> Option<Value> {
    let mut patched_any = false;

    let container_patches: Vec<Value> = containers
        .iter()
        .map(|c| {
            let mut entries: Vec<Value> = c
                .resize_policy
                .as_ref()
                .map(|policies| {
                    policies
                        .iter()
                        .map(|p| {
                            json!({
                                "resourceName": p.resource_name,
                                "restartPolicy": p.restart_policy,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            for resource in [CPU, MEMORY] {
                let declared = c
                    .resize_policy
                    .as_ref()
                    .is_some_and(|ps| ps.iter().any(|p| p.resource_name == resource));
                if !declared {
                    entries.push(json!({
                        "resourceName": resource,
                        "restartPolicy": "NotRequired",
                    }));
                    patched_any = true;
                }
            }

            json!({ "name": c.name, "resizePolicy": entries })
        })
        .collect();

    patched_any.then(|| {
        json!({
            "spec": {
                "template": {
                    "spec": {
                        "containers": container_patches
                    }
                }
            }
        })
    })
}

/// Does any container on the live pod lack an explicit resizePolicy entry?
fn pod_missing_resize_policy(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .map(|s| {
            s.containers.iter().any(|c| {
                [CPU, MEMORY].iter().any(|resource| {
                    !c.resize_policy
                        .as_ref()
                        .is_some_and(|ps| ps.iter().any(|p| p.resource_name == *resource))
                })
            })
        })
        .unwrap_or(false)
}

/* ============================= METRICS ============================= */

fn record_applied(ctx: &ExecutionContext<'_>, changes: &[ContainerChange], field: ResizeField) {
    let resource = match field {
        ResizeField::Cpu => "cpu",
        ResizeField::Memory => "memory",
    };
    for change in changes {
        let direction = if change.request >= change.old_request {
            "up"
        } else {
            "down"
        };
        observe::RESIZED_TOTAL
            .with_label_values(&[ctx.namespace, resource, direction])
            .inc();
        if change.old_request > 0 {
            let fraction = (change.request as f64 - change.old_request as f64).abs()
                / change.old_request as f64;
            observe::CHANGE_PERCENTAGE
                .with_label_values(&[resource, direction])
                .observe(fraction);
        }
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerResizePolicy};

    const MIB: u64 = 1024 * 1024;

    fn current(name: &str, cpu: u64, cpu_lim: u64, mem_mib: u64, mem_lim_mib: u64) -> ContainerResources {
        ContainerResources {
            name: name.to_string(),
            cpu_request_milli: Some(cpu),
            cpu_limit_milli: Some(cpu_lim),
            memory_request_bytes: Some(mem_mib * MIB),
            memory_limit_bytes: Some(mem_lim_mib * MIB),
        }
    }

    fn proposed(cpu: u64, cpu_lim: u64, mem_mib: u64, mem_lim_mib: u64) -> ProposedResources {
        ProposedResources {
            cpu_request_milli: cpu,
            cpu_limit_milli: cpu_lim,
            memory_request_bytes: mem_mib * MIB,
            memory_limit_bytes: mem_lim_mib * MIB,
        }
    }

    // ── Change sets ──

    #[test]
    fn test_cpu_change_detection() {
        let cur = HashMap::from([("main".to_string(), current("main", 100, 200, 128, 256))]);
        let eff = HashMap::from([("main".to_string(), proposed(360, 720, 128, 256))]);

        let cpu = cpu_changes(&cur, &eff);
        let memory = memory_changes(&cur, &eff);
        assert_eq!(cpu.len(), 1);
        assert_eq!(cpu[0].request, 360);
        assert!(memory.is_empty());
    }

    #[test]
    fn test_unchanged_container_excluded() {
        let cur = HashMap::from([("main".to_string(), current("main", 100, 200, 128, 256))]);
        let eff = HashMap::from([("main".to_string(), proposed(100, 200, 128, 256))]);
        assert!(cpu_changes(&cur, &eff).is_empty());
        assert!(memory_changes(&cur, &eff).is_empty());
    }

    // ── Patch shapes ──

    #[test]
    fn test_cpu_patch_carries_only_cpu() {
        let changes = vec![ContainerChange {
            name: "main".to_string(),
            request: 360,
            limit: 720,
            old_request: 100,
        }];
        let patch = resize_patch(&changes, ResizeField::Cpu);
        let container = &patch["spec"]["containers"][0];
        assert_eq!(container["name"], "main");
        assert_eq!(container["resources"]["requests"]["cpu"], "360m");
        assert_eq!(container["resources"]["limits"]["cpu"], "720m");
        assert!(container["resources"]["requests"].get("memory").is_none());
    }

    #[test]
    fn test_memory_patch_carries_only_memory() {
        let changes = vec![ContainerChange {
            name: "main".to_string(),
            request: 240 * MIB,
            limit: 480 * MIB,
            old_request: 128 * MIB,
        }];
        let patch = resize_patch(&changes, ResizeField::Memory);
        let container = &patch["spec"]["containers"][0];
        assert_eq!(container["resources"]["requests"]["memory"], "240Mi");
        assert_eq!(container["resources"]["limits"]["memory"], "480Mi");
        assert!(container["resources"]["requests"].get("cpu").is_none());
    }

    // ── resizePolicy template patch ──

    #[test]
    fn test_resize_policy_patch_adds_missing() {
        let containers = vec![Container {
            name: "main".to_string(),
            ..Default::default()
        }];
        let patch = resize_policy_patch(&containers).expect("patch needed");
        let entries = patch["spec"]["template"]["spec"]["containers"][0]["resizePolicy"]
            .as_array()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e["restartPolicy"] == "NotRequired"));
    }

    #[test]
    fn test_resize_policy_patch_preserves_existing_declaration() {
        let containers = vec![Container {
            name: "main".to_string(),
            resize_policy: Some(vec![ContainerResizePolicy {
                resource_name: "memory".to_string(),
                restart_policy: "RestartContainer".to_string(),
            }]),
            ..Default::default()
        }];
        let patch = resize_policy_patch(&containers).expect("cpu entry still missing");
        let entries = patch["spec"]["template"]["spec"]["containers"][0]["resizePolicy"]
            .as_array()
            .unwrap();
        assert_eq!(entries.len(), 2);
        let memory = entries.iter().find(|e| e["resourceName"] == "memory").unwrap();
        assert_eq!(memory["restartPolicy"], "RestartContainer");
        let cpu = entries.iter().find(|e| e["resourceName"] == "cpu").unwrap();
        assert_eq!(cpu["restartPolicy"], "NotRequired");
    }

    #[test]
    fn test_resize_policy_patch_none_when_complete() {
        let containers = vec![Container {
            name: "main".to_string(),
            resize_policy: Some(vec![
                ContainerResizePolicy {
                    resource_name: "cpu".to_string(),
                    restart_policy: "NotRequired".to_string(),
                },
                ContainerResizePolicy {
                    resource_name: "memory".to_string(),
                    restart_policy: "NotRequired".to_string(),
                },
            ]),
            ..Default::default()
        }];
        assert!(resize_policy_patch(&containers).is_none());
    }

    // ── Decision cache ──

    #[test]
    fn test_decision_cache_suppresses_repeats() {
        let cache = DecisionCache::default();
        let now = Utc::now();
        let key = ("prod".to_string(), "web-1".to_string(), "main".to_string());
        let pair = DecisionPair {
            old_cpu: 100,
            new_cpu: 360,
            old_memory: 128 * MIB,
            new_memory: 240 * MIB,
        };

        assert!(cache.should_log(key.clone(), pair, now, Duration::from_secs(600)));
        assert!(!cache.should_log(key.clone(), pair, now, Duration::from_secs(600)));
    }

    #[test]
    fn test_decision_cache_logs_new_pair() {
        let cache = DecisionCache::default();
        let now = Utc::now();
        let key = ("prod".to_string(), "web-1".to_string(), "main".to_string());
        let pair_a = DecisionPair {
            old_cpu: 100,
            new_cpu: 360,
            old_memory: 0,
            new_memory: 0,
        };
        let pair_b = DecisionPair {
            old_cpu: 360,
            new_cpu: 500,
            old_memory: 0,
            new_memory: 0,
        };
        assert!(cache.should_log(key.clone(), pair_a, now, Duration::from_secs(600)));
        assert!(cache.should_log(key.clone(), pair_b, now, Duration::from_secs(600)));
    }

    #[test]
    fn test_decision_cache_expires() {
        let cache = DecisionCache::default();
        let now = Utc::now();
        let key = ("prod".to_string(), "web-1".to_string(), "main".to_string());
        let pair = DecisionPair {
            old_cpu: 100,
            new_cpu: 360,
            old_memory: 0,
            new_memory: 0,
        };
        assert!(cache.should_log(key.clone(), pair, now, Duration::from_secs(600)));
        let later = now + chrono::Duration::seconds(700);
        assert!(cache.should_log(key.clone(), pair, later, Duration::from_secs(600)));
    }

    // ── Circuit breaker ──

    #[test]
    fn test_breaker_opens_at_threshold() {
        let breaker = CircuitBreaker::default();
        let now = Utc::now();
        let cooldown = Duration::from_secs(300);

        assert!(!breaker.record_failure(now, 3, cooldown));
        assert!(!breaker.record_failure(now, 3, cooldown));
        assert!(breaker.record_failure(now, 3, cooldown));
        assert!(breaker.is_open(now));
    }

    #[test]
    fn test_breaker_success_resets_count() {
        let breaker = CircuitBreaker::default();
        let now = Utc::now();
        let cooldown = Duration::from_secs(300);

        breaker.record_failure(now, 3, cooldown);
        breaker.record_failure(now, 3, cooldown);
        breaker.record_success();
        assert!(!breaker.record_failure(now, 3, cooldown));
        assert!(!breaker.is_open(now));
    }

    #[test]
    fn test_breaker_closes_after_cooldown() {
        let breaker = CircuitBreaker::default();
        let now = Utc::now();
        let cooldown = Duration::from_secs(300);

        for _ in 0..3 {
            breaker.record_failure(now, 3, cooldown);
        }
        assert!(breaker.is_open(now));
        assert!(!breaker.is_open(now + chrono::Duration::seconds(301)));
    }

    // ── Pod lock striping ──

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = PodLocks::new(8);
        let guard = locks.lock("prod/web-1").await;
        // A second lock on the same key must not be immediately available.
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock("prod/web-1"));
        assert!(second.await.is_err());
        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.lock("prod/web-1"));
        assert!(third.await.is_ok());
    }

    #[test]
    fn test_pod_missing_resize_policy() {
        let pod = Pod {
            spec: Some(k8s_openapi::api::core::v1::PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(pod_missing_resize_policy(&pod));
    }
}
