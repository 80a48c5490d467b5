use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info, warn};

use crate::api::{ControlPlane, PodEvent};
use crate::calculator::{PredictionInput, Proposal, ProposedResources, propose};
use crate::cluster::{ClusterCache, LimitRangeView, NodeView, QuotaView};
use crate::conditions;
use crate::config::ConfigStore;
use crate::executor::{ExecOutcome, ExecutionContext, Executor};
use crate::observe;
use crate::policy::PolicyEngine;
use crate::predictor::{Predictor, ResourceKind, SeriesKey};
use crate::resources::{ContainerResources, format_cpu, format_memory};
use crate::retry::{BackoffPolicy, DeferredResize, RetryQueue};
use crate::usage::MetricsSource;
use crate::validator::{Outcome, ValidationInput, validate};

/* ============================= OUTCOME ============================= */

/// What one pipeline pass decided for a pod. Mostly consumed by tests
/// and the one-shot analyze command; the operator loop only logs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodOutcome {
    Skipped(String),
    NoOp,
    DryRun(String),
    Rejected(String),
    Deferred(String),
    Applied {
        cpu: bool,
        memory: bool,
        memory_deferred: bool,
    },
    Failed(String),
}

/* ============================= ENGINE ============================= */

/// The per-pod pipeline and the state it runs against. The operator
/// command owns the watches, the ticker, and the worker pool; everything
/// that decides and applies lives here so it can run without a cluster.
pub struct Engine<M: MetricsSource, C: ControlPlane> {
    pub config: ConfigStore,
    pub policies: RwLock<PolicyEngine>,
    pub predictor: Mutex<Predictor>,
    pub cluster: RwLock<ClusterCache>,
    pub retries: Mutex<RetryQueue>,
    pub executor: Executor,
    pub metrics: M,
    pub control: C,
}

impl<M: MetricsSource, C: ControlPlane> Engine<M, C> {
    pub fn new(config: ConfigStore, metrics: M, control: C) -> Self {
        let window = config.snapshot().predictor_window;
        Self {
            config,
            policies: RwLock::new(PolicyEngine::default()),
            predictor: Mutex::new(Predictor::new(window)),
            cluster: RwLock::new(ClusterCache::default()),
            retries: Mutex::new(RetryQueue::default()),
            executor: Executor::default(),
            metrics,
            control,
        }
    }

    /* ── Pipeline ── */

    pub async fn process_pod(&self, pod: &Pod, now: DateTime<Utc>) -> PodOutcome {
        let config = self.config.snapshot();
        let namespace = pod.metadata.namespace.clone().unwrap_or_default();
        let name = pod.metadata.name.clone().unwrap_or_default();
        let key = format!("{namespace}/{name}");

        let _timer = observe::PROCESSING_DURATION_TOTAL.start_timer();

        if !config.enabled {
            return PodOutcome::Skipped("sizing disabled".to_string());
        }
        if !config.namespace_allowed(&namespace) {
            return PodOutcome::Skipped(format!("namespace {namespace} filtered"));
        }
        if pod.metadata.deletion_timestamp.is_some() {
            return PodOutcome::Skipped("pod terminating".to_string());
        }
        if pod.status.as_ref().and_then(|s| s.phase.as_deref()) != Some("Running") {
            return PodOutcome::Skipped("pod not running".to_string());
        }

        observe::PROCESSED_TOTAL.with_label_values(&[&namespace]).inc();

        // Policy selection is pure and cheap; do it before paying for
        // metrics.
        let evaluation = {
            let policies = self.policies.read().expect("policy lock not poisoned");
            policies.evaluate(pod, &config, now)
        };
        if evaluation.skip {
            debug!(pod = %key, reason = %evaluation.reason, "pod_skipped");
            return PodOutcome::Skipped(evaluation.reason);
        }

        let usage = match self.metrics.fetch(&namespace, &name).await {
            Ok(usage) => usage,
            Err(e) => {
                debug!(pod = %key, error = %e, "metrics_unavailable");
                return PodOutcome::Skipped(format!("metrics unavailable: {e}"));
            }
        };
        if usage.is_stale(now, config.resize_interval * 2) {
            return PodOutcome::Skipped("metrics sample too old".to_string());
        }

        let current: HashMap<String, ContainerResources> = ContainerResources::from_pod(pod)
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        // Feed the forecaster and build per-container proposals.
        let mut proposals: HashMap<String, ProposedResources> = HashMap::new();
        {
            let mut predictor = self.predictor.lock().expect("predictor lock not poisoned");
            for (container, current_resources) in &current {
                if !evaluation.strategy.applies_to_container(container) {
                    continue;
                }
                let Some(sample) = usage.containers.get(container) else {
                    continue;
                };
                // A zero reading is the provider saying "I don't know";
                // sizing down on it would be guessing.
                if sample.cpu_milli == 0 || sample.memory_bytes == 0 {
                    continue;
                }

                let cpu_key = SeriesKey {
                    namespace: namespace.clone(),
                    pod: name.clone(),
                    container: container.clone(),
                    resource: ResourceKind::Cpu,
                };
                let memory_key = SeriesKey {
                    resource: ResourceKind::Memory,
                    ..cpu_key.clone()
                };
                predictor.observe(cpu_key.clone(), now, sample.cpu_milli as f64);
                predictor.observe(memory_key.clone(), now, sample.memory_bytes as f64);

                let prediction = PredictionInput {
                    enabled: config.prediction_enabled,
                    confidence_threshold: config.confidence_threshold,
                    cpu: predictor.forecast(&cpu_key, now, config.resize_interval),
                    memory: predictor.forecast(&memory_key, now, config.resize_interval),
                };

                match propose(current_resources, *sample, &evaluation.strategy, &prediction) {
                    Proposal::NoOp => {}
                    Proposal::Resize(p) => {
                        proposals.insert(container.clone(), p);
                    }
                }
            }
        }

        if proposals.is_empty() {
            return PodOutcome::NoOp;
        }

        // Validate against safety, QoS, and cluster constraints.
        let (node, quotas, limit_ranges) = self.capacity_views(pod, &namespace);
        let validation = validate(&ValidationInput {
            pod,
            proposals: &proposals,
            strategy: &evaluation.strategy,
            safety_threshold_fraction: config.safety_threshold_fraction,
            node: node.as_ref(),
            quotas: &quotas,
            limit_ranges: &limit_ranges,
        });

        if !config.dry_run {
            for container in &validation.memory_elided {
                self.emit(PodEvent {
                    namespace: namespace.clone(),
                    pod: name.clone(),
                    reason: conditions::EVENT_RESIZE_SKIPPED_MEMORY_DECREASE.to_string(),
                    note: format!(
                        "memory decrease for container {container} skipped: container requires a restart for memory changes"
                    ),
                    warning: false,
                })
                .await;
            }
        }

        match &validation.outcome {
            Outcome::Reject { code, reason } => {
                match code {
                    crate::validator::RejectCode::SafetyThreshold => {
                        observe::SAFETY_THRESHOLD_VIOLATIONS.inc()
                    }
                    crate::validator::RejectCode::QosChange => {
                        observe::QOS_VIOLATIONS_PREVENTED.inc()
                    }
                    _ => {}
                }
                info!(pod = %key, rule = %evaluation.rule_name, reason = %reason, "resize_rejected");
                if config.dry_run {
                    return PodOutcome::Rejected(reason.clone());
                }
                self.emit(PodEvent {
                    namespace,
                    pod: name,
                    reason: conditions::EVENT_RESIZE_REJECTED.to_string(),
                    note: format!("{} ({})", reason, code.as_str()),
                    warning: true,
                })
                .await;
                return PodOutcome::Rejected(reason.clone());
            }
            Outcome::Infeasible { code, reason } => {
                if config.dry_run {
                    return PodOutcome::Deferred(format!("{}: {}", code.as_str(), reason));
                }
                return self
                    .defer_resize(
                        pod,
                        &namespace,
                        &name,
                        validation.effective,
                        code.as_str(),
                        reason,
                        now,
                    )
                    .await;
            }
            Outcome::Allowed => {}
        }

        if validation.effective.is_empty() {
            // Everything that survived elision was a no-op.
            return PodOutcome::NoOp;
        }

        if config.dry_run {
            let summary = delta_summary(&current, &validation.effective);
            info!(pod = %key, changes = %summary, "dry_run_decision");
            return PodOutcome::DryRun(summary);
        }
        if !config.in_place_resize_enabled {
            return PodOutcome::Skipped("in-place resize disabled".to_string());
        }

        self.apply(pod, &namespace, &name, &current, validation.effective, now)
            .await
    }

    /* ── Application ── */

    async fn apply(
        &self,
        pod: &Pod,
        namespace: &str,
        name: &str,
        current: &HashMap<String, ContainerResources>,
        effective: HashMap<String, ProposedResources>,
        now: DateTime<Utc>,
    ) -> PodOutcome {
        let config = self.config.snapshot();
        let key = format!("{namespace}/{name}");
        let generation = pod.metadata.generation;
        let summary = delta_summary(current, &effective);

        // Condition first, then patch: a watcher must never observe a
        // resized pod without the in-progress marker having existed.
        if let Err(e) = self
            .control
            .patch_pod_status(
                namespace,
                name,
                &conditions::in_progress_patch(&summary, generation, now),
            )
            .await
        {
            warn!(pod = %key, error = %e, "condition_patch_failed");
            return PodOutcome::Failed(e.to_string());
        }
        self.emit(PodEvent {
            namespace: namespace.to_string(),
            pod: name.to_string(),
            reason: conditions::EVENT_RESIZE_STARTED.to_string(),
            note: summary.clone(),
            warning: false,
        })
        .await;

        let ctx = ExecutionContext {
            pod,
            namespace,
            pod_name: name,
            current,
            effective: &effective,
            config: config.as_ref(),
            now,
        };

        match self.executor.execute(&self.control, &ctx).await {
            ExecOutcome::NoOp => {
                self.clear_conditions(namespace, name, &summary, generation, now).await;
                PodOutcome::NoOp
            }
            ExecOutcome::Applied { cpu_applied, memory_applied } => {
                self.clear_conditions(namespace, name, &summary, generation, now).await;
                if let Some(generation) = generation
                    && let Err(e) = self
                        .control
                        .annotate_pod(namespace, name, &conditions::observed_generation_patch(generation))
                        .await
                {
                    warn!(pod = %key, error = %e, "observed_generation_patch_failed");
                }
                self.emit(PodEvent {
                    namespace: namespace.to_string(),
                    pod: name.to_string(),
                    reason: conditions::EVENT_RESIZE_SUCCEEDED.to_string(),
                    note: summary.clone(),
                    warning: false,
                })
                .await;
                self.retries
                    .lock()
                    .expect("retry lock not poisoned")
                    .remove(&key);
                info!(pod = %key, changes = %summary, "resize_applied");
                PodOutcome::Applied {
                    cpu: cpu_applied,
                    memory: memory_applied,
                    memory_deferred: false,
                }
            }
            ExecOutcome::MemoryDeferred { cpu_applied, error } => {
                let outcome = self
                    .defer_resize(pod, namespace, name, effective, "MemoryDeferred", &error, now)
                    .await;
                match outcome {
                    PodOutcome::Deferred(_) => PodOutcome::Applied {
                        cpu: cpu_applied,
                        memory: false,
                        memory_deferred: true,
                    },
                    other => other,
                }
            }
            ExecOutcome::Deferred { error } => {
                self.defer_resize(
                    pod,
                    namespace,
                    name,
                    effective,
                    "NodeResourceConstraint",
                    &error,
                    now,
                )
                .await
            }
            ExecOutcome::Failed { error } => {
                self.clear_conditions(namespace, name, &error, generation, now).await;
                self.emit(PodEvent {
                    namespace: namespace.to_string(),
                    pod: name.to_string(),
                    reason: conditions::EVENT_RESIZE_REJECTED.to_string(),
                    note: error.clone(),
                    warning: true,
                })
                .await;
                PodOutcome::Failed(error)
            }
            ExecOutcome::CircuitOpen => {
                PodOutcome::Skipped("resize circuit open".to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn defer_resize(
        &self,
        pod: &Pod,
        namespace: &str,
        name: &str,
        effective: HashMap<String, ProposedResources>,
        reason: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> PodOutcome {
        let message = format!("{reason}: {error}");
        if let Err(e) = self
            .control
            .patch_pod_status(
                namespace,
                name,
                &conditions::pending_patch(reason, &message, pod.metadata.generation, now),
            )
            .await
        {
            warn!(pod = %format!("{namespace}/{name}"), error = %e, "pending_condition_patch_failed");
        }
        self.emit(PodEvent {
            namespace: namespace.to_string(),
            pod: name.to_string(),
            reason: conditions::EVENT_RESIZE_DEFERRED.to_string(),
            note: message.clone(),
            warning: false,
        })
        .await;

        let entry = DeferredResize {
            namespace: namespace.to_string(),
            pod: name.to_string(),
            proposals: effective,
            first_seen: now,
            last_attempt: None,
            next_attempt: now,
            attempts: 0,
            priority: pod.spec.as_ref().and_then(|s| s.priority).unwrap_or(0),
            observed_generation: pod.metadata.generation,
            reason: reason.to_string(),
            original_error: error.to_string(),
        };

        {
            let mut retries = self.retries.lock().expect("retry lock not poisoned");
            retries.defer(entry);
            observe::DEFERRED_QUEUE_DEPTH.set(retries.len() as i64);
        }

        info!(pod = %format!("{namespace}/{name}"), reason = %reason, "resize_deferred");
        PodOutcome::Deferred(message)
    }

    async fn clear_conditions(
        &self,
        namespace: &str,
        name: &str,
        message: &str,
        generation: Option<i64>,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self
            .control
            .patch_pod_status(
                namespace,
                name,
                &conditions::cleared_patch(message, generation, now),
            )
            .await
        {
            // Best-effort: the next successful cycle rewrites conditions.
            observe::IGNORED_ERRORS
                .with_label_values(&["clear_conditions"])
                .inc();
            debug!(pod = %format!("{namespace}/{name}"), error = %e, "condition_clear_failed");
        }
    }

    /* ── Retry sweeping ── */

    /// One sweeper pass: expire dead entries, re-dispatch due ones in
    /// (priority, age) order. `live_pods` is the current pod listing,
    /// keyed `namespace/name`.
    pub async fn sweep_retries(
        &self,
        live_pods: &HashMap<String, Pod>,
        now: DateTime<Utc>,
    ) -> Vec<(String, PodOutcome)> {
        let config = self.config.snapshot();
        let policy = BackoffPolicy {
            initial_delay: config.retry_initial_delay,
            max_delay: config.retry_max_delay,
            factor: config.retry_backoff_factor,
            max_attempts: config.max_retries,
            max_deferral: config.max_deferral_time,
        };

        let (expired, due) = {
            let mut retries = self.retries.lock().expect("retry lock not poisoned");
            let expired = retries.drain_expired(now, &policy);
            let due = retries.take_due(now);
            observe::DEFERRED_QUEUE_DEPTH.set(retries.len() as i64);
            (expired, due)
        };

        for entry in &expired {
            self.emit(PodEvent {
                namespace: entry.namespace.clone(),
                pod: entry.pod.clone(),
                reason: conditions::EVENT_RESIZE_REJECTED.to_string(),
                note: format!(
                    "deferred resize abandoned after {} attempts: {}",
                    entry.attempts, entry.original_error
                ),
                warning: true,
            })
            .await;
            if let Some(pod) = live_pods.get(&entry.key()) {
                self.clear_conditions(
                    &entry.namespace,
                    &entry.pod,
                    "deferral expired",
                    pod.metadata.generation,
                    now,
                )
                .await;
            }
        }

        let mut results = Vec::new();
        for entry in due {
            let key = entry.key();
            observe::RETRY_ATTEMPTS.with_label_values(&[&entry.reason]).inc();

            let Some(pod) = live_pods.get(&key) else {
                // Pod is gone; the queued work dies with it.
                self.predictor
                    .lock()
                    .expect("predictor lock not poisoned")
                    .forget_pod(&entry.namespace, &entry.pod);
                continue;
            };

            if conditions::pending_is_stale(pod, entry.observed_generation) {
                // The user changed the pod since we deferred; their
                // intent supersedes the queued resize.
                self.clear_conditions(
                    &entry.namespace,
                    &entry.pod,
                    "superseded by newer pod generation",
                    pod.metadata.generation,
                    now,
                )
                .await;
                continue;
            }

            let outcome = self.retry_entry(pod, entry, now, &policy).await;
            results.push((key, outcome));
        }
        results
    }

    async fn retry_entry(
        &self,
        pod: &Pod,
        entry: DeferredResize,
        now: DateTime<Utc>,
        policy: &BackoffPolicy,
    ) -> PodOutcome {
        let config = self.config.snapshot();
        let namespace = entry.namespace.clone();
        let name = entry.pod.clone();

        let current: HashMap<String, ContainerResources> = ContainerResources::from_pod(pod)
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        // Re-validate against fresh capacity before burning an attempt.
        let strategy = {
            let policies = self.policies.read().expect("policy lock not poisoned");
            policies.evaluate(pod, &config, now).strategy
        };
        let (node, quotas, limit_ranges) = self.capacity_views(pod, &namespace);
        let validation = validate(&ValidationInput {
            pod,
            proposals: &entry.proposals,
            strategy: &strategy,
            safety_threshold_fraction: config.safety_threshold_fraction,
            node: node.as_ref(),
            quotas: &quotas,
            limit_ranges: &limit_ranges,
        });

        match validation.outcome {
            Outcome::Allowed => {
                if validation.effective.is_empty() {
                    self.clear_conditions(&namespace, &name, "already sized", pod.metadata.generation, now)
                        .await;
                    return PodOutcome::NoOp;
                }
                let outcome = self
                    .apply(pod, &namespace, &name, &current, validation.effective, now)
                    .await;
                if matches!(outcome, PodOutcome::Deferred(_)) {
                    // apply() re-queued it fresh; restore attempt history.
                    let mut retries = self.retries.lock().expect("retry lock not poisoned");
                    if let Some(requeued) = retries.remove(&entry.key()) {
                        let mut merged = requeued;
                        merged.first_seen = entry.first_seen;
                        merged.attempts = entry.attempts;
                        retries.requeue_after_attempt(merged, now, policy);
                        observe::DEFERRED_QUEUE_DEPTH.set(retries.len() as i64);
                    }
                }
                outcome
            }
            Outcome::Infeasible { reason, .. } => {
                let mut retries = self.retries.lock().expect("retry lock not poisoned");
                retries.requeue_after_attempt(entry, now, policy);
                observe::DEFERRED_QUEUE_DEPTH.set(retries.len() as i64);
                PodOutcome::Deferred(reason)
            }
            Outcome::Reject { reason, .. } => {
                // Constraints shifted under us; the queued proposal is no
                // longer sound.
                self.clear_conditions(&namespace, &name, &reason, pod.metadata.generation, now)
                    .await;
                self.emit(PodEvent {
                    namespace,
                    pod: name,
                    reason: conditions::EVENT_RESIZE_REJECTED.to_string(),
                    note: reason.clone(),
                    warning: true,
                })
                .await;
                PodOutcome::Rejected(reason)
            }
        }
    }

    /* ── Helpers ── */

    fn capacity_views(
        &self,
        pod: &Pod,
        namespace: &str,
    ) -> (Option<NodeView>, Vec<QuotaView>, Vec<LimitRangeView>) {
        let cluster = self.cluster.read().expect("cluster lock not poisoned");
        let node = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.as_deref())
            .and_then(|n| cluster.node(n))
            .cloned();
        let quotas = cluster.quotas_in(namespace).to_vec();
        let limit_ranges = cluster.limit_ranges_in(namespace).to_vec();
        (node, quotas, limit_ranges)
    }

    async fn emit(&self, event: PodEvent) {
        if let Err(e) = self.control.publish_event(event).await {
            observe::IGNORED_ERRORS.with_label_values(&["publish_event"]).inc();
            debug!(error = %e, "event_publish_failed");
        }
    }

    pub fn deferred_depth(&self) -> usize {
        self.retries.lock().expect("retry lock not poisoned").len()
    }
}

/* ============================= FORMATTING ============================= */

/// Human summary of the resource deltas, for events and condition
/// messages: "main: cpu 100m->360m, memory 128Mi->240Mi".
pub fn delta_summary(
    current: &HashMap<String, ContainerResources>,
    effective: &HashMap<String, ProposedResources>,
) -> String {
    let mut parts: Vec<String> = effective
        .iter()
        .map(|(name, p)| {
            let cur = current.get(name);
            let old_cpu = cur.and_then(|c| c.cpu_request_milli).unwrap_or(0);
            let old_memory = cur.and_then(|c| c.memory_request_bytes).unwrap_or(0);
            format!(
                "{name}: cpu {}->{}, memory {}->{}",
                format_cpu(old_cpu),
                format_cpu(p.cpu_request_milli),
                format_memory(old_memory),
                format_memory(p.memory_request_bytes),
            )
        })
        .collect();
    parts.sort();
    parts.join("; ")
}

/// Key every queue and lock uses for a pod.
pub fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

/* ============================= TESTS ============================= */
