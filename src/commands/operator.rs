use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::api::core::v1::{LimitRange, Node, Pod, ResourceQuota};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::watcher::{self, Event, watcher};
use kube::{Client, ResourceExt};
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio::{signal, time::sleep};
use tracing::{info, warn};

use right_sizer::api::{FIELD_MANAGER, KubeControlPlane};
use right_sizer::config::{ConfigStore, OperatorConfig};
use right_sizer::crd::{
    Phase, RightSizerConfig, RightSizerConfigStatus, RightSizerPolicy, RightSizerPolicyStatus,
};
use right_sizer::observe;
use right_sizer::reconciler::{Engine, pod_key};
use right_sizer::usage::MetricsApiSource;

/* ============================= CONFIG ============================= */

const LEASE_NAME: &str = "right-sizer-leader";
const LEASE_DURATION_SECONDS: i32 = 15;
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);
const LEASE_ACQUIRE_INTERVAL: Duration = Duration::from_secs(10);
const RENEWAL_FAILURE_LIMIT: u32 = 3;

type OperatorEngine = Engine<MetricsApiSource, KubeControlPlane>;

fn lease_namespace() -> String {
    std::env::var("POD_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

fn holder_identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "right-sizer-instance".to_string())
}

/* ============================= STATE ============================= */

pub(crate) struct OperatorState {
    pub(crate) leader: bool,
    pub(crate) caches_synced: bool,
    pub(crate) first_cycle_done: bool,
    pub(crate) config_ok: bool,
}

impl OperatorState {
    fn ready(&self) -> bool {
        self.leader && self.caches_synced
    }
}

/* ============================= ENTRY ============================= */

pub async fn run(dry_run: bool) -> Result<()> {
    println!("Starting right-sizer operator...\n");
    info!("operator_starting");

    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;

    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    // Leader election: standby replicas block here, ready to take over.
    print!("  Leader election ............. ");
    while !acquire_leader(&client).await? {
        println!("waiting (another instance holds the lease)");
        info!("not_leader_waiting");
        sleep(LEASE_ACQUIRE_INTERVAL).await;
        print!("  Leader election ............. ");
    }
    println!("acquired");
    info!("leader_acquired");

    let mut initial = OperatorConfig::default();
    initial.dry_run = initial.dry_run || dry_run;
    let store = ConfigStore::new(initial);

    let engine: Arc<OperatorEngine> = Arc::new(Engine::new(
        store,
        MetricsApiSource::new(client.clone()),
        KubeControlPlane::new(client.clone()),
    ));

    observe::force_metrics();

    let addr = SocketAddr::from(([0, 0, 0, 0], 9090));

    println!("  CRD watch ................... RightSizerConfig, RightSizerPolicy (right-sizer.io/v1)");
    println!(
        "  Resize interval ............. {}s",
        engine.config.snapshot().resize_interval.as_secs()
    );
    if engine.config.snapshot().dry_run {
        println!("  Mode ........................ DRY RUN (no patches will be issued)");
    }
    println!("  Metrics server .............. http://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    GET /healthz .............. Liveness probe (always 200 OK)");
    println!("    GET /readyz ............... Readiness probe (leader + caches synced)");
    println!("    GET /readyz/detailed ...... Per-component readiness JSON");
    println!("    GET /metrics .............. Prometheus metrics scrape endpoint");
    println!();
    println!("Operator running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    let state = Arc::new(Mutex::new(OperatorState {
        leader: true,
        caches_synced: false,
        first_cycle_done: false,
        config_ok: true,
    }));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (fatal_tx, mut fatal_rx) = broadcast::channel::<String>(1);

    // Lease renewal; repeated failure is fatal so a healthy replica can
    // take over.
    let renewal_client = client.clone();
    let renewal_shutdown = shutdown_tx.subscribe();
    let renewal_fatal = fatal_tx.clone();
    tokio::spawn(async move {
        lease_renewal_loop(renewal_client, renewal_shutdown, renewal_fatal).await;
    });

    // Health/metrics HTTP server.
    let http_state = state.clone();
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle =
        tokio::spawn(async move { start_http_server(http_state, http_shutdown, addr).await });

    // CRD + cluster object watches.
    spawn_watchers(&client, &engine, &state, &shutdown_tx);

    // Main reconcile ticker.
    let tick_engine = engine.clone();
    let tick_client = client.clone();
    let tick_state = state.clone();
    let mut tick_shutdown = shutdown_tx.subscribe();
    let ticker = tokio::spawn(async move {
        loop {
            let interval = tick_engine.config.snapshot().resize_interval;
            tokio::select! {
                _ = tick_shutdown.recv() => {
                    info!("ticker_stopped");
                    return;
                }
                _ = sleep(interval) => {
                    run_cycle(&tick_client, &tick_engine, &tick_state).await;
                }
            }
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
            println!("\n{}", "=".repeat(70));
            println!("Shutdown signal received. Stopping operator...");
            println!("{}", "=".repeat(70));
        }
        reason = fatal_rx.recv() => {
            let reason = reason.unwrap_or_else(|_| "fatal channel closed".to_string());
            // Readiness drops first so traffic drains before the restart.
            state.lock().await.leader = false;
            let _ = shutdown_tx.send(());
            let _ = http_handle.await;
            anyhow::bail!("fatal: {reason}");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = ticker.await;
    let _ = http_handle.await?;

    info!("operator_stopped");
    println!("Operator stopped.");
    Ok(())
}

/* ============================= RECONCILE CYCLE ============================= */

async fn run_cycle(client: &Client, engine: &Arc<OperatorEngine>, state: &Arc<Mutex<OperatorState>>) {
    let now = Utc::now();

    // Reload custom resources first so this cycle runs on the freshest
    // configuration.
    reconcile_config_crs(client, engine, state).await;
    let config = engine.config.snapshot();

    let pods_api: Api<Pod> = Api::all(client.clone());
    let pod_list = match pods_api.list(&ListParams::default()).await {
        Ok(list) => list.items,
        Err(e) => {
            warn!(error = %e, "pod_list_failed");
            return;
        }
    };

    // Refresh capacity caches when their TTL lapsed or a watch
    // invalidated them.
    refresh_caches_if_stale(client, engine, &pod_list).await;
    state.lock().await.caches_synced = true;

    reconcile_policy_crs(client, engine, &pod_list).await;

    let candidates: Vec<Pod> = pod_list
        .iter()
        .filter(|p| {
            let ns = p.metadata.namespace.as_deref().unwrap_or_default();
            config.namespace_allowed(ns)
        })
        .cloned()
        .collect();

    // Bounded worker pool; the executor's striped locks serialize any
    // same-key overlap.
    let workers = Arc::new(Semaphore::new(4));
    let mut handles = Vec::new();
    for pod in candidates {
        let permit = match workers.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let engine = engine.clone();
        // Per-pod budget of half the tick keeps cycles from overlapping
        // on the same pod.
        let budget = config.resize_interval / 2;
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let key = pod_key(&pod);
            match tokio::time::timeout(budget, engine.process_pod(&pod, Utc::now())).await {
                Ok(outcome) => tracing::debug!(pod = %key, outcome = ?outcome, "pod_processed"),
                Err(_) => warn!(pod = %key, "pod_processing_deadline_exceeded"),
            }
        }));
    }
    for handle in handles {
        if let Err(e) = handle.await
            && e.is_panic()
        {
            // One bad pod must not take the loop down.
            observe::WORKER_PANICS.inc();
            warn!("pod_worker_panicked");
        }
    }

    // Deferred-resize sweep against this cycle's pod listing.
    let live: HashMap<String, Pod> = pod_list.iter().map(|p| (pod_key(p), p.clone())).collect();
    let retried = engine.sweep_retries(&live, now).await;
    for (key, outcome) in retried {
        info!(pod = %key, outcome = ?outcome, "deferred_resize_retried");
    }

    let mut s = state.lock().await;
    if !s.first_cycle_done {
        s.first_cycle_done = true;
        info!("first_cycle_complete");
    }
}

async fn refresh_caches_if_stale(client: &Client, engine: &Arc<OperatorEngine>, pods: &[Pod]) {
    let now = Utc::now();
    let ttl = engine.config.snapshot().cluster_cache_ttl;

    let (nodes_fresh, quotas_fresh, ranges_fresh) = {
        let cluster = engine.cluster.read().expect("cluster lock not poisoned");
        (
            cluster.nodes_fresh(now, ttl),
            cluster.quotas_fresh(now, ttl),
            cluster.limit_ranges_fresh(now, ttl),
        )
    };

    if !nodes_fresh {
        let nodes: Api<Node> = Api::all(client.clone());
        match nodes.list(&ListParams::default()).await {
            Ok(list) => {
                engine
                    .cluster
                    .write()
                    .expect("cluster lock not poisoned")
                    .refresh_nodes(&list.items, pods, now);
            }
            Err(e) => warn!(error = %e, "node_list_failed"),
        }
    }
    if !quotas_fresh {
        let quotas: Api<ResourceQuota> = Api::all(client.clone());
        match quotas.list(&ListParams::default()).await {
            Ok(list) => {
                engine
                    .cluster
                    .write()
                    .expect("cluster lock not poisoned")
                    .refresh_quotas(&list.items, now);
            }
            Err(e) => warn!(error = %e, "quota_list_failed"),
        }
    }
    if !ranges_fresh {
        let ranges: Api<LimitRange> = Api::all(client.clone());
        match ranges.list(&ListParams::default()).await {
            Ok(list) => {
                engine
                    .cluster
                    .write()
                    .expect("cluster lock not poisoned")
                    .refresh_limit_ranges(&list.items, now);
            }
            Err(e) => warn!(error = %e, "limit_range_list_failed"),
        }
    }
}

/* ============================= CR STATUS ============================= */

async fn reconcile_config_crs(
    client: &Client,
    engine: &Arc<OperatorEngine>,
    state: &Arc<Mutex<OperatorState>>,
) {
    let configs: Api<RightSizerConfig> = Api::all(client.clone());
    let list = match configs.list(&ListParams::default()).await {
        Ok(l) => l.items,
        Err(_) => return, // CRD not installed; built-in defaults apply
    };

    // Singleton semantics: the first config (by name) wins.
    let mut list = list;
    list.sort_by_key(|c| c.name_any());
    let Some(cr) = list.first() else {
        return;
    };

    let name = cr.name_any();
    let namespace = cr.namespace().unwrap_or_default();
    let generation = cr.metadata.generation;

    let (phase, message, ok) = match engine.config.update(&cr.spec) {
        Ok(_) => (Phase::Active, "configuration applied".to_string(), true),
        Err(e) => {
            warn!(config = %name, error = %e, "config_update_rejected");
            (Phase::Error, e.to_string(), false)
        }
    };
    state.lock().await.config_ok = ok;

    let status = RightSizerConfigStatus {
        phase: Some(phase),
        observed_generation: generation,
        last_reconciled: Some(Utc::now().to_rfc3339()),
        message: Some(message),
    };
    let api: Api<RightSizerConfig> = Api::namespaced(client.clone(), &namespace);
    if let Err(e) = api
        .patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&serde_json::json!({ "status": status })),
        )
        .await
    {
        warn!(config = %name, error = %e, "config_status_patch_failed");
    }
}

async fn reconcile_policy_crs(client: &Client, engine: &Arc<OperatorEngine>, pods: &[Pod]) {
    let policies: Api<RightSizerPolicy> = Api::all(client.clone());
    let list = match policies.list(&ListParams::default()).await {
        Ok(l) => l.items,
        Err(_) => return,
    };

    let errors = engine
        .policies
        .write()
        .expect("policy lock not poisoned")
        .set_rules(&list);
    let now = Utc::now();

    for policy in &list {
        let name = policy.name_any();
        let namespace = policy.namespace().unwrap_or_default();
        let error = errors.iter().find(|(n, _)| *n == name).map(|(_, e)| e.clone());

        let matched = {
            let engine_policies = engine.policies.read().expect("policy lock not poisoned");
            engine_policies.matched_pods(&name, pods, now)
        };

        let status = RightSizerPolicyStatus {
            phase: Some(if error.is_some() { Phase::Error } else { Phase::Active }),
            observed_generation: policy.metadata.generation,
            last_reconciled: Some(now.to_rfc3339()),
            matched_pods: Some(matched),
            message: error.or_else(|| Some(format!("governing {matched} pods"))),
        };

        let api: Api<RightSizerPolicy> = Api::namespaced(client.clone(), &namespace);
        if let Err(e) = api
            .patch_status(
                &name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&serde_json::json!({ "status": status })),
            )
            .await
        {
            warn!(policy = %name, error = %e, "policy_status_patch_failed");
        }
    }
}

/* ============================= WATCHERS ============================= */

fn spawn_watchers(
    client: &Client,
    engine: &Arc<OperatorEngine>,
    state: &Arc<Mutex<OperatorState>>,
    shutdown: &broadcast::Sender<()>,
) {
    // Node/quota/limit-range watches invalidate the capacity caches so
    // the next cycle re-reads before trusting them.
    {
        let engine = engine.clone();
        let api: Api<Node> = Api::all(client.clone());
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut stream = watcher(api, watcher::Config::default()).boxed();
            loop {
                tokio::select! {
                    _ = rx.recv() => return,
                    event = stream.next() => match event {
                        Some(Ok(Event::Applied(_) | Event::Deleted(_))) => {
                            engine.cluster.write().expect("cluster lock not poisoned").invalidate_nodes();
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        });
    }
    {
        let engine = engine.clone();
        let api: Api<ResourceQuota> = Api::all(client.clone());
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut stream = watcher(api, watcher::Config::default()).boxed();
            loop {
                tokio::select! {
                    _ = rx.recv() => return,
                    event = stream.next() => match event {
                        Some(Ok(Event::Applied(_) | Event::Deleted(_))) => {
                            engine.cluster.write().expect("cluster lock not poisoned").invalidate_quotas();
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        });
    }
    {
        let engine = engine.clone();
        let api: Api<LimitRange> = Api::all(client.clone());
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut stream = watcher(api, watcher::Config::default()).boxed();
            loop {
                tokio::select! {
                    _ = rx.recv() => return,
                    event = stream.next() => match event {
                        Some(Ok(Event::Applied(_) | Event::Deleted(_))) => {
                            engine.cluster.write().expect("cluster lock not poisoned").invalidate_limit_ranges();
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        });
    }

    // Config updates apply immediately rather than on the next tick.
    {
        let engine = engine.clone();
        let state = state.clone();
        let api: Api<RightSizerConfig> = Api::all(client.clone());
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut stream = watcher(api, watcher::Config::default()).boxed();
            loop {
                tokio::select! {
                    _ = rx.recv() => return,
                    event = stream.next() => match event {
                        Some(Ok(Event::Applied(cr))) => {
                            let ok = match engine.config.update(&cr.spec) {
                                Ok(version) => {
                                    info!(config = %cr.name_any(), version, "config_updated");
                                    true
                                }
                                Err(e) => {
                                    warn!(config = %cr.name_any(), error = %e, "config_update_rejected");
                                    false
                                }
                            };
                            state.lock().await.config_ok = ok;
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        });
    }

    // Policy changes take effect immediately; the tick only refreshes
    // statuses.
    {
        let engine = engine.clone();
        let client = client.clone();
        let api: Api<RightSizerPolicy> = Api::all(client.clone());
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut stream = watcher(api, watcher::Config::default()).boxed();
            loop {
                tokio::select! {
                    _ = rx.recv() => return,
                    event = stream.next() => match event {
                        Some(Ok(Event::Applied(_) | Event::Deleted(_))) => {
                            let policies: Api<RightSizerPolicy> = Api::all(client.clone());
                            if let Ok(list) = policies.list(&ListParams::default()).await {
                                let count = list.items.len();
                                engine
                                    .policies
                                    .write()
                                    .expect("policy lock not poisoned")
                                    .set_rules(&list.items);
                                info!(rules = count, "policy_rules_reloaded");
                            }
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        });
    }

    // Deleted pods leave nothing behind: predictor series and queued
    // retries die with the pod.
    {
        let engine = engine.clone();
        let api: Api<Pod> = Api::all(client.clone());
        let mut rx = shutdown.subscribe();
        tokio::spawn(async move {
            let mut stream = watcher(api, watcher::Config::default()).boxed();
            loop {
                tokio::select! {
                    _ = rx.recv() => return,
                    event = stream.next() => match event {
                        Some(Ok(Event::Deleted(pod))) => {
                            let ns = pod.metadata.namespace.as_deref().unwrap_or_default();
                            let name = pod.metadata.name.as_deref().unwrap_or_default();
                            engine
                                .predictor
                                .lock()
                                .expect("predictor lock not poisoned")
                                .forget_pod(ns, name);
                            engine
                                .retries
                                .lock()
                                .expect("retry lock not poisoned")
                                .remove(&format!("{ns}/{name}"));
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        });
    }
}

/* ============================= LEADER ELECTION ============================= */

async fn acquire_leader(client: &Client) -> Result<bool> {
    let leases: Api<Lease> = Api::namespaced(client.clone(), &lease_namespace());

    let now = MicroTime(Utc::now());
    let identity = holder_identity();

    let lease = Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(LeaseSpec {
            holder_identity: Some(identity.clone()),
            lease_duration_seconds: Some(LEASE_DURATION_SECONDS),
            acquire_time: Some(now.clone()),
            renew_time: Some(now),
            ..Default::default()
        }),
    };

    // Try to create a fresh lease
    match leases.create(&Default::default(), &lease).await {
        Ok(_) => return Ok(true),
        Err(kube::Error::Api(err)) if err.code == 409 => {
            info!("lease_exists_checking_expiry");
        }
        Err(_) => return Ok(false),
    }

    // Lease exists — fetch it and check ownership / expiry
    let existing = leases.get(LEASE_NAME).await?;

    let can_take = match &existing.spec {
        Some(spec) => {
            let is_ours = spec.holder_identity.as_deref() == Some(identity.as_str());

            let is_expired = spec.renew_time.as_ref().is_none_or(|t| {
                let duration_secs = spec.lease_duration_seconds.unwrap_or(15) as i64;
                Utc::now().signed_duration_since(t.0) > chrono::Duration::seconds(duration_secs)
            });

            is_ours || is_expired
        }
        None => true,
    };

    if !can_take {
        return Ok(false);
    }

    info!("lease_takeover");
    let now = MicroTime(Utc::now());
    let patch = serde_json::json!({
        "spec": {
            "holderIdentity": identity,
            "leaseDurationSeconds": LEASE_DURATION_SECONDS,
            "acquireTime": now,
            "renewTime": now
        }
    });

    match leases
        .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(true),
        Err(_) => Ok(false),
    }
}

async fn lease_renewal_loop(
    client: Client,
    mut shutdown: broadcast::Receiver<()>,
    fatal: broadcast::Sender<String>,
) {
    let leases: Api<Lease> = Api::namespaced(client, &lease_namespace());
    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("lease_renewal_stopped");
                return;
            }
            _ = sleep(LEASE_RENEW_INTERVAL) => {
                let now = MicroTime(Utc::now());
                let patch = serde_json::json!({
                    "spec": { "renewTime": now }
                });

                match leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                {
                    Ok(_) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(error = %e, failures = consecutive_failures, "lease_renewal_failed");
                        if consecutive_failures >= RENEWAL_FAILURE_LIMIT {
                            let _ = fatal.send(format!(
                                "leadership lost: lease renewal failed {consecutive_failures} times"
                            ));
                            return;
                        }
                    }
                }
            }
        }
    }
}

/* ============================= HTTP SERVER ============================= */

pub(crate) fn build_operator_router(state: Arc<Mutex<OperatorState>>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
        .route(
            "/readyz/detailed",
            get({
                let state = state.clone();
                move || detailed_ready_handler(state.clone())
            }),
        )
}

async fn start_http_server(
    state: Arc<Mutex<OperatorState>>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> Result<()> {
    let app = build_operator_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind metrics server on :9090")?;

    info!(addr = %addr, "operator_http_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<OperatorState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn detailed_ready_handler(state: Arc<Mutex<OperatorState>>) -> impl IntoResponse {
    let state = state.lock().await;
    let body = serde_json::json!({
        "ready": state.ready(),
        "components": {
            "leaderElection": state.leader,
            "caches": state.caches_synced,
            "firstCycle": state.first_cycle_done,
            "config": state.config_ok,
        }
    });
    let code = if state.ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, body.to_string())
}

async fn metrics_handler() -> impl IntoResponse {
    match observe::encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

/* ============================= TESTS ============================= */
