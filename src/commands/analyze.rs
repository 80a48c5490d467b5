use anyhow::Context;
use chrono::Utc;
use k8s_openapi::api::core::v1::{LimitRange, Node, Pod, ResourceQuota};
use kube::api::ListParams;
use kube::{Api, Client};

use right_sizer::api::KubeControlPlane;
use right_sizer::config::{ConfigStore, OperatorConfig};
use right_sizer::crd::{RightSizerConfig, RightSizerPolicy};
use right_sizer::reconciler::{Engine, PodOutcome, pod_key};
use right_sizer::usage::MetricsApiSource;

/// One-shot pipeline pass with patching forced off: every decision is
/// computed against live metrics and printed, nothing is written.
pub async fn run(namespace: Option<&str>) -> anyhow::Result<()> {
    println!("Analyzing resource sizing (read-only)...\n");

    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster. Is your kubeconfig valid?")?;

    // Operator configuration, if one is installed; defaults otherwise.
    let configs: Api<RightSizerConfig> = Api::all(client.clone());
    let store = match configs.list(&ListParams::default()).await {
        Ok(list) => match list.items.first() {
            Some(cr) => match OperatorConfig::from_spec(&cr.spec) {
                Ok(mut cfg) => {
                    cfg.dry_run = true;
                    println!(
                        "  Config ...................... {} (dry run forced)",
                        cr.metadata.name.as_deref().unwrap_or("unnamed")
                    );
                    ConfigStore::new(cfg)
                }
                Err(e) => {
                    println!("  Config ...................... invalid ({e}); using defaults");
                    dry_run_defaults()
                }
            },
            None => {
                println!("  Config ...................... none found; using defaults");
                dry_run_defaults()
            }
        },
        Err(_) => {
            println!("  Config ...................... CRD not installed; using defaults");
            dry_run_defaults()
        }
    };

    let metrics = MetricsApiSource::new(client.clone());
    let control = KubeControlPlane::new(client.clone());
    let engine = Engine::new(store, metrics, control);

    // Sizing policies.
    let policies: Api<RightSizerPolicy> = Api::all(client.clone());
    if let Ok(list) = policies.list(&ListParams::default()).await {
        let count = list.items.len();
        engine
            .policies
            .write()
            .expect("policy lock not poisoned")
            .set_rules(&list.items);
        println!("  Policies .................... {count} loaded");
    } else {
        println!("  Policies .................... CRD not installed; defaults only");
    }

    // Capacity context for the validator.
    let now = Utc::now();
    let nodes: Api<Node> = Api::all(client.clone());
    let all_pods_api: Api<Pod> = Api::all(client.clone());
    let quotas: Api<ResourceQuota> = Api::all(client.clone());
    let ranges: Api<LimitRange> = Api::all(client.clone());

    let node_list = nodes.list(&ListParams::default()).await?.items;
    let pod_list = all_pods_api.list(&ListParams::default()).await?.items;
    let quota_list = quotas.list(&ListParams::default()).await.map(|l| l.items).unwrap_or_default();
    let range_list = ranges.list(&ListParams::default()).await.map(|l| l.items).unwrap_or_default();

    {
        let mut cluster = engine.cluster.write().expect("cluster lock not poisoned");
        cluster.refresh_nodes(&node_list, &pod_list, now);
        cluster.refresh_quotas(&quota_list, now);
        cluster.refresh_limit_ranges(&range_list, now);
    }

    println!(
        "  Cluster ..................... {} nodes, {} pods\n",
        node_list.len(),
        pod_list.len()
    );

    let analysis_config = engine.config.snapshot();
    let mut analyzed = 0u32;
    let mut would_resize = 0u32;

    for pod in &pod_list {
        let ns = pod.metadata.namespace.as_deref().unwrap_or_default();
        if !analysis_config.namespace_allowed(ns) {
            continue;
        }
        if let Some(wanted) = namespace
            && ns != wanted
        {
            continue;
        }

        analyzed += 1;
        match engine.process_pod(pod, now).await {
            PodOutcome::DryRun(summary) => {
                would_resize += 1;
                println!("  {} -> {}", pod_key(pod), summary);
            }
            PodOutcome::NoOp => {}
            PodOutcome::Rejected(reason) => {
                println!("  {} !! rejected: {}", pod_key(pod), reason);
            }
            PodOutcome::Deferred(reason) => {
                println!("  {} .. deferred: {}", pod_key(pod), reason);
            }
            PodOutcome::Skipped(_) | PodOutcome::Failed(_) | PodOutcome::Applied { .. } => {}
        }
    }

    println!("\n===== Right-Sizing Summary =====");
    println!("Pods analyzed       : {analyzed}");
    println!("Would resize        : {would_resize}");
    println!("Already well-sized  : {}", analyzed.saturating_sub(would_resize));
    println!("================================\n");

    Ok(())
}

fn dry_run_defaults() -> ConfigStore {
    let mut cfg = OperatorConfig::default();
    cfg.dry_run = true;
    ConfigStore::new(cfg)
}
