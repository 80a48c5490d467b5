use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{ApiResource, DynamicObject, ListParams};
use kube::{Api, Client};

pub async fn run() -> anyhow::Result<()> {
    println!("Running cluster connectivity checks...\n");

    // 1. Build Kubernetes client from kubeconfig
    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    // 2. Verify actual cluster connectivity by fetching server version
    print!("  Cluster connection .......... ");
    let version = match client.apiserver_version().await {
        Ok(v) => {
            println!("OK (v{}.{})", v.major, v.minor);
            Some(v)
        }
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    };

    // 3. List pods permission
    print!("  List pods permission ........ ");
    let pods: Api<Pod> = Api::all(client.clone());
    match pods.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({})", e),
    }

    // 4. List nodes permission
    print!("  List nodes permission ....... ");
    let nodes: Api<Node> = Api::all(client.clone());
    match nodes.list(&ListParams::default()).await {
        Ok(node_list) => {
            let count = node_list.items.len();
            println!("OK ({} nodes)", count);
        }
        Err(e) => println!("FAIL ({})", e),
    }

    // 5. Metrics API availability (metrics-server)
    print!("  Metrics API ................. ");
    let metrics_resource = ApiResource {
        group: "metrics.k8s.io".to_string(),
        version: "v1beta1".to_string(),
        api_version: "metrics.k8s.io/v1beta1".to_string(),
        kind: "PodMetrics".to_string(),
        plural: "pods".to_string(),
    };
    let metrics: Api<DynamicObject> = Api::all_with(client.clone(), &metrics_resource);
    match metrics.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({})", e),
    }

    // 6. In-place resize support (needs Kubernetes >= 1.33 for GA)
    if let Some(v) = &version {
        print!("  In-place pod resize ......... ");
        let minor: u32 = v.minor.trim_end_matches('+').parse().unwrap_or(0);
        let major: u32 = v.major.parse().unwrap_or(0);
        if major > 1 || (major == 1 && minor >= 33) {
            println!("OK (pods/resize subresource is GA)");
        } else {
            println!("WARN (v{}.{} predates GA; enable InPlacePodVerticalScaling)", v.major, v.minor);
        }
    }

    if let Some(v) = version {
        println!("\n  Kubernetes version: {}.{}", v.major, v.minor);
    }

    println!("\nAll checks completed.");
    Ok(())
}
