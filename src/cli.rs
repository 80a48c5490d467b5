use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "right-sizer")]
#[command(about = "Kubernetes vertical right-sizing operator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity and permissions
    Check,

    /// One-shot dry run: print per-container sizing proposals
    Analyze {
        /// Restrict to one namespace (defaults to all non-system namespaces)
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Start the right-sizing operator (leader-elected reconcile loop)
    Operator {
        /// Evaluate and log decisions without patching anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage the RightSizerConfig / RightSizerPolicy CRDs
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Manage the admission webhook
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print both CRD manifests to stdout
    Generate,

    /// Install the CRDs into the connected cluster
    Install,
}

#[derive(Subcommand)]
pub enum WebhookAction {
    /// Start the admission webhook HTTPS server
    Serve {
        #[arg(long, default_value = "0.0.0.0:8443")]
        addr: String,
        #[arg(long, default_value = "tls.crt")]
        tls_cert: String,
        #[arg(long, default_value = "tls.key")]
        tls_key: String,
    },
    /// Generate self-signed TLS certificates for development
    CertGenerate {
        #[arg(long, default_value = "right-sizer-webhook")]
        service_name: String,
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, default_value = ".")]
        output_dir: String,
        /// Additional IP SANs (e.g. --ip-san 192.168.1.26)
        #[arg(long = "ip-san")]
        ip_sans: Vec<String>,
    },
    /// Print the webhook configuration YAML
    InstallConfig {
        #[arg(long, default_value = "right-sizer-webhook")]
        service_name: String,
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long)]
        ca_bundle_path: String,
    },
}
