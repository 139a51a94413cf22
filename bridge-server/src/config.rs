use std::time::Duration;

use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config as KubeConfig};

use crate::error::{ConfigError, Result};

/// ZooKeeper root path under which every `{service}/providers` and
/// `{service}/configurators` subtree lives, on both ensembles.
pub const ROOT_PATH: &str = "/dubbo";
pub const PROVIDERS_CATEGORY: &str = "providers";
pub const CONFIGURATORS_CATEGORY: &str = "configurators";
pub const TLB_LABEL_KEY: &str = "ke-tlb/owner";

pub const ZK_SESSION_TIMEOUT: Duration = Duration::from_secs(10);
pub const RECONCILE_PERIOD: Duration = Duration::from_secs(10);
pub const RESOLVER_RESYNC_PERIOD: Duration = Duration::from_secs(300);

/// Bridges a source ZooKeeper ensemble's Dubbo provider registrations to a
/// destination ensemble, translating pod addresses to load-balancer
/// addresses along the way via a Kubernetes service/endpoint catalog.
#[derive(Debug, Parser)]
#[command(name = "dubbo-zk-bridge")]
pub struct Cli {
    /// Source ZooKeeper ensemble, addressed by pod IP (may repeat or be
    /// comma-separated).
    #[arg(long = "local-zk-addrs", env = "LOCAL_ZK_ADDRS", value_delimiter = ',', required = true)]
    pub local_zk_addrs: Vec<String>,

    /// Destination ZooKeeper ensemble, addressed by whatever is reachable
    /// from outside the cluster.
    #[arg(long = "remote-zk-addrs", env = "REMOTE_ZK_ADDRS", value_delimiter = ',', required = true)]
    pub remote_zk_addrs: Vec<String>,

    /// Path to a kubeconfig file. Falls back to in-cluster config when
    /// unset.
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Restricts the Kubernetes watch/resync to a single namespace.
    /// Watches every namespace when unset.
    #[arg(long, env = "BRIDGE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Liveness HTTP endpoint bind address.
    #[arg(long, env = "BRIDGE_ADDR", default_value = "0.0.0.0")]
    pub addr: String,

    /// Liveness HTTP endpoint port.
    #[arg(long, env = "BRIDGE_PORT", default_value_t = 8080)]
    pub port: u16,
}

/// Resolves a [`Client`] from `--kubeconfig`, or in-cluster config if unset,
/// mirroring the original's `createZKControllerConfig`.
pub async fn build_kube_client(kubeconfig_path: &Option<String>) -> Result<Client> {
    let config = match kubeconfig_path {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|source| ConfigError::KubeconfigRead {
                path: path.clone(),
                source,
            })?;
            KubeConfig::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|source| ConfigError::ConfigInfer { source })?
        }
        None => KubeConfig::infer()
            .await
            .map_err(|source| ConfigError::ConfigInfer { source })?,
    };
    Ok(Client::try_from(config)?)
}
