use thiserror::Error;

/// Errors that can abort process bootstrap before the reconciler ever
/// starts ticking. Anything past bootstrap is a [`bridge_core::BridgeError`],
/// logged and retried rather than fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read kubeconfig at {path}: {source}")]
    KubeconfigRead {
        path: String,
        #[source]
        source: kube::config::KubeconfigError,
    },

    #[error("no kubeconfig available and in-cluster inference failed: {source}")]
    ConfigInfer {
        #[source]
        source: kube::config::InferConfigError,
    },

    #[error("failed to build kubernetes client: {source}")]
    ClientBuild {
        #[from]
        source: kube::Error,
    },

    #[error("at least one --local-zk-addrs entry is required")]
    MissingLocalZkAddrs,

    #[error("at least one --remote-zk-addrs entry is required")]
    MissingRemoteZkAddrs,

    #[error("failed to establish source zookeeper session: {source}")]
    SourceRegistry {
        #[source]
        source: bridge_core::BridgeError,
    },

    #[error("failed to establish destination zookeeper session: {source}")]
    DestinationRegistry {
        #[source]
        source: bridge_core::BridgeError,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
