use thiserror::Error;

/// Errors surfaced by the registry adapter, the address resolver, and the
/// reconciler that drives them.
///
/// Per spec §7's taxonomy: `Registry`/`Session` failures are mid-operation
/// ZooKeeper problems (transient, retried next cycle by the reconciler, or
/// fatal at bootstrap for `Session`); `Catalog` failures are transient
/// Kubernetes API problems. `ParseError` lives in `dubbo_types` since it is
/// raised by the codec, not by this crate.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("zookeeper session could not be established, addrs: {addrs:?}: {source}")]
    Session {
        addrs: Vec<String>,
        #[source]
        source: zookeeper_client::Error,
    },

    #[error("zookeeper operation on path [{path}] failed: {source}")]
    Registry {
        path: String,
        #[source]
        source: zookeeper_client::Error,
    },

    #[error("kubernetes catalog operation failed: {source}")]
    Catalog {
        #[from]
        source: kube::Error,
    },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
