use std::time::Duration;

use async_trait::async_trait;
use dubbo_types::Provider;
use tracing::{debug, instrument, warn};
use zookeeper_client as zk;

use crate::error::{BridgeError, Result};

/// Capability set a ZooKeeper ensemble adapter must expose to the
/// reconciler. Kept abstract (§9 "Polymorphism") so tests can substitute an
/// in-memory double without standing up a ZooKeeper server.
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    /// Reads every provider leaf currently registered, across every
    /// service. Returns raw (still URL-escaped) node names; pairing them
    /// with [`Provider::parse`] is the caller's job.
    async fn list_providers(&self) -> Result<Vec<String>>;

    /// Idempotently publishes `provider`, creating any missing ancestor
    /// path first.
    async fn register(&self, provider: &Provider) -> Result<()>;

    /// Removes `provider`'s leaf node, garbage-collecting the owning
    /// service subtree if it was the last provider.
    async fn unregister(&self, provider: &Provider) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub server_addrs: Vec<String>,
    pub root_path: String,
    pub providers_category: String,
    pub configurators_category: String,
    pub connection_timeout: Duration,
}

impl RegistryConfig {
    pub fn new(server_addrs: Vec<String>) -> Self {
        Self {
            server_addrs,
            root_path: "/dubbo".to_string(),
            providers_category: "providers".to_string(),
            configurators_category: "configurators".to_string(),
            connection_timeout: Duration::from_secs(10),
        }
    }

    fn service_path(&self, service: &str) -> String {
        format!("{}/{}", self.root_path, service)
    }

    fn providers_path(&self, service: &str) -> String {
        format!("{}/{}", self.service_path(service), self.providers_category)
    }

    fn configurators_path(&self, service: &str) -> String {
        format!("{}/{}", self.service_path(service), self.configurators_category)
    }

    fn provider_path(&self, provider: &Provider) -> String {
        format!(
            "{}/{}",
            self.providers_path(&provider.service),
            provider.escaped_node_name()
        )
    }
}

/// ZooKeeper-backed [`ProviderRegistry`]. Uses the persistent-node +
/// explicit-delete variant of §4.B: one long-lived session for the whole
/// adapter lifetime, ordinary persistent nodes, unregister via `delete`.
/// The alternative ephemeral-lease variant (one session per provider,
/// unregister by closing the session) is documented but not implemented —
/// session churn here is bounded by reconcile cycles, not provider count.
pub struct ZookeeperRegistry {
    client: zk::Client,
    config: RegistryConfig,
}

impl ZookeeperRegistry {
    pub async fn connect(config: RegistryConfig) -> Result<Self> {
        let connect_string = config.server_addrs.join(",");
        let client = zk::Client::connector()
            .session_timeout(config.connection_timeout)
            .connect(&connect_string)
            .await
            .map_err(|source| BridgeError::Session {
                addrs: config.server_addrs.clone(),
                source,
            })?;
        Ok(Self { client, config })
    }

    /// Walks `path` component by component, creating any missing ancestor
    /// as a persistent, world-readable/writable node. A "node already
    /// exists" error from a racing creator is swallowed, per §4.B.
    #[instrument(skip(self))]
    async fn ensure_path(&self, path: &str) -> Result<()> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            let create = self
                .client
                .create(&current, b"", &zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all()))
                .await;
            match create {
                Ok(_) => {}
                Err(zk::Error::NodeExists) => {
                    debug!(path = %current, "ancestor path already exists, racing creator won");
                }
                Err(source) => {
                    return Err(BridgeError::Registry {
                        path: current,
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    /// Deletes `path` and, recursively, every descendant. Best-effort: a
    /// failure on any one node is logged and swallowed so the rest of the
    /// subtree still gets a chance to go away.
    async fn delete_subtree(&self, path: &str) {
        let children = match self.client.get_children(path).await {
            Ok((children, _stat)) => children,
            Err(source) => {
                warn!(path, %source, "best-effort subtree delete failed to list children, still attempting to delete the node itself");
                Vec::new()
            }
        };
        for child in children {
            let child_path = format!("{path}/{child}");
            Box::pin(self.delete_subtree(&child_path)).await;
        }
        debug!(path, "deleting path");
        if let Err(source) = self.client.delete(path, None).await {
            warn!(path, %source, "best-effort subtree delete failed for a node, continuing");
        }
    }

    async fn is_empty(&self, path: &str) -> Result<bool> {
        let (children, _stat) = self
            .client
            .get_children(path)
            .await
            .map_err(|source| BridgeError::Registry {
                path: path.to_string(),
                source,
            })?;
        Ok(children.is_empty())
    }
}

#[async_trait]
impl ProviderRegistry for ZookeeperRegistry {
    #[instrument(skip(self))]
    async fn list_providers(&self) -> Result<Vec<String>> {
        let root = self.config.root_path.clone();
        let (services, _stat) = self
            .client
            .get_children(&root)
            .await
            .map_err(|source| BridgeError::Registry { path: root, source })?;

        let mut providers = Vec::new();
        for service in services {
            let providers_path = self.config.providers_path(&service);
            match self.client.get_children(&providers_path).await {
                Ok((children, _stat)) => providers.extend(children),
                Err(zk::Error::NoNode) => {
                    warn!(service, path = %providers_path, "service has no providers category, skipping");
                }
                Err(source) => {
                    return Err(BridgeError::Registry {
                        path: providers_path,
                        source,
                    })
                }
            }
        }
        Ok(providers)
    }

    #[instrument(skip(self, provider), fields(key = %provider.key()))]
    async fn register(&self, provider: &Provider) -> Result<()> {
        self.ensure_path(&self.config.providers_path(&provider.service)).await?;
        self.ensure_path(&self.config.configurators_path(&provider.service)).await?;

        let path = self.config.provider_path(provider);
        self.client
            .create(
                &path,
                provider.addr.as_bytes(),
                &zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all()),
            )
            .await
            .map_err(|source| BridgeError::Registry { path, source })?;
        Ok(())
    }

    /// Deletes `provider`'s leaf node. The literal child name can't be
    /// re-derived from `provider` itself: every provider reaching here comes
    /// from `Provider::parse`, which strips `timestamp`, while the node
    /// actually sitting in ZooKeeper was created from a provider that had
    /// `timestamp` set (`register` stamps it immediately before publish). So
    /// the real child is found by listing `providers_path` and matching on
    /// the timestamp-independent `Key()`, not by re-serializing `provider`.
    #[instrument(skip(self, provider), fields(key = %provider.key()))]
    async fn unregister(&self, provider: &Provider) -> Result<()> {
        let providers_path = self.config.providers_path(&provider.service);
        let children = match self.client.get_children(&providers_path).await {
            Ok((children, _stat)) => children,
            Err(zk::Error::NoNode) => {
                debug!(providers_path, "providers category already absent, nothing to unregister");
                return Ok(());
            }
            Err(source) => {
                return Err(BridgeError::Registry {
                    path: providers_path,
                    source,
                })
            }
        };

        let target = find_matching_child(&children, &provider.key());

        let Some(child) = target else {
            debug!(providers_path, key = %provider.key(), "no matching provider node found, already absent");
            return Ok(());
        };

        let path = format!("{providers_path}/{child}");
        self.client
            .delete(&path, None)
            .await
            .map_err(|source| BridgeError::Registry { path, source })?;

        match self.is_empty(&providers_path).await {
            Ok(true) => {
                let service_path = self.config.service_path(&provider.service);
                debug!(service_path, "providers category empty, garbage-collecting service subtree");
                self.delete_subtree(&service_path).await;
            }
            Ok(false) => {}
            Err(source) => warn!(%source, providers_path, "failed to check whether providers category is empty"),
        }
        Ok(())
    }
}

/// Finds the child node name, among `children`, whose parsed `Key()` matches
/// `target_key`. Pulled out of `unregister` so the timestamp-independent
/// matching logic can be exercised without a live ZooKeeper session.
fn find_matching_child(children: &[String], target_key: &str) -> Option<String> {
    children
        .iter()
        .find(|child| Provider::parse(child).map(|parsed| parsed.key() == target_key).unwrap_or(false))
        .cloned()
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory [`ProviderRegistry`] double. Stores literal (escaped) node
    /// names per service, the same shape ZooKeeper children actually have,
    /// and unregisters via [`find_matching_child`] — the same
    /// timestamp-independent lookup `ZookeeperRegistry::unregister` uses —
    /// so tests exercise the real matching logic instead of a shortcut that
    /// would hide a real-adapter regression.
    #[derive(Default)]
    pub struct FakeRegistry {
        nodes: Mutex<HashMap<String, Vec<String>>>,
        raw_extra: Mutex<Vec<String>>,
    }

    impl FakeRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn snapshot_keys(&self) -> Vec<String> {
            self.nodes
                .lock()
                .unwrap()
                .values()
                .flatten()
                .filter_map(|raw| Provider::parse(raw).ok())
                .map(|p| p.key())
                .collect()
        }

        /// Injects a raw node name directly, bypassing the typed `register`
        /// API, so tests can feed something that isn't a valid provider URL
        /// through `list_providers` and exercise the reconciler's
        /// parse-failure-skips-the-entry path end to end.
        pub fn push_raw(&self, raw: &str) {
            self.raw_extra.lock().unwrap().push(raw.to_string());
        }
    }

    #[async_trait]
    impl ProviderRegistry for FakeRegistry {
        async fn list_providers(&self) -> Result<Vec<String>> {
            let mut out: Vec<String> = self.nodes.lock().unwrap().values().flatten().cloned().collect();
            out.extend(self.raw_extra.lock().unwrap().iter().cloned());
            Ok(out)
        }

        async fn register(&self, provider: &Provider) -> Result<()> {
            self.nodes
                .lock()
                .unwrap()
                .entry(provider.service.clone())
                .or_default()
                .push(provider.escaped_node_name());
            Ok(())
        }

        async fn unregister(&self, provider: &Provider) -> Result<()> {
            let mut nodes = self.nodes.lock().unwrap();
            if let Some(children) = nodes.get_mut(&provider.service) {
                if let Some(child) = find_matching_child(children, &provider.key()) {
                    children.retain(|c| c != &child);
                }
                if children.is_empty() {
                    nodes.remove(&provider.service);
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeRegistry;
    use super::*;

    #[test]
    fn find_matching_child_ignores_timestamp_drift() {
        let mut registered = Provider::new("dubbo", "10.200.0.1:30080", "com.x.Svc");
        registered.set_timestamp();
        let literal_child = registered.escaped_node_name();

        // unregister always receives a timestamp-stripped Provider (it comes
        // from Provider::parse), so its key must still match the literal
        // child even though the child's own node name carries a timestamp
        // this provider doesn't.
        let to_remove = Provider::new("dubbo", "10.200.0.1:30080", "com.x.Svc");
        assert_eq!(to_remove.key(), registered.key());

        let children = vec![literal_child.clone()];
        assert_eq!(find_matching_child(&children, &to_remove.key()), Some(literal_child));
    }

    #[test]
    fn find_matching_child_none_when_absent() {
        let other = Provider::new("dubbo", "10.0.0.1:1", "svc");
        let children = vec![other.escaped_node_name()];
        assert_eq!(find_matching_child(&children, "dubbo://10.0.0.2:1/other"), None);
    }

    #[tokio::test]
    async fn register_then_list_round_trips_through_fake() {
        let registry = FakeRegistry::new();
        let mut p = Provider::new("dubbo", "10.200.0.1:30080", "com.x.Svc");
        p.set_timestamp();
        registry.register(&p).await.unwrap();

        let listed = registry.list_providers().await.unwrap();
        assert_eq!(listed.len(), 1);
        let parsed = Provider::parse(&listed[0]).unwrap();
        assert_eq!(parsed.key(), p.key());
    }

    #[tokio::test]
    async fn unregister_removes_provider() {
        let registry = FakeRegistry::new();
        let p = Provider::new("dubbo", "10.200.0.1:30080", "com.x.Svc");
        registry.register(&p).await.unwrap();
        registry.unregister(&p).await.unwrap();
        assert!(registry.list_providers().await.unwrap().is_empty());
    }
}
