use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dubbo_types::AddressTable;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::api::{Api, ListParams};
use kube::runtime::watcher::{self, Event};
use kube::{Client, ResourceExt};
use strum_macros::{Display, EnumString};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::error::BridgeError;

/// How to pick a single `(ingress, port)` pair out of a TLB-bearing
/// service's (possibly multiple) ingress addresses and ports.
///
/// §9 flags the original's nested-loop "whatever we see last, wins"
/// extraction as worth exposing explicitly rather than leaving implicit.
/// `LastWins` reproduces the original's exact iteration behavior
/// (compatibility default); `FirstWins` is the alternative the design
/// notes suggest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Default)]
pub enum LbSelectionPolicy {
    #[default]
    #[strum(serialize = "last-wins")]
    LastWins,
    #[strum(serialize = "first-wins")]
    FirstWins,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub tlb_label_key: String,
    pub namespace: Option<String>,
    pub resync_period: Duration,
    pub lb_selection: LbSelectionPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            tlb_label_key: "ke-tlb/owner".to_string(),
            namespace: None,
            resync_period: Duration::from_secs(300),
            lb_selection: LbSelectionPolicy::default(),
        }
    }
}

/// Maintains the pod-address -> load-balancer-address table from streaming
/// Kubernetes endpoints/service events plus a periodic authoritative
/// resync, and answers [`AddressResolver::translate`] lookups.
///
/// `table` is the only state shared across the endpoints stream, the
/// service stream, and the resync ticker; it is guarded by a single
/// reader-writer lock per §5. The per-object "what did we see last time"
/// caches below are private bookkeeping owned by a single consumer task
/// each (kube's `watcher` yields `Applied`/`Deleted`, not explicit
/// old/new pairs, so recovering the add/update/delete distinction the
/// spec describes is this resolver's job, analogous to what a
/// `SharedInformer`'s delta FIFO gives the original for free).
pub struct AddressResolver {
    client: Client,
    config: ResolverConfig,
    table: Arc<RwLock<AddressTable>>,
    endpoints_seen: Mutex<HashMap<(String, String), HashSet<String>>>,
    services_seen: Mutex<HashMap<(String, String), String>>,
}

impl AddressResolver {
    pub fn new(client: Client, config: ResolverConfig) -> Self {
        Self {
            client,
            config,
            table: Arc::new(RwLock::new(AddressTable::new())),
            endpoints_seen: Mutex::new(HashMap::new()),
            services_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Answers a pod-address lookup. Never suspends past the read-lock
    /// acquisition; does no network I/O.
    pub async fn translate(&self, pod_addr: &str) -> Option<String> {
        self.table.read().await.translate(pod_addr).map(str::to_owned)
    }

    fn endpoints_api(&self) -> Api<Endpoints> {
        match &self.config.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn services_api(&self) -> Api<Service> {
        match &self.config.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn is_relevant<K: kube::Resource>(&self, obj: &K) -> bool
    where
        K::DynamicType: Default,
    {
        let has_label = obj.labels().contains_key(&self.config.tlb_label_key);
        let in_namespace = match (&self.config.namespace, obj.namespace()) {
            (Some(expected), Some(actual)) => expected == &actual,
            (Some(_), None) => false,
            (None, _) => true,
        };
        has_label && in_namespace
    }

    /// Starts the endpoints stream, the service stream, and the resync
    /// ticker. Returns immediately; all three run until `stop` resolves.
    pub async fn run(self: Arc<Self>, mut stop: tokio::sync::watch::Receiver<()>) {
        let endpoints_resolver = self.clone();
        let mut endpoints_stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = endpoints_resolver.watch_endpoints() => {}
                _ = endpoints_stop.changed() => {}
            }
        });

        let service_resolver = self.clone();
        let mut service_stop = stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = service_resolver.watch_services() => {}
                _ = service_stop.changed() => {}
            }
        });

        let resync_resolver = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resync_resolver.config.resync_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => resync_resolver.resync().await,
                    _ = stop.changed() => break,
                }
            }
        });
    }

    #[instrument(skip(self))]
    async fn watch_endpoints(&self) {
        let api = self.endpoints_api();
        let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()).default_backoff());
        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Applied(ep)) => self.on_endpoints_applied(&ep),
                Ok(Event::Deleted(ep)) => self.on_endpoints_deleted(&ep),
                Ok(Event::Restarted(eps)) => {
                    for ep in eps {
                        self.on_endpoints_applied(&ep);
                    }
                }
                Err(source) => warn!(%source, "endpoints watch stream error, backing off"),
            }
        }
    }

    #[instrument(skip(self))]
    async fn watch_services(&self) {
        let api = self.services_api();
        let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()).default_backoff());
        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Applied(svc)) => self.on_service_applied(&svc).await,
                Ok(Event::Restarted(svcs)) => {
                    for svc in svcs {
                        self.on_service_applied(&svc).await;
                    }
                }
                Ok(Event::Deleted(_)) => {}
                Err(source) => warn!(%source, "service watch stream error, backing off"),
            }
        }
    }

    fn on_endpoints_applied(&self, ep: &Endpoints) {
        if !self.is_relevant(ep) {
            debug!(ns = ?ep.namespace(), name = %ep.name_any(), "skip irrelevant endpoints");
            return;
        }
        let key = object_key(ep);
        let new_addrs = pod_addrs_from_endpoints(ep);

        let previous = {
            let mut seen = self.endpoints_seen.lock().unwrap();
            seen.insert(key, new_addrs.clone())
        };

        match previous {
            None => {
                // Add: LB address isn't known yet. Insert-with-empty-value
                // is the invariant's no-op; the resync sweep is what
                // actually populates this pod's mapping.
                self.spawn_table_update(new_addrs, String::new());
            }
            Some(old_addrs) => {
                let removed: HashSet<_> = old_addrs.difference(&new_addrs).cloned().collect();
                let added: HashSet<_> = new_addrs.difference(&old_addrs).cloned().collect();
                self.spawn_table_delete(removed);
                self.spawn_table_update(added, String::new());
            }
        }
    }

    fn on_endpoints_deleted(&self, ep: &Endpoints) {
        if !self.is_relevant(ep) {
            return;
        }
        let key = object_key(ep);
        let addrs = self
            .endpoints_seen
            .lock()
            .unwrap()
            .remove(&key)
            .unwrap_or_else(|| pod_addrs_from_endpoints(ep));
        self.spawn_table_delete(addrs);
    }

    /// Only acts on the empty-LB -> non-empty-LB transition of a service
    /// we've already seen at least once (spec §4.C `OnServiceUpdate`:
    /// "add and delete are not consumed"). `kube-rs`'s `watcher` hands us
    /// the same `Applied` variant for a brand-new service and for a
    /// subsequent update (and replays the whole list as `Applied` on every
    /// `Restarted`), so the first observation of any given service is
    /// treated as its add and deliberately left to the resync sweep, the
    /// same as the original's `AddFunc: nil` wiring.
    async fn on_service_applied(&self, svc: &Service) {
        if !self.is_relevant(svc) {
            return;
        }
        let key = object_key(svc);
        let new_lb = extract_lb_addr(svc, self.config.lb_selection).unwrap_or_default();

        let previous = {
            let mut seen = self.services_seen.lock().unwrap();
            seen.insert(key, new_lb.clone())
        };

        if previous.is_none() {
            debug!(name = %svc.name_any(), "first observation of tlb service, leaving to resync");
            return;
        }

        if !should_act_on_service_update(previous.as_deref(), &new_lb) {
            return;
        }

        match self.endpoints_for(svc).await {
            Ok(Some(ep)) => {
                let pod_addrs = pod_addrs_from_endpoints(&ep);
                self.table.write().await.update(pod_addrs, &new_lb);
            }
            Ok(None) => warn!(name = %svc.name_any(), "tlb service has no matching endpoints yet"),
            Err(source) => warn!(%source, name = %svc.name_any(), "failed to read endpoints for tlb service"),
        }
    }

    async fn endpoints_for(&self, svc: &Service) -> Result<Option<Endpoints>, BridgeError> {
        let ns = svc.namespace().unwrap_or_default();
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &ns);
        match api.get_opt(&svc.name_any()).await {
            Ok(ep) => Ok(ep),
            Err(source) => Err(BridgeError::Catalog { source }),
        }
    }

    fn spawn_table_update(&self, addrs: HashSet<String>, lb_addr: String) {
        if addrs.is_empty() {
            return;
        }
        let table = self.table.clone();
        tokio::spawn(async move {
            table.write().await.update(addrs, &lb_addr);
        });
    }

    fn spawn_table_delete(&self, addrs: HashSet<String>) {
        if addrs.is_empty() {
            return;
        }
        let table = self.table.clone();
        tokio::spawn(async move {
            table.write().await.delete(addrs);
        });
    }

    /// The authoritative periodic sweep: lists every TLB-labeled service,
    /// and for each one with a resolvable LB address and endpoints,
    /// (re-)writes every member pod address. This is what makes the table
    /// eventually consistent even across missed or reordered events.
    #[instrument(skip(self))]
    async fn resync(&self) {
        info!("running address resolver resync sweep");
        let selector = self.config.tlb_label_key.clone();
        let lp = ListParams::default().labels(&selector);
        let services = match self.services_api().list(&lp).await {
            Ok(list) => list.items,
            Err(source) => {
                warn!(%source, "resync: failed to list tlb services");
                return;
            }
        };

        for svc in &services {
            let Some(lb_addr) = extract_lb_addr(svc, self.config.lb_selection) else {
                debug!(name = %svc.name_any(), "resync: tlb service not yet initialized, skipping");
                continue;
            };
            match self.endpoints_for(svc).await {
                Ok(Some(ep)) => {
                    let pod_addrs = pod_addrs_from_endpoints(&ep);
                    self.table.write().await.update(pod_addrs, &lb_addr);
                }
                Ok(None) => debug!(name = %svc.name_any(), "resync: no endpoints found, skipping"),
                Err(source) => warn!(%source, name = %svc.name_any(), "resync: failed to read endpoints"),
            }
        }
    }
}

/// Whether a service's LB address just made the empty -> non-empty
/// transition §4.C's `OnServiceUpdate` acts on. `previous == None` means
/// this is the service's first observation (its add), which is never
/// acted on here regardless of `new_lb`.
fn should_act_on_service_update(previous: Option<&str>, new_lb: &str) -> bool {
    match previous {
        Some(old_lb) => old_lb.is_empty() && !new_lb.is_empty(),
        None => false,
    }
}

fn object_key<K: kube::Resource<DynamicType = ()>>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn pod_addrs_from_endpoints(ep: &Endpoints) -> HashSet<String> {
    let mut out = HashSet::new();
    let Some(subsets) = &ep.subsets else {
        return out;
    };
    for subset in subsets {
        let addresses = subset.addresses.as_deref().unwrap_or_default();
        let ports = subset.ports.as_deref().unwrap_or_default();
        for addr in addresses {
            for port in ports {
                out.insert(format!("{}:{}", addr.ip, port.port));
            }
        }
    }
    out
}

fn extract_lb_addr(svc: &Service, policy: LbSelectionPolicy) -> Option<String> {
    let ingress = svc.status.as_ref()?.load_balancer.as_ref()?.ingress.as_deref()?;
    let ports = svc.spec.as_ref()?.ports.as_deref()?;
    if ingress.is_empty() || ports.is_empty() {
        return None;
    }

    match policy {
        LbSelectionPolicy::LastWins => {
            let mut result = None;
            for ing in ingress {
                let Some(ip) = &ing.ip else { continue };
                for port in ports {
                    result = Some(format!("{ip}:{}", port.port));
                }
            }
            result
        }
        LbSelectionPolicy::FirstWins => {
            let ip = ingress.first()?.ip.as_ref()?;
            let port = ports.first()?;
            Some(format!("{ip}:{}", port.port))
        }
    }
}
