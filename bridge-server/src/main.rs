mod config;
mod error;
mod health;
mod version;

use std::net::SocketAddr;
use std::sync::Arc;

use bridge_core::{AddressResolver, Reconciler, RegistryConfig, ResolverConfig, ZookeeperRegistry};
use clap::Parser;
use config::Cli;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if std::env::args().any(|arg| arg == "--version" || arg == "-V") {
        println!("{}", version::describe());
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(source) = run(cli).await {
        error!(%source, "bootstrap failed");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> error::Result<()> {
    if cli.local_zk_addrs.is_empty() {
        return Err(error::ConfigError::MissingLocalZkAddrs);
    }
    if cli.remote_zk_addrs.is_empty() {
        return Err(error::ConfigError::MissingRemoteZkAddrs);
    }

    let kube_client = config::build_kube_client(&cli.kubeconfig).await?;

    let mut src_config = RegistryConfig::new(cli.local_zk_addrs.clone());
    src_config.root_path = config::ROOT_PATH.to_string();
    src_config.providers_category = config::PROVIDERS_CATEGORY.to_string();
    src_config.configurators_category = config::CONFIGURATORS_CATEGORY.to_string();
    src_config.connection_timeout = config::ZK_SESSION_TIMEOUT;

    let mut dst_config = RegistryConfig::new(cli.remote_zk_addrs.clone());
    dst_config.root_path = config::ROOT_PATH.to_string();
    dst_config.providers_category = config::PROVIDERS_CATEGORY.to_string();
    dst_config.configurators_category = config::CONFIGURATORS_CATEGORY.to_string();
    dst_config.connection_timeout = config::ZK_SESSION_TIMEOUT;

    let src = ZookeeperRegistry::connect(src_config)
        .await
        .map_err(|source| error::ConfigError::SourceRegistry { source })?;
    let dst = ZookeeperRegistry::connect(dst_config)
        .await
        .map_err(|source| error::ConfigError::DestinationRegistry { source })?;

    let resolver_config = ResolverConfig {
        tlb_label_key: config::TLB_LABEL_KEY.to_string(),
        namespace: cli.namespace.clone(),
        resync_period: config::RESOLVER_RESYNC_PERIOD,
        ..ResolverConfig::default()
    };
    let resolver = Arc::new(AddressResolver::new(kube_client, resolver_config));
    let reconciler = Arc::new(Reconciler::new(resolver.clone(), Arc::new(src), Arc::new(dst)));

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(());
    let liveness = health::Liveness::new();

    resolver.clone().run(stop_rx.clone()).await;

    info!("running initial reconcile pass before reporting ready");
    reconciler.refresh().await;
    liveness.mark_ready();

    let reconcile_stop = stop_rx.clone();
    let reconciler_task = reconciler.clone();
    tokio::spawn(async move {
        reconciler_task.run(config::RECONCILE_PERIOD, reconcile_stop).await;
    });

    let addr: SocketAddr = format!("{}:{}", cli.addr, cli.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cli.port)));
    let health_stop = stop_rx.clone();
    let health_liveness = liveness.clone();
    let health_task = tokio::spawn(async move { health::serve(addr, health_liveness, health_stop).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received shutdown signal"),
        result = health_task => {
            if let Ok(Err(source)) = result {
                error!(%source, "liveness endpoint failed to bind");
            }
        }
    }

    let _ = stop_tx.send(());
    Ok(())
}
