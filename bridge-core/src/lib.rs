//! Core building blocks for the unidirectional Dubbo/ZooKeeper bridge:
//! a ZooKeeper-backed [`registry::ProviderRegistry`], a Kubernetes-backed
//! [`resolver::AddressResolver`], and the [`reconciler::Reconciler`] that
//! drives convergence between a source and destination registry through it.
//!
//! This crate never initializes a `tracing` subscriber or parses CLI
//! arguments; it only emits events. Bootstrap lives in `bridge-server`.

pub mod error;
pub mod reconciler;
pub mod registry;
pub mod resolver;

pub use error::{BridgeError, Result};
pub use reconciler::{AddressResolverLike, Reconciler, DEFAULT_RECONCILE_PERIOD};
pub use registry::{ProviderRegistry, RegistryConfig, ZookeeperRegistry};
pub use resolver::{AddressResolver, LbSelectionPolicy, ResolverConfig};
