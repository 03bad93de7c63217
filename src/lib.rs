//! Layerstack - Layer-Stack Resolution for Replicated Cluster Storage
//!
//! Builds and reconciles the per-node layer trees of replicated storage
//! resources: an ordered stack of device-layer kinds (replication on top of
//! storage, optionally with layers in between) is resolved into a tree of
//! layer nodes, definition-scoped records shared across the cluster, and
//! per-volume provider records bound to storage pools.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Layer Stack Resolver                          │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐   │
//! │  │  Layer Registry  │  │  Strategy Ctx    │  │  Number Pools    │   │
//! │  │  (kind dispatch) │  │  (ports, pools)  │  │  (ids, minors)   │   │
//! │  └────────┬─────────┘  └────────┬─────────┘  └────────┬─────────┘   │
//! │           │                     │                     │             │
//! │  ┌────────┴─────────────────────┴─────────────────────┴─────────┐   │
//! │  │                     Layer Strategies                         │   │
//! │  │   Replication (non-leaf)      Storage (leaf, provider        │   │
//! │  │                               dispatch per pool kind)        │   │
//! │  └──────────────────────────────┬───────────────────────────────┘   │
//! ├─────────────────────────────────┼───────────────────────────────────┤
//! │                          Domain Objects                             │
//! │  ┌──────────────┐  ┌────────────┴───┐  ┌──────────────────────┐     │
//! │  │  Resources,  │  │  Layer Trees,  │  │  Storage Pools       │     │
//! │  │  Definitions │  │  Provider Recs │  │  (reverse indexes)   │     │
//! │  └──────────────┘  └────────────────┘  └──────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`layer`]: strategies, registry, payloads and the resolver
//! - [`objects`]: resources, definitions, layer trees, pools, provider data
//! - [`domain`]: collaborator ports (access control, persistence, pool
//!   resolution)
//! - [`numberpool`]: lowest-free identifier allocation
//! - [`props`]: string property containers
//! - [`config`]: identifier ranges and the default stack
//! - [`error`]: error types and handling

pub mod config;
pub mod domain;
pub mod error;
pub mod layer;
pub mod numberpool;
pub mod objects;
pub mod props;

// Re-export commonly used types
pub use config::CoreConfig;

pub use domain::ports::{
    AccessControl, AccessControlRef, AccessType, AllowAll, Identity,
    LayerPersistence, LayerPersistenceRef, NoopPersistence, ObjectRef,
    PropsPoolResolver, StoragePoolResolver, StoragePoolResolverRef,
};

pub use error::{Error, Result};

pub use layer::{
    LayerPayload, LayerRegistry, LayerStackResolver, LayerStrategy,
    LayerStrategyRef, NodeCtx, ReplicationLayer, ReplicationPayload,
    StorageLayer, StoragePayload, StrategyCtx, VolumePayload,
};

pub use numberpool::NumberPool;

pub use objects::{
    LayerId, LayerKind, LayerTree, ProviderKind, Resource, ResourceDefinition,
    ResourceLayerNode, ResourceName, RscLayerData, StoragePool,
    StoragePoolRegistry, StorPoolName, VlmKey, VlmProviderData, Volume,
    VolumeDefinition, VolumeNumber, VolumeProviderRecord,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
