//! Core Data Model
//!
//! Entities of the layer-stack core: definitions and their per-node
//! instances, the per-instance layer tree, volume provider records, and
//! node-local storage pools with their registry.

pub mod layer_tree;
pub mod provider;
pub mod resource;
pub mod storage_pool;

pub use layer_tree::{LayerId, LayerKind, LayerTree, ReplRscData, ResourceLayerNode, RscLayerData};
pub use provider::{
    RemoteRole, RemoteVlmDfnData, ReplRscDfnData, ReplVlmDfnData, RscDfnLayerData,
    VlmDfnLayerData, VlmProviderData, VolumeProviderRecord,
};
pub use resource::{
    Resource, ResourceDefinition, ResourceName, ResourceView, Volume, VolumeDefinition,
    VolumeNumber,
};
pub use storage_pool::{
    ProviderKind, StoragePool, StoragePoolRegistry, StorPoolName, VlmKey,
};
