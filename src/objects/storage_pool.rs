//! Storage Pools and the Pool Registry
//!
//! A storage pool is a node-local, named backend configuration: which
//! provider technology backs it plus driver-specific properties. Every pool
//! keeps the reverse index of the volume provider records it currently
//! backs, so capacity accounting and pool deletion checks stay O(pool).
//!
//! The registry is process-wide shared state, constructed at control-plane
//! startup and injected wherever pools are resolved; the reverse index is
//! mutated only inside the exclusive reconciliation scope of the caller.

use crate::error::{Error, Result};
use crate::objects::layer_tree::LayerId;
use crate::objects::resource::{ResourceName, VolumeNumber};
use crate::props::PropsContainer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Provider Kind
// =============================================================================

/// Tag identifying the concrete storage technology backing a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// No local backing; the volume is attached over the network
    Diskless,
    /// Plain logical-volume-manager volumes
    Lvm,
    /// Thin-provisioned logical-volume-manager volumes
    LvmThin,
    /// Preallocated filesystem-pool datasets
    Zfs,
    /// Thin filesystem-pool datasets
    ZfsThin,
    /// Initiator side of a remote block service
    RemoteInitiator,
    /// Target side of a remote block service
    RemoteTarget,
    /// The pool is backed by another device layer, not by a provider;
    /// reaching provider dispatch with this kind is an invariant violation
    ExternalLayer,
}

impl ProviderKind {
    /// Whether volumes of this kind are thin-provisioned
    pub fn is_thin(&self) -> bool {
        matches!(self, ProviderKind::LvmThin | ProviderKind::ZfsThin)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderKind::Diskless => "diskless",
            ProviderKind::Lvm => "lvm",
            ProviderKind::LvmThin => "lvm-thin",
            ProviderKind::Zfs => "zfs",
            ProviderKind::ZfsThin => "zfs-thin",
            ProviderKind::RemoteInitiator => "remote-initiator",
            ProviderKind::RemoteTarget => "remote-target",
            ProviderKind::ExternalLayer => "external-layer",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Pool Name
// =============================================================================

/// Unique name of a storage pool
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorPoolName(pub String);

impl StorPoolName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorPoolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StorPoolName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StorPoolName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Reverse Index Key
// =============================================================================

/// Identity of one volume provider record, as tracked by the pool that
/// backs it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VlmKey {
    pub resource: ResourceName,
    pub layer_id: LayerId,
    pub vlm_nr: VolumeNumber,
}

impl std::fmt::Display for VlmKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.resource, self.layer_id, self.vlm_nr)
    }
}

// =============================================================================
// Storage Pool
// =============================================================================

/// Node-local named backend configuration with a reverse volume index
#[derive(Debug)]
pub struct StoragePool {
    name: StorPoolName,
    kind: ProviderKind,
    props: RwLock<PropsContainer>,
    vlm_index: RwLock<BTreeSet<VlmKey>>,
}

impl StoragePool {
    pub fn new(name: impl Into<StorPoolName>, kind: ProviderKind) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind,
            props: RwLock::new(PropsContainer::new()),
            vlm_index: RwLock::new(BTreeSet::new()),
        })
    }

    pub fn name(&self) -> &StorPoolName {
        &self.name
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.kind
    }

    /// Read a driver property
    pub fn prop(&self, key: &str) -> Option<String> {
        self.props.read().get(key).map(str::to_string)
    }

    /// Set a driver property
    pub fn set_prop(&self, key: impl Into<String>, value: impl Into<String>) {
        self.props.write().set(key, value);
    }

    /// Register a provider record as backed by this pool
    pub fn add_volume(&self, key: VlmKey) {
        debug!("Pool {}: indexing volume {}", self.name, key);
        self.vlm_index.write().insert(key);
    }

    /// Drop a provider record from the reverse index; returns whether it was
    /// present
    pub fn remove_volume(&self, key: &VlmKey) -> bool {
        debug!("Pool {}: dropping volume {}", self.name, key);
        self.vlm_index.write().remove(key)
    }

    pub fn contains_volume(&self, key: &VlmKey) -> bool {
        self.vlm_index.read().contains(key)
    }

    pub fn volume_count(&self) -> usize {
        self.vlm_index.read().len()
    }

    /// Snapshot of the reverse index
    pub fn volumes(&self) -> Vec<VlmKey> {
        self.vlm_index.read().iter().cloned().collect()
    }
}

// =============================================================================
// Storage Pool Registry
// =============================================================================

/// By-name lookup of the node's storage pools
#[derive(Debug, Default)]
pub struct StoragePoolRegistry {
    pools: RwLock<BTreeMap<StorPoolName, Arc<StoragePool>>>,
}

impl StoragePoolRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a pool under its name
    pub fn register(&self, pool: Arc<StoragePool>) -> Result<()> {
        let mut pools = self.pools.write();
        if pools.contains_key(pool.name()) {
            return Err(Error::AlreadyExists {
                kind: "storage pool".into(),
                name: pool.name().to_string(),
            });
        }
        info!("Registering storage pool {} ({})", pool.name(), pool.provider_kind());
        pools.insert(pool.name().clone(), pool);
        Ok(())
    }

    pub fn get(&self, name: &StorPoolName) -> Option<Arc<StoragePool>> {
        self.pools.read().get(name).cloned()
    }

    /// Remove a pool; refuses while provider records still reference it
    pub fn remove(&self, name: &StorPoolName) -> Result<Option<Arc<StoragePool>>> {
        let mut pools = self.pools.write();
        if let Some(pool) = pools.get(name) {
            let in_use = pool.volume_count();
            if in_use > 0 {
                return Err(Error::internal(format!(
                    "storage pool {name} removed while backing {in_use} volume(s)"
                )));
            }
        }
        Ok(pools.remove(name))
    }

    pub fn names(&self) -> Vec<StorPoolName> {
        self.pools.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn key(rsc: &str, id: u32, nr: u32) -> VlmKey {
        VlmKey {
            resource: ResourceName::from(rsc),
            layer_id: LayerId(id),
            vlm_nr: VolumeNumber(nr),
        }
    }

    #[test]
    fn test_reverse_index() {
        let pool = StoragePool::new("thinpool", ProviderKind::LvmThin);
        pool.add_volume(key("r1", 1, 0));
        pool.add_volume(key("r1", 1, 1));

        assert_eq!(pool.volume_count(), 2);
        assert!(pool.contains_volume(&key("r1", 1, 0)));
        assert!(pool.remove_volume(&key("r1", 1, 0)));
        assert!(!pool.remove_volume(&key("r1", 1, 0)));
        assert_eq!(pool.volume_count(), 1);
    }

    #[test]
    fn test_registry_uniqueness() {
        let registry = StoragePoolRegistry::new();
        registry
            .register(StoragePool::new("ssd", ProviderKind::Lvm))
            .unwrap();
        assert_matches!(
            registry.register(StoragePool::new("ssd", ProviderKind::Zfs)),
            Err(Error::AlreadyExists { .. })
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry
                .get(&StorPoolName::from("ssd"))
                .unwrap()
                .provider_kind(),
            ProviderKind::Lvm
        );
    }

    #[test]
    fn test_remove_in_use_pool() {
        let registry = StoragePoolRegistry::new();
        let pool = StoragePool::new("ssd", ProviderKind::Lvm);
        registry.register(pool.clone()).unwrap();
        pool.add_volume(key("r1", 4, 0));

        assert_matches!(
            registry.remove(&StorPoolName::from("ssd")),
            Err(Error::Internal(_))
        );
        pool.remove_volume(&key("r1", 4, 0));
        assert!(registry.remove(&StorPoolName::from("ssd")).unwrap().is_some());
    }
}
