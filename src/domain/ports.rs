//! Domain Ports - Collaborator traits of the layer-stack core
//!
//! These traits define the boundaries between the resolver and the external
//! systems the embedding control plane supplies: capability checks, durable
//! persistence, and storage-pool resolution. Adapters implement these traits
//! to provide concrete functionality; the in-memory implementations here
//! back the test suite and single-process embeddings.

use crate::error::{Error, Result};
use crate::objects::layer_tree::{LayerId, LayerKind, ResourceLayerNode};
use crate::objects::provider::VolumeProviderRecord;
use crate::objects::resource::{ResourceName, ResourceView, Volume, VolumeNumber};
use crate::objects::storage_pool::{StoragePool, StoragePoolRegistry, StorPoolName};
use crate::props::keys;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Access Control
// =============================================================================

/// Subject performing an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The control plane's own privileged identity
    pub fn system() -> Self {
        Self("SYSTEM".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability requested on a protected object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    View,
    Use,
    Change,
    Control,
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccessType::View => "view",
            AccessType::Use => "use",
            AccessType::Change => "change",
            AccessType::Control => "control",
        };
        write!(f, "{s}")
    }
}

/// Protected object a capability is checked against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectRef {
    Resource(ResourceName),
    Definition(ResourceName),
    StoragePool(StorPoolName),
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectRef::Resource(name) => write!(f, "resource/{name}"),
            ObjectRef::Definition(name) => write!(f, "definition/{name}"),
            ObjectRef::StoragePool(name) => write!(f, "storage-pool/{name}"),
        }
    }
}

/// Port for capability evaluation, called before any structural mutation
pub trait AccessControl: Send + Sync {
    fn require_access(
        &self,
        subject: &Identity,
        object: &ObjectRef,
        access: AccessType,
    ) -> Result<()>;
}

/// Grants every capability; for tests and trusted single-tenant embeddings
#[derive(Debug, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn require_access(&self, _: &Identity, _: &ObjectRef, _: AccessType) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Persistence
// =============================================================================

/// Port for durable persistence of layer records.
///
/// The resolver and strategies call these once per created or mutated
/// record, inside the caller's transaction scope; any failure aborts the
/// whole resolution and the transaction manager owns rollback and retry.
pub trait LayerPersistence: Send + Sync {
    fn layer_node_created(&self, rsc: &ResourceName, node: &ResourceLayerNode) -> Result<()>;

    fn layer_node_updated(&self, rsc: &ResourceName, node: &ResourceLayerNode) -> Result<()>;

    fn provider_record_created(
        &self,
        rsc: &ResourceName,
        layer_id: LayerId,
        record: &VolumeProviderRecord,
    ) -> Result<()>;

    fn provider_record_updated(
        &self,
        rsc: &ResourceName,
        layer_id: LayerId,
        record: &VolumeProviderRecord,
    ) -> Result<()>;

    fn rsc_dfn_record_created(
        &self,
        rsc: &ResourceName,
        kind: LayerKind,
        suffix: &str,
    ) -> Result<()>;

    fn rsc_dfn_record_updated(
        &self,
        rsc: &ResourceName,
        kind: LayerKind,
        suffix: &str,
    ) -> Result<()>;

    fn vlm_dfn_record_created(
        &self,
        rsc: &ResourceName,
        vlm_nr: VolumeNumber,
        kind: LayerKind,
        suffix: &str,
    ) -> Result<()>;
}

/// Discards every persistence call; for tests and volatile embeddings
#[derive(Debug, Default)]
pub struct NoopPersistence;

impl LayerPersistence for NoopPersistence {
    fn layer_node_created(&self, _: &ResourceName, _: &ResourceLayerNode) -> Result<()> {
        Ok(())
    }

    fn layer_node_updated(&self, _: &ResourceName, _: &ResourceLayerNode) -> Result<()> {
        Ok(())
    }

    fn provider_record_created(
        &self,
        _: &ResourceName,
        _: LayerId,
        _: &VolumeProviderRecord,
    ) -> Result<()> {
        Ok(())
    }

    fn provider_record_updated(
        &self,
        _: &ResourceName,
        _: LayerId,
        _: &VolumeProviderRecord,
    ) -> Result<()> {
        Ok(())
    }

    fn rsc_dfn_record_created(&self, _: &ResourceName, _: LayerKind, _: &str) -> Result<()> {
        Ok(())
    }

    fn rsc_dfn_record_updated(&self, _: &ResourceName, _: LayerKind, _: &str) -> Result<()> {
        Ok(())
    }

    fn vlm_dfn_record_created(
        &self,
        _: &ResourceName,
        _: VolumeNumber,
        _: LayerKind,
        _: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// Records every persistence call as a readable op string; lets tests
/// assert exactly which records a resolution touched
#[derive(Debug, Default)]
pub struct RecordingPersistence {
    ops: Mutex<Vec<String>>,
}

impl RecordingPersistence {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn op_count(&self) -> usize {
        self.ops.lock().len()
    }

    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    fn record(&self, op: String) -> Result<()> {
        self.ops.lock().push(op);
        Ok(())
    }
}

impl LayerPersistence for RecordingPersistence {
    fn layer_node_created(&self, rsc: &ResourceName, node: &ResourceLayerNode) -> Result<()> {
        self.record(format!("node-create {rsc} {} {}", node.kind(), node.id()))
    }

    fn layer_node_updated(&self, rsc: &ResourceName, node: &ResourceLayerNode) -> Result<()> {
        self.record(format!("node-update {rsc} {} {}", node.kind(), node.id()))
    }

    fn provider_record_created(
        &self,
        rsc: &ResourceName,
        layer_id: LayerId,
        record: &VolumeProviderRecord,
    ) -> Result<()> {
        self.record(format!(
            "vlm-create {rsc} {layer_id} {} {}",
            record.vlm_nr(),
            record.provider_kind()
        ))
    }

    fn provider_record_updated(
        &self,
        rsc: &ResourceName,
        layer_id: LayerId,
        record: &VolumeProviderRecord,
    ) -> Result<()> {
        self.record(format!(
            "vlm-update {rsc} {layer_id} {} pool={}",
            record.vlm_nr(),
            record.pool()
        ))
    }

    fn rsc_dfn_record_created(
        &self,
        rsc: &ResourceName,
        kind: LayerKind,
        suffix: &str,
    ) -> Result<()> {
        self.record(format!("rsc-dfn-create {rsc} {kind}{suffix}"))
    }

    fn rsc_dfn_record_updated(
        &self,
        rsc: &ResourceName,
        kind: LayerKind,
        suffix: &str,
    ) -> Result<()> {
        self.record(format!("rsc-dfn-update {rsc} {kind}{suffix}"))
    }

    fn vlm_dfn_record_created(
        &self,
        rsc: &ResourceName,
        vlm_nr: VolumeNumber,
        kind: LayerKind,
        suffix: &str,
    ) -> Result<()> {
        self.record(format!("vlm-dfn-create {rsc}/{vlm_nr} {kind}{suffix}"))
    }
}

// =============================================================================
// Storage Pool Resolution
// =============================================================================

/// Port answering which storage pool backs a volume at a given layer node.
///
/// `Ok(None)` means no pool is configured; whether that is an error depends
/// on the call site (creation of a provider record requires a pool, a merge
/// tolerates an unresolvable one).
pub trait StoragePoolResolver: Send + Sync {
    fn resolve_pool(
        &self,
        rsc: ResourceView<'_>,
        vlm: &Volume,
        kind: LayerKind,
        suffix: &str,
    ) -> Result<Option<Arc<StoragePool>>>;
}

/// Default resolver: reads the pool name from the property containers in
/// priority order (volume, volume definition, resource, resource
/// definition) and looks it up in the registry
pub struct PropsPoolResolver {
    registry: Arc<StoragePoolRegistry>,
}

impl PropsPoolResolver {
    pub fn new(registry: Arc<StoragePoolRegistry>) -> Arc<Self> {
        Arc::new(Self { registry })
    }
}

impl StoragePoolResolver for PropsPoolResolver {
    fn resolve_pool(
        &self,
        rsc: ResourceView<'_>,
        vlm: &Volume,
        _kind: LayerKind,
        _suffix: &str,
    ) -> Result<Option<Arc<StoragePool>>> {
        let name = vlm
            .props
            .get(keys::STOR_POOL_NAME)
            .map(str::to_string)
            .or_else(|| {
                let dfn = rsc.definition.read();
                dfn.volume_definition(vlm.vlm_nr())
                    .and_then(|vd| vd.props.get(keys::STOR_POOL_NAME).map(str::to_string))
            })
            .or_else(|| rsc.props.get(keys::STOR_POOL_NAME).map(str::to_string))
            .or_else(|| {
                rsc.definition
                    .read()
                    .props
                    .get(keys::STOR_POOL_NAME)
                    .map(str::to_string)
            });

        match name {
            None => Ok(None),
            Some(name) => {
                let pool_name = StorPoolName::from(name);
                self.registry
                    .get(&pool_name)
                    .map(Some)
                    .ok_or_else(|| Error::PoolNotFound {
                        resource: rsc.name.to_string(),
                        volume: vlm.vlm_nr().value(),
                    })
            }
        }
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type AccessControlRef = Arc<dyn AccessControl>;
pub type LayerPersistenceRef = Arc<dyn LayerPersistence>;
pub type StoragePoolResolverRef = Arc<dyn StoragePoolResolver>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::resource::{Resource, ResourceDefinition, VolumeDefinition};
    use crate::objects::storage_pool::ProviderKind;
    use assert_matches::assert_matches;

    fn resource_with_pool_prop(level: &str) -> Resource {
        let mut dfn = ResourceDefinition::new("r1");
        let mut vlm_dfn = VolumeDefinition::new(VolumeNumber(0), 4096);
        if level == "vlm-dfn" {
            vlm_dfn.props.set(keys::STOR_POOL_NAME, "from-vlm-dfn");
        }
        if level == "rsc-dfn" {
            dfn.props.set(keys::STOR_POOL_NAME, "from-rsc-dfn");
        }
        dfn.add_volume_definition(vlm_dfn).unwrap();
        let mut rsc = Resource::new("node-a", dfn.shared());
        if level == "rsc" {
            rsc.props.set(keys::STOR_POOL_NAME, "from-rsc");
        }
        let mut vlm = Volume::new(VolumeNumber(0));
        if level == "vlm" {
            vlm.props.set(keys::STOR_POOL_NAME, "from-vlm");
        }
        rsc.add_volume(vlm).unwrap();
        rsc
    }

    #[test]
    fn test_pool_prop_priority() {
        let registry = StoragePoolRegistry::new();
        for name in ["from-vlm", "from-vlm-dfn", "from-rsc", "from-rsc-dfn"] {
            registry
                .register(StoragePool::new(name, ProviderKind::Lvm))
                .unwrap();
        }
        let resolver = PropsPoolResolver::new(registry);

        for level in ["vlm", "vlm-dfn", "rsc", "rsc-dfn"] {
            let mut rsc = resource_with_pool_prop(level);
            let (view, _) = rsc.split_tree_mut();
            let vlm = view.volumes.get(&VolumeNumber(0)).unwrap();
            let pool = resolver
                .resolve_pool(view, vlm, LayerKind::Storage, "")
                .unwrap()
                .unwrap();
            assert_eq!(pool.name().as_str(), format!("from-{level}"));
        }
    }

    #[test]
    fn test_unconfigured_pool_is_none() {
        let registry = StoragePoolRegistry::new();
        let resolver = PropsPoolResolver::new(registry);
        let mut rsc = resource_with_pool_prop("none");
        let (view, _) = rsc.split_tree_mut();
        let vlm = view.volumes.get(&VolumeNumber(0)).unwrap();
        assert!(resolver
            .resolve_pool(view, vlm, LayerKind::Storage, "")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unknown_pool_name_fails() {
        let registry = StoragePoolRegistry::new();
        let resolver = PropsPoolResolver::new(registry);
        let mut rsc = resource_with_pool_prop("vlm");
        let (view, _) = rsc.split_tree_mut();
        let vlm = view.volumes.get(&VolumeNumber(0)).unwrap();
        assert_matches!(
            resolver.resolve_pool(view, vlm, LayerKind::Storage, ""),
            Err(Error::PoolNotFound { .. })
        );
    }

    #[test]
    fn test_recording_persistence() {
        let persistence = RecordingPersistence::new();
        persistence
            .rsc_dfn_record_created(&ResourceName::from("r1"), LayerKind::Replication, "")
            .unwrap();
        assert_eq!(persistence.ops(), vec!["rsc-dfn-create r1 replication"]);
    }
}
