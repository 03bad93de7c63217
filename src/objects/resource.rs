//! Resources, Volumes and their Definitions
//!
//! Definitions are the template entities shared by every node instance of a
//! logical resource: a `ResourceDefinition` owns the volume definitions and
//! the definition-scoped layer records; a `Resource` is the per-node
//! instance, owning its volumes and its layer tree. Definitions are shared
//! between instances through `Arc<RwLock<_>>` handles; the lock is taken
//! only inside the caller's exclusive reconciliation scope.

use crate::error::{Error, Result};
use crate::objects::layer_tree::{LayerKind, LayerTree};
use crate::objects::provider::{RscDfnLayerData, VlmDfnLayerData};
use crate::props::PropsContainer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Names and Numbers
// =============================================================================

/// Unique name of a logical resource (and of its definition)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceName(pub String);

impl ResourceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ResourceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Number of a volume within its resource definition
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VolumeNumber(pub u32);

impl VolumeNumber {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VolumeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for VolumeNumber {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Key of a definition-scoped layer record
type LayerDataKey = (LayerKind, String);

// =============================================================================
// Volume Definition
// =============================================================================

/// Template for one volume, shared by every node instance
#[derive(Debug)]
pub struct VolumeDefinition {
    vlm_nr: VolumeNumber,
    pub size_kib: u64,
    pub props: PropsContainer,
    layer_data: BTreeMap<LayerDataKey, VlmDfnLayerData>,
}

impl VolumeDefinition {
    pub fn new(vlm_nr: VolumeNumber, size_kib: u64) -> Self {
        Self {
            vlm_nr,
            size_kib,
            props: PropsContainer::new(),
            layer_data: BTreeMap::new(),
        }
    }

    pub fn vlm_nr(&self) -> VolumeNumber {
        self.vlm_nr
    }

    pub fn layer_data(&self, kind: LayerKind, suffix: &str) -> Option<&VlmDfnLayerData> {
        self.layer_data.get(&(kind, suffix.to_string()))
    }

    pub fn layer_data_mut(
        &mut self,
        kind: LayerKind,
        suffix: &str,
    ) -> Option<&mut VlmDfnLayerData> {
        self.layer_data.get_mut(&(kind, suffix.to_string()))
    }

    /// Ensure a definition-scoped layer record exists for (kind, suffix).
    ///
    /// The constructor runs at most once per triple; on later calls the
    /// stored record is returned untouched. Callers verify the variant via
    /// the `as_*_mut` accessors, which report a mismatch as an internal
    /// error.
    pub fn layer_data_or_insert(
        &mut self,
        kind: LayerKind,
        suffix: &str,
        build: impl FnOnce() -> Result<VlmDfnLayerData>,
    ) -> Result<&mut VlmDfnLayerData> {
        match self.layer_data.entry((kind, suffix.to_string())) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => Ok(entry.insert(build()?)),
        }
    }

    /// Insert a freshly created record; duplicate triples are a uniqueness
    /// violation
    pub fn insert_layer_data(
        &mut self,
        kind: LayerKind,
        suffix: &str,
        data: VlmDfnLayerData,
    ) -> Result<()> {
        match self.layer_data.entry((kind, suffix.to_string())) {
            Entry::Occupied(_) => Err(Error::AlreadyExists {
                kind: "volume-definition layer record".into(),
                name: format!("{}/{}{}", self.vlm_nr, kind, suffix),
            }),
            Entry::Vacant(entry) => {
                entry.insert(data);
                Ok(())
            }
        }
    }

    pub fn remove_layer_data(
        &mut self,
        kind: LayerKind,
        suffix: &str,
    ) -> Option<VlmDfnLayerData> {
        self.layer_data.remove(&(kind, suffix.to_string()))
    }

    pub fn layer_data_len(&self) -> usize {
        self.layer_data.len()
    }
}

// =============================================================================
// Resource Definition
// =============================================================================

/// Template for a logical resource, shared by every node instance
#[derive(Debug)]
pub struct ResourceDefinition {
    name: ResourceName,
    pub props: PropsContainer,
    layer_data: BTreeMap<LayerDataKey, RscDfnLayerData>,
    volume_definitions: BTreeMap<VolumeNumber, VolumeDefinition>,
}

impl ResourceDefinition {
    pub fn new(name: impl Into<ResourceName>) -> Self {
        Self {
            name: name.into(),
            props: PropsContainer::new(),
            layer_data: BTreeMap::new(),
            volume_definitions: BTreeMap::new(),
        }
    }

    /// Shared handle used by node instances
    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    pub fn add_volume_definition(&mut self, vlm_dfn: VolumeDefinition) -> Result<()> {
        match self.volume_definitions.entry(vlm_dfn.vlm_nr()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists {
                kind: "volume definition".into(),
                name: format!("{}/{}", self.name, vlm_dfn.vlm_nr()),
            }),
            Entry::Vacant(entry) => {
                entry.insert(vlm_dfn);
                Ok(())
            }
        }
    }

    pub fn volume_definition(&self, vlm_nr: VolumeNumber) -> Option<&VolumeDefinition> {
        self.volume_definitions.get(&vlm_nr)
    }

    pub fn volume_definition_mut(
        &mut self,
        vlm_nr: VolumeNumber,
    ) -> Option<&mut VolumeDefinition> {
        self.volume_definitions.get_mut(&vlm_nr)
    }

    pub fn volume_definitions(&self) -> impl Iterator<Item = &VolumeDefinition> {
        self.volume_definitions.values()
    }

    pub fn layer_data(&self, kind: LayerKind, suffix: &str) -> Option<&RscDfnLayerData> {
        self.layer_data.get(&(kind, suffix.to_string()))
    }

    pub fn layer_data_mut(
        &mut self,
        kind: LayerKind,
        suffix: &str,
    ) -> Option<&mut RscDfnLayerData> {
        self.layer_data.get_mut(&(kind, suffix.to_string()))
    }

    pub fn insert_layer_data(
        &mut self,
        kind: LayerKind,
        suffix: &str,
        data: RscDfnLayerData,
    ) -> Result<()> {
        match self.layer_data.entry((kind, suffix.to_string())) {
            Entry::Occupied(_) => Err(Error::AlreadyExists {
                kind: "resource-definition layer record".into(),
                name: format!("{}/{}{}", self.name, kind, suffix),
            }),
            Entry::Vacant(entry) => {
                entry.insert(data);
                Ok(())
            }
        }
    }

    pub fn remove_layer_data(
        &mut self,
        kind: LayerKind,
        suffix: &str,
    ) -> Option<RscDfnLayerData> {
        self.layer_data.remove(&(kind, suffix.to_string()))
    }
}

// =============================================================================
// Volume
// =============================================================================

/// Per-node instance of a volume definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    vlm_nr: VolumeNumber,
    pub props: PropsContainer,
}

impl Volume {
    pub fn new(vlm_nr: VolumeNumber) -> Self {
        Self {
            vlm_nr,
            props: PropsContainer::new(),
        }
    }

    pub fn vlm_nr(&self) -> VolumeNumber {
        self.vlm_nr
    }
}

// =============================================================================
// Resource
// =============================================================================

/// Per-node instance of a resource definition
#[derive(Debug)]
pub struct Resource {
    name: ResourceName,
    node_name: String,
    definition: Arc<RwLock<ResourceDefinition>>,
    pub props: PropsContainer,
    volumes: BTreeMap<VolumeNumber, Volume>,
    /// Per-instance layer tree, built and reconciled by the resolver
    pub layer_tree: LayerTree,
}

impl Resource {
    pub fn new(node_name: impl Into<String>, definition: Arc<RwLock<ResourceDefinition>>) -> Self {
        let name = definition.read().name().clone();
        Self {
            name,
            node_name: node_name.into(),
            definition,
            props: PropsContainer::new(),
            volumes: BTreeMap::new(),
            layer_tree: LayerTree::new(),
        }
    }

    pub fn name(&self) -> &ResourceName {
        &self.name
    }

    /// Cluster node hosting this instance
    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn definition(&self) -> &Arc<RwLock<ResourceDefinition>> {
        &self.definition
    }

    /// Add a volume instance; its volume definition must already exist
    pub fn add_volume(&mut self, volume: Volume) -> Result<()> {
        if self
            .definition
            .read()
            .volume_definition(volume.vlm_nr())
            .is_none()
        {
            return Err(Error::internal(format!(
                "volume {}/{} added without a volume definition",
                self.name,
                volume.vlm_nr()
            )));
        }
        match self.volumes.entry(volume.vlm_nr()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists {
                kind: "volume".into(),
                name: format!("{}/{}", self.name, volume.vlm_nr()),
            }),
            Entry::Vacant(entry) => {
                entry.insert(volume);
                Ok(())
            }
        }
    }

    pub fn volume(&self, vlm_nr: VolumeNumber) -> Option<&Volume> {
        self.volumes.get(&vlm_nr)
    }

    pub fn volume_mut(&mut self, vlm_nr: VolumeNumber) -> Option<&mut Volume> {
        self.volumes.get_mut(&vlm_nr)
    }

    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values()
    }

    pub fn volume_numbers(&self) -> Vec<VolumeNumber> {
        self.volumes.keys().copied().collect()
    }

    /// Split borrow used by the resolver: immutable entity state alongside
    /// the mutable layer tree
    pub(crate) fn split_tree_mut(&mut self) -> (ResourceView<'_>, &mut LayerTree) {
        (
            ResourceView {
                name: &self.name,
                node_name: &self.node_name,
                props: &self.props,
                definition: &self.definition,
                volumes: &self.volumes,
            },
            &mut self.layer_tree,
        )
    }
}

/// Immutable view of a resource's entity state, independent of its layer
/// tree
#[derive(Clone, Copy)]
pub struct ResourceView<'a> {
    pub name: &'a ResourceName,
    pub node_name: &'a str,
    pub props: &'a PropsContainer,
    pub definition: &'a Arc<RwLock<ResourceDefinition>>,
    pub volumes: &'a BTreeMap<VolumeNumber, Volume>,
}
