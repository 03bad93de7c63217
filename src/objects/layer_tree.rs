//! Resource Layer Trees
//!
//! Every per-node resource instance carries a tree of layer nodes describing
//! how the resource is realized on that node: e.g. a replication layer on top
//! of a storage layer. Each node is tagged with a device-layer kind, owns a
//! cluster-unique layer id, and may carry an optional name suffix so that
//! multiple sibling stacks of the same kind can live under one resource.

use crate::error::{Error, Result};
use crate::objects::provider::VolumeProviderRecord;
use crate::objects::resource::VolumeNumber;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Layer Kind
// =============================================================================

/// Tag identifying one logical layer in a resource's stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    /// Replicates volumes between node instances of a resource
    Replication,
    /// Transparent at-rest encryption; no built-in strategy, registration
    /// surface for embedders
    Encryption,
    /// Backend provisioning leaf; dispatches on the storage pool's provider
    /// kind
    Storage,
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerKind::Replication => write!(f, "replication"),
            LayerKind::Encryption => write!(f, "encryption"),
            LayerKind::Storage => write!(f, "storage"),
        }
    }
}

// =============================================================================
// Layer Id
// =============================================================================

/// Cluster-unique identifier of one resource layer node, assigned from the
/// layer-id number pool and immutable for the lifetime of the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerId(pub u32);

impl LayerId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for LayerId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

// =============================================================================
// Kind-Specific Node Data
// =============================================================================

/// Replication-layer data scoped to one resource instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplRscData {
    /// Peer slots reserved in the replication metadata
    pub peer_slots: u8,
}

/// Kind-specific data carried by a layer node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum RscLayerData {
    Replication(ReplRscData),
    /// The storage layer keeps all of its state in per-volume provider
    /// records
    Storage,
    /// Externally registered layer kinds without core-modeled node data
    Opaque,
}

// =============================================================================
// Resource Layer Node
// =============================================================================

/// One node in a resource's layer tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLayerNode {
    id: LayerId,
    kind: LayerKind,
    suffix: String,
    parent: Option<LayerId>,
    children: Vec<LayerId>,
    /// Kind-specific resource-scoped data, merged in place on reconciliation
    pub data: RscLayerData,
    /// Per-volume provider records; populated only on leaf nodes
    pub(crate) vlm_data: BTreeMap<VolumeNumber, VolumeProviderRecord>,
}

impl ResourceLayerNode {
    pub fn new(
        id: LayerId,
        kind: LayerKind,
        suffix: impl Into<String>,
        parent: Option<LayerId>,
        data: RscLayerData,
    ) -> Self {
        Self {
            id,
            kind,
            suffix: suffix.into(),
            parent,
            children: Vec::new(),
            data,
            vlm_data: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    /// Child node ids in insertion order
    pub fn children(&self) -> &[LayerId] {
        &self.children
    }

    pub fn provider_record(&self, vlm_nr: VolumeNumber) -> Option<&VolumeProviderRecord> {
        self.vlm_data.get(&vlm_nr)
    }

    pub fn provider_records(
        &self,
    ) -> impl Iterator<Item = (VolumeNumber, &VolumeProviderRecord)> {
        self.vlm_data.iter().map(|(nr, rec)| (*nr, rec))
    }
}

// =============================================================================
// Layer Tree
// =============================================================================

/// The per-resource arena of layer nodes.
///
/// Nodes are kept in insertion order; links between nodes are layer ids, so
/// the tree stays serializable and free of reference cycles. Invariants: one
/// root at most, ids unique, (parent, kind, suffix) unique among siblings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerTree {
    nodes: IndexMap<LayerId, ResourceLayerNode>,
    root: Option<LayerId>,
}

impl LayerTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> Option<LayerId> {
        self.root
    }

    pub fn node(&self, id: LayerId) -> Option<&ResourceLayerNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: LayerId) -> Option<&mut ResourceLayerNode> {
        self.nodes.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceLayerNode> {
        self.nodes.values()
    }

    /// Find the node of the given kind and suffix under `parent`, or the
    /// matching root when `parent` is `None`
    pub fn find_child(
        &self,
        parent: Option<LayerId>,
        kind: LayerKind,
        suffix: &str,
    ) -> Option<LayerId> {
        let candidates: &[LayerId] = match parent {
            None => self.root.as_ref().map(std::slice::from_ref)?,
            Some(parent_id) => self.nodes.get(&parent_id)?.children.as_slice(),
        };
        candidates.iter().copied().find(|id| {
            self.nodes
                .get(id)
                .map(|n| n.kind == kind && n.suffix == suffix)
                .unwrap_or(false)
        })
    }

    /// Insert a node and link it under its parent.
    ///
    /// Fails with [`Error::AlreadyExists`] on a duplicate id or a duplicate
    /// (kind, suffix) among the parent's children, and with
    /// [`Error::Internal`] when the parent link is dangling or a second root
    /// is inserted.
    pub fn insert(&mut self, node: ResourceLayerNode) -> Result<LayerId> {
        let id = node.id;
        if self.nodes.contains_key(&id) {
            return Err(Error::AlreadyExists {
                kind: "layer node".into(),
                name: id.to_string(),
            });
        }
        if self
            .find_child(node.parent, node.kind, &node.suffix)
            .is_some()
        {
            return Err(Error::AlreadyExists {
                kind: "layer node".into(),
                name: format!("{}{}", node.kind, node.suffix),
            });
        }
        match node.parent {
            None => {
                if self.root.is_some() {
                    return Err(Error::internal(format!(
                        "second root layer node {id} inserted"
                    )));
                }
                self.root = Some(id);
            }
            Some(parent_id) => match self.nodes.get_mut(&parent_id) {
                Some(parent) => parent.children.push(id),
                None => {
                    return Err(Error::internal(format!(
                        "layer node {id} links to unknown parent {parent_id}"
                    )));
                }
            },
        }
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Remove a node and its entire subtree, unlinking it from its parent.
    ///
    /// Returns the removed nodes so the caller can release their layer ids
    /// and drop their provider records from the pool indexes.
    pub fn remove_subtree(&mut self, id: LayerId) -> Vec<ResourceLayerNode> {
        let Some(node) = self.nodes.shift_remove(&id) else {
            return Vec::new();
        };
        match node.parent {
            None => self.root = None,
            Some(parent_id) => {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.retain(|c| *c != id);
                }
            }
        }
        let mut removed = vec![node];
        let children: Vec<LayerId> = removed[0].children.clone();
        for child in children {
            removed.extend(self.remove_subtree(child));
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn node(id: u32, kind: LayerKind, parent: Option<u32>) -> ResourceLayerNode {
        ResourceLayerNode::new(
            LayerId(id),
            kind,
            "",
            parent.map(LayerId),
            RscLayerData::Opaque,
        )
    }

    #[test]
    fn test_insert_and_find() {
        let mut tree = LayerTree::new();
        tree.insert(node(1, LayerKind::Replication, None)).unwrap();
        tree.insert(node(2, LayerKind::Storage, Some(1))).unwrap();

        assert_eq!(tree.root(), Some(LayerId(1)));
        assert_eq!(
            tree.find_child(Some(LayerId(1)), LayerKind::Storage, ""),
            Some(LayerId(2))
        );
        assert_eq!(
            tree.find_child(None, LayerKind::Replication, ""),
            Some(LayerId(1))
        );
        assert_eq!(tree.find_child(None, LayerKind::Storage, ""), None);
    }

    #[test]
    fn test_sibling_suffixes() {
        let mut tree = LayerTree::new();
        tree.insert(node(1, LayerKind::Replication, None)).unwrap();

        let mut meta = node(2, LayerKind::Storage, Some(1));
        meta.suffix = ".meta".into();
        tree.insert(meta).unwrap();
        tree.insert(node(3, LayerKind::Storage, Some(1))).unwrap();

        assert_eq!(
            tree.find_child(Some(LayerId(1)), LayerKind::Storage, ".meta"),
            Some(LayerId(2))
        );
        assert_eq!(
            tree.find_child(Some(LayerId(1)), LayerKind::Storage, ""),
            Some(LayerId(3))
        );
        assert_eq!(
            tree.node(LayerId(1)).unwrap().children(),
            &[LayerId(2), LayerId(3)]
        );
    }

    #[test]
    fn test_uniqueness_violations() {
        let mut tree = LayerTree::new();
        tree.insert(node(1, LayerKind::Replication, None)).unwrap();

        assert_matches!(
            tree.insert(node(1, LayerKind::Storage, None)),
            Err(Error::AlreadyExists { .. })
        );
        assert_matches!(
            tree.insert(node(2, LayerKind::Storage, None)),
            Err(Error::Internal(_))
        );
        assert_matches!(
            tree.insert(node(2, LayerKind::Storage, Some(9))),
            Err(Error::Internal(_))
        );

        tree.insert(node(2, LayerKind::Storage, Some(1))).unwrap();
        assert_matches!(
            tree.insert(node(3, LayerKind::Storage, Some(1))),
            Err(Error::AlreadyExists { .. })
        );
    }

    #[test]
    fn test_remove_subtree() {
        let mut tree = LayerTree::new();
        tree.insert(node(1, LayerKind::Replication, None)).unwrap();
        tree.insert(node(2, LayerKind::Encryption, Some(1))).unwrap();
        tree.insert(node(3, LayerKind::Storage, Some(2))).unwrap();

        let removed = tree.remove_subtree(LayerId(2));
        let ids: Vec<u32> = removed.iter().map(|n| n.id().value()).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(tree.len(), 1);
        assert!(tree.node(LayerId(1)).unwrap().children().is_empty());

        let removed = tree.remove_subtree(LayerId(1));
        assert_eq!(removed.len(), 1);
        assert_eq!(tree.root(), None);
    }
}
