//! Layer Strategy Contract
//!
//! Every device-layer kind implements [`LayerStrategy`]: create/merge pairs
//! for the four data scopes (resource definition, volume definition,
//! resource, volume) plus the child-volume predicate the resolver consults
//! while descending the stack.
//!
//! A kind without definition-scoped state keeps the default pass-through
//! implementations; that is a declared capability absence, not an error.
//! Only leaf kinds own per-volume provider data, so the per-volume
//! operations default to an invariant violation.

use crate::domain::ports::{
    AccessControlRef, AccessType, Identity, LayerPersistenceRef, ObjectRef,
    StoragePoolResolverRef,
};
use crate::error::{Error, Result};
use crate::numberpool::NumberPool;
use crate::objects::layer_tree::{LayerId, LayerKind, ResourceLayerNode};
use crate::objects::provider::{RscDfnLayerData, VlmDfnLayerData, VolumeProviderRecord};
use crate::objects::resource::{
    ResourceDefinition, ResourceName, ResourceView, Volume, VolumeDefinition, VolumeNumber,
};
use crate::objects::storage_pool::StoragePoolRegistry;
use crate::layer::payload::LayerPayload;
use std::sync::Arc;

// =============================================================================
// Strategy Context
// =============================================================================

/// Collaborators shared by the resolver and every strategy.
///
/// Constructed once at control-plane startup and injected; all operations
/// using it run inside the caller's exclusive reconciliation scope.
#[derive(Clone)]
pub struct StrategyCtx {
    pub subject: Identity,
    pub access: AccessControlRef,
    pub persistence: LayerPersistenceRef,
    pub pools: Arc<StoragePoolRegistry>,
    pub pool_resolver: StoragePoolResolverRef,
    /// Pool assigning cluster-unique layer ids
    pub layer_ids: Arc<NumberPool>,
}

impl StrategyCtx {
    pub fn new(
        subject: Identity,
        access: AccessControlRef,
        persistence: LayerPersistenceRef,
        pools: Arc<StoragePoolRegistry>,
        pool_resolver: StoragePoolResolverRef,
        layer_ids: Arc<NumberPool>,
    ) -> Self {
        Self {
            subject,
            access,
            persistence,
            pools,
            pool_resolver,
            layer_ids,
        }
    }

    /// Capability check shorthand
    pub fn require(&self, object: &ObjectRef, access: AccessType) -> Result<()> {
        self.access.require_access(&self.subject, object, access)
    }
}

/// Identity of the layer node a per-volume operation runs against, decoupled
/// from the tree borrow
#[derive(Debug, Clone)]
pub struct NodeCtx {
    pub id: LayerId,
    pub kind: LayerKind,
    pub suffix: String,
}

// =============================================================================
// Layer Strategy
// =============================================================================

/// The fixed contract every device-layer kind implements
pub trait LayerStrategy: Send + Sync {
    /// The layer kind this strategy handles
    fn kind(&self) -> LayerKind;

    /// Create definition-scoped data, or `None` when the kind has none
    fn create_rsc_dfn_data(
        &self,
        _ctx: &StrategyCtx,
        _dfn: &ResourceDefinition,
        _suffix: &str,
        _payload: &LayerPayload,
    ) -> Result<Option<RscDfnLayerData>> {
        Ok(None)
    }

    /// Reconcile mutable definition-scoped fields; no-op when none exist
    fn merge_rsc_dfn_data(
        &self,
        _ctx: &StrategyCtx,
        _rsc_name: &ResourceName,
        _suffix: &str,
        _data: &mut RscDfnLayerData,
        _payload: &LayerPayload,
    ) -> Result<()> {
        Ok(())
    }

    /// Create volume-definition-scoped data, or `None` when the kind has
    /// none
    fn create_vlm_dfn_data(
        &self,
        _ctx: &StrategyCtx,
        _vlm_dfn: &VolumeDefinition,
        _suffix: &str,
        _payload: &LayerPayload,
    ) -> Result<Option<VlmDfnLayerData>> {
        Ok(None)
    }

    /// Reconcile mutable volume-definition-scoped fields; no-op when none
    /// exist
    fn merge_vlm_dfn_data(
        &self,
        _ctx: &StrategyCtx,
        _rsc_name: &ResourceName,
        _vlm_nr: VolumeNumber,
        _suffix: &str,
        _data: &mut VlmDfnLayerData,
        _payload: &LayerPayload,
    ) -> Result<()> {
        Ok(())
    }

    /// Create the layer node for this kind, allocating its id from the
    /// layer-id pool. The resolver links the returned node under `parent`
    /// and persists it.
    fn create_rsc_data(
        &self,
        ctx: &StrategyCtx,
        rsc: ResourceView<'_>,
        payload: &LayerPayload,
        suffix: &str,
        parent: Option<LayerId>,
    ) -> Result<ResourceLayerNode>;

    /// Reconcile payload-driven changes into an existing node
    fn merge_rsc_data(
        &self,
        ctx: &StrategyCtx,
        rsc: ResourceView<'_>,
        node: &mut ResourceLayerNode,
        payload: &LayerPayload,
    ) -> Result<()>;

    /// Whether `vlm` needs a backing volume in the child layer node.
    ///
    /// Asked on the strategy of the *parent* kind while descending; a pure
    /// leaf kind being asked means the resolver was configured with layers
    /// below the leaf, which is an invariant violation.
    fn needs_child_vlm(
        &self,
        ctx: &StrategyCtx,
        child: &ResourceLayerNode,
        vlm: &Volume,
    ) -> Result<bool>;

    /// Create the provider record for one volume on a leaf node
    fn create_vlm_data(
        &self,
        _ctx: &StrategyCtx,
        _rsc: ResourceView<'_>,
        _vlm: &Volume,
        _node: &NodeCtx,
        _payload: &LayerPayload,
    ) -> Result<VolumeProviderRecord> {
        Err(Error::internal(format!(
            "layer kind {} has no per-volume provider data",
            self.kind()
        )))
    }

    /// Reconcile an existing provider record for one volume
    fn merge_vlm_data(
        &self,
        _ctx: &StrategyCtx,
        _rsc: ResourceView<'_>,
        _vlm: &Volume,
        _node: &NodeCtx,
        _record: &mut VolumeProviderRecord,
        _payload: &LayerPayload,
    ) -> Result<()> {
        Err(Error::internal(format!(
            "layer kind {} has no per-volume provider data",
            self.kind()
        )))
    }
}

impl std::fmt::Debug for dyn LayerStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerStrategy")
            .field("kind", &self.kind())
            .finish()
    }
}

pub type LayerStrategyRef = Arc<dyn LayerStrategy>;
