//! Storage Layer Strategy - Provider Dispatch
//!
//! The leaf of every layer stack. Per-volume provisioning data is
//! constructed by dispatching on the provider kind of the volume's resolved
//! storage pool; remote-backed kinds first ensure the shared
//! definition-scoped handle exists. Reconciliation of an existing record
//! handles storage-pool reassignment (toggle): the pool reference and the
//! reverse indexes change, the record's identity does not.

use crate::domain::ports::{AccessType, ObjectRef};
use crate::error::{Error, Result};
use crate::layer::payload::LayerPayload;
use crate::layer::strategy::{LayerStrategy, NodeCtx, StrategyCtx};
use crate::objects::layer_tree::{LayerId, LayerKind, ResourceLayerNode, RscLayerData};
use crate::objects::provider::{
    RemoteRole, RemoteVlmDfnData, VlmDfnLayerData, VlmProviderData, VolumeProviderRecord,
};
use crate::objects::resource::{ResourceView, Volume, VolumeNumber};
use crate::objects::storage_pool::{ProviderKind, StoragePool, VlmKey};
use crate::props::keys;
use std::sync::Arc;
use tracing::{debug, info};

/// Strategy for [`LayerKind::Storage`]
#[derive(Debug, Default)]
pub struct StorageLayer;

impl StorageLayer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    /// Ensure the shared remote-service handle exists on the volume
    /// definition and return it.
    ///
    /// Created at most once per (definition, kind, suffix) triple; both the
    /// initiator and the target side observe the same record. A record of a
    /// different variant under that key is corrupted state.
    fn ensure_remote_dfn(
        &self,
        ctx: &StrategyCtx,
        rsc: ResourceView<'_>,
        vlm_nr: VolumeNumber,
        suffix: &str,
    ) -> Result<String> {
        let mut dfn = rsc.definition.write();
        let rsc_name = dfn.name().clone();
        let vlm_dfn = dfn.volume_definition_mut(vlm_nr).ok_or_else(|| {
            Error::internal(format!("volume {rsc_name}/{vlm_nr} has no volume definition"))
        })?;

        let size_kib = vlm_dfn.size_kib;
        let mut created = false;
        let data = vlm_dfn.layer_data_or_insert(LayerKind::Storage, suffix, || {
            created = true;
            let handle = format!("volumes/{rsc_name}/{vlm_nr}{suffix}");
            debug!("Volume definition {rsc_name}/{vlm_nr}: remote handle {handle}");
            Ok(VlmDfnLayerData::Remote(RemoteVlmDfnData {
                handle,
                size_kib,
                exists: false,
                attached: false,
            }))
        })?;
        let handle = data.as_remote_mut()?.handle.clone();
        if created {
            ctx.persistence
                .vlm_dfn_record_created(&rsc_name, vlm_nr, LayerKind::Storage, suffix)?;
        }
        Ok(handle)
    }

    fn volume_size_kib(&self, rsc: ResourceView<'_>, vlm_nr: VolumeNumber) -> Result<u64> {
        let dfn = rsc.definition.read();
        dfn.volume_definition(vlm_nr)
            .map(|vd| vd.size_kib)
            .ok_or_else(|| {
                Error::internal(format!(
                    "volume {}/{vlm_nr} has no volume definition",
                    rsc.name
                ))
            })
    }

    fn resolve_required_pool(
        &self,
        ctx: &StrategyCtx,
        rsc: ResourceView<'_>,
        vlm: &Volume,
        node: &NodeCtx,
    ) -> Result<Arc<StoragePool>> {
        ctx.pool_resolver
            .resolve_pool(rsc, vlm, node.kind, &node.suffix)?
            .ok_or_else(|| Error::PoolNotFound {
                resource: rsc.name.to_string(),
                volume: vlm.vlm_nr().value(),
            })
    }
}

impl LayerStrategy for StorageLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Storage
    }

    // The storage layer has no resource-definition or volume-definition
    // scoped data of its own; the remote handle is ensured lazily from
    // create_vlm_data. The inherited pass-through defaults apply.

    fn create_rsc_data(
        &self,
        ctx: &StrategyCtx,
        rsc: ResourceView<'_>,
        _payload: &LayerPayload,
        suffix: &str,
        parent: Option<LayerId>,
    ) -> Result<ResourceLayerNode> {
        let id = LayerId(ctx.layer_ids.allocate()?);
        info!(
            "Resource {} on {}: storage{suffix} layer node {id}",
            rsc.name, rsc.node_name
        );
        Ok(ResourceLayerNode::new(
            id,
            LayerKind::Storage,
            suffix,
            parent,
            RscLayerData::Storage,
        ))
    }

    fn merge_rsc_data(
        &self,
        _ctx: &StrategyCtx,
        _rsc: ResourceView<'_>,
        _node: &mut ResourceLayerNode,
        _payload: &LayerPayload,
    ) -> Result<()> {
        // nothing to merge
        Ok(())
    }

    fn needs_child_vlm(
        &self,
        _ctx: &StrategyCtx,
        _child: &ResourceLayerNode,
        _vlm: &Volume,
    ) -> Result<bool> {
        Err(Error::internal(
            "storage layer should not have child volumes to be asked for",
        ))
    }

    fn create_vlm_data(
        &self,
        ctx: &StrategyCtx,
        rsc: ResourceView<'_>,
        vlm: &Volume,
        node: &NodeCtx,
        payload: &LayerPayload,
    ) -> Result<VolumeProviderRecord> {
        let vlm_nr = vlm.vlm_nr();
        let pool = self.resolve_required_pool(ctx, rsc, vlm, node)?;
        ctx.require(&ObjectRef::StoragePool(pool.name().clone()), AccessType::Use)?;

        let data = match pool.provider_kind() {
            ProviderKind::Diskless => VlmProviderData::Diskless {
                size_kib: self.volume_size_kib(rsc, vlm_nr)?,
            },
            ProviderKind::Lvm => VlmProviderData::Lvm,
            ProviderKind::LvmThin => VlmProviderData::LvmThin {
                thin_pool: payload
                    .volume(vlm_nr)
                    .and_then(|v| v.thin_pool.clone())
                    .or_else(|| pool.prop(keys::THIN_POOL)),
                allocated_percent: None,
            },
            ProviderKind::Zfs => VlmProviderData::Zfs { thin: false },
            ProviderKind::ZfsThin => VlmProviderData::Zfs { thin: true },
            ProviderKind::RemoteInitiator => VlmProviderData::Remote {
                role: RemoteRole::Initiator,
                handle: self.ensure_remote_dfn(ctx, rsc, vlm_nr, &node.suffix)?,
            },
            ProviderKind::RemoteTarget => VlmProviderData::Remote {
                role: RemoteRole::Target,
                handle: self.ensure_remote_dfn(ctx, rsc, vlm_nr, &node.suffix)?,
            },
            kind @ ProviderKind::ExternalLayer => {
                return Err(Error::internal(format!("unexpected provider kind: {kind}")));
            }
        };

        let record = VolumeProviderRecord::new(vlm_nr, pool.name().clone(), data);
        pool.add_volume(VlmKey {
            resource: rsc.name.clone(),
            layer_id: node.id,
            vlm_nr,
        });
        info!(
            "Resource {}: volume {vlm_nr} provisioned as {} in pool {}",
            rsc.name,
            record.provider_kind(),
            pool.name()
        );
        Ok(record)
    }

    fn merge_vlm_data(
        &self,
        ctx: &StrategyCtx,
        rsc: ResourceView<'_>,
        vlm: &Volume,
        node: &NodeCtx,
        record: &mut VolumeProviderRecord,
        _payload: &LayerPayload,
    ) -> Result<()> {
        // if the resolved storage pool changed (toggle), re-point the record
        // and move it between the reverse indexes; id and device path stay
        let Some(new_pool) = ctx
            .pool_resolver
            .resolve_pool(rsc, vlm, node.kind, &node.suffix)?
        else {
            return Ok(());
        };
        if new_pool.name() == record.pool() {
            return Ok(());
        }

        ctx.require(&ObjectRef::StoragePool(new_pool.name().clone()), AccessType::Use)?;

        let key = VlmKey {
            resource: rsc.name.clone(),
            layer_id: node.id,
            vlm_nr: vlm.vlm_nr(),
        };
        if let Some(old_pool) = ctx.pools.get(record.pool()) {
            old_pool.remove_volume(&key);
        }
        new_pool.add_volume(key);

        info!(
            "Resource {}: volume {} re-pointed from pool {} to {}",
            rsc.name,
            vlm.vlm_nr(),
            record.pool(),
            new_pool.name()
        );
        record.set_pool(new_pool.name().clone());
        ctx.persistence
            .provider_record_updated(rsc.name, node.id, record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{AllowAll, Identity, NoopPersistence, PropsPoolResolver};
    use crate::numberpool::NumberPool;
    use crate::objects::resource::{Resource, ResourceDefinition, VolumeDefinition};
    use crate::objects::storage_pool::StoragePoolRegistry;
    use assert_matches::assert_matches;

    fn ctx_with_pools() -> (StrategyCtx, Arc<StoragePoolRegistry>) {
        let pools = StoragePoolRegistry::new();
        let ctx = StrategyCtx::new(
            Identity::system(),
            Arc::new(AllowAll),
            Arc::new(NoopPersistence),
            pools.clone(),
            PropsPoolResolver::new(pools.clone()),
            Arc::new(NumberPool::new("layer-ids", 1, 100)),
        );
        (ctx, pools)
    }

    fn resource(pool_name: &str) -> Resource {
        let mut dfn = ResourceDefinition::new("r1");
        dfn.add_volume_definition(VolumeDefinition::new(VolumeNumber(0), 8192))
            .unwrap();
        let mut rsc = Resource::new("node-a", dfn.shared());
        rsc.props.set(keys::STOR_POOL_NAME, pool_name);
        rsc.add_volume(Volume::new(VolumeNumber(0))).unwrap();
        rsc
    }

    fn node_ctx(id: u32) -> NodeCtx {
        NodeCtx {
            id: LayerId(id),
            kind: LayerKind::Storage,
            suffix: String::new(),
        }
    }

    #[test]
    fn test_leaf_is_never_asked_for_children() {
        let (ctx, _) = ctx_with_pools();
        let strategy = StorageLayer::new();
        let mut rsc = resource("ssd");
        let (view, _) = rsc.split_tree_mut();
        let node = strategy
            .create_rsc_data(&ctx, view, &LayerPayload::default(), "", None)
            .unwrap();
        assert_matches!(
            strategy.needs_child_vlm(&ctx, &node, &Volume::new(VolumeNumber(0))),
            Err(Error::Internal(_))
        );
    }

    #[test]
    fn test_diskless_carries_definition_size() {
        let (ctx, pools) = ctx_with_pools();
        pools
            .register(StoragePool::new("dl", ProviderKind::Diskless))
            .unwrap();
        let strategy = StorageLayer::new();
        let mut rsc = resource("dl");
        let (view, _) = rsc.split_tree_mut();
        let vlm = view.volumes.get(&VolumeNumber(0)).unwrap();

        let record = strategy
            .create_vlm_data(&ctx, view, vlm, &node_ctx(1), &LayerPayload::default())
            .unwrap();
        assert_eq!(record.data, VlmProviderData::Diskless { size_kib: 8192 });
    }

    #[test]
    fn test_external_layer_kind_is_fatal() {
        let (ctx, pools) = ctx_with_pools();
        pools
            .register(StoragePool::new("ext", ProviderKind::ExternalLayer))
            .unwrap();
        let strategy = StorageLayer::new();
        let mut rsc = resource("ext");
        let (view, _) = rsc.split_tree_mut();
        let vlm = view.volumes.get(&VolumeNumber(0)).unwrap();

        assert_matches!(
            strategy.create_vlm_data(&ctx, view, vlm, &node_ctx(1), &LayerPayload::default()),
            Err(Error::Internal(_))
        );
    }

    #[test]
    fn test_thin_pool_prop_fallback() {
        let (ctx, pools) = ctx_with_pools();
        let pool = StoragePool::new("thin", ProviderKind::LvmThin);
        pool.set_prop(keys::THIN_POOL, "vg/thinpool");
        pools.register(pool).unwrap();
        let strategy = StorageLayer::new();
        let mut rsc = resource("thin");
        let (view, _) = rsc.split_tree_mut();
        let vlm = view.volumes.get(&VolumeNumber(0)).unwrap();

        let record = strategy
            .create_vlm_data(&ctx, view, vlm, &node_ctx(1), &LayerPayload::default())
            .unwrap();
        assert_eq!(
            record.data,
            VlmProviderData::LvmThin {
                thin_pool: Some("vg/thinpool".into()),
                allocated_percent: None,
            }
        );
    }

    #[test]
    fn test_missing_pool_fails_creation() {
        let (ctx, _) = ctx_with_pools();
        let strategy = StorageLayer::new();
        let mut dfn = ResourceDefinition::new("r1");
        dfn.add_volume_definition(VolumeDefinition::new(VolumeNumber(0), 4096))
            .unwrap();
        let mut rsc = Resource::new("node-a", dfn.shared());
        rsc.add_volume(Volume::new(VolumeNumber(0))).unwrap();
        let (view, _) = rsc.split_tree_mut();
        let vlm = view.volumes.get(&VolumeNumber(0)).unwrap();

        assert_matches!(
            strategy.create_vlm_data(&ctx, view, vlm, &node_ctx(1), &LayerPayload::default()),
            Err(Error::PoolNotFound { .. })
        );
    }
}
