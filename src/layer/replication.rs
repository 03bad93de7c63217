//! Replication Layer Strategy
//!
//! Non-leaf layer replicating volumes between the node instances of a
//! resource. Port, transport and shared secret live on the resource
//! definition (identical for every instance); the device minor number lives
//! on the volume definition and is allocated from the injected minor pool;
//! the peer-slot count is per instance.

use crate::error::Result;
use crate::layer::payload::LayerPayload;
use crate::layer::strategy::{LayerStrategy, StrategyCtx};
use crate::numberpool::NumberPool;
use crate::objects::layer_tree::{
    LayerId, LayerKind, ReplRscData, ResourceLayerNode, RscLayerData,
};
use crate::objects::provider::{
    ReplRscDfnData, ReplVlmDfnData, RscDfnLayerData, VlmDfnLayerData,
};
use crate::objects::resource::{
    ResourceDefinition, ResourceName, ResourceView, Volume, VolumeDefinition, VolumeNumber,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Transport port used when the payload does not request one
pub const DEFAULT_PORT: u16 = 7000;

/// Default replication transport
pub const DEFAULT_TRANSPORT: &str = "tcp";

/// Default peer-slot count in the replication metadata
pub const DEFAULT_PEER_SLOTS: u8 = 7;

/// Strategy for [`LayerKind::Replication`]
pub struct ReplicationLayer {
    /// Device minor numbers, shared with the rest of the control plane
    minors: Arc<NumberPool>,
}

impl ReplicationLayer {
    pub fn new(minors: Arc<NumberPool>) -> Arc<Self> {
        Arc::new(Self { minors })
    }
}

impl LayerStrategy for ReplicationLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Replication
    }

    fn create_rsc_dfn_data(
        &self,
        _ctx: &StrategyCtx,
        dfn: &ResourceDefinition,
        suffix: &str,
        payload: &LayerPayload,
    ) -> Result<Option<RscDfnLayerData>> {
        let data = ReplRscDfnData {
            port: payload.replication.port.unwrap_or(DEFAULT_PORT),
            transport: payload
                .replication
                .transport
                .clone()
                .unwrap_or_else(|| DEFAULT_TRANSPORT.to_string()),
            secret: payload.replication.shared_secret.clone(),
        };
        info!(
            "Definition {}: replication{} on port {} ({})",
            dfn.name(),
            suffix,
            data.port,
            data.transport
        );
        Ok(Some(RscDfnLayerData::Replication(data)))
    }

    fn merge_rsc_dfn_data(
        &self,
        ctx: &StrategyCtx,
        rsc_name: &ResourceName,
        suffix: &str,
        data: &mut RscDfnLayerData,
        payload: &LayerPayload,
    ) -> Result<()> {
        let data = data.as_replication_mut()?;
        let mut changed = false;

        if let Some(port) = payload.replication.port {
            if data.port != port {
                debug!("Definition {rsc_name}: replication port {} -> {port}", data.port);
                data.port = port;
                changed = true;
            }
        }
        if let Some(transport) = &payload.replication.transport {
            if &data.transport != transport {
                data.transport = transport.clone();
                changed = true;
            }
        }
        if let Some(secret) = &payload.replication.shared_secret {
            if data.secret.as_ref() != Some(secret) {
                data.secret = Some(secret.clone());
                changed = true;
            }
        }

        if changed {
            ctx.persistence
                .rsc_dfn_record_updated(rsc_name, LayerKind::Replication, suffix)?;
        }
        Ok(())
    }

    fn create_vlm_dfn_data(
        &self,
        _ctx: &StrategyCtx,
        vlm_dfn: &VolumeDefinition,
        _suffix: &str,
        _payload: &LayerPayload,
    ) -> Result<Option<VlmDfnLayerData>> {
        let minor = self.minors.allocate()?;
        debug!("Volume definition {}: assigned minor {minor}", vlm_dfn.vlm_nr());
        Ok(Some(VlmDfnLayerData::Replication(ReplVlmDfnData { minor })))
    }

    fn merge_vlm_dfn_data(
        &self,
        _ctx: &StrategyCtx,
        _rsc_name: &ResourceName,
        _vlm_nr: VolumeNumber,
        _suffix: &str,
        data: &mut VlmDfnLayerData,
        _payload: &LayerPayload,
    ) -> Result<()> {
        // the minor number is immutable; only the variant is verified
        data.as_replication_mut()?;
        Ok(())
    }

    fn create_rsc_data(
        &self,
        ctx: &StrategyCtx,
        rsc: ResourceView<'_>,
        payload: &LayerPayload,
        suffix: &str,
        parent: Option<LayerId>,
    ) -> Result<ResourceLayerNode> {
        let id = LayerId(ctx.layer_ids.allocate()?);
        let peer_slots = payload.replication.peer_slots.unwrap_or(DEFAULT_PEER_SLOTS);
        info!(
            "Resource {} on {}: replication{suffix} layer node {id}",
            rsc.name, rsc.node_name
        );
        Ok(ResourceLayerNode::new(
            id,
            LayerKind::Replication,
            suffix,
            parent,
            RscLayerData::Replication(ReplRscData { peer_slots }),
        ))
    }

    fn merge_rsc_data(
        &self,
        ctx: &StrategyCtx,
        rsc: ResourceView<'_>,
        node: &mut ResourceLayerNode,
        payload: &LayerPayload,
    ) -> Result<()> {
        let Some(peer_slots) = payload.replication.peer_slots else {
            return Ok(());
        };
        if let RscLayerData::Replication(data) = &mut node.data {
            if data.peer_slots != peer_slots {
                debug!(
                    "Resource {}: peer slots {} -> {peer_slots}",
                    rsc.name, data.peer_slots
                );
                data.peer_slots = peer_slots;
                ctx.persistence.layer_node_updated(rsc.name, node)?;
            }
        }
        Ok(())
    }

    fn needs_child_vlm(
        &self,
        _ctx: &StrategyCtx,
        _child: &ResourceLayerNode,
        _vlm: &Volume,
    ) -> Result<bool> {
        // every replicated volume needs local backing
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{AllowAll, NoopPersistence, PropsPoolResolver};
    use crate::domain::ports::Identity;
    use crate::objects::resource::Resource;
    use crate::objects::storage_pool::StoragePoolRegistry;

    fn ctx(minors: &Arc<NumberPool>) -> (StrategyCtx, Arc<ReplicationLayer>) {
        let pools = StoragePoolRegistry::new();
        let ctx = StrategyCtx::new(
            Identity::system(),
            Arc::new(AllowAll),
            Arc::new(NoopPersistence),
            pools.clone(),
            PropsPoolResolver::new(pools),
            Arc::new(NumberPool::new("layer-ids", 1, 100)),
        );
        (ctx, ReplicationLayer::new(minors.clone()))
    }

    #[test]
    fn test_dfn_data_defaults() {
        let minors = Arc::new(NumberPool::new("minors", 1000, 1100));
        let (ctx, strategy) = ctx(&minors);
        let dfn = ResourceDefinition::new("r1");

        let data = strategy
            .create_rsc_dfn_data(&ctx, &dfn, "", &LayerPayload::default())
            .unwrap()
            .unwrap();
        let RscDfnLayerData::Replication(data) = data;
        assert_eq!(data.port, DEFAULT_PORT);
        assert_eq!(data.transport, DEFAULT_TRANSPORT);
        assert_eq!(data.secret, None);
    }

    #[test]
    fn test_merge_updates_port() {
        let minors = Arc::new(NumberPool::new("minors", 1000, 1100));
        let (ctx, strategy) = ctx(&minors);

        let mut data = RscDfnLayerData::Replication(ReplRscDfnData {
            port: DEFAULT_PORT,
            transport: DEFAULT_TRANSPORT.into(),
            secret: None,
        });
        let mut payload = LayerPayload::default();
        payload.replication.port = Some(7100);

        strategy
            .merge_rsc_dfn_data(&ctx, &ResourceName::from("r1"), "", &mut data, &payload)
            .unwrap();
        let RscDfnLayerData::Replication(data) = data;
        assert_eq!(data.port, 7100);
    }

    #[test]
    fn test_minor_allocation() {
        let minors = Arc::new(NumberPool::new("minors", 1000, 1100));
        let (ctx, strategy) = ctx(&minors);
        let vlm_dfn = VolumeDefinition::new(VolumeNumber(0), 4096);

        let data = strategy
            .create_vlm_dfn_data(&ctx, &vlm_dfn, "", &LayerPayload::default())
            .unwrap()
            .unwrap();
        let VlmDfnLayerData::Replication(data) = data else {
            panic!("expected replication data");
        };
        assert_eq!(data.minor, 1000);
        assert_eq!(minors.occupied(), 1);
    }

    #[test]
    fn test_needs_child_vlm() {
        let minors = Arc::new(NumberPool::new("minors", 1000, 1100));
        let (ctx, strategy) = ctx(&minors);

        let mut rsc = Resource::new("node-a", ResourceDefinition::new("r1").shared());
        let (view, _) = rsc.split_tree_mut();
        let node = strategy
            .create_rsc_data(&ctx, view, &LayerPayload::default(), "", None)
            .unwrap();
        assert!(strategy
            .needs_child_vlm(&ctx, &node, &Volume::new(VolumeNumber(0)))
            .unwrap());
    }
}
