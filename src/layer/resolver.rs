//! Layer Stack Resolver
//!
//! Walks an ordered stack of layer kinds and reconciles one resource
//! instance's layer tree against it: every kind in the stack gets a node
//! (created or merged in place), definition-scoped records are ensured on
//! the shared definition, and the leaf node gets one provider record per
//! volume that the layers above it request backing for.
//!
//! Resolution is idempotent. A second call with the same inputs merges
//! every record it finds and performs no persistence writes, allocates no
//! identifiers and moves no pool index entries.

use crate::error::{Error, Result};
use crate::domain::ports::{AccessType, ObjectRef};
use crate::layer::payload::LayerPayload;
use crate::layer::strategy::{NodeCtx, StrategyCtx};
use crate::layer::LayerRegistry;
use crate::objects::layer_tree::{LayerId, LayerKind, LayerTree};
use crate::objects::resource::{Resource, ResourceView, VolumeNumber};
use std::sync::Arc;
use tracing::debug;

/// Reconciles resource layer trees against requested layer stacks
pub struct LayerStackResolver {
    registry: Arc<LayerRegistry>,
    ctx: StrategyCtx,
}

impl LayerStackResolver {
    pub fn new(registry: Arc<LayerRegistry>, ctx: StrategyCtx) -> Self {
        Self { registry, ctx }
    }

    /// Reconcile `rsc`'s layer tree against `stack`, top kind first.
    ///
    /// Returns the id of the root layer node. The caller holds exclusive
    /// reconciliation rights on the resource and its definition for the
    /// duration of the call.
    pub fn resolve(
        &self,
        rsc: &mut Resource,
        payload: &LayerPayload,
        stack: &[LayerKind],
    ) -> Result<LayerId> {
        if stack.is_empty() {
            return Err(Error::internal("empty layer stack requested"));
        }
        for (i, kind) in stack.iter().enumerate() {
            if stack[..i].contains(kind) {
                return Err(Error::internal(format!(
                    "layer kind {kind} appears twice in the requested stack"
                )));
            }
        }

        let name = rsc.name().clone();
        self.ctx
            .require(&ObjectRef::Resource(name.clone()), AccessType::Change)?;
        self.ctx
            .require(&ObjectRef::Definition(name), AccessType::Change)?;

        let (view, tree) = rsc.split_tree_mut();
        let vlms: Vec<VolumeNumber> = view.volumes.keys().copied().collect();

        if let Some(root_id) = tree.root() {
            let root_kind = tree
                .node(root_id)
                .map(|n| n.kind())
                .ok_or_else(|| Error::internal("layer tree root id is dangling"))?;
            if root_kind != stack[0] {
                return Err(Error::internal(format!(
                    "resource {} already has a {root_kind} root, stack requests {}",
                    view.name, stack[0]
                )));
            }
        }

        let root = self.ensure_node(view, tree, stack[0], "", None, &vlms, payload)?;
        self.build_level(view, tree, stack, 0, root, vlms, payload)?;
        Ok(root)
    }

    /// Ensure the tree node and the definition-scoped records for one
    /// (kind, suffix) at `parent`
    fn ensure_node(
        &self,
        view: ResourceView<'_>,
        tree: &mut LayerTree,
        kind: LayerKind,
        suffix: &str,
        parent: Option<LayerId>,
        vlms: &[VolumeNumber],
        payload: &LayerPayload,
    ) -> Result<LayerId> {
        let strategy = self.registry.get(kind)?;
        let ctx = &self.ctx;

        {
            let mut dfn = view.definition.write();
            let rsc_name = dfn.name().clone();

            if dfn.layer_data(kind, suffix).is_some() {
                let data = dfn
                    .layer_data_mut(kind, suffix)
                    .ok_or_else(|| Error::internal("definition layer record vanished"))?;
                strategy.merge_rsc_dfn_data(ctx, &rsc_name, suffix, data, payload)?;
            } else if let Some(data) = strategy.create_rsc_dfn_data(ctx, &dfn, suffix, payload)? {
                dfn.insert_layer_data(kind, suffix, data)?;
                ctx.persistence.rsc_dfn_record_created(&rsc_name, kind, suffix)?;
            }

            for vlm_nr in vlms {
                let vlm_dfn = dfn.volume_definition(*vlm_nr).ok_or_else(|| {
                    Error::internal(format!(
                        "volume {rsc_name}/{vlm_nr} has no volume definition"
                    ))
                })?;
                if vlm_dfn.layer_data(kind, suffix).is_some() {
                    let data = dfn
                        .volume_definition_mut(*vlm_nr)
                        .and_then(|vd| vd.layer_data_mut(kind, suffix))
                        .ok_or_else(|| {
                            Error::internal("volume-definition layer record vanished")
                        })?;
                    strategy.merge_vlm_dfn_data(ctx, &rsc_name, *vlm_nr, suffix, data, payload)?;
                } else if let Some(data) =
                    strategy.create_vlm_dfn_data(ctx, vlm_dfn, suffix, payload)?
                {
                    dfn.volume_definition_mut(*vlm_nr)
                        .ok_or_else(|| Error::internal("volume definition vanished"))?
                        .insert_layer_data(kind, suffix, data)?;
                    ctx.persistence
                        .vlm_dfn_record_created(&rsc_name, *vlm_nr, kind, suffix)?;
                }
            }
        }

        if let Some(id) = tree.find_child(parent, kind, suffix) {
            let node = tree
                .node_mut(id)
                .ok_or_else(|| Error::internal("layer node id is dangling"))?;
            strategy.merge_rsc_data(ctx, view, node, payload)?;
            debug!("Resource {}: merged {kind}{suffix} node {id}", view.name);
            return Ok(id);
        }

        let node = strategy.create_rsc_data(ctx, view, payload, suffix, parent)?;
        ctx.persistence.layer_node_created(view.name, &node)?;
        tree.insert(node)
    }

    /// Ensure the child node below `node_id` (or the provider records when
    /// `level` is the leaf), then recurse with the volumes the current
    /// kind's predicate admits
    fn build_level(
        &self,
        view: ResourceView<'_>,
        tree: &mut LayerTree,
        stack: &[LayerKind],
        level: usize,
        node_id: LayerId,
        vlms: Vec<VolumeNumber>,
        payload: &LayerPayload,
    ) -> Result<()> {
        if level + 1 == stack.len() {
            return self.ensure_volumes(view, tree, node_id, &vlms, payload);
        }

        let suffix = tree
            .node(node_id)
            .map(|n| n.suffix().to_string())
            .ok_or_else(|| Error::internal("layer node id is dangling"))?;
        let child_id = self.ensure_node(
            view,
            tree,
            stack[level + 1],
            &suffix,
            Some(node_id),
            &vlms,
            payload,
        )?;

        let strategy = self.registry.get(stack[level])?;
        let child = tree
            .node(child_id)
            .ok_or_else(|| Error::internal("child layer node id is dangling"))?;
        let mut backed = Vec::with_capacity(vlms.len());
        for vlm_nr in vlms {
            let vlm = view.volumes.get(&vlm_nr).ok_or_else(|| {
                Error::internal(format!("volume {}/{vlm_nr} vanished", view.name))
            })?;
            if strategy.needs_child_vlm(&self.ctx, child, vlm)? {
                backed.push(vlm_nr);
            } else {
                debug!(
                    "Resource {}: volume {vlm_nr} needs no backing below {}",
                    view.name,
                    stack[level]
                );
            }
        }

        self.build_level(view, tree, stack, level + 1, child_id, backed, payload)
    }

    /// Create or merge the provider record of every admitted volume on the
    /// leaf node
    fn ensure_volumes(
        &self,
        view: ResourceView<'_>,
        tree: &mut LayerTree,
        node_id: LayerId,
        vlms: &[VolumeNumber],
        payload: &LayerPayload,
    ) -> Result<()> {
        let node_ctx = {
            let node = tree
                .node(node_id)
                .ok_or_else(|| Error::internal("leaf layer node id is dangling"))?;
            NodeCtx {
                id: node.id(),
                kind: node.kind(),
                suffix: node.suffix().to_string(),
            }
        };
        let strategy = self.registry.get(node_ctx.kind)?;

        for vlm_nr in vlms {
            let vlm = view.volumes.get(vlm_nr).ok_or_else(|| {
                Error::internal(format!("volume {}/{vlm_nr} vanished", view.name))
            })?;

            let exists = tree
                .node(node_id)
                .map(|n| n.provider_record(*vlm_nr).is_some())
                .unwrap_or(false);
            if exists {
                let record = tree
                    .node_mut(node_id)
                    .and_then(|n| n.vlm_data.get_mut(vlm_nr))
                    .ok_or_else(|| Error::internal("provider record vanished"))?;
                strategy.merge_vlm_data(&self.ctx, view, vlm, &node_ctx, record, payload)?;
            } else {
                let record = strategy.create_vlm_data(&self.ctx, view, vlm, &node_ctx, payload)?;
                self.ctx
                    .persistence
                    .provider_record_created(view.name, node_id, &record)?;
                tree.node_mut(node_id)
                    .ok_or_else(|| Error::internal("leaf layer node vanished"))?
                    .vlm_data
                    .insert(*vlm_nr, record);
            }
        }
        Ok(())
    }
}
