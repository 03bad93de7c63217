//! Layer Stack Machinery
//!
//! The strategy contract, the built-in strategies, the open registry they
//! are dispatched through, and the resolver that drives them.

pub mod payload;
pub mod replication;
pub mod resolver;
pub mod storage;
pub mod strategy;

pub use payload::{LayerPayload, ReplicationPayload, StoragePayload, VolumePayload};
pub use replication::ReplicationLayer;
pub use resolver::LayerStackResolver;
pub use storage::StorageLayer;
pub use strategy::{LayerStrategy, LayerStrategyRef, NodeCtx, StrategyCtx};

use crate::error::{Error, Result};
use crate::numberpool::NumberPool;
use crate::objects::layer_tree::LayerKind;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Open dispatch table from layer kind to strategy.
///
/// The built-in kinds are registered by [`LayerRegistry::with_defaults`];
/// embedders may register additional kinds before handing the registry to
/// the resolver. One strategy per kind.
#[derive(Default)]
pub struct LayerRegistry {
    strategies: RwLock<BTreeMap<LayerKind, LayerStrategyRef>>,
}

impl LayerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registry with the built-in replication and storage strategies
    pub fn with_defaults(minors: Arc<NumberPool>) -> Arc<Self> {
        let registry = Self::new();
        // infallible: the table is empty
        let _ = registry.register(ReplicationLayer::new(minors));
        let _ = registry.register(StorageLayer::new());
        registry
    }

    pub fn register(&self, strategy: LayerStrategyRef) -> Result<()> {
        let kind = strategy.kind();
        let mut strategies = self.strategies.write();
        if strategies.contains_key(&kind) {
            return Err(Error::AlreadyExists {
                kind: "layer strategy".into(),
                name: kind.to_string(),
            });
        }
        strategies.insert(kind, strategy);
        Ok(())
    }

    /// Look up the strategy for a kind; an unregistered kind in a requested
    /// stack is a configuration fault
    pub fn get(&self, kind: LayerKind) -> Result<LayerStrategyRef> {
        self.strategies
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::internal(format!("no strategy registered for layer kind {kind}")))
    }

    pub fn kinds(&self) -> Vec<LayerKind> {
        self.strategies.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_defaults_and_duplicates() {
        let minors = Arc::new(NumberPool::new("minors", 1000, 1100));
        let registry = LayerRegistry::with_defaults(minors);

        assert_eq!(
            registry.kinds(),
            vec![LayerKind::Replication, LayerKind::Storage]
        );
        assert!(registry.get(LayerKind::Storage).is_ok());
        assert_matches!(
            registry.get(LayerKind::Encryption),
            Err(Error::Internal(_))
        );
        assert_matches!(
            registry.register(StorageLayer::new()),
            Err(Error::AlreadyExists { .. })
        );
    }
}
