//! Core Configuration
//!
//! Identifier ranges and the default layer stack. Constructed by the
//! embedding process (defaults are fine for most deployments) and used to
//! build the number pools that are then injected into the resolver and the
//! strategies.

use crate::numberpool::NumberPool;
use crate::objects::layer_tree::LayerKind;
use std::sync::Arc;

/// Configuration for the layer-stack core
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Inclusive range of layer ids
    pub layer_id_min: u32,
    pub layer_id_max: u32,
    /// Inclusive range of replication device minor numbers
    pub minor_min: u32,
    pub minor_max: u32,
    /// Layer stack applied when a resource does not request its own
    pub default_stack: Vec<LayerKind>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            layer_id_min: 1,
            layer_id_max: u16::MAX as u32,
            minor_min: 1000,
            minor_max: 49151,
            default_stack: vec![LayerKind::Replication, LayerKind::Storage],
        }
    }
}

impl CoreConfig {
    /// Build the layer-id number pool
    pub fn layer_id_pool(&self) -> Arc<NumberPool> {
        Arc::new(NumberPool::new(
            "layer-ids",
            self.layer_id_min,
            self.layer_id_max,
        ))
    }

    /// Build the replication minor-number pool
    pub fn minor_pool(&self) -> Arc<NumberPool> {
        Arc::new(NumberPool::new("minors", self.minor_min, self.minor_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ranges() {
        let config = CoreConfig::default();
        let pool = config.layer_id_pool();
        // layer ids start at 1
        assert_eq!(pool.allocate().unwrap(), 1);
        assert_eq!(config.default_stack, vec![LayerKind::Replication, LayerKind::Storage]);
    }
}
