//! Layer Payload
//!
//! Transient, caller-supplied description of the desired per-layer
//! configuration for one reconciliation call. Payloads arrive with the API
//! request that triggers reconciliation; they are consulted during create
//! and merge but never persisted themselves.

use crate::objects::resource::VolumeNumber;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Desired replication-layer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPayload {
    /// Peer slots to reserve in the replication metadata
    pub peer_slots: Option<u8>,
    /// Replication transport port
    pub port: Option<u16>,
    pub transport: Option<String>,
    pub shared_secret: Option<String>,
}

/// Desired per-volume storage configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePayload {
    /// Thin pool to place the volume in, for thin LVM pools
    pub thin_pool: Option<String>,
}

/// Desired storage-layer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePayload {
    pub per_volume: BTreeMap<VolumeNumber, VolumePayload>,
}

/// Desired per-layer configuration for one reconciliation call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerPayload {
    pub replication: ReplicationPayload,
    pub storage: StoragePayload,
}

impl LayerPayload {
    pub fn volume(&self, vlm_nr: VolumeNumber) -> Option<&VolumePayload> {
        self.storage.per_volume.get(&vlm_nr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serde() {
        let mut payload = LayerPayload::default();
        payload.replication.port = Some(7000);
        payload.storage.per_volume.insert(
            VolumeNumber(0),
            VolumePayload {
                thin_pool: Some("thin".into()),
            },
        );

        let json = serde_json::to_string(&payload).unwrap();
        let back: LayerPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
        assert_eq!(
            back.volume(VolumeNumber(0)).unwrap().thin_pool.as_deref(),
            Some("thin")
        );
    }
}
