//! Volume Provider Records and Definition-Scoped Layer Data
//!
//! A provider record is the leaf datum of the layer tree: for one volume of
//! one resource instance it describes how the volume is realized by the
//! backing storage technology (device path, sizes, backend bookkeeping) and
//! which storage pool currently backs it.
//!
//! Definition-scoped records hold data that is identical for every node
//! instance of a logical definition: the shared remote-service handle of a
//! remote-backed volume, or the port and secret of a replication layer.

use crate::error::{Error, Result};
use crate::objects::resource::VolumeNumber;
use crate::objects::storage_pool::{ProviderKind, StorPoolName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Provider Data (per volume, per kind)
// =============================================================================

/// Which side of a remote block service a volume attaches as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteRole {
    Initiator,
    Target,
}

/// Backend-specific provisioning data, one variant per provider kind.
///
/// Each variant carries exactly the construction inputs its backend needs;
/// there is deliberately no catch-all variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "provider")]
pub enum VlmProviderData {
    /// Diskless stub; needs the volume-definition size so the device can be
    /// attached over the network at the right geometry
    Diskless { size_kib: u64 },
    /// Plain logical-volume-manager volume
    Lvm,
    /// Thin-provisioned logical-volume-manager volume
    LvmThin {
        thin_pool: Option<String>,
        /// Filled in by node-side scans, unset on creation
        allocated_percent: Option<f32>,
    },
    /// Filesystem-pool dataset, thin or preallocated
    Zfs { thin: bool },
    /// Remote block service; the handle references the shared
    /// definition-scoped record
    Remote { role: RemoteRole, handle: String },
}

impl VlmProviderData {
    /// The provider kind this data realizes
    pub fn kind(&self) -> ProviderKind {
        match self {
            VlmProviderData::Diskless { .. } => ProviderKind::Diskless,
            VlmProviderData::Lvm => ProviderKind::Lvm,
            VlmProviderData::LvmThin { .. } => ProviderKind::LvmThin,
            VlmProviderData::Zfs { thin: false } => ProviderKind::Zfs,
            VlmProviderData::Zfs { thin: true } => ProviderKind::ZfsThin,
            VlmProviderData::Remote {
                role: RemoteRole::Initiator,
                ..
            } => ProviderKind::RemoteInitiator,
            VlmProviderData::Remote {
                role: RemoteRole::Target,
                ..
            } => ProviderKind::RemoteTarget,
        }
    }
}

// =============================================================================
// Volume Provider Record
// =============================================================================

/// Per (volume, leaf layer node) provisioning state.
///
/// Identity is the (resource, layer id, volume number) triple; it survives a
/// storage-pool reassignment. Only the pool reference changes, device path
/// and sizes stay untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeProviderRecord {
    vlm_nr: VolumeNumber,
    pool: StorPoolName,
    /// Device path as reported by the node, unset until first provisioning
    pub device_path: Option<String>,
    pub allocated_size_kib: Option<u64>,
    pub usable_size_kib: Option<u64>,
    pub data: VlmProviderData,
    created_at: DateTime<Utc>,
}

impl VolumeProviderRecord {
    pub fn new(vlm_nr: VolumeNumber, pool: StorPoolName, data: VlmProviderData) -> Self {
        Self {
            vlm_nr,
            pool,
            device_path: None,
            allocated_size_kib: None,
            usable_size_kib: None,
            data,
            created_at: Utc::now(),
        }
    }

    pub fn vlm_nr(&self) -> VolumeNumber {
        self.vlm_nr
    }

    /// The storage pool currently backing this record
    pub fn pool(&self) -> &StorPoolName {
        &self.pool
    }

    /// Re-point the record to a different pool (toggle). Identity fields are
    /// not touched.
    pub(crate) fn set_pool(&mut self, pool: StorPoolName) {
        self.pool = pool;
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.data.kind()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

// =============================================================================
// Definition-Scoped Layer Data
// =============================================================================

/// Shared remote-service handle of a remote-backed volume definition.
///
/// Created at most once per (definition, kind, suffix) triple; the initiator
/// and target side of the same volume observe the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVlmDfnData {
    /// Service-side object handle
    pub handle: String,
    pub size_kib: u64,
    /// Whether the remote service has materialized the volume
    pub exists: bool,
    /// Whether any initiator is currently attached
    pub attached: bool,
}

/// Replication-layer data scoped to one volume definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplVlmDfnData {
    /// Device minor number, allocated from the minor number pool
    pub minor: u32,
}

/// Volume-definition-scoped layer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum VlmDfnLayerData {
    Remote(RemoteVlmDfnData),
    Replication(ReplVlmDfnData),
}

impl VlmDfnLayerData {
    /// Read the record as a remote-service handle.
    ///
    /// A different variant under a key that must hold remote data indicates
    /// corrupted or inconsistent persisted state and is an invariant
    /// violation, never silently coerced.
    pub fn as_remote_mut(&mut self) -> Result<&mut RemoteVlmDfnData> {
        match self {
            VlmDfnLayerData::Remote(data) => Ok(data),
            other => Err(Error::internal(format!(
                "expected remote volume-definition layer data, found {}",
                other.kind_name()
            ))),
        }
    }

    pub fn as_replication_mut(&mut self) -> Result<&mut ReplVlmDfnData> {
        match self {
            VlmDfnLayerData::Replication(data) => Ok(data),
            other => Err(Error::internal(format!(
                "expected replication volume-definition layer data, found {}",
                other.kind_name()
            ))),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            VlmDfnLayerData::Remote(_) => "remote",
            VlmDfnLayerData::Replication(_) => "replication",
        }
    }
}

/// Replication-layer data scoped to one resource definition, shared by all
/// node instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplRscDfnData {
    /// Replication transport port
    pub port: u16,
    pub transport: String,
    pub secret: Option<String>,
}

/// Resource-definition-scoped layer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum RscDfnLayerData {
    Replication(ReplRscDfnData),
}

impl RscDfnLayerData {
    pub fn as_replication_mut(&mut self) -> Result<&mut ReplRscDfnData> {
        match self {
            RscDfnLayerData::Replication(data) => Ok(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_provider_kind_mapping() {
        assert_eq!(
            VlmProviderData::Diskless { size_kib: 1024 }.kind(),
            ProviderKind::Diskless
        );
        assert_eq!(VlmProviderData::Zfs { thin: true }.kind(), ProviderKind::ZfsThin);
        assert_eq!(VlmProviderData::Zfs { thin: false }.kind(), ProviderKind::Zfs);
        assert_eq!(
            VlmProviderData::Remote {
                role: RemoteRole::Target,
                handle: "odata/v1".into()
            }
            .kind(),
            ProviderKind::RemoteTarget
        );
    }

    #[test]
    fn test_toggle_keeps_identity() {
        let mut rec = VolumeProviderRecord::new(
            VolumeNumber(0),
            StorPoolName::from("pool-a"),
            VlmProviderData::Lvm,
        );
        rec.device_path = Some("/dev/vg/r1_00000".into());

        rec.set_pool(StorPoolName::from("pool-b"));
        assert_eq!(rec.pool().as_str(), "pool-b");
        assert_eq!(rec.device_path.as_deref(), Some("/dev/vg/r1_00000"));
        assert_eq!(rec.vlm_nr(), VolumeNumber(0));
    }

    #[test]
    fn test_variant_mismatch_is_internal() {
        let mut data = VlmDfnLayerData::Replication(ReplVlmDfnData { minor: 1000 });
        assert_matches!(data.as_remote_mut(), Err(Error::Internal(_)));
        assert!(data.as_replication_mut().is_ok());
    }

    #[test]
    fn test_record_serde() {
        let rec = VolumeProviderRecord::new(
            VolumeNumber(2),
            StorPoolName::from("thinpool"),
            VlmProviderData::LvmThin {
                thin_pool: Some("thin".into()),
                allocated_percent: None,
            },
        );
        let json = serde_json::to_string(&rec).unwrap();
        let back: VolumeProviderRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
