//! Domain boundaries: collaborator traits and their in-memory
//! implementations

pub mod ports;

pub use ports::{
    AccessControl, AccessControlRef, AccessType, AllowAll, Identity, LayerPersistence,
    LayerPersistenceRef, NoopPersistence, ObjectRef, PropsPoolResolver, RecordingPersistence,
    StoragePoolResolver, StoragePoolResolverRef,
};
