//! PocketSync Core Library
//!
//! Server-side state engine for the PocketSync mobile synchronization
//! protocol. Tracks, per (device, user, collection), the continuation
//! token presented by the client, the snapshot tied to that token, the
//! record of client-originated changes (used to avoid echoing changes
//! back to the device that sent them), device provisioning and remote
//! wipe lifecycle, and the resumable long-poll cache.
//!
//! The wire protocol, request dispatch, authentication, and the backend
//! content driver live outside this crate; protocol handlers drive the
//! [`StateManager`] façade and the backend is reached through the
//! [`HierarchyBackend`] seam.

pub mod backend;
pub mod cache;
pub mod change;
pub mod device;
pub mod folder;
pub mod manager;
pub mod storage;
pub mod synckey;

pub use backend::{BackendFolder, HierarchyBackend};
pub use cache::{CachedFolder, CollectionOptions, SyncCache};
pub use change::{
    Change, ChangeOrigin, ChangeType, CollectionClass, CollectionMeta, ItemChange, MailFlags,
    RequestKind,
};
pub use device::{DeviceFilterField, DeviceListEntry, DeviceRecord, RemoteWipeStatus};
pub use folder::{
    EmailFolderState, FolderStat, ItemFolderState, MailFlagState, Snapshot, HIERARCHY_FOLDER_ID,
};
pub use manager::{ManagerConfig, StateError, StateManager, StateResult, UpdateStateOptions};
pub use storage::{MailMapRecord, MapRecord, RemoveScope, StateRecord, Storage, StorageError};
pub use synckey::{SyncKey, SyncKeyError};
