// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! State Manager Façade
//!
//! The interface protocol handlers drive. One `StateManager` is created
//! per inbound request and exclusively owns the in-memory current state
//! (loaded sync key, snapshot, pending list) for the request's duration;
//! instances are never shared across concurrent requests. Everything
//! durable lives in the store.
//!
//! # Module Structure
//!
//! - [`error`] - Error types for the façade layer
//! - [`changes`] - Change import, loop suppression, duplicate detection
//! - [`device`] - Device registry and lifecycle operations
//! - [`cache`] - Sync cache operations and heartbeat transitions

mod cache;
mod changes;
mod device;
mod error;

pub use changes::UpdateStateOptions;
pub use error::{StateError, StateResult};

use std::path::PathBuf;

use tracing::debug;

use crate::change::{decode_pending, encode_pending, Change, CollectionMeta, RequestKind};
use crate::device::DeviceRecord;
use crate::folder::{Snapshot, HIERARCHY_FOLDER_ID};
use crate::storage::{StateRecord, Storage, StorageError};
use crate::synckey::SyncKey;

/// Stamp gap above which an idle collection gets a stamp-only refresh,
/// so the window between generations cannot widen forever.
const STAMP_REFRESH_GAP: u64 = 30_000;

/// Returns the current Unix timestamp in seconds.
/// Falls back to 0 if the system clock is before UNIX_EPOCH (should never happen).
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Configuration for one state manager instance.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Path of the state database.
    pub db_path: PathBuf,
    /// Device the request came from.
    pub device_id: String,
    /// Authenticated user of the request.
    pub user: String,
    /// Protocol command being served.
    pub request: RequestKind,
}

impl ManagerConfig {
    pub fn new(
        db_path: impl Into<PathBuf>,
        device_id: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        ManagerConfig {
            db_path: db_path.into(),
            device_id: device_id.into(),
            user: user.into(),
            request: RequestKind::Sync,
        }
    }

    pub fn with_request(mut self, request: RequestKind) -> Self {
        self.request = request;
        self
    }
}

/// Per-request sync state orchestrator.
pub struct StateManager {
    config: ManagerConfig,
    storage: Option<Storage>,
    sync_key: Option<SyncKey>,
    collection: Option<CollectionMeta>,
    snapshot: Option<Snapshot>,
    pending: Vec<Change>,
    last_sync_stamp: u64,
    this_sync_stamp: u64,
    changes_seen: bool,
    /// Last-loaded device record, short-circuiting repeat lookups within
    /// the request. Invalidated by forced loads and mutating calls.
    device: Option<DeviceRecord>,
    device_user: Option<String>,
}

impl StateManager {
    /// Opens a manager with its own storage handle.
    pub fn open(config: ManagerConfig) -> StateResult<Self> {
        let storage = Storage::open(&config.db_path)?;
        Ok(StateManager {
            config,
            storage: Some(storage),
            sync_key: None,
            collection: None,
            snapshot: None,
            pending: Vec::new(),
            last_sync_stamp: 0,
            this_sync_stamp: 0,
            changes_seen: false,
            device: None,
            device_user: None,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    pub fn user(&self) -> &str {
        &self.config.user
    }

    pub fn request(&self) -> RequestKind {
        self.config.request
    }

    pub fn sync_key(&self) -> Option<&SyncKey> {
        self.sync_key.as_ref()
    }

    pub fn collection(&self) -> Option<&CollectionMeta> {
        self.collection.as_ref()
    }

    /// Declares the collection this request targets without loading
    /// state, for commands that do not carry a sync key.
    pub fn set_collection(&mut self, collection: CollectionMeta) {
        self.collection = Some(collection);
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn snapshot_mut(&mut self) -> Option<&mut Snapshot> {
        self.snapshot.as_mut()
    }

    /// Installs the snapshot the next save will persist, e.g. the folder
    /// list or collection state a handler assembled from the backend.
    pub fn set_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Server→client changes deferred past the client's window size,
    /// delivered over subsequent requests until drained.
    pub fn pending(&self) -> &[Change] {
        &self.pending
    }

    /// Replaces the pending list, typically with the remainder after a
    /// window-size truncation.
    pub fn set_pending(&mut self, pending: Vec<Change>) {
        self.pending = pending;
    }

    pub fn last_sync_stamp(&self) -> u64 {
        self.last_sync_stamp
    }

    pub fn this_sync_stamp(&self) -> u64 {
        self.this_sync_stamp
    }

    /// Records the collection stamp the backend reported for this cycle.
    pub fn set_this_sync_stamp(&mut self, stamp: u64) {
        self.this_sync_stamp = stamp;
    }

    /// Releases the storage handle, e.g. around a long-poll sleep.
    pub fn disconnect(&mut self) {
        if self.storage.take().is_some() {
            debug!(device = self.config.device_id.as_str(), "released storage handle");
        }
    }

    /// Re-acquires a storage handle after [`disconnect`](Self::disconnect).
    pub fn connect(&mut self) -> StateResult<()> {
        if self.storage.is_none() {
            self.storage = Some(Storage::open(&self.config.db_path)?);
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.storage.is_some()
    }

    pub(crate) fn storage(&self) -> StateResult<&Storage> {
        self.storage.as_ref().ok_or_else(|| {
            StateError::InvariantViolation("storage handle is disconnected".to_string())
        })
    }

    /// The folder id state rows are stored under: the collection id, or
    /// the hierarchy sentinel when no collection is loaded.
    pub(crate) fn state_folder_id(&self) -> &str {
        self.collection
            .as_ref()
            .map(|c| c.id.as_str())
            .unwrap_or(HIERARCHY_FOLDER_ID)
    }

    /// Loads the state tied to `sync_key` into the manager.
    ///
    /// A miss is `StateGone`, the non-fatal signal to answer KEY_MISMATCH
    /// so the client restarts its series. On a hit the stamps are
    /// restored with `this == last`, so a cycle that only imports
    /// client changes leaves the stamp untouched. An item-level request
    /// whose stored snapshot is empty gets the empty collection object of
    /// the class named by the inbound metadata.
    pub fn load_state(
        &mut self,
        sync_key: &str,
        collection: Option<CollectionMeta>,
    ) -> StateResult<()> {
        let key = SyncKey::parse(sync_key)?;
        let folder = collection.as_ref().map(|c| c.id.as_str());

        let record = self
            .storage()?
            .get_state(&key.to_string(), folder)?
            .ok_or_else(|| StateError::StateGone(key.to_string()))?;

        self.last_sync_stamp = record.sync_mod;
        self.this_sync_stamp = record.sync_mod;

        self.snapshot = Some(if record.sync_data.is_empty() {
            match &collection {
                Some(meta) => Snapshot::empty_collection(meta.class),
                None => Snapshot::Hierarchy(Vec::new()),
            }
        } else {
            Snapshot::decode(&record.sync_data)
                .map_err(|e| StorageError::Serialization(e.to_string()))?
        });
        self.pending = decode_pending(&record.sync_pending)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.sync_key = Some(key.clone());
        self.collection = collection;
        self.changes_seen = false;

        debug!(
            device = self.config.device_id.as_str(),
            folder = self.state_folder_id(),
            sync_key = %key,
            pending = self.pending.len(),
            "state loaded"
        );

        // Older generations of this series are dead now that the client
        // has proven it holds this one.
        let folder = self.state_folder_id().to_string();
        self.storage()?
            .gc_states(&self.config.device_id, &self.config.user, &folder, &key)?;

        Ok(())
    }

    /// Persists the current state atomically under the current sync key.
    ///
    /// Generation 1 of a series always persists stamp 0 so the next cycle
    /// exposes the full backlog; later generations persist the stamp of
    /// this cycle. The write replaces any previous row under the same
    /// key, which makes a retried save converge instead of failing.
    pub fn save(&mut self) -> StateResult<()> {
        let key = self
            .sync_key
            .clone()
            .ok_or_else(|| StateError::InvariantViolation("no sync key to save".to_string()))?;

        let sync_data = match &self.snapshot {
            Some(snapshot) => snapshot
                .encode()
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            None => Vec::new(),
        };
        let sync_pending =
            encode_pending(&self.pending).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let sync_mod = if key.counter() == 1 {
            0
        } else {
            self.this_sync_stamp
        };

        let record = StateRecord {
            sync_key: key.to_string(),
            sync_data,
            device_id: self.config.device_id.clone(),
            folder_id: self.state_folder_id().to_string(),
            user: self.config.user.clone(),
            sync_mod,
            sync_pending,
            sync_timestamp: current_timestamp(),
        };

        self.storage()?.put_state(&record)?;

        debug!(
            device = self.config.device_id.as_str(),
            folder = record.folder_id.as_str(),
            sync_key = %key,
            sync_mod,
            "state saved"
        );

        let folder = record.folder_id;
        self.storage()?
            .gc_states(&self.config.device_id, &self.config.user, &folder, &key)?;
        self.storage()?
            .gc_maps(&self.config.device_id, &self.config.user, &key)?;

        Ok(())
    }

    /// Stamp-only refresh of the current row when the collection was idle
    /// for a long stretch, guarded by optimistic concurrency. Returns
    /// whether this call won the update.
    pub fn update_sync_stamp(&mut self) -> StateResult<bool> {
        let key = self.sync_key.clone().ok_or_else(|| {
            StateError::InvariantViolation("no sync key loaded for stamp update".to_string())
        })?;

        if self.changes_seen || self.this_sync_stamp < self.last_sync_stamp + STAMP_REFRESH_GAP {
            return Ok(false);
        }

        let updated = self.storage()?.update_sync_stamp(
            &key.to_string(),
            self.last_sync_stamp,
            self.this_sync_stamp,
            current_timestamp(),
        )?;

        if updated {
            debug!(
                sync_key = %key,
                old = self.last_sync_stamp,
                new = self.this_sync_stamp,
                "sync stamp refreshed"
            );
            self.last_sync_stamp = self.this_sync_stamp;
        }
        Ok(updated)
    }

    /// Rewrites the server id embedded in every state row of one folder.
    /// Used when a folder is renamed or moved but keeps its client UID.
    pub fn update_server_id_in_state(
        &self,
        folder_uid: &str,
        new_server_id: &str,
    ) -> StateResult<()> {
        let storage = self.storage()?;
        let rows =
            storage.state_rows_for_folder(&self.config.device_id, &self.config.user, folder_uid)?;

        for (sync_key, data) in rows {
            if data.is_empty() {
                continue;
            }
            let mut snapshot = Snapshot::decode(&data)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            snapshot.set_server_id(folder_uid, new_server_id);
            let encoded = snapshot
                .encode()
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            storage.rewrite_sync_data(&sync_key, &encoded)?;
        }
        Ok(())
    }

    /// Issues the key to answer with: the next generation of the key the
    /// client presented, or the first generation of a fresh series when
    /// the client presented none (or the bootstrap key "0"). Fresh series
    /// are regenerated until they pass the cross-folder collision check.
    pub fn get_new_sync_key(&self, seen: Option<&str>) -> StateResult<SyncKey> {
        match seen {
            None | Some("0") => {
                let folder = self.state_folder_id();
                loop {
                    let key = SyncKey::generate();
                    if !self.storage()?.series_collides(
                        key.series(),
                        &self.config.device_id,
                        folder,
                    )? {
                        return Ok(key);
                    }
                    debug!(
                        device = self.config.device_id.as_str(),
                        "sync key series collision, regenerating"
                    );
                }
            }
            Some(seen) => Ok(SyncKey::parse(seen)?.next()),
        }
    }

    /// Makes `sync_key` the key subsequent imports and the next save run
    /// under.
    pub fn set_new_sync_key(&mut self, sync_key: &str) -> StateResult<()> {
        self.sync_key = Some(SyncKey::parse(sync_key)?);
        Ok(())
    }

    /// Newest key ever persisted for one collection, if any.
    pub fn get_latest_sync_key_for_collection(
        &self,
        folder_id: &str,
    ) -> StateResult<Option<SyncKey>> {
        let latest = self.storage()?.latest_sync_key(
            &self.config.device_id,
            &self.config.user,
            folder_id,
        )?;
        match latest {
            Some(raw) => Ok(Some(SyncKey::parse(&raw)?)),
            None => Ok(None),
        }
    }
}
