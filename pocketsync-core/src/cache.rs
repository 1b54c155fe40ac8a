// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Cache
//!
//! Per-(device, user) resumable context for long-poll requests. A
//! suspended heartbeat (PING or looping SYNC) picks up its confirmed sync
//! keys, folder list fingerprint, and per-collection options from here
//! instead of re-negotiating them with the client.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::change::CollectionClass;
use crate::synckey::SyncKey;

/// Hierarchy fingerprint entry for one folder, keyed by server id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedFolder {
    pub class: CollectionClass,
    pub parent_id: String,
    pub display_name: String,
    pub folder_type: u32,
}

/// Per-collection option block negotiated by the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionOptions {
    pub class: Option<CollectionClass>,
    pub filter_type: Option<u32>,
    pub window_size: Option<u32>,
    pub conflict: Option<u32>,
    pub mime_support: Option<u32>,
    pub body_preference: Vec<u32>,
}

/// The resumable long-poll context for one (device, user).
///
/// An absent cache row decodes to the zero value of this schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCache {
    /// Sync keys the client has confirmed receipt of.
    pub confirmed_sync_keys: HashSet<String>,
    /// When the last heartbeat cycle was opened.
    pub last_hb_sync_started: u64,
    /// When the last heartbeat cycle delivered a response.
    pub last_sync_end_normal: u64,
    /// Stamped at save time, in string form for blob compatibility with
    /// deployed installations.
    pub timestamp: String,
    /// Client wait, in minutes.
    pub wait: u32,
    /// Heartbeat interval, in seconds.
    pub hb_interval: u32,
    /// Folder list fingerprint, keyed by server id.
    pub folders: HashMap<String, CachedFolder>,
    /// Hierarchy sync key, or "0" when no hierarchy state exists.
    pub hierarchy_key: String,
    /// Per-collection option blocks, keyed by collection id.
    pub collections: HashMap<String, CollectionOptions>,
    pub ping_heartbeat: u32,
    /// Last issued generation per collection.
    pub sync_key_counter: HashMap<String, u64>,
}

impl Default for SyncCache {
    fn default() -> Self {
        SyncCache {
            confirmed_sync_keys: HashSet::new(),
            last_hb_sync_started: 0,
            last_sync_end_normal: 0,
            timestamp: String::new(),
            wait: 0,
            hb_interval: 0,
            folders: HashMap::new(),
            hierarchy_key: "0".to_string(),
            collections: HashMap::new(),
            ping_heartbeat: 0,
            sync_key_counter: HashMap::new(),
        }
    }
}

impl SyncCache {
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&VersionedCache::V1(self.clone()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        let VersionedCache::V1(cache) = bincode::deserialize(bytes)?;
        Ok(cache)
    }

    /// Records that the client acknowledged `key` for `collection_id`.
    /// The key counter is tracked per collection so a collection reset
    /// evicts it along with the collection's options.
    pub fn confirm_sync_key(&mut self, collection_id: &str, key: &SyncKey) {
        self.confirmed_sync_keys.insert(key.to_string());
        self.sync_key_counter
            .insert(collection_id.to_string(), key.counter());
    }

    pub fn is_confirmed(&self, key: &SyncKey) -> bool {
        self.confirmed_sync_keys.contains(&key.to_string())
    }

    /// Drops one collection's cached options and key counter. The folder
    /// list is hierarchy information and stays.
    pub fn remove_collection(&mut self, collection_id: &str) {
        self.collections.remove(collection_id);
        self.sync_key_counter.remove(collection_id);
    }

    /// Clears everything derived from hierarchy state: folder list,
    /// collection blocks, and the hierarchy key.
    pub fn clear_hierarchy(&mut self) {
        self.folders.clear();
        self.collections.clear();
        self.hierarchy_key = "0".to_string();
    }

    /// Marks a heartbeat cycle opened.
    pub fn heartbeat_started(&mut self, now: u64) {
        self.last_hb_sync_started = now;
    }

    /// Marks the current heartbeat cycle as having delivered a response.
    pub fn heartbeat_ended_normal(&mut self, now: u64) {
        self.last_sync_end_normal = now;
    }

    /// True when a heartbeat was opened but never ended normally: the
    /// client disconnected mid-poll, so cached folder and collection
    /// lists must be treated as stale and reloaded.
    pub fn hierarchy_maybe_stale(&self) -> bool {
        self.last_hb_sync_started > self.last_sync_end_normal
    }
}

#[derive(Serialize, Deserialize)]
enum VersionedCache {
    V1(SyncCache),
}
