// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync cache operations and heartbeat transitions.

use super::{current_timestamp, StateManager, StateResult};
use crate::cache::SyncCache;
use crate::storage::StorageError;

impl StateManager {
    /// Loads the sync cache for the request's device and user; an absent
    /// row yields the zero-value cache.
    pub fn get_sync_cache(&self) -> StateResult<SyncCache> {
        match self
            .storage()?
            .get_cache(&self.config.device_id, &self.config.user)?
        {
            Some(blob) if !blob.is_empty() => {
                let cache = SyncCache::decode(&blob)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(cache)
            }
            _ => Ok(SyncCache::default()),
        }
    }

    /// Persists the sync cache, stamping its timestamp field.
    pub fn save_sync_cache(&self, cache: &SyncCache) -> StateResult<()> {
        let mut cache = cache.clone();
        cache.timestamp = current_timestamp().to_string();
        let blob = cache
            .encode()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.storage()?
            .put_cache(&self.config.device_id, &self.config.user, &blob)?;
        Ok(())
    }

    /// Deletes cache rows matching the non-empty arguments.
    pub fn delete_sync_cache(
        &self,
        device_id: Option<&str>,
        user: Option<&str>,
    ) -> StateResult<usize> {
        Ok(self.storage()?.delete_cache(device_id, user)?)
    }

    /// Marks a long-poll cycle opened for this device and user.
    pub fn heartbeat_started(&self) -> StateResult<()> {
        let mut cache = self.get_sync_cache()?;
        cache.heartbeat_started(current_timestamp());
        self.save_sync_cache(&cache)
    }

    /// Marks the long-poll cycle as having delivered its response. A
    /// started cycle with no normal end means the client disconnected and
    /// cached folder lists must be treated as stale.
    pub fn heartbeat_ended_normal(&self) -> StateResult<()> {
        let mut cache = self.get_sync_cache()?;
        cache.heartbeat_ended_normal(current_timestamp());
        self.save_sync_cache(&cache)
    }
}
