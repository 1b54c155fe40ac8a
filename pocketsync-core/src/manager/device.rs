// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device registry and lifecycle operations.

use std::collections::HashMap;

use tracing::info;

use super::{StateError, StateManager, StateResult};
use crate::device::{DeviceFilterField, DeviceListEntry, DeviceRecord, RemoteWipeStatus};
use crate::folder::HIERARCHY_FOLDER_ID;
use crate::storage::RemoveScope;

impl StateManager {
    /// Loads a device registry record, including the policy key for
    /// `user` when given.
    ///
    /// The last-loaded record is cached on the manager; `force` bypasses
    /// the cache, which matters for long-running requests whose wipe
    /// status can be flipped out-of-band.
    pub fn load_device_info(
        &mut self,
        device_id: &str,
        user: Option<&str>,
        force: bool,
    ) -> StateResult<DeviceRecord> {
        if !force {
            if let Some(device) = &self.device {
                if device.id == device_id && self.device_user.as_deref() == user {
                    return Ok(device.clone());
                }
            }
        }

        let mut record = self
            .storage()?
            .get_device(device_id)?
            .ok_or_else(|| StateError::DeviceNotFound(device_id.to_string()))?;
        if let Some(user) = user {
            record.policy_key = self.storage()?.get_policy_key(device_id, user)?;
        }

        self.device = Some(record.clone());
        self.device_user = user.map(str::to_string);
        Ok(record)
    }

    /// Registers or refreshes a device record.
    ///
    /// A first contact inserts the row; later contacts update the user
    /// agent and properties. The supported list is written only while the
    /// stored one is still empty; it is immutable after first announce.
    /// Ensures the (device, user) pairing exists, unprovisioned.
    pub fn set_device_info(
        &mut self,
        record: &DeviceRecord,
        user: Option<&str>,
    ) -> StateResult<()> {
        let storage = self.storage()?;
        if storage.device_exists(&record.id, None)? == 0 {
            storage.insert_device(record)?;
            info!(device = record.id.as_str(), "device registered");
        } else {
            storage.update_device(record)?;
        }

        let user = user.unwrap_or(self.config.user.as_str());
        storage.ensure_device_user(&record.id, user)?;

        self.device = Some(record.clone());
        self.device_user = Some(user.to_string());
        Ok(())
    }

    /// Replaces a device's mutable property set.
    pub fn set_device_properties(
        &mut self,
        device_id: &str,
        properties: &HashMap<String, String>,
    ) -> StateResult<()> {
        self.storage()?.set_device_properties(device_id, properties)?;
        if let Some(device) = self.device.as_mut() {
            if device.id == device_id {
                device.properties = properties.clone();
            }
        }
        Ok(())
    }

    /// Number of registry rows for the device (and user, if given); 0
    /// means the device is unknown.
    pub fn device_exists(&self, device_id: &str, user: Option<&str>) -> StateResult<u32> {
        Ok(self.storage()?.device_exists(device_id, user)?)
    }

    /// Lists devices, optionally restricted to one user, with LIKE
    /// filters over the closed field set.
    pub fn list_devices(
        &self,
        user: Option<&str>,
        filter: &[(DeviceFilterField, String)],
    ) -> StateResult<Vec<DeviceListEntry>> {
        Ok(self.storage()?.list_devices(user, filter)?)
    }

    /// Newest state save timestamp for the request's device and user.
    pub fn get_last_sync_timestamp(&self) -> StateResult<Option<u64>> {
        Ok(self
            .storage()?
            .last_sync_timestamp(&self.config.device_id, &self.config.user)?)
    }

    /// Stores the policy key issued for the currently loaded device.
    ///
    /// Calling this for any other device is a programming error: the key
    /// belongs to the (device, user) pair the request authenticated.
    pub fn set_policy_key(&mut self, device_id: &str, policy_key: u64) -> StateResult<()> {
        match &self.device {
            Some(device) if device.id == device_id => {}
            _ => {
                return Err(StateError::InvariantViolation(format!(
                    "policy key set for {}, which is not the loaded device",
                    device_id
                )))
            }
        }

        let user = self
            .device_user
            .clone()
            .unwrap_or_else(|| self.config.user.clone());
        self.storage()?.set_policy_key(device_id, &user, policy_key)?;

        if let Some(device) = self.device.as_mut() {
            device.policy_key = policy_key;
        }
        info!(device = device_id, user = user.as_str(), "policy key stored");
        Ok(())
    }

    /// Zeroes every policy key in the installation, forcing a global
    /// reprovision.
    pub fn reset_all_policy_keys(&mut self) -> StateResult<()> {
        let reset = self.storage()?.reset_all_policy_keys()?;
        if let Some(device) = self.device.as_mut() {
            device.policy_key = 0;
        }
        info!(reset, "all policy keys reset");
        Ok(())
    }

    /// Updates a device's remote-wipe status. Arming a wipe (Pending)
    /// additionally zeroes the device's policy keys so the next request
    /// from any of its users is forced through provisioning.
    pub fn set_device_rw_status(
        &mut self,
        device_id: &str,
        status: RemoteWipeStatus,
    ) -> StateResult<()> {
        self.storage()?.set_rwstatus(device_id, status)?;
        if status == RemoteWipeStatus::Pending {
            self.storage()?.reset_device_policy_keys(device_id)?;
        }

        if let Some(device) = self.device.as_mut() {
            if device.id == device_id {
                device.rw_status = status;
                if status == RemoteWipeStatus::Pending {
                    device.policy_key = 0;
                }
            }
        }
        info!(device = device_id, status = status.as_i64(), "remote wipe status set");
        Ok(())
    }

    /// Removes persisted state per the given scope. See
    /// [`RemoveScope`] and the storage layer for the exact coverage,
    /// including wipe escalation and orphan-device cleanup.
    pub fn remove_state(&mut self, scope: &RemoveScope) -> StateResult<()> {
        self.storage()?.remove_state(scope)?;
        // Whatever was cached may be gone now.
        self.device = None;
        self.device_user = None;
        Ok(())
    }

    /// Drops every state, map, and mailmap row of one collection for the
    /// request's device and user, and scrubs the collection from the sync
    /// cache, or the whole hierarchy part of the cache when the
    /// hierarchy sentinel is given. The emptied cache is persisted.
    pub fn reset_device_state(&mut self, collection_id: &str) -> StateResult<()> {
        let device_id = self.config.device_id.clone();
        let user = self.config.user.clone();

        self.storage()?
            .delete_folder_states(&device_id, &user, collection_id)?;
        self.storage()?
            .delete_folder_maps(&device_id, &user, collection_id)?;

        let mut cache = self.get_sync_cache()?;
        if collection_id == HIERARCHY_FOLDER_ID {
            cache.clear_hierarchy();
        } else {
            cache.remove_collection(collection_id);
        }
        self.save_sync_cache(&cache)?;

        info!(
            device = device_id.as_str(),
            collection = collection_id,
            "device state reset"
        );
        Ok(())
    }
}
