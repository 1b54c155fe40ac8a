// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device registry and policy key operations.

use std::collections::HashMap;

use rusqlite::{params, params_from_iter};

use super::{Storage, StorageError};
use crate::device::{DeviceFilterField, DeviceListEntry, DeviceRecord, RemoteWipeStatus};

/// What a state removal covers. See [`Storage::remove_state`] for the
/// exact rows each scope deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveScope {
    /// One user's footprint on one device.
    DeviceUser { device: String, user: String },
    /// One collection of one user on one device.
    Collection {
        device: String,
        user: String,
        folder: String,
    },
    /// A whole device, all users.
    Device { device: String },
    /// One user across all devices.
    User { user: String },
    /// The rows of a single sync key.
    SyncKey { sync_key: String },
}

impl Storage {
    /// Loads a device registry row. The policy key is not part of the
    /// `device` table; the caller joins it per user.
    pub fn get_device(&self, device_id: &str) -> Result<Option<DeviceRecord>, StorageError> {
        let result = self.conn.query_row(
            "SELECT device_id, device_type, device_agent, device_rwstatus,
                    device_supported, device_properties
             FROM device WHERE device_id = ?1",
            params![device_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<Vec<u8>>>(4)?,
                    row.get::<_, Option<Vec<u8>>>(5)?,
                ))
            },
        );

        match result {
            Ok((id, device_type, agent, rwstatus, supported, properties)) => {
                let supported: Vec<String> = match supported {
                    Some(blob) if !blob.is_empty() => serde_json::from_slice(&blob)
                        .map_err(|e| StorageError::Serialization(e.to_string()))?,
                    _ => Vec::new(),
                };
                let properties: HashMap<String, String> = match properties {
                    Some(blob) if !blob.is_empty() => serde_json::from_slice(&blob)
                        .map_err(|e| StorageError::Serialization(e.to_string()))?,
                    _ => HashMap::new(),
                };
                Ok(Some(DeviceRecord {
                    id,
                    device_type,
                    user_agent: agent.unwrap_or_default(),
                    rw_status: RemoteWipeStatus::from_i64(rwstatus),
                    supported,
                    properties,
                    policy_key: 0,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Inserts a fresh device row.
    pub fn insert_device(&self, record: &DeviceRecord) -> Result<(), StorageError> {
        let supported = serde_json::to_vec(&record.supported)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let properties = serde_json::to_vec(&record.properties)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.conn.execute(
            "INSERT INTO device (device_id, device_type, device_agent, device_rwstatus,
                                 device_supported, device_properties)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.device_type,
                record.user_agent,
                record.rw_status.as_i64(),
                supported,
                properties,
            ],
        )?;
        Ok(())
    }

    /// Updates an existing device row: user agent and properties always,
    /// the supported list only while the stored one is still empty.
    pub fn update_device(&self, record: &DeviceRecord) -> Result<(), StorageError> {
        let properties = serde_json::to_vec(&record.properties)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.conn.execute(
            "UPDATE device SET device_agent = ?1, device_properties = ?2 WHERE device_id = ?3",
            params![record.user_agent, properties, record.id],
        )?;

        if !record.supported.is_empty() {
            let current = self
                .get_device(&record.id)?
                .map(|d| d.supported)
                .unwrap_or_default();
            if current.is_empty() {
                let supported = serde_json::to_vec(&record.supported)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                self.conn.execute(
                    "UPDATE device SET device_supported = ?1 WHERE device_id = ?2",
                    params![supported, record.id],
                )?;
            }
        }
        Ok(())
    }

    /// Replaces a device's mutable properties.
    pub fn set_device_properties(
        &self,
        device_id: &str,
        properties: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let blob = serde_json::to_vec(properties)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.conn.execute(
            "UPDATE device SET device_properties = ?1 WHERE device_id = ?2",
            params![blob, device_id],
        )?;
        Ok(())
    }

    /// Number of registry rows matching the device (and user, if given).
    /// 0 means the device is unknown.
    pub fn device_exists(
        &self,
        device_id: &str,
        user: Option<&str>,
    ) -> Result<u32, StorageError> {
        let count: i64 = match user {
            Some(user) => self.conn.query_row(
                "SELECT COUNT(*) FROM device_user WHERE device_id = ?1 AND device_user = ?2",
                params![device_id, user],
                |row| row.get(0),
            )?,
            None => self.conn.query_row(
                "SELECT COUNT(*) FROM device WHERE device_id = ?1",
                params![device_id],
                |row| row.get(0),
            )?,
        };
        Ok(count as u32)
    }

    /// Creates the (device, user) pairing if it does not exist yet, with
    /// policy key 0 (not provisioned).
    pub fn ensure_device_user(&self, device_id: &str, user: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO device_user (device_id, device_user, device_policykey)
             VALUES (?1, ?2, 0)",
            params![device_id, user],
        )?;
        Ok(())
    }

    /// Policy key for one (device, user); 0 when absent or unprovisioned.
    pub fn get_policy_key(&self, device_id: &str, user: &str) -> Result<u64, StorageError> {
        let result = self.conn.query_row(
            "SELECT device_policykey FROM device_user WHERE device_id = ?1 AND device_user = ?2",
            params![device_id, user],
            |row| row.get::<_, i64>(0),
        );

        match result {
            Ok(key) => Ok(key as u64),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    pub fn set_policy_key(
        &self,
        device_id: &str,
        user: &str,
        policy_key: u64,
    ) -> Result<(), StorageError> {
        self.ensure_device_user(device_id, user)?;
        self.conn.execute(
            "UPDATE device_user SET device_policykey = ?1
             WHERE device_id = ?2 AND device_user = ?3",
            params![policy_key as i64, device_id, user],
        )?;
        Ok(())
    }

    /// Zeroes every policy key in the installation, forcing all devices
    /// back through provisioning.
    pub fn reset_all_policy_keys(&self) -> Result<usize, StorageError> {
        let rows = self
            .conn
            .execute("UPDATE device_user SET device_policykey = 0", [])?;
        Ok(rows)
    }

    /// Zeroes the policy keys of one device, all users.
    pub fn reset_device_policy_keys(&self, device_id: &str) -> Result<usize, StorageError> {
        let rows = self.conn.execute(
            "UPDATE device_user SET device_policykey = 0 WHERE device_id = ?1",
            params![device_id],
        )?;
        Ok(rows)
    }

    pub fn set_rwstatus(
        &self,
        device_id: &str,
        status: RemoteWipeStatus,
    ) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE device SET device_rwstatus = ?1 WHERE device_id = ?2",
            params![status.as_i64(), device_id],
        )?;
        Ok(())
    }

    /// Lists (device, device_user) rows, optionally restricted to one
    /// user and filtered with LIKE patterns over the closed field set.
    pub fn list_devices(
        &self,
        user: Option<&str>,
        filter: &[(DeviceFilterField, String)],
    ) -> Result<Vec<DeviceListEntry>, StorageError> {
        let mut sql = String::from(
            "SELECT d.device_id, d.device_type, d.device_agent, d.device_rwstatus,
                    u.device_user, u.device_policykey
             FROM device d JOIN device_user u ON d.device_id = u.device_id",
        );

        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(user) = user {
            clauses.push("u.device_user = ?".to_string());
            values.push(user.to_string());
        }
        for (field, pattern) in filter {
            clauses.push(format!("{} LIKE ?", field.column()));
            values.push(pattern.clone());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY d.device_id, u.device_user");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok(DeviceListEntry {
                device_id: row.get(0)?,
                device_type: row.get(1)?,
                user_agent: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                rw_status: RemoteWipeStatus::from_i64(row.get::<_, i64>(3)?),
                user: row.get(4)?,
                policy_key: row.get::<_, i64>(5)? as u64,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Newest state save timestamp for one (device, user), across all
    /// folders.
    pub fn last_sync_timestamp(
        &self,
        device_id: &str,
        user: &str,
    ) -> Result<Option<u64>, StorageError> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(sync_timestamp) FROM state WHERE sync_devid = ?1 AND sync_user = ?2",
            params![device_id, user],
            |row| row.get(0),
        )?;
        Ok(max.map(|v| v as u64))
    }

    /// Multi-mode state removal, in one transaction.
    ///
    /// A user-scoped removal on a device whose remote-wipe status is
    /// armed escalates to full-device removal; dropping only the user
    /// would leave the device row behind still armed for wipe. After a
    /// user-wide removal, devices with no remaining users are dropped.
    pub fn remove_state(&self, scope: &RemoveScope) -> Result<(), StorageError> {
        let scope = match scope {
            RemoveScope::DeviceUser { device, user } => match self.get_device(device)? {
                Some(rec) if rec.rw_status.is_wipe_armed() => {
                    tracing::info!(
                        device = device.as_str(),
                        user = user.as_str(),
                        "wipe armed, escalating removal to whole device"
                    );
                    RemoveScope::Device {
                        device: device.clone(),
                    }
                }
                _ => scope.clone(),
            },
            other => other.clone(),
        };

        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        let result = self.remove_scope_rows(&scope);
        match result {
            Ok(()) => {
                self.conn.execute_batch("COMMIT;")?;
                Ok(())
            }
            Err(e) => {
                self.conn.execute_batch("ROLLBACK;")?;
                Err(StorageError::Database(e))
            }
        }
    }

    fn remove_scope_rows(&self, scope: &RemoveScope) -> Result<(), rusqlite::Error> {
        match scope {
            RemoveScope::Device { device } => {
                for table in ["state", "map", "mailmap"] {
                    self.conn.execute(
                        &format!("DELETE FROM {} WHERE sync_devid = ?1", table),
                        params![device],
                    )?;
                }
                self.conn.execute(
                    "DELETE FROM device_user WHERE device_id = ?1",
                    params![device],
                )?;
                self.conn
                    .execute("DELETE FROM device WHERE device_id = ?1", params![device])?;
                self.conn
                    .execute("DELETE FROM cache WHERE cache_devid = ?1", params![device])?;
            }
            RemoveScope::DeviceUser { device, user } => {
                for table in ["state", "map", "mailmap"] {
                    self.conn.execute(
                        &format!(
                            "DELETE FROM {} WHERE sync_devid = ?1 AND sync_user = ?2",
                            table
                        ),
                        params![device, user],
                    )?;
                }
                self.conn.execute(
                    "DELETE FROM device_user WHERE device_id = ?1 AND device_user = ?2",
                    params![device, user],
                )?;
                self.conn.execute(
                    "DELETE FROM cache WHERE cache_devid = ?1 AND cache_user = ?2",
                    params![device, user],
                )?;
            }
            RemoveScope::Collection {
                device,
                user,
                folder,
            } => {
                for table in ["state", "map", "mailmap"] {
                    self.conn.execute(
                        &format!(
                            "DELETE FROM {} WHERE sync_devid = ?1 AND sync_user = ?2 AND sync_folderid = ?3",
                            table
                        ),
                        params![device, user, folder],
                    )?;
                }
            }
            RemoveScope::User { user } => {
                for table in ["state", "map", "mailmap"] {
                    self.conn.execute(
                        &format!("DELETE FROM {} WHERE sync_user = ?1", table),
                        params![user],
                    )?;
                }
                self.conn.execute(
                    "DELETE FROM device_user WHERE device_user = ?1",
                    params![user],
                )?;
                self.conn
                    .execute("DELETE FROM cache WHERE cache_user = ?1", params![user])?;
                // Orphan cleanup: devices with no users left
                self.conn.execute(
                    "DELETE FROM device WHERE device_id NOT IN
                         (SELECT device_id FROM device_user)",
                    [],
                )?;
            }
            RemoveScope::SyncKey { sync_key } => {
                for table in ["state", "map", "mailmap"] {
                    self.conn.execute(
                        &format!("DELETE FROM {} WHERE sync_key = ?1", table),
                        params![sync_key],
                    )?;
                }
            }
        }
        Ok(())
    }
}
