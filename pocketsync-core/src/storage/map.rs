// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Change map operations.
//!
//! Append-only record of client-originated changes, consulted before
//! every outbound change so a device is not sent back what it just told
//! us. Generic collections use `map`; email uses `mailmap`, which carries
//! one flag column per row. Rows stay fresh for the current and previous
//! generation of a series and are garbage-collected beyond that.

use std::collections::HashMap;

use rusqlite::{params, params_from_iter};

use super::{Storage, StorageError};
use crate::synckey::SyncKey;

/// One row of the generic `map` table.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRecord {
    pub uid: String,
    pub modtime: u64,
    pub sync_key: String,
    pub device_id: String,
    pub folder_id: String,
    pub user: String,
    pub client_id: Option<String>,
    pub deleted: bool,
}

/// One row of the `mailmap` table. Exactly one of the flag fields is set
/// per row, the column matching the incoming change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MailMapRecord {
    pub uid: String,
    pub sync_key: String,
    pub device_id: String,
    pub folder_id: String,
    pub user: String,
    pub read: Option<bool>,
    pub flagged: Option<bool>,
    pub deleted: Option<bool>,
    pub changed: Option<bool>,
    pub category: Option<String>,
    pub draft: Option<bool>,
}

impl Storage {
    /// Appends a generic change row.
    pub fn insert_change(&self, record: &MapRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO map (message_uid, sync_modtime, sync_key, sync_devid,
                              sync_folderid, sync_user, sync_clientid, sync_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.uid,
                record.modtime as i64,
                record.sync_key,
                record.device_id,
                record.folder_id,
                record.user,
                record.client_id,
                record.deleted,
            ],
        )?;
        Ok(())
    }

    /// Appends an email change row.
    pub fn insert_mail_change(&self, record: &MailMapRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO mailmap (message_uid, sync_key, sync_devid, sync_folderid,
                                  sync_user, sync_read, sync_flagged, sync_deleted,
                                  sync_changed, sync_category, sync_draft)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.uid,
                record.sync_key,
                record.device_id,
                record.folder_id,
                record.user,
                record.read,
                record.flagged,
                record.deleted,
                record.changed,
                record.category,
                record.draft,
            ],
        )?;
        Ok(())
    }

    /// Looks up the server UID previously assigned to a client Add with
    /// this dedup token, so a retried Add can be answered idempotently.
    pub fn lookup_client_add(
        &self,
        device_id: &str,
        user: &str,
        client_id: &str,
    ) -> Result<Option<String>, StorageError> {
        let result = self.conn.query_row(
            "SELECT message_uid FROM map
             WHERE sync_devid = ?1 AND sync_user = ?2 AND sync_clientid = ?3
             ORDER BY sync_modtime DESC LIMIT 1",
            params![device_id, user, client_id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(uid) => Ok(Some(uid)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// True iff a change row for this uid exists under this sync key:
    /// the client already saw its own change applied.
    pub fn change_exists(
        &self,
        device_id: &str,
        user: &str,
        sync_key: &str,
        uid: &str,
    ) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM map
             WHERE sync_devid = ?1 AND sync_user = ?2 AND sync_key = ?3 AND message_uid = ?4",
            params![device_id, user, sync_key, uid],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Per-uid maximum `sync_modtime` among change rows of one folder,
    /// restricted to the given sync keys and candidate uids. With
    /// `deleted_only`, only rows recording a deletion count.
    pub fn change_timestamps(
        &self,
        device_id: &str,
        user: &str,
        folder_id: &str,
        sync_keys: &[String],
        uids: &[String],
        deleted_only: bool,
    ) -> Result<HashMap<String, u64>, StorageError> {
        if sync_keys.is_empty() || uids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut sql = format!(
            "SELECT message_uid, MAX(sync_modtime) FROM map
             WHERE sync_devid = ? AND sync_user = ? AND sync_folderid = ?
               AND sync_key IN ({})
               AND message_uid IN ({})",
            placeholders(sync_keys.len()),
            placeholders(uids.len()),
        );
        if deleted_only {
            sql.push_str(" AND sync_deleted = 1");
        }
        sql.push_str(" GROUP BY message_uid");

        let mut values: Vec<&str> = vec![device_id, user, folder_id];
        values.extend(sync_keys.iter().map(|k| k.as_str()));
        values.extend(uids.iter().map(|u| u.as_str()));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        rows.collect::<Result<HashMap<_, _>, _>>()
            .map_err(StorageError::Database)
    }

    /// All email change rows of one folder under the given sync keys.
    pub fn mail_change_rows(
        &self,
        device_id: &str,
        user: &str,
        folder_id: &str,
        sync_keys: &[String],
    ) -> Result<Vec<MailMapRecord>, StorageError> {
        if sync_keys.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT message_uid, sync_key, sync_devid, sync_folderid, sync_user,
                    sync_read, sync_flagged, sync_deleted, sync_changed,
                    sync_category, sync_draft
             FROM mailmap
             WHERE sync_devid = ? AND sync_user = ? AND sync_folderid = ?
               AND sync_key IN ({})",
            placeholders(sync_keys.len()),
        );

        let mut values: Vec<&str> = vec![device_id, user, folder_id];
        values.extend(sync_keys.iter().map(|k| k.as_str()));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(MailMapRecord {
                uid: row.get(0)?,
                sync_key: row.get(1)?,
                device_id: row.get(2)?,
                folder_id: row.get(3)?,
                user: row.get(4)?,
                read: row.get(5)?,
                flagged: row.get(6)?,
                deleted: row.get(7)?,
                changed: row.get(8)?,
                category: row.get(9)?,
                draft: row.get(10)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Existence probe over the generic map for one folder and key set.
    pub fn has_changes(
        &self,
        device_id: &str,
        user: &str,
        folder_id: &str,
        sync_keys: &[String],
    ) -> Result<bool, StorageError> {
        if sync_keys.is_empty() {
            return Ok(false);
        }

        let sql = format!(
            "SELECT COUNT(*) FROM map
             WHERE sync_devid = ? AND sync_user = ? AND sync_folderid = ?
               AND sync_key IN ({})",
            placeholders(sync_keys.len()),
        );

        let mut values: Vec<&str> = vec![device_id, user, folder_id];
        values.extend(sync_keys.iter().map(|k| k.as_str()));

        let mut stmt = self.conn.prepare(&sql)?;
        let count: i64 = stmt.query_row(params_from_iter(values), |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Garbage-collects both map tables for one device and user against
    /// the current key `{G}N`: same-series rows below generation N go.
    /// One generation only, not two: map rows drive loop suppression one
    /// step back, unlike state rows.
    pub fn gc_maps(
        &self,
        device_id: &str,
        user: &str,
        current: &SyncKey,
    ) -> Result<usize, StorageError> {
        let mut removed = 0;

        for table in ["map", "mailmap"] {
            let keys: Vec<String> = {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT DISTINCT sync_key FROM {} WHERE sync_devid = ?1 AND sync_user = ?2",
                    table
                ))?;
                let rows = stmt.query_map(params![device_id, user], |row| row.get(0))?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            for key in keys {
                let stale = match SyncKey::parse(&key) {
                    Ok(parsed) => {
                        parsed.series() == current.series() && parsed.counter() < current.counter()
                    }
                    Err(_) => false,
                };
                if stale {
                    removed += self.conn.execute(
                        &format!(
                            "DELETE FROM {} WHERE sync_devid = ?1 AND sync_user = ?2 AND sync_key = ?3",
                            table
                        ),
                        params![device_id, user, key],
                    )?;
                }
            }
        }

        if removed > 0 {
            tracing::debug!(device = device_id, user, removed, "map gc");
        }
        Ok(removed)
    }

    /// Deletes all map and mailmap rows of one folder.
    pub fn delete_folder_maps(
        &self,
        device_id: &str,
        user: &str,
        folder_id: &str,
    ) -> Result<usize, StorageError> {
        let mut rows = self.conn.execute(
            "DELETE FROM map WHERE sync_devid = ?1 AND sync_user = ?2 AND sync_folderid = ?3",
            params![device_id, user, folder_id],
        )?;
        rows += self.conn.execute(
            "DELETE FROM mailmap WHERE sync_devid = ?1 AND sync_user = ?2 AND sync_folderid = ?3",
            params![device_id, user, folder_id],
        )?;
        Ok(rows)
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
