// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! State table operations.
//!
//! One row per (sync key, folder): the serialized snapshot, the pending
//! list carried across truncated responses, and the modification stamp of
//! the generation. Writes use replace semantics keyed by sync key so a
//! retried request overwrites its own failed attempt cleanly.

use rusqlite::params;

use super::{Storage, StorageError};
use crate::synckey::SyncKey;

/// One row of the `state` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRecord {
    /// Raw key text. Rows with unparsable keys can exist (stale series
    /// residue) and are purged by GC, so this is not a [`SyncKey`].
    pub sync_key: String,
    pub sync_data: Vec<u8>,
    pub device_id: String,
    pub folder_id: String,
    pub user: String,
    pub sync_mod: u64,
    pub sync_pending: Vec<u8>,
    pub sync_timestamp: u64,
}

impl Storage {
    /// Loads the state row for `sync_key`, optionally constrained to one
    /// folder.
    pub fn get_state(
        &self,
        sync_key: &str,
        folder_id: Option<&str>,
    ) -> Result<Option<StateRecord>, StorageError> {
        let result = match folder_id {
            Some(folder) => self.conn.query_row(
                "SELECT sync_key, sync_data, sync_devid, sync_folderid, sync_user,
                        sync_mod, sync_pending, sync_timestamp
                 FROM state WHERE sync_key = ?1 AND sync_folderid = ?2",
                params![sync_key, folder],
                map_state_row,
            ),
            None => self.conn.query_row(
                "SELECT sync_key, sync_data, sync_devid, sync_folderid, sync_user,
                        sync_mod, sync_pending, sync_timestamp
                 FROM state WHERE sync_key = ?1",
                params![sync_key],
                map_state_row,
            ),
        };

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Persists a state row with replace semantics.
    ///
    /// DELETE-then-INSERT keyed by sync key, inside one transaction. A
    /// prior failed attempt with the same key (a retried request) is
    /// overwritten; saving the identical record twice yields one row.
    pub fn put_state(&self, record: &StateRecord) -> Result<(), StorageError> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;

        let result = (|| -> Result<(), rusqlite::Error> {
            self.conn.execute(
                "DELETE FROM state WHERE sync_key = ?1",
                params![record.sync_key],
            )?;
            self.conn.execute(
                "INSERT INTO state (sync_key, sync_data, sync_devid, sync_folderid,
                                    sync_user, sync_mod, sync_pending, sync_timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.sync_key,
                    record.sync_data,
                    record.device_id,
                    record.folder_id,
                    record.user,
                    record.sync_mod as i64,
                    record.sync_pending,
                    record.sync_timestamp as i64,
                ],
            )?;
            Ok(())
        })();

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

    /// Stamp-only refresh of one row, guarded by the old stamp for
    /// optimistic concurrency. Returns whether a row was updated; a
    /// concurrent refresh that got there first makes this return false.
    pub fn update_sync_stamp(
        &self,
        sync_key: &str,
        old_mod: u64,
        new_mod: u64,
        timestamp: u64,
    ) -> Result<bool, StorageError> {
        let rows = self.conn.execute(
            "UPDATE state SET sync_mod = ?1, sync_timestamp = ?2
             WHERE sync_key = ?3 AND sync_mod = ?4",
            params![new_mod as i64, timestamp as i64, sync_key, old_mod as i64],
        )?;
        Ok(rows > 0)
    }

    /// Returns (sync_key, sync_data) for every state row of one folder.
    pub fn state_rows_for_folder(
        &self,
        device_id: &str,
        user: &str,
        folder_id: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT sync_key, sync_data FROM state
             WHERE sync_devid = ?1 AND sync_folderid = ?2 AND sync_user = ?3",
        )?;

        let rows = stmt.query_map(params![device_id, folder_id, user], |row| {
            let data: Option<Vec<u8>> = row.get(1)?;
            Ok((row.get::<_, String>(0)?, data.unwrap_or_default()))
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::Database)
    }

    /// Replaces the snapshot blob of one row, leaving everything else.
    pub fn rewrite_sync_data(&self, sync_key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.conn.execute(
            "UPDATE state SET sync_data = ?1 WHERE sync_key = ?2",
            params![data, sync_key],
        )?;
        Ok(())
    }

    /// Newest sync key persisted for one folder, by save timestamp.
    pub fn latest_sync_key(
        &self,
        device_id: &str,
        user: &str,
        folder_id: &str,
    ) -> Result<Option<String>, StorageError> {
        let result = self.conn.query_row(
            "SELECT sync_key FROM state
             WHERE sync_devid = ?1 AND sync_folderid = ?2 AND sync_user = ?3
             ORDER BY sync_timestamp DESC LIMIT 1",
            params![device_id, folder_id, user],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(key) => Ok(Some(key)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// True iff `series` is already in use by `device_id` on a folder
    /// other than `folder_id`. A fresh series that collides must be
    /// regenerated by the caller.
    pub fn series_collides(
        &self,
        series: &str,
        device_id: &str,
        folder_id: &str,
    ) -> Result<bool, StorageError> {
        let pattern = format!("{{{}}}%", series);
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM state
             WHERE sync_devid = ?1 AND sync_folderid != ?2 AND sync_key LIKE ?3",
            params![device_id, folder_id, pattern],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Garbage-collects state rows for one folder against the current key
    /// `{G}N`: same-series rows older than generation N-1 go, as does any
    /// row whose key no longer parses (stale series residue). Generation
    /// N-1 stays so a client that never received key N can re-present it.
    pub fn gc_states(
        &self,
        device_id: &str,
        user: &str,
        folder_id: &str,
        current: &SyncKey,
    ) -> Result<usize, StorageError> {
        let keys: Vec<String> = {
            let mut stmt = self.conn.prepare(
                "SELECT sync_key FROM state
                 WHERE sync_devid = ?1 AND sync_folderid = ?2 AND sync_user = ?3",
            )?;
            let rows = stmt.query_map(params![device_id, folder_id, user], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut removed = 0;
        for key in keys {
            let stale = match SyncKey::parse(&key) {
                Ok(parsed) => {
                    parsed.series() == current.series() && parsed.counter() + 1 < current.counter()
                }
                Err(_) => true,
            };
            if stale {
                removed += self
                    .conn
                    .execute("DELETE FROM state WHERE sync_key = ?1", params![key])?;
            }
        }

        if removed > 0 {
            tracing::debug!(device = device_id, folder = folder_id, removed, "state gc");
        }
        Ok(removed)
    }

    /// Deletes all state rows of one folder.
    pub fn delete_folder_states(
        &self,
        device_id: &str,
        user: &str,
        folder_id: &str,
    ) -> Result<usize, StorageError> {
        let rows = self.conn.execute(
            "DELETE FROM state WHERE sync_devid = ?1 AND sync_user = ?2 AND sync_folderid = ?3",
            params![device_id, user, folder_id],
        )?;
        Ok(rows)
    }
}

fn map_state_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StateRecord> {
    let data: Option<Vec<u8>> = row.get(1)?;
    let pending: Option<Vec<u8>> = row.get(6)?;
    Ok(StateRecord {
        sync_key: row.get(0)?,
        sync_data: data.unwrap_or_default(),
        device_id: row.get(2)?,
        folder_id: row.get(3)?,
        user: row.get(4)?,
        sync_mod: row.get::<_, i64>(5)? as u64,
        sync_pending: pending.unwrap_or_default(),
        sync_timestamp: row.get::<_, i64>(7)? as u64,
    })
}
