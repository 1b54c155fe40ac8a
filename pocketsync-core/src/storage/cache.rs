// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync cache table operations.

use rusqlite::params;

use super::{Storage, StorageError};

impl Storage {
    /// Loads the raw cache blob for one (device, user), if present.
    pub fn get_cache(&self, device_id: &str, user: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let result = self.conn.query_row(
            "SELECT cache_data FROM cache WHERE cache_devid = ?1 AND cache_user = ?2",
            params![device_id, user],
            |row| row.get::<_, Option<Vec<u8>>>(0),
        );

        match result {
            Ok(blob) => Ok(Some(blob.unwrap_or_default())),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    /// Upserts the cache blob for one (device, user).
    pub fn put_cache(&self, device_id: &str, user: &str, blob: &[u8]) -> Result<(), StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM cache WHERE cache_devid = ?1 AND cache_user = ?2",
            params![device_id, user],
            |row| row.get(0),
        )?;

        if count > 0 {
            self.conn.execute(
                "UPDATE cache SET cache_data = ?1 WHERE cache_devid = ?2 AND cache_user = ?3",
                params![blob, device_id, user],
            )?;
        } else {
            self.conn.execute(
                "INSERT INTO cache (cache_devid, cache_user, cache_data) VALUES (?1, ?2, ?3)",
                params![device_id, user, blob],
            )?;
        }
        Ok(())
    }

    /// Deletes cache rows matching the non-empty arguments. With neither
    /// argument there is nothing to match and nothing is deleted.
    pub fn delete_cache(
        &self,
        device_id: Option<&str>,
        user: Option<&str>,
    ) -> Result<usize, StorageError> {
        let rows = match (device_id, user) {
            (Some(device), Some(user)) => self.conn.execute(
                "DELETE FROM cache WHERE cache_devid = ?1 AND cache_user = ?2",
                params![device, user],
            )?,
            (Some(device), None) => self
                .conn
                .execute("DELETE FROM cache WHERE cache_devid = ?1", params![device])?,
            (None, Some(user)) => self
                .conn
                .execute("DELETE FROM cache WHERE cache_user = ?1", params![user])?,
            (None, None) => 0,
        };
        Ok(rows)
    }
}
