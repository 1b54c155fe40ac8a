// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Versioned schema setup.
//!
//! Every database starts at version 0. On open, each step whose version
//! is above the recorded one is applied, and the whole batch commits or
//! rolls back as a unit. Applied versions are stamped into the
//! `schema_version` table with their apply time.

use rusqlite::Connection;

use super::StorageError;

/// One schema step: plain SQL under a version number. The list returned
/// by [`all_migrations`] is the single source of truth for the layout;
/// new steps are appended, existing ones never change.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Applies pending schema steps.
pub struct MigrationRunner;

impl MigrationRunner {
    /// Brings the database up to the newest step, atomically.
    pub fn run(conn: &Connection, migrations: &[Migration]) -> Result<(), StorageError> {
        // The bookkeeping table itself is created unconditionally; it has
        // to exist before the version can be read.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );",
        )?;

        let applied = Self::current_version(conn)?;
        let pending: Vec<&Migration> = migrations
            .iter()
            .filter(|step| step.version > applied)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        if pending
            .windows(2)
            .any(|pair| pair[0].version >= pair[1].version)
        {
            return Err(StorageError::Migration(
                "schema steps are not in ascending version order".to_string(),
            ));
        }

        let applied_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        conn.execute_batch("BEGIN EXCLUSIVE TRANSACTION;")?;
        for step in pending {
            let outcome = conn.execute_batch(step.sql).and_then(|_| {
                conn.execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                    rusqlite::params![step.version, applied_at],
                )
                .map(|_| ())
            });
            if let Err(e) = outcome {
                conn.execute_batch("ROLLBACK;")?;
                return Err(StorageError::Migration(format!(
                    "schema step v{} '{}' did not apply: {}",
                    step.version, step.name, e
                )));
            }
            tracing::debug!(version = step.version, name = step.name, "schema step applied");
        }
        conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    /// Highest applied step version, 0 for a fresh database. Expects the
    /// `schema_version` table to exist; [`run`](Self::run) creates it.
    pub fn current_version(conn: &Connection) -> Result<u32, StorageError> {
        // MAX over an empty table is NULL
        let version: Option<u32> =
            conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })?;
        Ok(version.unwrap_or(0))
    }
}

/// All schema steps, in version order.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            name: "baseline_schema",
            sql: MIGRATION_V1_BASELINE,
        },
        Migration {
            version: 2,
            name: "map_clientid_index",
            sql: MIGRATION_V2_CLIENTID_INDEX,
        },
    ]
}

/// Migration v1: Baseline schema.
///
/// Column names match the schema of deployed installations and must not
/// be renamed.
const MIGRATION_V1_BASELINE: &str = "
    -- Per-generation sync state snapshots
    CREATE TABLE IF NOT EXISTS state (
        sync_key TEXT PRIMARY KEY,
        sync_data BLOB,
        sync_devid TEXT NOT NULL,
        sync_folderid TEXT NOT NULL,
        sync_user TEXT NOT NULL,
        sync_mod INTEGER NOT NULL DEFAULT 0,
        sync_pending BLOB,
        sync_timestamp INTEGER NOT NULL
    );

    -- Client-originated changes, generic collections
    CREATE TABLE IF NOT EXISTS map (
        message_uid TEXT NOT NULL,
        sync_modtime INTEGER NOT NULL,
        sync_key TEXT NOT NULL,
        sync_devid TEXT NOT NULL,
        sync_folderid TEXT NOT NULL,
        sync_user TEXT NOT NULL,
        sync_clientid TEXT,
        sync_deleted INTEGER NOT NULL DEFAULT 0
    );

    -- Client-originated changes, email (one flag column per row)
    CREATE TABLE IF NOT EXISTS mailmap (
        message_uid TEXT NOT NULL,
        sync_key TEXT NOT NULL,
        sync_devid TEXT NOT NULL,
        sync_folderid TEXT NOT NULL,
        sync_user TEXT NOT NULL,
        sync_read INTEGER,
        sync_flagged INTEGER,
        sync_deleted INTEGER,
        sync_changed INTEGER,
        sync_category TEXT,
        sync_draft INTEGER
    );

    -- Device registry
    CREATE TABLE IF NOT EXISTS device (
        device_id TEXT PRIMARY KEY,
        device_type TEXT NOT NULL,
        device_agent TEXT,
        device_rwstatus INTEGER NOT NULL DEFAULT 0,
        device_supported BLOB,
        device_properties BLOB
    );

    -- Per-user provisioning state
    CREATE TABLE IF NOT EXISTS device_user (
        device_id TEXT NOT NULL,
        device_user TEXT NOT NULL,
        device_policykey INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (device_id, device_user)
    );

    -- Long-poll sync cache
    CREATE TABLE IF NOT EXISTS cache (
        cache_devid TEXT NOT NULL,
        cache_user TEXT NOT NULL,
        cache_data BLOB,
        PRIMARY KEY (cache_devid, cache_user)
    );

    -- Indexes
    CREATE INDEX IF NOT EXISTS idx_state_folder ON state(sync_devid, sync_folderid, sync_user);
    CREATE INDEX IF NOT EXISTS idx_map_context ON map(sync_devid, sync_user, sync_folderid);
    CREATE INDEX IF NOT EXISTS idx_map_key ON map(sync_key);
    CREATE INDEX IF NOT EXISTS idx_mailmap_context ON mailmap(sync_devid, sync_user, sync_folderid);
    CREATE INDEX IF NOT EXISTS idx_mailmap_key ON mailmap(sync_key);
";

/// Migration v2: Index for client-add dedup lookups.
const MIGRATION_V2_CLIENTID_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_map_clientid ON map(sync_devid, sync_user, sync_clientid)
        WHERE sync_clientid IS NOT NULL;
";
