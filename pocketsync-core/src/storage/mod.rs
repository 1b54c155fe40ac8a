// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Persistent Store
//!
//! SQLite row store behind the sync-state engine. Six tables: `state`
//! (per-generation snapshots), `map` and `mailmap` (client-originated
//! change record), `device` and `device_user` (registry and policy keys),
//! `cache` (long-poll context). Column names are fixed for compatibility
//! with deployed installations.
//!
//! One `Storage` per request; handles are cheap to open and are released
//! around long-poll sleeps.

mod cache;
mod device;
mod error;
mod map;
pub mod migration;
mod state;

pub use device::RemoveScope;
pub use error::StorageError;
pub use map::{MailMapRecord, MapRecord};
pub use state::StateRecord;

use std::path::Path;

use rusqlite::Connection;

/// SQLite-based storage implementation.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Opens or creates a storage database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Storage { conn };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Creates an in-memory storage (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Storage { conn };
        storage.run_migrations()?;
        Ok(storage)
    }

    /// Runs all pending schema migrations.
    fn run_migrations(&self) -> Result<(), StorageError> {
        let migrations = migration::all_migrations();
        migration::MigrationRunner::run(&self.conn, &migrations)
    }

    /// Returns the current schema version.
    pub fn schema_version(&self) -> Result<u32, StorageError> {
        migration::MigrationRunner::current_version(&self.conn)
    }
}
