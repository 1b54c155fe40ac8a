// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for the schema migration framework

use pocketsync_core::storage::migration::all_migrations;
use pocketsync_core::Storage;

#[test]
fn test_fresh_database_is_fully_migrated() {
    let storage = Storage::in_memory().unwrap();
    let latest = all_migrations().last().unwrap().version;
    assert_eq!(storage.schema_version().unwrap(), latest);
}

#[test]
fn test_migrations_are_ordered_and_named() {
    let migrations = all_migrations();
    assert!(!migrations.is_empty());
    for window in migrations.windows(2) {
        assert!(window[0].version < window[1].version);
    }
    for migration in &migrations {
        assert!(!migration.name.is_empty());
    }
}

#[test]
fn test_reopening_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    let storage = Storage::open(&path).unwrap();
    let version = storage.schema_version().unwrap();
    drop(storage);

    let reopened = Storage::open(&path).unwrap();
    assert_eq!(reopened.schema_version().unwrap(), version);
}
