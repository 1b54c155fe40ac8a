// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;

use pocketsync_core::*;
use tempfile::TempDir;

pub const DEVICE: &str = "android-9f3a";
pub const USER: &str = "alice";

pub fn test_storage() -> Storage {
    Storage::in_memory().unwrap()
}

pub fn test_manager(dir: &TempDir, request: RequestKind) -> StateManager {
    let config =
        ManagerConfig::new(dir.path().join("state.db"), DEVICE, USER).with_request(request);
    StateManager::open(config).unwrap()
}

pub fn state_record(sync_key: &str, folder: &str, timestamp: u64) -> StateRecord {
    StateRecord {
        sync_key: sync_key.to_string(),
        sync_data: vec![1, 2, 3],
        device_id: DEVICE.to_string(),
        folder_id: folder.to_string(),
        user: USER.to_string(),
        sync_mod: 0,
        sync_pending: Vec::new(),
        sync_timestamp: timestamp,
    }
}

pub fn map_record(uid: &str, sync_key: &str, folder: &str, modtime: u64) -> MapRecord {
    MapRecord {
        uid: uid.to_string(),
        modtime,
        sync_key: sync_key.to_string(),
        device_id: DEVICE.to_string(),
        folder_id: folder.to_string(),
        user: USER.to_string(),
        client_id: None,
        deleted: false,
    }
}

pub fn folder_stat(id: &str, server_id: &str, display_name: &str) -> FolderStat {
    FolderStat {
        id: id.to_string(),
        server_id: server_id.to_string(),
        parent_id: "0".to_string(),
        display_name: display_name.to_string(),
        folder_type: 1,
    }
}

pub fn test_device(id: &str) -> DeviceRecord {
    let mut record = DeviceRecord::new(id, "SmartPhone");
    record.user_agent = "PocketSync/1.0".to_string();
    record.properties = HashMap::from([("os".to_string(), "14".to_string())]);
    record
}

/// In-memory content driver serving a fixed folder set.
pub struct MockBackend {
    pub folders: HashMap<String, BackendFolder>,
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend {
            folders: HashMap::new(),
        }
    }

    pub fn with_folder(mut self, folder: BackendFolder) -> Self {
        self.folders.insert(folder.server_id.clone(), folder);
        self
    }
}

impl HierarchyBackend for MockBackend {
    fn get_folder(&self, server_id: &str) -> Option<BackendFolder> {
        self.folders.get(server_id).cloned()
    }
}
