// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Backend Content Driver Seam
//!
//! The state engine never enumerates folders itself; when a hierarchy
//! change is dispatched to a client it asks the content driver for the
//! folder's current shape. One non-blocking read per folder.

use crate::folder::FolderStat;

/// A folder as the content driver reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFolder {
    pub id: String,
    pub parent_id: String,
    pub display_name: String,
    pub server_id: String,
    pub folder_type: u32,
}

/// Read access to the backend's folder hierarchy.
pub trait HierarchyBackend {
    /// Looks up a folder by backend server id.
    fn get_folder(&self, server_id: &str) -> Option<BackendFolder>;

    /// Builds the stat entry recorded in hierarchy snapshots.
    fn stat_folder(&self, folder: &BackendFolder) -> FolderStat {
        FolderStat {
            id: folder.id.clone(),
            server_id: folder.server_id.clone(),
            parent_id: folder.parent_id.clone(),
            display_name: folder.display_name.clone(),
            folder_type: folder.folder_type,
        }
    }
}
