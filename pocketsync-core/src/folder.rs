// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Folder and Collection Snapshots
//!
//! The structured values stored opaquely in the `sync_data` column: the
//! folder-hierarchy list for hierarchy sync, and per-collection folder
//! state (IMAP UIDs and flags for email, item stamps for PIM classes).
//! The on-disk encoding is bincode behind a version wrapper so a future
//! revision can be added without a flag day.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::change::CollectionClass;

/// Sentinel folder id under which hierarchy state rows are stored.
pub const HIERARCHY_FOLDER_ID: &str = "foldersync";

/// One entry of the folder-hierarchy snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderStat {
    /// Client-facing folder UID. Stable across renames.
    pub id: String,
    /// Backend server id. Changes when a folder is renamed or moved.
    pub server_id: String,
    pub parent_id: String,
    pub display_name: String,
    pub folder_type: u32,
}

/// Last-known flag values for one mail UID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailFlagState {
    pub read: bool,
    pub flagged: bool,
}

/// Per-folder collection state for email: the IMAP UIDs last reported to
/// the client, with their flag values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailFolderState {
    pub server_id: String,
    pub uids: BTreeMap<u32, MailFlagState>,
}

/// Per-folder collection state for non-email classes: item id to last
/// known modification stamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemFolderState {
    pub server_id: String,
    pub items: BTreeMap<String, u64>,
}

/// A decoded `sync_data` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Snapshot {
    Hierarchy(Vec<FolderStat>),
    Email(EmailFolderState),
    Generic(ItemFolderState),
}

impl Snapshot {
    /// Synthesizes the empty collection object of the right class, used
    /// when an item-level request loads a generation whose `sync_data`
    /// was never populated.
    pub fn empty_collection(class: CollectionClass) -> Self {
        if class.is_email() {
            Snapshot::Email(EmailFolderState::default())
        } else {
            Snapshot::Generic(ItemFolderState::default())
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&VersionedSnapshot::V1(self.clone()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        let VersionedSnapshot::V1(snapshot) = bincode::deserialize(bytes)?;
        Ok(snapshot)
    }

    /// The hierarchy folder list, if this is a hierarchy snapshot.
    pub fn folders(&self) -> Option<&[FolderStat]> {
        match self {
            Snapshot::Hierarchy(folders) => Some(folders),
            _ => None,
        }
    }

    /// Rewrites the embedded server id for `folder_uid`.
    ///
    /// On a hierarchy snapshot this touches the entry whose client UID
    /// matches; on a collection snapshot the folder UID is implied by the
    /// row the snapshot was read from, so the embedded id is replaced
    /// outright. Used when a folder is renamed but keeps its client UID.
    pub fn set_server_id(&mut self, folder_uid: &str, server_id: &str) {
        match self {
            Snapshot::Hierarchy(folders) => {
                for folder in folders.iter_mut() {
                    if folder.id == folder_uid {
                        folder.server_id = server_id.to_string();
                    }
                }
            }
            Snapshot::Email(state) => state.server_id = server_id.to_string(),
            Snapshot::Generic(state) => state.server_id = server_id.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
enum VersionedSnapshot {
    V1(Snapshot),
}
