// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Change Vocabulary
//!
//! The record types a protocol handler feeds into (and reads back from)
//! the state manager: what changed, in which direction, during which kind
//! of request, and for which collection class.

use serde::{Deserialize, Serialize};

use crate::folder::FolderStat;

/// The kind of a single change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Add,
    Change,
    Delete,
    Flags,
    Draft,
}

/// Who originated a change.
///
/// Client-originated changes are imported into the change record so they
/// are not echoed back; server-originated changes are being dispatched to
/// the client and are cleared from the pending list on the way out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Client,
    Server,
}

/// The protocol command a manager instance is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Sync,
    FolderSync,
    Ping,
    MoveItems,
}

/// Collection content class. Only email is special-cased by the state
/// engine (flag-level change records, unconditional change probe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionClass {
    Email,
    Contacts,
    Calendar,
    Tasks,
    Notes,
}

impl CollectionClass {
    pub fn is_email(self) -> bool {
        matches!(self, CollectionClass::Email)
    }
}

/// Message flag values carried by an email change. Only the flags the
/// client actually sent are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailFlags {
    pub read: Option<bool>,
    pub flagged: Option<bool>,
    pub draft: Option<bool>,
}

impl MailFlags {
    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.flagged.is_none() && self.draft.is_none()
    }
}

/// A single item-level change, client- or server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemChange {
    /// Server-assigned item UID.
    pub uid: String,
    pub kind: ChangeType,
    /// Modification stamp of the item at the time of the change.
    pub modtime: u64,
    pub flags: MailFlags,
    pub categories: Vec<String>,
    /// Device-assigned dedup token, present on client Adds.
    pub client_id: Option<String>,
}

impl ItemChange {
    pub fn new(uid: impl Into<String>, kind: ChangeType, modtime: u64) -> Self {
        ItemChange {
            uid: uid.into(),
            kind,
            modtime,
            flags: MailFlags::default(),
            categories: Vec::new(),
            client_id: None,
        }
    }
}

/// A change as the state manager sees it: either a folder-hierarchy entry
/// or an item inside one collection. This is also the unit of the pending
/// list carried across truncated responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    Folder { kind: ChangeType, stat: FolderStat },
    Item(ItemChange),
}

impl Change {
    /// The identifier used to match changes across the pending list.
    pub fn uid(&self) -> &str {
        match self {
            Change::Folder { stat, .. } => &stat.id,
            Change::Item(item) => &item.uid,
        }
    }

    pub fn kind(&self) -> ChangeType {
        match self {
            Change::Folder { kind, .. } => *kind,
            Change::Item(item) => item.kind,
        }
    }
}

/// Inbound collection metadata for an item-level request. The class is
/// always taken from here; it is never guessed from a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMeta {
    pub id: String,
    pub class: CollectionClass,
}

impl CollectionMeta {
    pub fn new(id: impl Into<String>, class: CollectionClass) -> Self {
        CollectionMeta {
            id: id.into(),
            class,
        }
    }
}

/// Encodes a pending-changes list for the `sync_pending` column. An empty
/// list encodes to an empty blob.
pub fn encode_pending(changes: &[Change]) -> Result<Vec<u8>, bincode::Error> {
    if changes.is_empty() {
        return Ok(Vec::new());
    }
    bincode::serialize(&VersionedPending::V1(changes.to_vec()))
}

/// Decodes a `sync_pending` blob; an empty blob is an empty list.
pub fn decode_pending(bytes: &[u8]) -> Result<Vec<Change>, bincode::Error> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    let VersionedPending::V1(changes) = bincode::deserialize(bytes)?;
    Ok(changes)
}

#[derive(Serialize, Deserialize)]
enum VersionedPending {
    V1(Vec<Change>),
}
