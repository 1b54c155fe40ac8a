// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Change import and loop suppression.
//!
//! Client-originated changes are recorded in the map tables so the next
//! export cycle can tell "the client already has this" from "the client
//! needs this". Server-originated changes are cleared from the pending
//! list on their way out to the client.

use std::collections::HashMap;

use ring::digest;

use super::{StateError, StateManager, StateResult};
use crate::backend::HierarchyBackend;
use crate::change::{Change, ChangeOrigin, ChangeType, ItemChange, RequestKind};
use crate::folder::{FolderStat, Snapshot};
use crate::storage::{MailMapRecord, MapRecord};
use crate::synckey::SyncKey;

/// Optional context for [`StateManager::update_state_with`].
#[derive(Default)]
pub struct UpdateStateOptions<'a> {
    /// Records the change under this user instead of the request user
    /// (shared-folder sync).
    pub user: Option<&'a str>,
    /// Dedup token override for a client Add; falls back to the token
    /// carried by the change itself.
    pub client_id: Option<&'a str>,
    /// Content driver, consulted when a dispatched hierarchy change must
    /// refresh the in-memory folder snapshot.
    pub backend: Option<&'a dyn HierarchyBackend>,
}

impl StateManager {
    /// Records one change against the current state. See
    /// [`update_state_with`](Self::update_state_with) for the semantics;
    /// this entry point uses no overrides and no backend.
    pub fn update_state(&mut self, change: &Change, origin: ChangeOrigin) -> StateResult<()> {
        self.update_state_with(change, origin, &UpdateStateOptions::default())
    }

    /// Records one change against the current state.
    ///
    /// Client-originated folder changes mutate the in-memory folder list
    /// only; the new list rides out with the next save. Client-originated
    /// item changes append a row to the change map: `mailmap` with the
    /// single matching flag column for email, the generic `map` otherwise.
    /// A client change arriving without a loaded sync key (a move not
    /// carrying one) runs under the latest key known for the collection.
    ///
    /// Server-originated changes are removed from the pending list so they
    /// are not redelivered; dispatched hierarchy changes additionally
    /// refresh the in-memory snapshot from the content driver.
    pub fn update_state_with(
        &mut self,
        change: &Change,
        origin: ChangeOrigin,
        opts: &UpdateStateOptions<'_>,
    ) -> StateResult<()> {
        match origin {
            ChangeOrigin::Client => self.import_client_change(change, opts),
            ChangeOrigin::Server => self.accept_server_change(change, opts),
        }
    }

    fn import_client_change(
        &mut self,
        change: &Change,
        opts: &UpdateStateOptions<'_>,
    ) -> StateResult<()> {
        self.changes_seen = true;

        match change {
            Change::Folder { kind, stat } => {
                if self.config.request != RequestKind::FolderSync {
                    return Err(StateError::InvariantViolation(
                        "folder change outside a hierarchy request".to_string(),
                    ));
                }
                let kind = *kind;
                let stat = stat.clone();
                let folders = self.hierarchy_mut();
                folders.retain(|f| f.id != stat.id);
                if kind != ChangeType::Delete {
                    folders.push(stat);
                }
                // No database write here; the list is persisted by the
                // next save.
                Ok(())
            }
            Change::Item(item) => {
                let collection = self.collection.clone().ok_or_else(|| {
                    StateError::InvariantViolation(
                        "item change without a collection".to_string(),
                    )
                })?;

                let key = if let Some(key) = self.sync_key.clone() {
                    key
                } else {
                    self.resolve_latest_key()?
                };
                let user = opts
                    .user
                    .unwrap_or(self.config.user.as_str())
                    .to_string();

                if collection.class.is_email() && item.kind != ChangeType::Add {
                    let record =
                        mail_map_record(item, &key, &self.config.device_id, &collection.id, &user);
                    self.storage()?.insert_mail_change(&record)?;
                } else {
                    let client_id = opts
                        .client_id
                        .map(str::to_string)
                        .or_else(|| item.client_id.clone());
                    let record = MapRecord {
                        uid: item.uid.clone(),
                        modtime: item.modtime,
                        sync_key: key.to_string(),
                        device_id: self.config.device_id.clone(),
                        folder_id: collection.id.clone(),
                        user,
                        client_id,
                        deleted: item.kind == ChangeType::Delete,
                    };
                    self.storage()?.insert_change(&record)?;
                }
                Ok(())
            }
        }
    }

    fn accept_server_change(
        &mut self,
        change: &Change,
        opts: &UpdateStateOptions<'_>,
    ) -> StateResult<()> {
        self.changes_seen = true;

        let uid = change.uid().to_string();
        if let Some(pos) = self.pending.iter().position(|p| p.uid() == uid) {
            self.pending.remove(pos);
        }

        if self.config.request == RequestKind::FolderSync {
            if let Change::Folder { kind, stat } = change {
                let fresh = if *kind == ChangeType::Delete {
                    None
                } else {
                    Some(refresh_folder_stat(stat, opts.backend))
                };
                let folders = self.hierarchy_mut();
                folders.retain(|f| f.id != stat.id);
                if let Some(fresh) = fresh {
                    folders.push(fresh);
                }
            }
        }
        Ok(())
    }

    /// The previously assigned server UID for a client Add carrying this
    /// dedup token, if the Add was already imported. Lets the handler
    /// answer a retried Add without creating a second item.
    pub fn is_duplicate_pim_addition(&self, client_id: &str) -> StateResult<Option<String>> {
        Ok(self.storage()?.lookup_client_add(
            &self.config.device_id,
            &self.config.user,
            client_id,
        )?)
    }

    /// True iff this uid already has a change row under this sync key:
    /// the client already saw its own change applied in this generation.
    pub fn is_duplicate_pim_change(&self, uid: &str, sync_key: &str) -> StateResult<bool> {
        let key = SyncKey::parse(sync_key)?;
        Ok(self.storage()?.change_exists(
            &self.config.device_id,
            &self.config.user,
            &key.to_string(),
            uid,
        )?)
    }

    /// For each candidate uid, the newest map modtime recorded under the
    /// current or previous generation of the loaded series. A candidate
    /// whose server modtime is at or below this value is an echo of the
    /// client's own change and must be dropped. Delete candidates only
    /// match rows that recorded a deletion.
    pub fn pim_change_timestamps(
        &self,
        changes: &[ItemChange],
    ) -> StateResult<HashMap<String, u64>> {
        let keys = self.suppression_keys()?;
        let folder = self.state_folder_id().to_string();

        let other_uids: Vec<String> = changes
            .iter()
            .filter(|c| c.kind != ChangeType::Delete)
            .map(|c| c.uid.clone())
            .collect();
        let deleted_uids: Vec<String> = changes
            .iter()
            .filter(|c| c.kind == ChangeType::Delete)
            .map(|c| c.uid.clone())
            .collect();

        let storage = self.storage()?;
        let mut stamps = storage.change_timestamps(
            &self.config.device_id,
            &self.config.user,
            &folder,
            &keys,
            &other_uids,
            false,
        )?;
        stamps.extend(storage.change_timestamps(
            &self.config.device_id,
            &self.config.user,
            &folder,
            &keys,
            &deleted_uids,
            true,
        )?);
        Ok(stamps)
    }

    /// Per-uid agreement between candidate email changes and the recorded
    /// mailmap rows. A candidate whose entry for its own kind is true is
    /// an echo and must be dropped.
    pub fn mail_map_changes(
        &self,
        changes: &[ItemChange],
    ) -> StateResult<HashMap<String, HashMap<ChangeType, bool>>> {
        let keys = self.suppression_keys()?;
        let folder = self.state_folder_id().to_string();

        let rows = self.storage()?.mail_change_rows(
            &self.config.device_id,
            &self.config.user,
            &folder,
            &keys,
        )?;

        let mut by_uid: HashMap<&str, &MailMapRecord> = HashMap::new();
        for row in &rows {
            by_uid.insert(row.uid.as_str(), row);
        }

        let mut result: HashMap<String, HashMap<ChangeType, bool>> = HashMap::new();
        for change in changes {
            let row = match by_uid.get(change.uid.as_str()) {
                Some(row) => *row,
                None => continue,
            };
            let agrees = match change.kind {
                ChangeType::Flags => {
                    let category_match = !change.categories.is_empty() && {
                        let digest = category_digest(&change.categories);
                        row.category.as_deref() == Some(digest.as_str())
                    };
                    (row.read.is_some() && row.read == change.flags.read)
                        || (row.flagged.is_some() && row.flagged == change.flags.flagged)
                        || (row.draft.is_some() && row.draft == change.flags.draft)
                        || category_match
                }
                ChangeType::Delete => row.deleted == Some(true),
                ChangeType::Change => row.changed == Some(true),
                ChangeType::Draft => row.draft == Some(true),
                ChangeType::Add => false,
            };
            result
                .entry(change.uid.clone())
                .or_default()
                .insert(change.kind, agrees);
        }
        Ok(result)
    }

    /// Cheap probe to skip loop suppression when the map holds nothing
    /// for this context. Email always reports true: consulting the
    /// mailmap pays off on every mail export cycle.
    pub fn has_pim_changes(&self) -> StateResult<bool> {
        if self
            .collection
            .as_ref()
            .map(|c| c.class.is_email())
            .unwrap_or(false)
        {
            return Ok(true);
        }
        let keys = self.suppression_keys()?;
        let folder = self.state_folder_id().to_string();
        Ok(self.storage()?.has_changes(
            &self.config.device_id,
            &self.config.user,
            &folder,
            &keys,
        )?)
    }

    /// The keys map rows stay fresh under: the loaded key plus the
    /// previous generation of the same series.
    fn suppression_keys(&self) -> StateResult<Vec<String>> {
        let key = self.sync_key.as_ref().ok_or_else(|| {
            StateError::InvariantViolation("no sync key loaded".to_string())
        })?;
        let mut keys = vec![key.to_string()];
        if let Some(previous) = key.previous() {
            keys.push(previous.to_string());
        }
        Ok(keys)
    }

    fn resolve_latest_key(&mut self) -> StateResult<SyncKey> {
        let folder = self.state_folder_id().to_string();
        let key = self
            .get_latest_sync_key_for_collection(&folder)?
            .ok_or_else(|| StateError::StateGone(folder))?;
        self.sync_key = Some(key.clone());
        Ok(key)
    }

    fn hierarchy_mut(&mut self) -> &mut Vec<FolderStat> {
        if !matches!(self.snapshot, Some(Snapshot::Hierarchy(_))) {
            self.snapshot = Some(Snapshot::Hierarchy(Vec::new()));
        }
        match self.snapshot.as_mut() {
            Some(Snapshot::Hierarchy(folders)) => folders,
            _ => unreachable!("snapshot was just set to a hierarchy"),
        }
    }
}

/// Builds the mailmap row for one email change: exactly one flag column
/// set, matching the incoming change. A Change carrying flag or category
/// values is really a flag update and is recorded as one.
fn mail_map_record(
    item: &ItemChange,
    key: &SyncKey,
    device_id: &str,
    folder_id: &str,
    user: &str,
) -> MailMapRecord {
    let mut record = MailMapRecord {
        uid: item.uid.clone(),
        sync_key: key.to_string(),
        device_id: device_id.to_string(),
        folder_id: folder_id.to_string(),
        user: user.to_string(),
        ..Default::default()
    };

    let kind = if item.kind == ChangeType::Change
        && !(item.flags.is_empty() && item.categories.is_empty())
    {
        ChangeType::Flags
    } else {
        item.kind
    };

    match kind {
        ChangeType::Delete => record.deleted = Some(true),
        ChangeType::Draft => record.draft = Some(true),
        ChangeType::Flags => {
            if let Some(read) = item.flags.read {
                record.read = Some(read);
            } else if let Some(flagged) = item.flags.flagged {
                record.flagged = Some(flagged);
            } else if let Some(draft) = item.flags.draft {
                record.draft = Some(draft);
            } else if !item.categories.is_empty() {
                record.category = Some(category_digest(&item.categories));
            } else {
                record.changed = Some(true);
            }
        }
        ChangeType::Add | ChangeType::Change => record.changed = Some(true),
    }
    record
}

/// Re-stats a dispatched folder through the content driver; falls back to
/// the stat carried by the change when the driver has nothing fresher.
fn refresh_folder_stat(stat: &FolderStat, backend: Option<&dyn HierarchyBackend>) -> FolderStat {
    match backend {
        Some(backend) => backend
            .get_folder(&stat.server_id)
            .map(|folder| backend.stat_folder(&folder))
            .unwrap_or_else(|| stat.clone()),
        None => stat.clone(),
    }
}

/// Digest of the concatenated category strings, as stored in the
/// `sync_category` column.
pub(crate) fn category_digest(categories: &[String]) -> String {
    let joined = categories.concat();
    hex::encode(digest::digest(&digest::SHA256, joined.as_bytes()).as_ref())
}
