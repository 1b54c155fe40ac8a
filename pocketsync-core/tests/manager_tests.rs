// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end tests for the state manager façade

mod common;

use std::collections::BTreeMap;

use common::{folder_stat, test_manager, MockBackend, DEVICE, USER};
use pocketsync_core::*;

fn contacts() -> CollectionMeta {
    CollectionMeta::new("contacts", CollectionClass::Contacts)
}

fn inbox() -> CollectionMeta {
    CollectionMeta::new("INBOX", CollectionClass::Email)
}

fn contacts_snapshot() -> Snapshot {
    Snapshot::Generic(ItemFolderState {
        server_id: "srv-contacts".to_string(),
        items: BTreeMap::new(),
    })
}

fn flag_change(uid: &str, read: bool) -> Change {
    let mut item = ItemChange::new(uid, ChangeType::Flags, 0);
    item.flags.read = Some(read);
    Change::Item(item)
}

#[test]
fn test_first_sync() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());

    // Bootstrap key "0": a fresh series at generation 1
    let key = manager.get_new_sync_key(Some("0")).unwrap();
    assert_eq!(key.counter(), 1);

    manager.set_new_sync_key(&key.to_string()).unwrap();
    manager.set_this_sync_stamp(12345);
    manager.set_snapshot(contacts_snapshot());
    manager.save().unwrap();

    let storage = Storage::open(dir.path().join("state.db")).unwrap();
    let row = storage
        .get_state(&key.to_string(), Some("contacts"))
        .unwrap()
        .unwrap();
    // Generation 1 always persists stamp 0 so the next cycle exposes the
    // full backlog, whatever the backend reported
    assert_eq!(row.sync_mod, 0);
    assert!(!row.sync_data.is_empty());
    assert_eq!(row.device_id, DEVICE);
    assert_eq!(row.user, USER);
}

#[test]
fn test_get_new_sync_key_advances_series() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(&dir, RequestKind::Sync);

    let next = manager.get_new_sync_key(Some("{abc}6")).unwrap();
    assert_eq!(next.to_string(), "{abc}7");

    assert!(manager.get_new_sync_key(Some("junk")).is_err());
}

#[test]
fn test_save_load_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());
    manager.set_new_sync_key("{abc}2").unwrap();
    manager.set_this_sync_stamp(777);
    manager.set_snapshot(contacts_snapshot());
    manager.set_pending(vec![Change::Item(ItemChange::new(
        "c9",
        ChangeType::Change,
        50,
    ))]);
    manager.save().unwrap();

    let mut next_request = test_manager(&dir, RequestKind::Sync);
    next_request.load_state("{abc}2", Some(contacts())).unwrap();

    assert_eq!(next_request.snapshot(), Some(&contacts_snapshot()));
    assert_eq!(next_request.pending().len(), 1);
    assert_eq!(next_request.pending()[0].uid(), "c9");
    // Stamps restore with this == last, so a client-to-server-only cycle
    // leaves the stamp unchanged
    assert_eq!(next_request.last_sync_stamp(), 777);
    assert_eq!(next_request.this_sync_stamp(), 777);
}

#[test]
fn test_key_mismatch_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);

    let err = manager
        .load_state("{abc}7", Some(contacts()))
        .unwrap_err();
    assert!(matches!(err, StateError::StateGone(_)));

    let err = manager.load_state("not-a-key", Some(contacts())).unwrap_err();
    assert!(matches!(err, StateError::Protocol(_)));
}

#[test]
fn test_empty_sync_data_synthesizes_collection() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::open(dir.path().join("state.db")).unwrap();
    storage
        .put_state(&StateRecord {
            sync_key: "{abc}1".to_string(),
            sync_data: Vec::new(),
            device_id: DEVICE.to_string(),
            folder_id: "INBOX".to_string(),
            user: USER.to_string(),
            sync_mod: 0,
            sync_pending: Vec::new(),
            sync_timestamp: 1,
        })
        .unwrap();
    drop(storage);

    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.load_state("{abc}1", Some(inbox())).unwrap();

    // The class comes from the inbound metadata, never from the blob
    assert_eq!(
        manager.snapshot(),
        Some(&Snapshot::Email(EmailFolderState::default()))
    );
}

#[test]
fn test_save_cycles_gc_old_generations() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());

    for counter in 1..=4 {
        manager
            .set_new_sync_key(&format!("{{abc}}{}", counter))
            .unwrap();
        manager.set_snapshot(contacts_snapshot());
        manager.save().unwrap();
    }

    let storage = Storage::open(dir.path().join("state.db")).unwrap();
    let mut keys: Vec<String> = storage
        .state_rows_for_folder(DEVICE, USER, "contacts")
        .unwrap()
        .into_iter()
        .map(|(key, _)| key)
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["{abc}3".to_string(), "{abc}4".to_string()]);
}

#[test]
fn test_save_gc_covers_map_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());

    manager.set_new_sync_key("{abc}3").unwrap();
    manager
        .update_state(
            &Change::Item(ItemChange::new("c1", ChangeType::Change, 100)),
            ChangeOrigin::Client,
        )
        .unwrap();
    assert!(manager.is_duplicate_pim_change("c1", "{abc}3").unwrap());

    manager.set_new_sync_key("{abc}4").unwrap();
    manager.set_snapshot(contacts_snapshot());
    manager.save().unwrap();

    // Map rows below the current generation are collected at save
    assert!(!manager.is_duplicate_pim_change("c1", "{abc}3").unwrap());
}

#[test]
fn test_update_sync_stamp_guards() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());
    manager.set_new_sync_key("{abc}2").unwrap();
    manager.set_this_sync_stamp(1000);
    manager.set_snapshot(contacts_snapshot());
    manager.save().unwrap();

    let mut idle = test_manager(&dir, RequestKind::Sync);
    idle.load_state("{abc}2", Some(contacts())).unwrap();

    // Gap below the threshold: nothing to do
    idle.set_this_sync_stamp(10_000);
    assert!(!idle.update_sync_stamp().unwrap());

    // Wide gap on an idle collection: stamp-only refresh
    idle.set_this_sync_stamp(40_000);
    assert!(idle.update_sync_stamp().unwrap());
    assert_eq!(idle.last_sync_stamp(), 40_000);

    let storage = Storage::open(dir.path().join("state.db")).unwrap();
    let row = storage.get_state("{abc}2", None).unwrap().unwrap();
    assert_eq!(row.sync_mod, 40_000);
}

#[test]
fn test_update_sync_stamp_skipped_after_changes() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());
    manager.set_new_sync_key("{abc}2").unwrap();
    manager.set_this_sync_stamp(1000);
    manager.set_snapshot(contacts_snapshot());
    manager.save().unwrap();

    let mut busy = test_manager(&dir, RequestKind::Sync);
    busy.load_state("{abc}2", Some(contacts())).unwrap();
    busy.update_state(
        &Change::Item(ItemChange::new("c1", ChangeType::Change, 100)),
        ChangeOrigin::Client,
    )
    .unwrap();

    busy.set_this_sync_stamp(90_000);
    assert!(!busy.update_sync_stamp().unwrap());
}

#[test]
fn test_retried_add_is_answered_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(inbox());
    manager.set_new_sync_key("{abc}5").unwrap();

    // First attempt: the Add was imported, the response got lost
    let mut add = ItemChange::new("uid-500", ChangeType::Add, 100);
    add.client_id = Some("client-C".to_string());
    manager
        .update_state(&Change::Item(add), ChangeOrigin::Client)
        .unwrap();

    // Retry arrives with the same dedup token
    let uid = manager.is_duplicate_pim_addition("client-C").unwrap();
    assert_eq!(uid.as_deref(), Some("uid-500"));
    assert!(manager
        .is_duplicate_pim_addition("client-unknown")
        .unwrap()
        .is_none());
}

#[test]
fn test_email_read_flag_is_not_echoed() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(inbox());
    manager.set_new_sync_key("{abc}5").unwrap();

    manager
        .update_state(&flag_change("900", true), ChangeOrigin::Client)
        .unwrap();

    // The next export cycle evaluates the same flag value: agreement,
    // so the candidate is dropped
    let candidates = [match flag_change("900", true) {
        Change::Item(item) => item,
        _ => unreachable!(),
    }];
    let agreement = manager.mail_map_changes(&candidates).unwrap();
    assert_eq!(
        agreement.get("900").and_then(|m| m.get(&ChangeType::Flags)),
        Some(&true)
    );

    // A different value is a real change and passes through
    let candidates = [match flag_change("900", false) {
        Change::Item(item) => item,
        _ => unreachable!(),
    }];
    let agreement = manager.mail_map_changes(&candidates).unwrap();
    assert_eq!(
        agreement.get("900").and_then(|m| m.get(&ChangeType::Flags)),
        Some(&false)
    );
}

#[test]
fn test_email_change_with_flags_is_promoted() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(inbox());
    manager.set_new_sync_key("{abc}5").unwrap();

    // The client reported a CHANGE but carried a flag value: recorded as
    // a flag update
    let mut item = ItemChange::new("901", ChangeType::Change, 0);
    item.flags.read = Some(true);
    manager
        .update_state(&Change::Item(item), ChangeOrigin::Client)
        .unwrap();

    let mut candidate = ItemChange::new("901", ChangeType::Flags, 0);
    candidate.flags.read = Some(true);
    let agreement = manager.mail_map_changes(&[candidate]).unwrap();
    assert_eq!(
        agreement.get("901").and_then(|m| m.get(&ChangeType::Flags)),
        Some(&true)
    );
}

#[test]
fn test_email_delete_agreement() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(inbox());
    manager.set_new_sync_key("{abc}5").unwrap();

    manager
        .update_state(
            &Change::Item(ItemChange::new("902", ChangeType::Delete, 0)),
            ChangeOrigin::Client,
        )
        .unwrap();

    let agreement = manager
        .mail_map_changes(&[ItemChange::new("902", ChangeType::Delete, 0)])
        .unwrap();
    assert_eq!(
        agreement.get("902").and_then(|m| m.get(&ChangeType::Delete)),
        Some(&true)
    );
}

#[test]
fn test_pim_change_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());
    manager.set_new_sync_key("{abc}5").unwrap();

    manager
        .update_state(
            &Change::Item(ItemChange::new("c1", ChangeType::Change, 500)),
            ChangeOrigin::Client,
        )
        .unwrap();
    manager
        .update_state(
            &Change::Item(ItemChange::new("c2", ChangeType::Delete, 600)),
            ChangeOrigin::Client,
        )
        .unwrap();

    let candidates = [
        ItemChange::new("c1", ChangeType::Change, 0),
        ItemChange::new("c2", ChangeType::Delete, 0),
        ItemChange::new("c3", ChangeType::Change, 0),
    ];
    let stamps = manager.pim_change_timestamps(&candidates).unwrap();
    assert_eq!(stamps.get("c1"), Some(&500));
    assert_eq!(stamps.get("c2"), Some(&600));
    assert!(!stamps.contains_key("c3"));

    // A delete candidate only matches rows that recorded a deletion
    let stamps = manager
        .pim_change_timestamps(&[ItemChange::new("c1", ChangeType::Delete, 0)])
        .unwrap();
    assert!(!stamps.contains_key("c1"));
}

#[test]
fn test_has_pim_changes() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());
    manager.set_new_sync_key("{abc}5").unwrap();
    assert!(!manager.has_pim_changes().unwrap());

    manager
        .update_state(
            &Change::Item(ItemChange::new("c1", ChangeType::Change, 500)),
            ChangeOrigin::Client,
        )
        .unwrap();
    assert!(manager.has_pim_changes().unwrap());

    // Email always reports true; the mailmap is consulted regardless
    let mut mail = test_manager(&dir, RequestKind::Sync);
    mail.set_collection(inbox());
    mail.set_new_sync_key("{abc}5").unwrap();
    assert!(mail.has_pim_changes().unwrap());
}

#[test]
fn test_move_without_sync_key_uses_latest() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());
    manager.set_new_sync_key("{abc}2").unwrap();
    manager.set_snapshot(contacts_snapshot());
    manager.save().unwrap();

    let mut mover = test_manager(&dir, RequestKind::MoveItems);
    mover.set_collection(contacts());
    mover
        .update_state(
            &Change::Item(ItemChange::new("m1", ChangeType::Change, 300)),
            ChangeOrigin::Client,
        )
        .unwrap();

    assert!(mover.is_duplicate_pim_change("m1", "{abc}2").unwrap());
}

#[test]
fn test_client_folder_changes_stay_in_memory_until_save() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::FolderSync);
    manager.set_new_sync_key("{h}1").unwrap();

    manager
        .update_state(
            &Change::Folder {
                kind: ChangeType::Add,
                stat: folder_stat("f1", "S1", "Inbox"),
            },
            ChangeOrigin::Client,
        )
        .unwrap();
    manager
        .update_state(
            &Change::Folder {
                kind: ChangeType::Add,
                stat: folder_stat("f2", "S2", "Sent"),
            },
            ChangeOrigin::Client,
        )
        .unwrap();
    manager
        .update_state(
            &Change::Folder {
                kind: ChangeType::Delete,
                stat: folder_stat("f2", "S2", "Sent"),
            },
            ChangeOrigin::Client,
        )
        .unwrap();

    let folders = manager.snapshot().unwrap().folders().unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].id, "f1");

    // Nothing was persisted yet
    let storage = Storage::open(dir.path().join("state.db")).unwrap();
    assert!(storage
        .state_rows_for_folder(DEVICE, USER, HIERARCHY_FOLDER_ID)
        .unwrap()
        .is_empty());

    manager.save().unwrap();
    assert_eq!(
        storage
            .state_rows_for_folder(DEVICE, USER, HIERARCHY_FOLDER_ID)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_folder_change_outside_hierarchy_request() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_new_sync_key("{h}1").unwrap();

    let err = manager
        .update_state(
            &Change::Folder {
                kind: ChangeType::Add,
                stat: folder_stat("f1", "S1", "Inbox"),
            },
            ChangeOrigin::Client,
        )
        .unwrap_err();
    assert!(matches!(err, StateError::InvariantViolation(_)));
}

#[test]
fn test_server_change_clears_pending_and_refreshes_folders() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::FolderSync);
    manager.set_new_sync_key("{h}2").unwrap();
    manager.set_snapshot(Snapshot::Hierarchy(vec![
        folder_stat("f1", "S1", "Inbax"),
        folder_stat("f2", "S2", "Sent"),
    ]));
    manager.set_pending(vec![
        Change::Folder {
            kind: ChangeType::Change,
            stat: folder_stat("f1", "S1", "Inbax"),
        },
        Change::Folder {
            kind: ChangeType::Delete,
            stat: folder_stat("f2", "S2", "Sent"),
        },
    ]);

    let backend = MockBackend::new().with_folder(BackendFolder {
        id: "f1".to_string(),
        parent_id: "0".to_string(),
        display_name: "Inbox".to_string(),
        server_id: "S1".to_string(),
        folder_type: 2,
    });

    // Dispatch the rename: the stale stat is replaced by a fresh one from
    // the content driver
    manager
        .update_state_with(
            &Change::Folder {
                kind: ChangeType::Change,
                stat: folder_stat("f1", "S1", "Inbax"),
            },
            ChangeOrigin::Server,
            &UpdateStateOptions {
                backend: Some(&backend),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(manager.pending().len(), 1);
    let folders = manager.snapshot().unwrap().folders().unwrap();
    let f1 = folders.iter().find(|f| f.id == "f1").unwrap();
    assert_eq!(f1.display_name, "Inbox");

    // Dispatch the delete: removed from both pending and snapshot
    manager
        .update_state(
            &Change::Folder {
                kind: ChangeType::Delete,
                stat: folder_stat("f2", "S2", "Sent"),
            },
            ChangeOrigin::Server,
        )
        .unwrap();
    assert!(manager.pending().is_empty());
    assert!(manager
        .snapshot()
        .unwrap()
        .folders()
        .unwrap()
        .iter()
        .all(|f| f.id != "f2"));
}

#[test]
fn test_server_item_change_drains_pending() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());
    manager.set_new_sync_key("{abc}3").unwrap();
    manager.set_pending(vec![
        Change::Item(ItemChange::new("c1", ChangeType::Change, 10)),
        Change::Item(ItemChange::new("c2", ChangeType::Change, 20)),
    ]);

    manager
        .update_state(
            &Change::Item(ItemChange::new("c1", ChangeType::Change, 10)),
            ChangeOrigin::Server,
        )
        .unwrap();

    assert_eq!(manager.pending().len(), 1);
    assert_eq!(manager.pending()[0].uid(), "c2");
}

#[test]
fn test_update_server_id_in_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());
    manager.set_new_sync_key("{abc}2").unwrap();
    manager.set_snapshot(contacts_snapshot());
    manager.save().unwrap();

    // The folder was renamed on the backend but keeps its client UID
    manager
        .update_server_id_in_state("contacts", "srv-contacts-renamed")
        .unwrap();

    let mut reloaded = test_manager(&dir, RequestKind::Sync);
    reloaded.load_state("{abc}2", Some(contacts())).unwrap();
    match reloaded.snapshot().unwrap() {
        Snapshot::Generic(state) => assert_eq!(state.server_id, "srv-contacts-renamed"),
        other => panic!("unexpected snapshot: {:?}", other),
    }
}

#[test]
fn test_hierarchy_reset() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::FolderSync);
    manager.set_new_sync_key("{h}2").unwrap();
    manager.set_snapshot(Snapshot::Hierarchy(vec![folder_stat(
        "f1", "S1", "Inbox",
    )]));
    manager.save().unwrap();

    let mut cache = manager.get_sync_cache().unwrap();
    cache.hierarchy_key = "{h}2".to_string();
    cache
        .collections
        .insert("f1".to_string(), CollectionOptions::default());
    cache.folders.insert(
        "S1".to_string(),
        CachedFolder {
            class: CollectionClass::Email,
            parent_id: "0".to_string(),
            display_name: "Inbox".to_string(),
            folder_type: 2,
        },
    );
    manager.save_sync_cache(&cache).unwrap();

    manager.reset_device_state(HIERARCHY_FOLDER_ID).unwrap();

    // Any hierarchy key except "0" now misses
    let mut next_request = test_manager(&dir, RequestKind::FolderSync);
    let err = next_request.load_state("{h}2", None).unwrap_err();
    assert!(matches!(err, StateError::StateGone(_)));

    let cache = next_request.get_sync_cache().unwrap();
    assert_eq!(cache.hierarchy_key, "0");
    assert!(cache.folders.is_empty());
    assert!(cache.collections.is_empty());
}

#[test]
fn test_collection_reset() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Sync);
    manager.set_collection(contacts());
    manager.set_new_sync_key("{abc}2").unwrap();
    manager.set_snapshot(contacts_snapshot());
    manager
        .update_state(
            &Change::Item(ItemChange::new("c1", ChangeType::Change, 100)),
            ChangeOrigin::Client,
        )
        .unwrap();
    manager.save().unwrap();

    let mut cache = manager.get_sync_cache().unwrap();
    cache
        .collections
        .insert("contacts".to_string(), CollectionOptions::default());
    let key = manager.sync_key().unwrap().clone();
    cache.confirm_sync_key("contacts", &key);
    manager.save_sync_cache(&cache).unwrap();

    manager.reset_device_state("contacts").unwrap();

    let mut next_request = test_manager(&dir, RequestKind::Sync);
    let err = next_request
        .load_state("{abc}2", Some(contacts()))
        .unwrap_err();
    assert!(matches!(err, StateError::StateGone(_)));
    assert!(!next_request.is_duplicate_pim_change("c1", "{abc}2").unwrap());

    let cache = next_request.get_sync_cache().unwrap();
    assert!(!cache.collections.contains_key("contacts"));
    assert!(!cache.sync_key_counter.contains_key("contacts"));
}

#[test]
fn test_disconnect_and_connect() {
    let dir = tempfile::tempdir().unwrap();
    let mut manager = test_manager(&dir, RequestKind::Ping);

    manager.disconnect();
    assert!(!manager.is_connected());
    let err = manager.get_sync_cache().unwrap_err();
    assert!(matches!(err, StateError::InvariantViolation(_)));

    manager.connect().unwrap();
    assert!(manager.is_connected());
    manager.get_sync_cache().unwrap();
}
