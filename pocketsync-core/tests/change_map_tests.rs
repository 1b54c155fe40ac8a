// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for the change map tables

mod common;

use common::{map_record, test_storage, DEVICE, USER};
use pocketsync_core::{MailMapRecord, SyncKey};

fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn uids(uids: &[&str]) -> Vec<String> {
    uids.iter().map(|u| u.to_string()).collect()
}

#[test]
fn test_lookup_client_add() {
    let storage = test_storage();
    let mut record = map_record("uid-7", "{abc}5", "contacts", 100);
    record.client_id = Some("client-42".to_string());
    storage.insert_change(&record).unwrap();

    let uid = storage
        .lookup_client_add(DEVICE, USER, "client-42")
        .unwrap();
    assert_eq!(uid.as_deref(), Some("uid-7"));

    assert!(storage
        .lookup_client_add(DEVICE, USER, "client-99")
        .unwrap()
        .is_none());
}

#[test]
fn test_lookup_client_add_returns_newest() {
    let storage = test_storage();
    for (uid, modtime) in [("uid-old", 100), ("uid-new", 200)] {
        let mut record = map_record(uid, "{abc}5", "contacts", modtime);
        record.client_id = Some("client-1".to_string());
        storage.insert_change(&record).unwrap();
    }

    let uid = storage.lookup_client_add(DEVICE, USER, "client-1").unwrap();
    assert_eq!(uid.as_deref(), Some("uid-new"));
}

#[test]
fn test_change_exists() {
    let storage = test_storage();
    storage
        .insert_change(&map_record("uid-1", "{abc}5", "contacts", 100))
        .unwrap();

    assert!(storage
        .change_exists(DEVICE, USER, "{abc}5", "uid-1")
        .unwrap());
    assert!(!storage
        .change_exists(DEVICE, USER, "{abc}4", "uid-1")
        .unwrap());
    assert!(!storage
        .change_exists(DEVICE, USER, "{abc}5", "uid-2")
        .unwrap());
}

#[test]
fn test_change_timestamps_window() {
    let storage = test_storage();
    storage
        .insert_change(&map_record("uid-1", "{abc}3", "contacts", 100))
        .unwrap();
    storage
        .insert_change(&map_record("uid-1", "{abc}4", "contacts", 200))
        .unwrap();
    storage
        .insert_change(&map_record("uid-1", "{abc}5", "contacts", 300))
        .unwrap();

    // Only the current and previous generation count
    let stamps = storage
        .change_timestamps(
            DEVICE,
            USER,
            "contacts",
            &keys(&["{abc}5", "{abc}4"]),
            &uids(&["uid-1"]),
            false,
        )
        .unwrap();
    assert_eq!(stamps.get("uid-1"), Some(&300));

    let stamps = storage
        .change_timestamps(
            DEVICE,
            USER,
            "contacts",
            &keys(&["{abc}4", "{abc}3"]),
            &uids(&["uid-1"]),
            false,
        )
        .unwrap();
    assert_eq!(stamps.get("uid-1"), Some(&200));
}

#[test]
fn test_change_timestamps_deleted_only() {
    let storage = test_storage();
    storage
        .insert_change(&map_record("uid-1", "{abc}5", "contacts", 100))
        .unwrap();
    let mut deletion = map_record("uid-2", "{abc}5", "contacts", 150);
    deletion.deleted = true;
    storage.insert_change(&deletion).unwrap();

    let stamps = storage
        .change_timestamps(
            DEVICE,
            USER,
            "contacts",
            &keys(&["{abc}5"]),
            &uids(&["uid-1", "uid-2"]),
            true,
        )
        .unwrap();
    assert_eq!(stamps.len(), 1);
    assert_eq!(stamps.get("uid-2"), Some(&150));
}

#[test]
fn test_change_timestamps_empty_inputs() {
    let storage = test_storage();
    let stamps = storage
        .change_timestamps(DEVICE, USER, "contacts", &[], &uids(&["uid-1"]), false)
        .unwrap();
    assert!(stamps.is_empty());
}

#[test]
fn test_mail_change_rows_and_probe() {
    let storage = test_storage();
    let record = MailMapRecord {
        uid: "900".to_string(),
        sync_key: "{abc}5".to_string(),
        device_id: DEVICE.to_string(),
        folder_id: "INBOX".to_string(),
        user: USER.to_string(),
        read: Some(true),
        ..Default::default()
    };
    storage.insert_mail_change(&record).unwrap();

    let rows = storage
        .mail_change_rows(DEVICE, USER, "INBOX", &keys(&["{abc}5", "{abc}4"]))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].read, Some(true));
    assert_eq!(rows[0].flagged, None);

    // The generic probe covers the generic map only
    assert!(!storage
        .has_changes(DEVICE, USER, "INBOX", &keys(&["{abc}5"]))
        .unwrap());
    storage
        .insert_change(&map_record("901", "{abc}5", "INBOX", 100))
        .unwrap();
    assert!(storage
        .has_changes(DEVICE, USER, "INBOX", &keys(&["{abc}5"]))
        .unwrap());
}

#[test]
fn test_gc_maps_keeps_current_generation_only() {
    let storage = test_storage();
    for counter in 3..=5 {
        storage
            .insert_change(&map_record(
                "uid-1",
                &format!("{{abc}}{}", counter),
                "contacts",
                counter,
            ))
            .unwrap();
        storage
            .insert_mail_change(&MailMapRecord {
                uid: "900".to_string(),
                sync_key: format!("{{abc}}{}", counter),
                device_id: DEVICE.to_string(),
                folder_id: "INBOX".to_string(),
                user: USER.to_string(),
                changed: Some(true),
                ..Default::default()
            })
            .unwrap();
    }

    let current = SyncKey::parse("{abc}5").unwrap();
    storage.gc_maps(DEVICE, USER, &current).unwrap();

    // One generation, not two: map rows drive loop suppression one step
    // back, and generation 4 is below the current key 5
    assert!(!storage
        .change_exists(DEVICE, USER, "{abc}4", "uid-1")
        .unwrap());
    assert!(storage
        .change_exists(DEVICE, USER, "{abc}5", "uid-1")
        .unwrap());

    let rows = storage
        .mail_change_rows(DEVICE, USER, "INBOX", &keys(&["{abc}3", "{abc}4", "{abc}5"]))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].sync_key, "{abc}5");
}

#[test]
fn test_gc_maps_leaves_other_series_and_devices() {
    let storage = test_storage();
    storage
        .insert_change(&map_record("uid-1", "{other}1", "contacts", 100))
        .unwrap();
    let mut foreign = map_record("uid-2", "{abc}1", "contacts", 100);
    foreign.device_id = "other-device".to_string();
    storage.insert_change(&foreign).unwrap();

    let current = SyncKey::parse("{abc}5").unwrap();
    storage.gc_maps(DEVICE, USER, &current).unwrap();

    assert!(storage
        .change_exists(DEVICE, USER, "{other}1", "uid-1")
        .unwrap());
    assert!(storage
        .change_exists("other-device", USER, "{abc}1", "uid-2")
        .unwrap());
}

#[test]
fn test_delete_folder_maps() {
    let storage = test_storage();
    storage
        .insert_change(&map_record("uid-1", "{abc}5", "contacts", 100))
        .unwrap();
    storage
        .insert_change(&map_record("uid-2", "{abc}5", "calendar", 100))
        .unwrap();

    let removed = storage.delete_folder_maps(DEVICE, USER, "contacts").unwrap();
    assert_eq!(removed, 1);
    assert!(!storage
        .change_exists(DEVICE, USER, "{abc}5", "uid-1")
        .unwrap());
    assert!(storage
        .change_exists(DEVICE, USER, "{abc}5", "uid-2")
        .unwrap());
}
