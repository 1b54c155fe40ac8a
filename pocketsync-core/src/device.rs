// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device Registry Records

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Remote wipe lifecycle of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteWipeStatus {
    /// Never provisioned for wipe.
    NA,
    /// Provisioned, no wipe requested.
    Ok,
    /// Wipe requested, not yet confirmed by the device.
    Pending,
    /// Device confirmed the wipe.
    Wiped,
}

impl RemoteWipeStatus {
    /// Column value in the `device` table. Deployed installations rely on
    /// these exact numbers.
    pub fn as_i64(self) -> i64 {
        match self {
            RemoteWipeStatus::NA => 0,
            RemoteWipeStatus::Ok => 1,
            RemoteWipeStatus::Pending => 2,
            RemoteWipeStatus::Wiped => 4,
        }
    }

    /// Unknown column values fall back to NA.
    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => RemoteWipeStatus::Ok,
            2 => RemoteWipeStatus::Pending,
            4 => RemoteWipeStatus::Wiped,
            _ => RemoteWipeStatus::NA,
        }
    }

    /// True when a wipe has been requested or carried out. These are the states
    /// under which a user-scoped removal must keep the device row alive
    /// by escalating to full-device removal.
    pub fn is_wipe_armed(self) -> bool {
        matches!(self, RemoteWipeStatus::Pending | RemoteWipeStatus::Wiped)
    }
}

/// Registry entry for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub device_type: String,
    pub user_agent: String,
    pub rw_status: RemoteWipeStatus,
    /// Ghosted-property classes announced by the device on first contact.
    /// Immutable once nonempty.
    pub supported: Vec<String>,
    /// Free-form device properties (model, OS, IMEI, ...). Mutable.
    pub properties: HashMap<String, String>,
    /// Policy key for the user the record was loaded for; 0 means not
    /// provisioned. Lives in the `device_user` table.
    pub policy_key: u64,
}

impl DeviceRecord {
    pub fn new(id: impl Into<String>, device_type: impl Into<String>) -> Self {
        DeviceRecord {
            id: id.into(),
            device_type: device_type.into(),
            user_agent: String::new(),
            rw_status: RemoteWipeStatus::NA,
            supported: Vec::new(),
            properties: HashMap::new(),
            policy_key: 0,
        }
    }
}

/// One row of a device listing: the device joined with one of its users.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceListEntry {
    pub device_id: String,
    pub device_type: String,
    pub user_agent: String,
    pub rw_status: RemoteWipeStatus,
    pub user: String,
    pub policy_key: u64,
}

/// The closed set of fields a device listing may filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFilterField {
    DeviceId,
    DeviceType,
    UserAgent,
    RwStatus,
    User,
}

impl DeviceFilterField {
    pub(crate) fn column(self) -> &'static str {
        match self {
            DeviceFilterField::DeviceId => "d.device_id",
            DeviceFilterField::DeviceType => "d.device_type",
            DeviceFilterField::UserAgent => "d.device_agent",
            DeviceFilterField::RwStatus => "d.device_rwstatus",
            DeviceFilterField::User => "u.device_user",
        }
    }
}
