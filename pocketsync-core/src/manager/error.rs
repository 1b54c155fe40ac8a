// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! State Manager Error Types
//!
//! Unified error type for the façade layer. `StateGone` and `Protocol`
//! are the two non-fatal kinds a protocol handler translates into a sync
//! status for the client; everything else is fatal for the request.

use thiserror::Error;

use crate::storage::StorageError;
use crate::synckey::SyncKeyError;

/// Unified error type for state manager operations.
#[derive(Error, Debug)]
pub enum StateError {
    /// No state row matches the presented sync key. Non-fatal: the
    /// handler answers KEY_MISMATCH and the client restarts the series.
    #[error("state gone for sync key: {0}")]
    StateGone(String),

    /// Malformed client input, e.g. an unparsable sync key. The handler
    /// must answer with a protocol error and stop touching state.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Device lookup against an unknown id. The handler decides whether
    /// to provision or reject.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Storage operation failed. Fatal for the request.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A façade operation was called in a state it does not allow, a
    /// programming error in the caller, surfaced as fatal.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<SyncKeyError> for StateError {
    fn from(e: SyncKeyError) -> Self {
        StateError::Protocol(e.to_string())
    }
}

/// Result type for state manager operations.
pub type StateResult<T> = Result<T, StateError>;
