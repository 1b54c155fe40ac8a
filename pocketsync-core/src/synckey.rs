// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sync Key Tokens
//!
//! A sync key is the opaque continuation token exchanged with mobile
//! clients, in the canonical text form `{series}counter`. The series is a
//! generated identifier shared by every generation of one folder's state;
//! the counter increases by one per completed sync cycle. Counter 0 is the
//! bootstrap generation a client presents when it has no state yet.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Sync key errors.
#[derive(Error, Debug)]
pub enum SyncKeyError {
    #[error("Malformed sync key: {0}")]
    Malformed(String),
}

/// A parsed sync key: a series identifier plus a generation counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncKey {
    series: String,
    counter: u64,
}

impl SyncKey {
    /// Parses the canonical `{series}counter` form.
    ///
    /// The series accepts ASCII alphanumerics and dashes; the counter is a
    /// decimal integer. Anything else is rejected; a malformed key from a
    /// client is a protocol error, not a state miss.
    pub fn parse(s: &str) -> Result<Self, SyncKeyError> {
        let malformed = || SyncKeyError::Malformed(s.to_string());

        let rest = s.strip_prefix('{').ok_or_else(malformed)?;
        let close = rest.find('}').ok_or_else(malformed)?;
        let (series, counter) = (&rest[..close], &rest[close + 1..]);

        if series.is_empty()
            || !series
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(malformed());
        }
        if counter.is_empty() || !counter.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        let counter = counter.parse::<u64>().map_err(|_| malformed())?;

        Ok(SyncKey {
            series: series.to_string(),
            counter,
        })
    }

    /// Generates the first key of a brand-new series.
    ///
    /// Callers must run the result through the state store's collision
    /// check: a freshly generated series may not be reused by the same
    /// device on another folder, and a colliding key is regenerated.
    pub fn generate() -> Self {
        SyncKey {
            series: Uuid::new_v4().to_string(),
            counter: 1,
        }
    }

    /// Returns the next generation of the same series.
    pub fn next(&self) -> Self {
        SyncKey {
            series: self.series.clone(),
            counter: self.counter + 1,
        }
    }

    /// Returns the previous generation of the same series, or `None` for
    /// generations 0 and 1. Always rendered with braces, like every key.
    pub fn previous(&self) -> Option<Self> {
        if self.counter <= 1 {
            return None;
        }
        Some(SyncKey {
            series: self.series.clone(),
            counter: self.counter - 1,
        })
    }

    /// The series identifier (the part between the braces).
    pub fn series(&self) -> &str {
        &self.series
    }

    /// The generation counter.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// True iff both keys belong to the same series.
    pub fn same_series(&self, other: &SyncKey) -> bool {
        self.series == other.series
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.series, self.counter)
    }
}

impl FromStr for SyncKey {
    type Err = SyncKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncKey::parse(s)
    }
}
