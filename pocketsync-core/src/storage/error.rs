//! Failure modes of the persistent store.

use thiserror::Error;

/// What can go wrong below the façade: the database itself, a blob
/// codec, or schema setup. Everything here is fatal for the request
/// that hit it; the façade layer decides what the client sees.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite rejected or failed a statement.
    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    /// A blob column refused to encode or decode.
    #[error("blob codec: {0}")]
    Serialization(String),

    /// A schema step could not be applied.
    #[error("schema migration: {0}")]
    Migration(String),
}
