//! Error types for the migration engine.

use std::path::PathBuf;
use thiserror::Error;

/// Migration engine errors.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error raised by the connection.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Revision script parse error.
    #[error("Failed to parse revision script {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    /// Script directory does not exist.
    #[error("Script directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    /// `init` target already has content.
    #[error("Directory {0} already exists and is not empty")]
    DirectoryNotEmpty(PathBuf),

    /// Two scripts declare the same revision id.
    #[error("Revision {revision} is declared by both {first} and {second}")]
    DuplicateRevision {
        revision: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// No script carries the requested revision.
    #[error("No such revision: {0}")]
    RevisionNotFound(String),

    /// A revision argument could not be interpreted.
    #[error("Invalid revision argument: {0}")]
    InvalidRevisionArgument(String),

    /// `start:dest` ranges only make sense when rendering SQL.
    #[error("Range revision not allowed")]
    RangeNotAllowed,

    /// Head or ledger bookkeeping cannot interpret a revision.
    #[error("Invalid revision to update: {0}")]
    InvalidRevision(String),

    /// Sync requested on a database that already tracks timestamp revisions.
    #[error("Can't sync with new migrations applied! (current head: {0})")]
    SyncNotAllowed(String),

    /// Purging the tables cannot be rendered offline.
    #[error("Can't use purge with sql mode")]
    PurgeWithSql,

    /// The legacy revision chain branches.
    #[error("Multiple legacy heads present: {0:?}")]
    MultipleHeads(Vec<String>),

    /// Invalid revision message for a file name.
    #[error("Invalid revision message: {0}")]
    InvalidName(String),

    /// The migration context was used before `configure`, or twice.
    #[error("No migration context has been configured")]
    NotConfigured,

    /// Schema file could not be used for autogeneration.
    #[error("Schema error: {0}")]
    Schema(String),
}

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, Error>;
