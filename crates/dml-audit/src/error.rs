// error.rs — Error types for the audit subsystem.
//
// Uses `thiserror` to derive the standard Rust `Error` trait automatically.
// Each variant maps to a specific failure mode in the capture pipeline.
// Failures raised inside a trigger never reach this enum directly: SQLite
// aborts the mutating statement and the caller sees `Database`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during audit operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// A SQLite operation failed (including trigger aborts).
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to serialize or deserialize a row image (malformed JSON).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A column value has no representation in a row image.
    #[error("cannot serialize {kind} value of {table}.{column}")]
    UnsupportedValue {
        table: String,
        column: String,
        kind: &'static str,
    },

    /// A tracked column was absent from the row handed to the capture path.
    #[error("row for {table} is missing tracked column {column}")]
    MissingColumn { table: String, column: String },

    /// The table descriptor cannot be installed.
    #[error("invalid tracked table {table}: {reason}")]
    InvalidTable { table: String, reason: String },

    /// Audit tables themselves can never be tracked.
    #[error("table name {0} is reserved for the audit store")]
    ReservedTable(String),

    /// The table has no entry in the tracked-table registry.
    #[error("table {0} is not tracked")]
    NotTracked(String),

    /// An update tried to change the row identity of a tracked table.
    #[error("row identity of tracked table {table} cannot change on update")]
    IdentityChanged { table: String },

    /// A stored record violates the image/action pairing.
    #[error("{action} record has inconsistent before/after images")]
    InconsistentImages { action: String },

    /// A stored timestamp could not be parsed.
    #[error("invalid audit timestamp: {0}")]
    InvalidTimestamp(String),

    /// A stored action is not INSERT, UPDATE, or DELETE.
    #[error("unknown audit action: {0}")]
    UnknownAction(String),

    /// The configuration file could not be parsed.
    #[error("invalid config at {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
