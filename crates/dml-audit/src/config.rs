//! Audit configuration structures

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::table::{ColumnDescriptor, Identity, TrackedTable};

/// SQLite journal modes accepted by `PRAGMA journal_mode`.
pub const JOURNAL_MODES: [&str; 6] = ["delete", "truncate", "persist", "memory", "wal", "off"];

/// Top-level audit configuration, usually from `dml-audit.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Database connection settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Tables to track on `sync`
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database holding both the tracked tables and the audit store
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Journal mode: "wal", "delete", "truncate", "persist", "memory", "off"
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,

    /// How long a writer waits on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            journal_mode: default_journal_mode(),
            busy_timeout_ms: default_busy_timeout_ms(),
            foreign_keys: default_foreign_keys(),
        }
    }
}

// Serde default functions
fn default_path() -> PathBuf {
    PathBuf::from("audit.db")
}

fn default_journal_mode() -> String {
    "wal".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_foreign_keys() -> bool {
    true
}

/// One `[[tables]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,

    /// Identity column, "rowid", or an array of key columns. Discovered
    /// when absent.
    #[serde(default)]
    pub identity: Option<Identity>,

    /// Tracked columns. Discovered from the live table when empty.
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
}

impl TableConfig {
    /// Turn the entry into a descriptor, filling gaps from the live schema.
    pub fn resolve(&self, conn: &Connection) -> Result<TrackedTable, AuditError> {
        let mut table = if self.columns.is_empty() {
            TrackedTable::discover(conn, &self.name)?
        } else {
            TrackedTable {
                name: self.name.clone(),
                identity: Identity::RowId,
                columns: self.columns.clone(),
            }
        };
        if let Some(identity) = &self.identity {
            table.identity = identity.clone();
        } else if !self.columns.is_empty() {
            table.identity = TrackedTable::discover(conn, &self.name)?.identity;
        }
        table.validate()?;
        Ok(table)
    }
}

impl AuditConfig {
    /// Load audit config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, AuditError> {
        let content = std::fs::read_to_string(path).map_err(|source| AuditError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| AuditError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Try to load config, returning default if the file doesn't exist.
    ///
    /// A file that exists but doesn't parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, AuditError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self, path: &Path) -> Result<(), AuditError> {
        let mode = self.database.journal_mode.to_ascii_lowercase();
        if !JOURNAL_MODES.contains(&mode.as_str()) {
            return Err(AuditError::Config {
                path: path.to_path_buf(),
                reason: format!("unknown journal_mode {:?}", self.database.journal_mode),
            });
        }
        Ok(())
    }
}
