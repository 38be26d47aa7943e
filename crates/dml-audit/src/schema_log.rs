// schema_log.rs — Log of schema-level audit operations.
//
// Row-level changes go to `audit_dml`; changes to what is being audited
// (a table starting or stopping being tracked, triggers regenerated) go to
// `audit_schema`. Entries are written in the same transaction as the
// operation they describe.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::record::{format_ts, parse_ts};

pub const TRACK_TABLE: &str = "TRACK_TABLE";
pub const RETRACK_TABLE: &str = "RETRACK_TABLE";
pub const UNTRACK_TABLE: &str = "UNTRACK_TABLE";

/// One entry in `audit_schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub action: String,
    /// Kind of object affected, e.g. "table".
    pub object_type: String,
    pub object_name: String,
    pub details: Option<String>,
}

impl SchemaChange {
    pub fn new(
        action: impl Into<String>,
        object_type: impl Into<String>,
        object_name: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp: Utc::now().trunc_subsecs(0),
            action: action.into(),
            object_type: object_type.into(),
            object_name: object_name.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Append an entry, returning its id.
pub fn log_schema_change(conn: &Connection, change: &SchemaChange) -> Result<i64, AuditError> {
    conn.execute(
        "INSERT INTO audit_schema (ts, action, object_type, object_name, details)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            format_ts(change.timestamp),
            change.action,
            change.object_type,
            change.object_name,
            change.details,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All entries, oldest first.
pub fn read_schema_log(conn: &Connection) -> Result<Vec<SchemaChange>, AuditError> {
    let mut stmt = conn.prepare(
        "SELECT id, ts, action, object_type, object_name, details
         FROM audit_schema ORDER BY id",
    )?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(id, ts, action, object_type, object_name, details)| {
            Ok(SchemaChange {
                id: Some(id),
                timestamp: parse_ts(&ts)?,
                action,
                object_type,
                object_name,
                details,
            })
        })
        .collect()
}
