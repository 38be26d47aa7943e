// record.rs — Audit record data model.
//
// One AuditRecord describes one row-level DML event on a tracked table:
// which table, which row, what the row looked like before and after, and
// when it happened. The pairing between `action` and the images is fixed:
//
//   INSERT  before = None   after = Some
//   UPDATE  before = Some   after = Some
//   DELETE  before = Some   after = None
//
// Records are append-only. Nothing in this crate updates or deletes one.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AuditError;
use crate::image::RowImage;
use crate::logseq::Logseq;

/// Storage format of `audit_dml.ts`; the same text SQLite's
/// `datetime('now')` produces.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which DML operation a record captures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DmlAction {
    Insert,
    Update,
    Delete,
}

impl DmlAction {
    pub const ALL: [DmlAction; 3] = [DmlAction::Insert, DmlAction::Update, DmlAction::Delete];

    /// The exact text stored in `audit_dml.action`.
    pub fn as_str(self) -> &'static str {
        match self {
            DmlAction::Insert => "INSERT",
            DmlAction::Update => "UPDATE",
            DmlAction::Delete => "DELETE",
        }
    }
}

impl fmt::Display for DmlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DmlAction {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(DmlAction::Insert),
            "UPDATE" => Ok(DmlAction::Update),
            "DELETE" => Ok(DmlAction::Delete),
            other => Err(AuditError::UnknownAction(other.to_string())),
        }
    }
}

/// A single captured DML event — one row in `audit_dml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// Append position assigned by the store. None until appended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Capture time (UTC), truncated to whole seconds.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// Tie-breaker among events sharing `timestamp`.
    pub logseq: Logseq,

    pub action: DmlAction,

    pub table_name: String,

    /// Identity of the affected row (integer or text).
    #[serde(rename = "rowid")]
    pub row_id: Value,

    /// Row as it was before the event. None for INSERT.
    #[serde(rename = "old_values")]
    pub before: Option<RowImage>,

    /// Row as it is after the event. None for DELETE.
    #[serde(rename = "new_values")]
    pub after: Option<RowImage>,
}

impl AuditRecord {
    fn new(
        action: DmlAction,
        table_name: impl Into<String>,
        row_id: Value,
        before: Option<RowImage>,
        after: Option<RowImage>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            timestamp: now.trunc_subsecs(0),
            logseq: Logseq::generate(now),
            action,
            table_name: table_name.into(),
            row_id,
            before,
            after,
        }
    }

    /// Record for a freshly inserted row.
    pub fn insert(table_name: impl Into<String>, row_id: Value, after: RowImage) -> Self {
        Self::new(DmlAction::Insert, table_name, row_id, None, Some(after))
    }

    /// Record for an updated row. Written even when nothing changed.
    pub fn update(
        table_name: impl Into<String>,
        row_id: Value,
        before: RowImage,
        after: RowImage,
    ) -> Self {
        Self::new(DmlAction::Update, table_name, row_id, Some(before), Some(after))
    }

    /// Record for a deleted row.
    pub fn delete(table_name: impl Into<String>, row_id: Value, before: RowImage) -> Self {
        Self::new(DmlAction::Delete, table_name, row_id, Some(before), None)
    }

    /// Re-stamp the record as captured at `at` (builder pattern).
    pub fn stamped_at(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = at.trunc_subsecs(0);
        self.logseq = Logseq::generate(at);
        self
    }

    /// Check the action/image pairing.
    pub fn validate(&self) -> Result<(), AuditError> {
        let consistent = match self.action {
            DmlAction::Insert => self.before.is_none() && self.after.is_some(),
            DmlAction::Update => self.before.is_some() && self.after.is_some(),
            DmlAction::Delete => self.before.is_some() && self.after.is_none(),
        };
        if consistent {
            Ok(())
        } else {
            Err(AuditError::InconsistentImages {
                action: self.action.to_string(),
            })
        }
    }

    /// Sort key giving the total order consumers should use.
    pub fn ordering_key(&self) -> (DateTime<Utc>, Logseq) {
        (self.timestamp, self.logseq)
    }

    /// Columns whose values differ between the images (UPDATE only).
    pub fn changed_columns(&self) -> Vec<&str> {
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => before.changed_columns(after),
            _ => Vec::new(),
        }
    }
}

/// Format a timestamp the way `audit_dml.ts` stores it.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse `audit_dml.ts`. Fractional seconds, if present, are accepted.
pub fn parse_ts(text: &str) -> Result<DateTime<Utc>, AuditError> {
    NaiveDateTime::parse_from_str(text, TS_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|_| AuditError::InvalidTimestamp(text.to_string()))
}
