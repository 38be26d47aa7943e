// drift.rs — Stale trigger detection.
//
// Triggers capture the column set they were generated from. When a tracked
// table's schema changes afterwards, nothing fails at runtime: new columns
// are silently left out of every image. This module compares each
// registered descriptor with the live schema so an operator can find and
// regenerate stale triggers.
//
// Three outcomes per table:
//
//   Clean   registered columns == live columns, all triggers present
//   Stale   live table gained columns the images don't capture
//   Broken  registered columns vanished (DML on the table now fails), the
//           table is gone, or triggers are missing (DML is not audited)

use std::collections::HashSet;
use std::fmt;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AuditError;
use crate::registry;
use crate::table::{table_info, TrackedTable};
use crate::triggers;

/// How far a table's triggers have drifted from its schema.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    Clean,
    Stale,
    Broken,
}

impl fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftSeverity::Clean => write!(f, "clean"),
            DriftSeverity::Stale => write!(f, "stale"),
            DriftSeverity::Broken => write!(f, "broken"),
        }
    }
}

/// Drift findings for one tracked table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftReport {
    pub table: String,
    pub severity: DriftSeverity,
    /// Live columns missing from the captured images.
    pub added: Vec<String>,
    /// Captured columns that no longer exist.
    pub removed: Vec<String>,
    /// Audit triggers that should exist but don't.
    pub missing_triggers: Vec<String>,
    pub table_missing: bool,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.severity == DriftSeverity::Clean
    }
}

/// Compare one registered descriptor with the live schema.
pub fn check(conn: &Connection, table: &TrackedTable) -> Result<DriftReport, AuditError> {
    let live = table_info(conn, &table.name)?;
    let live_names: HashSet<String> = live.iter().map(|c| c.name.to_ascii_lowercase()).collect();
    let tracked_names: HashSet<String> = table
        .columns
        .iter()
        .map(|c| c.name.to_ascii_lowercase())
        .collect();

    let added: Vec<String> = live
        .iter()
        .filter(|c| !tracked_names.contains(&c.name.to_ascii_lowercase()))
        .map(|c| c.name.clone())
        .collect();
    let removed: Vec<String> = table
        .columns
        .iter()
        .filter(|c| !live_names.contains(&c.name.to_ascii_lowercase()))
        .map(|c| c.name.clone())
        .collect();

    let installed = triggers::installed(conn, &table.name)?;
    let missing_triggers: Vec<String> = triggers::trigger_names(&table.name)
        .into_iter()
        .filter(|name| !installed.contains(name))
        .collect();

    let table_missing = live.is_empty();
    let severity = if table_missing || !removed.is_empty() || !missing_triggers.is_empty() {
        DriftSeverity::Broken
    } else if !added.is_empty() {
        DriftSeverity::Stale
    } else {
        DriftSeverity::Clean
    };

    if severity != DriftSeverity::Clean {
        warn!(
            table = %table.name,
            %severity,
            added = added.len(),
            removed = removed.len(),
            missing_triggers = missing_triggers.len(),
            "audit triggers out of date"
        );
    }

    Ok(DriftReport {
        table: table.name.clone(),
        severity,
        added,
        removed,
        missing_triggers,
        table_missing,
    })
}

/// Check every registered table.
pub fn check_all(conn: &Connection) -> Result<Vec<DriftReport>, AuditError> {
    registry::list(conn)?
        .iter()
        .map(|table| check(conn, table))
        .collect()
}
