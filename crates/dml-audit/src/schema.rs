// schema.rs — DDL for the audit store.
//
// `audit_dml` is the wire contract with downstream readers: its column
// names and meanings must not change without a migration. The CHECK
// constraints reject a record whose images don't match its action, and
// the guard triggers make both log tables append-only. Either failure
// aborts the statement that tried it, and with it the user's mutation.
//
// Guard trigger names end in `_upd`/`_del`. Per-table capture triggers
// always end in `_insert`, `_update`, `_delete` or `_identity`, so no
// tracked table can produce a guard's name.
//
// REPLACE conflict resolution deletes rows without firing DELETE triggers
// unless `PRAGMA recursive_triggers = ON`. AuditStore sets it; any other
// connection writing tracked tables must set it too, or replaced rows lose
// their DELETE record.

use rusqlite::Connection;
use tracing::debug;

use crate::error::AuditError;

/// Row-level DML audit records.
pub const AUDIT_DML: &str = "audit_dml";
/// Schema-change log (track/untrack/retrack).
pub const AUDIT_SCHEMA: &str = "audit_schema";
/// Descriptors the installed triggers were generated from.
pub const AUDIT_TRACKED: &str = "audit_tracked";

/// Table names that can never be tracked.
pub const RESERVED_TABLES: [&str; 3] = [AUDIT_DML, AUDIT_SCHEMA, AUDIT_TRACKED];

/// Append-only guards on the log tables.
pub const GUARD_TRIGGERS: [&str; 4] = [
    "audit_dml_readonly_upd",
    "audit_dml_readonly_del",
    "audit_schema_readonly_upd",
    "audit_schema_readonly_del",
];

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS audit_dml (
  id          INTEGER PRIMARY KEY,
  ts          TEXT    NOT NULL DEFAULT (datetime('now')),
  logseq      INTEGER NOT NULL,
  action      TEXT    NOT NULL CHECK (action IN ('INSERT', 'UPDATE', 'DELETE')),
  table_name  TEXT    NOT NULL,
  rowid,
  old_values  TEXT    CHECK (old_values IS NULL OR json_valid(old_values)),
  new_values  TEXT    CHECK (new_values IS NULL OR json_valid(new_values)),
  CHECK (
       (action = 'INSERT' AND old_values IS NULL     AND new_values IS NOT NULL)
    OR (action = 'UPDATE' AND old_values IS NOT NULL AND new_values IS NOT NULL)
    OR (action = 'DELETE' AND old_values IS NOT NULL AND new_values IS NULL)
  )
);

CREATE INDEX IF NOT EXISTS idx_audit_dml_order ON audit_dml(ts, logseq);
CREATE INDEX IF NOT EXISTS idx_audit_dml_table ON audit_dml(table_name, ts);

CREATE TRIGGER IF NOT EXISTS audit_dml_readonly_upd
BEFORE UPDATE ON audit_dml
BEGIN
  SELECT RAISE(ABORT, 'audit_dml is append-only');
END;
CREATE TRIGGER IF NOT EXISTS audit_dml_readonly_del
BEFORE DELETE ON audit_dml
BEGIN
  SELECT RAISE(ABORT, 'audit_dml is append-only');
END;

CREATE TABLE IF NOT EXISTS audit_schema (
  id          INTEGER PRIMARY KEY,
  ts          TEXT NOT NULL DEFAULT (datetime('now')),
  action      TEXT NOT NULL,
  object_type TEXT NOT NULL,
  object_name TEXT NOT NULL,
  details     TEXT
);

CREATE TRIGGER IF NOT EXISTS audit_schema_readonly_upd
BEFORE UPDATE ON audit_schema
BEGIN
  SELECT RAISE(ABORT, 'audit_schema is append-only');
END;
CREATE TRIGGER IF NOT EXISTS audit_schema_readonly_del
BEFORE DELETE ON audit_schema
BEGIN
  SELECT RAISE(ABORT, 'audit_schema is append-only');
END;

CREATE TABLE IF NOT EXISTS audit_tracked (
  table_name   TEXT PRIMARY KEY,
  identity     TEXT NOT NULL,
  columns      TEXT NOT NULL CHECK (json_valid(columns)),
  installed_at TEXT NOT NULL
);
";

/// Create the audit tables, indexes and guard triggers. Idempotent.
pub fn ensure_schema(conn: &Connection) -> Result<(), AuditError> {
    conn.execute_batch(SCHEMA_SQL)?;
    debug!("audit schema ensured");
    Ok(())
}

/// Whether `name` is one of the audit store's own tables.
///
/// SQLite compares table names case-insensitively, and `sqlite_` names
/// belong to the engine.
pub fn is_reserved(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED_TABLES.contains(&lower.as_str()) || lower.starts_with("sqlite_")
}
