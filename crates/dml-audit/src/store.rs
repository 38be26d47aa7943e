// store.rs — The audit store: one SQLite database holding the tracked
// tables, their triggers, and the audit log they write to.
//
// AuditStore installs and removes capture triggers, keeps the registry and
// schema log in step with them, and reads records back in their total
// order `(ts, logseq, id)`. Appends never go through here: the triggers
// write them as part of the user's own statements.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{DatabaseConfig, TableConfig};
use crate::drift::{self, DriftReport};
use crate::error::AuditError;
use crate::image::RowImage;
use crate::record::{format_ts, parse_ts, AuditRecord, DmlAction};
use crate::registry;
use crate::schema::ensure_schema;
use crate::schema_log::{
    log_schema_change, read_schema_log, SchemaChange, RETRACK_TABLE, TRACK_TABLE, UNTRACK_TABLE,
};
use crate::sink::{json_to_sql, sql_to_json, SqliteSink};
use crate::table::{has_rowid, table_info, Identity, TrackedTable};
use crate::triggers;

/// Filter for [`AuditStore::records`]. All criteria are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub table: Option<String>,
    pub action: Option<DmlAction>,
    pub row_id: Option<Value>,
    /// Only records captured at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches (still returned oldest first).
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn action(mut self, action: DmlAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn row_id(mut self, row_id: impl Into<Value>) -> Self {
        self.row_id = Some(row_id.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

type RawRecord = (
    i64,
    String,
    i64,
    String,
    String,
    SqlValue,
    Option<String>,
    Option<String>,
);

/// An audit store backed by a SQLite database.
pub struct AuditStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl AuditStore {
    /// Open (or create) the database at `path`, apply the connection
    /// settings and make sure the audit tables exist.
    pub fn open(path: impl AsRef<Path>, config: &DatabaseConfig) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        let mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            config.journal_mode.as_str(),
            |row| row.get(0),
        )?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;
        // REPLACE only fires DELETE triggers for the rows it removes when
        // recursive triggers are on.
        conn.pragma_update(None, "recursive_triggers", true)?;
        ensure_schema(&conn)?;
        info!(path = %path.display(), journal_mode = %mode, "audit store opened");
        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    /// A private in-memory store. Nothing survives the value.
    pub fn open_in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "recursive_triggers", true)?;
        ensure_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    /// Database file, or None for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The underlying connection, for the caller's own DML.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access, e.g. to open a transaction.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// A sink appending into this store's `audit_dml`.
    pub fn sink(&self) -> SqliteSink<'_> {
        SqliteSink::new(&self.conn)
    }

    /// Start auditing `table`, or refresh its triggers if already tracked.
    ///
    /// Triggers, registry row and schema-log entry are written in one
    /// transaction.
    pub fn track(&mut self, table: &TrackedTable) -> Result<(), AuditError> {
        table.validate()?;
        let tx = self.conn.transaction()?;

        let live = table_info(&tx, &table.name)?;
        if live.is_empty() {
            return Err(AuditError::InvalidTable {
                table: table.name.clone(),
                reason: "table does not exist".to_string(),
            });
        }
        for column in &table.columns {
            if !live.iter().any(|c| c.name.eq_ignore_ascii_case(&column.name)) {
                return Err(AuditError::InvalidTable {
                    table: table.name.clone(),
                    reason: format!("column {} does not exist", column.name),
                });
            }
        }

        if table.identity == Identity::RowId && !has_rowid(&tx, &table.name) {
            return Err(AuditError::InvalidTable {
                table: table.name.clone(),
                reason: "WITHOUT ROWID table needs a key column identity, not rowid".to_string(),
            });
        }

        let action = if registry::load(&tx, &table.name)?.is_some() {
            RETRACK_TABLE
        } else {
            TRACK_TABLE
        };
        triggers::reinstall(&tx, table)?;
        registry::upsert(&tx, table)?;
        let details = serde_json::to_string(&table.column_names())?;
        log_schema_change(
            &tx,
            &SchemaChange::new(action, "table", &table.name).with_details(details),
        )?;
        tx.commit()?;

        info!(table = %table.name, identity = %table.identity, action, "table tracked");
        Ok(())
    }

    /// Track a table with every column it has now.
    ///
    /// `identity` overrides the discovered one (the primary key, else rowid);
    /// comma-separated names give a composite identity.
    pub fn track_discovered(
        &mut self,
        name: &str,
        identity: Option<&str>,
    ) -> Result<TrackedTable, AuditError> {
        let mut table = TrackedTable::discover(&self.conn, name)?;
        if let Some(identity) = identity {
            table.identity = Identity::from(identity.to_string());
        }
        self.track(&table)?;
        Ok(table)
    }

    /// Stop auditing `name`: drop its triggers and registry row.
    ///
    /// Existing audit records are kept.
    pub fn untrack(&mut self, name: &str) -> Result<(), AuditError> {
        let tx = self.conn.transaction()?;
        if !registry::remove(&tx, name)? {
            return Err(AuditError::NotTracked(name.to_string()));
        }
        triggers::drop_triggers(&tx, name)?;
        log_schema_change(&tx, &SchemaChange::new(UNTRACK_TABLE, "table", name))?;
        tx.commit()?;
        info!(table = %name, "table untracked");
        Ok(())
    }

    /// Regenerate a tracked table's triggers from its current columns,
    /// keeping its identity.
    pub fn retrack(&mut self, name: &str) -> Result<TrackedTable, AuditError> {
        let existing =
            registry::load(&self.conn, name)?.ok_or_else(|| AuditError::NotTracked(name.to_string()))?;
        let mut table = TrackedTable::discover(&self.conn, name)?;
        table.identity = existing.identity;
        self.track(&table)?;
        Ok(table)
    }

    /// Track every configured table. Returns the descriptors installed.
    pub fn sync(&mut self, tables: &[TableConfig]) -> Result<Vec<TrackedTable>, AuditError> {
        let mut installed = Vec::with_capacity(tables.len());
        for entry in tables {
            let table = entry.resolve(&self.conn)?;
            self.track(&table)?;
            installed.push(table);
        }
        Ok(installed)
    }

    /// Registered descriptors, by table name.
    pub fn tracked(&self) -> Result<Vec<TrackedTable>, AuditError> {
        registry::list(&self.conn)
    }

    /// Drift report for every tracked table.
    pub fn drift(&self) -> Result<Vec<DriftReport>, AuditError> {
        drift::check_all(&self.conn)
    }

    pub fn schema_log(&self) -> Result<Vec<SchemaChange>, AuditError> {
        read_schema_log(&self.conn)
    }

    /// Records matching `query`, in `(ts, logseq, id)` order.
    pub fn records(&self, query: &RecordQuery) -> Result<Vec<AuditRecord>, AuditError> {
        let mut clauses = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();
        if let Some(table) = &query.table {
            args.push(SqlValue::Text(table.clone()));
            clauses.push(format!("table_name = ?{}", args.len()));
        }
        if let Some(action) = query.action {
            args.push(SqlValue::Text(action.as_str().to_string()));
            clauses.push(format!("action = ?{}", args.len()));
        }
        if let Some(row_id) = &query.row_id {
            args.push(json_to_sql(row_id));
            clauses.push(format!("rowid = ?{}", args.len()));
        }
        if let Some(since) = query.since {
            args.push(SqlValue::Text(format_ts(since)));
            clauses.push(format!("ts >= ?{}", args.len()));
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let columns = "id, ts, logseq, action, table_name, rowid, old_values, new_values";
        let sql = match query.limit {
            Some(limit) => {
                args.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
                format!(
                    "SELECT * FROM (SELECT {columns} FROM audit_dml{filter} \
                     ORDER BY ts DESC, logseq DESC, id DESC LIMIT ?{}) \
                     ORDER BY ts, logseq, id",
                    args.len()
                )
            }
            None => format!("SELECT {columns} FROM audit_dml{filter} ORDER BY ts, logseq, id"),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<Result<Vec<RawRecord>, _>>()?;

        // Composite identities are stored as JSON array text.
        let composite: HashSet<String> = registry::list(&self.conn)?
            .into_iter()
            .filter(|t| t.identity.is_composite())
            .map(|t| t.name)
            .collect();
        let records = raw
            .into_iter()
            .map(|raw| decode_record(raw, &composite))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(matched = records.len(), "audit records read");
        Ok(records)
    }

    /// The `n` most recent records, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<AuditRecord>, AuditError> {
        self.records(&RecordQuery::new().limit(n))
    }

    /// Number of records in `audit_dml`.
    pub fn count(&self) -> Result<u64, AuditError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_dml", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn decode_record(raw: RawRecord, composite: &HashSet<String>) -> Result<AuditRecord, AuditError> {
    let (id, ts, logseq, action, table_name, row_id, old_values, new_values) = raw;
    let mut row_id = sql_to_json(row_id);
    if composite.contains(&table_name) {
        // Rows recorded before the table had a composite key stay as text.
        if let Value::String(text) = &row_id {
            if let Ok(parts @ Value::Array(_)) = serde_json::from_str::<Value>(text) {
                row_id = parts;
            }
        }
    }
    let record = AuditRecord {
        id: Some(id),
        timestamp: parse_ts(&ts)?,
        logseq: logseq.into(),
        action: action.parse()?,
        table_name,
        row_id,
        before: old_values.as_deref().map(RowImage::from_json_str).transpose()?,
        after: new_values.as_deref().map(RowImage::from_json_str).transpose()?,
    };
    record.validate()?;
    Ok(record)
}
