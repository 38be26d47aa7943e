// sink.rs — AuditSink trait and its implementations.
//
// The audit store is a fan-in append target shared by every tracked table.
// Code that captures events in-process gets the sink passed in explicitly;
// there is no global. Appending is the only write operation a sink offers.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::AuditError;
use crate::record::{format_ts, AuditRecord};

/// Append-only destination for audit records.
///
/// Implementations must either persist the record and set `record.id`,
/// or return an error. Callers treat an error as fatal to the mutation
/// that produced the record.
pub trait AuditSink {
    fn append(&mut self, record: &mut AuditRecord) -> Result<(), AuditError>;
}

/// In-memory sink. Ids are 1-based append positions.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<AuditRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<AuditRecord> {
        self.records
    }
}

impl AuditSink for MemorySink {
    fn append(&mut self, record: &mut AuditRecord) -> Result<(), AuditError> {
        record.validate()?;
        record.id = Some(self.records.len() as i64 + 1);
        self.records.push(record.clone());
        Ok(())
    }
}

/// Sink writing into `audit_dml` through a borrowed connection.
///
/// Pass a `rusqlite::Transaction` (it derefs to `Connection`) to make the
/// audit append part of the caller's transaction.
pub struct SqliteSink<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSink<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl AuditSink for SqliteSink<'_> {
    fn append(&mut self, record: &mut AuditRecord) -> Result<(), AuditError> {
        record.validate()?;
        let old_values = record.before.as_ref().map(|i| i.to_json_string()).transpose()?;
        let new_values = record.after.as_ref().map(|i| i.to_json_string()).transpose()?;
        let row_id = json_to_sql(&record.row_id);

        self.conn.execute(
            "INSERT INTO audit_dml (ts, logseq, action, table_name, rowid, old_values, new_values)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                format_ts(record.timestamp),
                record.logseq.value(),
                record.action.as_str(),
                record.table_name,
                row_id,
                old_values,
                new_values,
            ],
        )?;
        record.id = Some(self.conn.last_insert_rowid());
        debug!(
            table = %record.table_name,
            action = %record.action,
            id = ?record.id,
            "audit record appended"
        );
        Ok(())
    }
}

/// Map a row identity onto a SQLite value without stringifying numbers.
pub(crate) fn json_to_sql(value: &serde_json::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    use serde_json::Value;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Sql::Integer(i),
            None => Sql::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

/// Inverse of [`json_to_sql`] for values read back from `audit_dml.rowid`.
pub(crate) fn sql_to_json(value: rusqlite::types::Value) -> serde_json::Value {
    use rusqlite::types::Value as Sql;
    use serde_json::Value;
    match value {
        Sql::Null => Value::Null,
        Sql::Integer(i) => Value::from(i),
        Sql::Real(r) => serde_json::Number::from_f64(r).map_or(Value::Null, Value::Number),
        Sql::Text(s) => Value::String(s),
        Sql::Blob(b) => Value::from(b),
    }
}
