// capture.rs — In-process capture handlers.
//
// The same insert/update/delete protocol the SQL triggers implement, for
// callers that mutate rows through their own code (or a store without a
// trigger layer). Each handler builds exactly one record and appends it to
// the sink it was given. Any error must abort the caller's mutation: an
// unaudited change is worse than a rejected one.

use serde_json::Value;

use crate::error::AuditError;
use crate::image::{ColumnValue, Row, RowImage};
use crate::record::AuditRecord;
use crate::sink::AuditSink;
use crate::table::TrackedTable;

/// Row-level capture for one tracked table, writing into an injected sink.
pub struct ChangeCapture<'a, S: AuditSink> {
    table: &'a TrackedTable,
    sink: &'a mut S,
}

impl<'a, S: AuditSink> ChangeCapture<'a, S> {
    /// Validates the descriptor once, up front.
    pub fn new(table: &'a TrackedTable, sink: &'a mut S) -> Result<Self, AuditError> {
        table.validate()?;
        Ok(Self { table, sink })
    }

    /// A row was inserted: after-image only.
    pub fn on_insert(&mut self, after: &Row) -> Result<AuditRecord, AuditError> {
        let row_id = self.identity_of(after)?;
        let image = RowImage::capture(self.table, after)?;
        self.append(AuditRecord::insert(&self.table.name, row_id, image))
    }

    /// A row was updated: both images, taken from the same pair of rows.
    ///
    /// No-op updates are recorded too. The identity must not change.
    pub fn on_update(&mut self, before: &Row, after: &Row) -> Result<AuditRecord, AuditError> {
        let old_id = self.identity_of(before)?;
        let row_id = self.identity_of(after)?;
        if old_id != row_id {
            return Err(AuditError::IdentityChanged {
                table: self.table.name.clone(),
            });
        }
        let before = RowImage::capture(self.table, before)?;
        let after = RowImage::capture(self.table, after)?;
        self.append(AuditRecord::update(&self.table.name, row_id, before, after))
    }

    /// A row was deleted: before-image only.
    pub fn on_delete(&mut self, before: &Row) -> Result<AuditRecord, AuditError> {
        let row_id = self.identity_of(before)?;
        let image = RowImage::capture(self.table, before)?;
        self.append(AuditRecord::delete(&self.table.name, row_id, image))
    }

    fn append(&mut self, mut record: AuditRecord) -> Result<AuditRecord, AuditError> {
        self.sink.append(&mut record)?;
        Ok(record)
    }

    fn identity_of(&self, row: &Row) -> Result<Value, AuditError> {
        let parts = self
            .table
            .identity
            .keys()
            .into_iter()
            .map(|key| self.identity_part(row, key))
            .collect::<Result<Vec<_>, _>>()?;
        if self.table.identity.is_composite() {
            Ok(Value::Array(parts))
        } else {
            Ok(parts.into_iter().next().unwrap_or(Value::Null))
        }
    }

    fn identity_part(&self, row: &Row, key: &str) -> Result<Value, AuditError> {
        let missing = || AuditError::MissingColumn {
            table: self.table.name.clone(),
            column: key.to_string(),
        };
        match row.get(key).ok_or_else(missing)? {
            ColumnValue::Integer(i) => Ok(Value::from(*i)),
            ColumnValue::Text(s) => Ok(Value::String(s.clone())),
            other => Err(AuditError::UnsupportedValue {
                table: self.table.name.clone(),
                column: key.to_string(),
                kind: other.kind(),
            }),
        }
    }
}
