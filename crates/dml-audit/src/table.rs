// table.rs — Tracked table descriptors.
//
// A TrackedTable is the data the trigger generator works from: the table
// name, how a row is identified, and the ordered list of typed columns that
// go into every before/after image. Triggers are rendered from this value,
// never from hand-edited SQL text.
//
// Column sets are fixed when the triggers are installed. A column added to
// the table later is silently missing from the diffs until the triggers are
// regenerated (see `drift`).

use std::collections::HashSet;
use std::fmt;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::schema;

/// Value type of a tracked column, as far as image serialization cares.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    /// Stored as 0/1, rendered as JSON `true`/`false`.
    Boolean,
    /// Text holding a JSON document, embedded as structured JSON.
    Json,
    /// No declared affinity; the stored value's own type is used.
    #[default]
    Any,
}

impl ColumnType {
    /// Map a SQLite declared column type to a ColumnType.
    ///
    /// Follows SQLite's affinity rules, with two extensions checked first:
    /// `BOOL`/`BOOLEAN` and `JSON`, which SQLite itself treats as NUMERIC.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        if upper.starts_with("BOOL") {
            ColumnType::Boolean
        } else if upper == "JSON" || upper == "JSONB" {
            ColumnType::Json
        } else if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::Text
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ColumnType::Real
        } else {
            ColumnType::Any
        }
    }
}

/// One tracked column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// How a row of a tracked table is identified in its audit records.
///
/// Serialized as a string (`"rowid"` or the column name) or, for a
/// composite key, an array of column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IdentityRepr", into = "IdentityRepr")]
pub enum Identity {
    /// SQLite's implicit rowid.
    RowId,
    /// A named column (usually the primary key).
    Column(String),
    /// A composite primary key, in key order. Recorded as a JSON array.
    Columns(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum IdentityRepr {
    One(String),
    Many(Vec<String>),
}

impl Identity {
    /// SQL expression for the identity of the OLD or NEW row inside a trigger.
    pub(crate) fn sql_ref(&self, row: &str) -> String {
        match self {
            Identity::RowId => format!("{row}.rowid"),
            Identity::Column(name) => format!("{row}.{}", quote_ident(name)),
            Identity::Columns(names) => {
                let parts: Vec<String> = names
                    .iter()
                    .map(|name| format!("{row}.{}", quote_ident(name)))
                    .collect();
                format!("json_array({})", parts.join(", "))
            }
        }
    }

    /// Keys under which the identity is looked up in an in-process row.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Identity::RowId => vec!["rowid"],
            Identity::Column(name) => vec![name.as_str()],
            Identity::Columns(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Identity::Columns(_))
    }
}

/// `"rowid"`, a column name, or comma-separated column names for a
/// composite key.
impl From<String> for Identity {
    fn from(value: String) -> Self {
        if value.contains(',') {
            Identity::Columns(value.split(',').map(|s| s.trim().to_string()).collect())
        } else if value.eq_ignore_ascii_case("rowid") {
            Identity::RowId
        } else {
            Identity::Column(value)
        }
    }
}

impl From<IdentityRepr> for Identity {
    fn from(value: IdentityRepr) -> Self {
        match value {
            IdentityRepr::One(name) => Identity::from(name),
            IdentityRepr::Many(names) => Identity::Columns(names),
        }
    }
}

impl From<Identity> for IdentityRepr {
    fn from(value: Identity) -> Self {
        match value {
            Identity::RowId => IdentityRepr::One("rowid".to_string()),
            Identity::Column(name) => IdentityRepr::One(name),
            Identity::Columns(names) => IdentityRepr::Many(names),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keys().join(","))
    }
}

/// A table instrumented with audit triggers.
///
/// Built with the builder methods or discovered from the live schema:
///
/// ```rust
/// use dml_audit::{ColumnType, TrackedTable};
///
/// let table = TrackedTable::new("t")
///     .column("id", ColumnType::Integer)
///     .column("name", ColumnType::Text)
///     .with_identity("id");
/// assert_eq!(table.column_names(), vec!["id", "name"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTable {
    pub name: String,
    pub identity: Identity,
    pub columns: Vec<ColumnDescriptor>,
}

impl TrackedTable {
    /// A table with no columns yet, identified by rowid.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: Identity::RowId,
            columns: Vec::new(),
        }
    }

    /// Append a tracked column (builder pattern).
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(ColumnDescriptor::new(name, column_type));
        self
    }

    /// Identify rows by the given column (or `"rowid"`).
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Identity::from(identity.into());
        self
    }

    /// Identify rows by several columns together (a composite key).
    pub fn with_composite_identity<I, C>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.identity = Identity::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Check that the descriptor can be installed.
    pub fn validate(&self) -> Result<(), AuditError> {
        let invalid = |reason: &str| AuditError::InvalidTable {
            table: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("table name is empty"));
        }
        if schema::is_reserved(&self.name) {
            return Err(AuditError::ReservedTable(self.name.clone()));
        }
        if self.columns.is_empty() {
            return Err(invalid("no columns to track"));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(invalid("column name is empty"));
            }
            // SQLite column names are case-insensitive.
            if !seen.insert(column.name.to_ascii_lowercase()) {
                return Err(invalid(&format!("duplicate column {}", column.name)));
            }
        }

        if let Identity::Columns(ids) = &self.identity {
            if ids.is_empty() {
                return Err(invalid("composite identity has no columns"));
            }
            let mut distinct = HashSet::new();
            if !ids.iter().all(|id| distinct.insert(id.to_ascii_lowercase())) {
                return Err(invalid("composite identity repeats a column"));
            }
        }
        if self.identity != Identity::RowId {
            for id in self.identity.keys() {
                if !seen.contains(&id.to_ascii_lowercase()) {
                    return Err(invalid(&format!("identity column {id} is not tracked")));
                }
            }
        }
        Ok(())
    }

    /// Build a descriptor from the table's current schema.
    ///
    /// Identity: the primary key column when there is exactly one, every
    /// key column (in key order) for a composite key, otherwise the
    /// implicit rowid.
    pub fn discover(conn: &Connection, name: &str) -> Result<Self, AuditError> {
        let info = table_info(conn, name)?;
        if info.is_empty() {
            return Err(AuditError::InvalidTable {
                table: name.to_string(),
                reason: "table does not exist".to_string(),
            });
        }

        let mut pk: Vec<&TableColumn> = info.iter().filter(|c| c.pk > 0).collect();
        pk.sort_by_key(|c| c.pk);
        let identity = match pk.as_slice() {
            [] => Identity::RowId,
            [only] => Identity::Column(only.name.clone()),
            many => Identity::Columns(many.iter().map(|c| c.name.clone()).collect()),
        };

        Ok(Self {
            name: name.to_string(),
            identity,
            columns: info
                .iter()
                .map(|c| ColumnDescriptor::new(&c.name, ColumnType::from_declared(&c.declared_type)))
                .collect(),
        })
    }
}

/// One row of `PRAGMA table_info`.
#[derive(Debug, Clone)]
pub(crate) struct TableColumn {
    pub name: String,
    pub declared_type: String,
    pub pk: i64,
}

/// Read the live column list of a table. Empty if the table doesn't exist.
pub(crate) fn table_info(conn: &Connection, table: &str) -> Result<Vec<TableColumn>, AuditError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok(TableColumn {
            name: row.get(1)?,
            declared_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            pk: row.get(5)?,
        })
    })?;
    let columns = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Whether the table has an implicit rowid (false for WITHOUT ROWID tables).
pub(crate) fn has_rowid(conn: &Connection, table: &str) -> bool {
    conn.prepare(&format!("SELECT rowid FROM {} LIMIT 0", quote_ident(table)))
        .is_ok()
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote an SQL string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
