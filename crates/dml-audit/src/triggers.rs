// triggers.rs — Per-table audit triggers rendered from a TrackedTable.
//
// Every tracked table gets four triggers:
//
//   audit_<table>_insert    AFTER INSERT  → INSERT record, new image only
//   audit_<table>_update    AFTER UPDATE  → UPDATE record, both images
//   audit_<table>_delete    AFTER DELETE  → DELETE record, old image only
//   audit_<table>_identity  BEFORE UPDATE → abort if the row identity changes
//
// All are row-level (FOR EACH ROW) and run inside the mutating statement,
// so the audit insert commits or rolls back with the data change. If the
// image can't be built (`json_object` rejects BLOBs) or the audit insert
// violates a constraint, the statement fails and nothing is written.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::AuditError;
use crate::logseq::LOGSEQ_SQL;
use crate::record::DmlAction;
use crate::table::{quote_ident, quote_literal, ColumnType, TrackedTable};

/// Name of the audit trigger for `table` and `op`.
pub fn trigger_name(table: &str, op: &str) -> String {
    format!("audit_{table}_{op}")
}

/// All trigger names belonging to `table`.
pub fn trigger_names(table: &str) -> Vec<String> {
    ["insert", "update", "delete", "identity"]
        .iter()
        .map(|op| trigger_name(table, op))
        .collect()
}

/// The rendered SQL for one tracked table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSet {
    pub insert: String,
    pub update: String,
    pub delete: String,
    pub identity_guard: String,
}

impl TriggerSet {
    /// The statements in installation order.
    pub fn statements(&self) -> [&str; 4] {
        [
            self.identity_guard.as_str(),
            self.insert.as_str(),
            self.update.as_str(),
            self.delete.as_str(),
        ]
    }

    /// All four statements as one script.
    pub fn to_sql(&self) -> String {
        self.statements().join("\n")
    }
}

/// SQL expression for one column of the OLD or NEW row inside json_object.
fn value_expr(table: &str, row: &str, name: &str, column_type: ColumnType) -> String {
    let col = format!("{row}.{}", quote_ident(name));
    match column_type {
        ColumnType::Boolean => format!(
            "json(CASE WHEN {col} IS NULL THEN 'null' WHEN {col} THEN 'true' ELSE 'false' END)"
        ),
        ColumnType::Json => format!("json({col})"),
        ColumnType::Text => col,
        // json_object would write an infinity as 9e999, which reads back
        // as a different value. 9e999 is SQLite's literal for +Inf.
        ColumnType::Integer | ColumnType::Real | ColumnType::Any => {
            let message = format!("cannot serialize non-finite real value of {table}.{name}");
            format!(
                "CASE WHEN {col} IN (9e999, -9e999) THEN RAISE(ABORT, {}) ELSE {col} END",
                quote_literal(&message)
            )
        }
    }
}

/// `json_object('a', NEW."a", 'b', NEW."b", ...)` over every tracked column.
fn image_expr(table: &TrackedTable, row: &str) -> String {
    let pairs: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            format!(
                "{}, {}",
                quote_literal(&c.name),
                value_expr(&table.name, row, &c.name, c.column_type)
            )
        })
        .collect();
    format!("json_object({})", pairs.join(", "))
}

fn capture_trigger(table: &TrackedTable, action: DmlAction) -> String {
    let (op, old_values, new_values, id_row) = match action {
        DmlAction::Insert => ("insert", "NULL".to_string(), image_expr(table, "NEW"), "NEW"),
        DmlAction::Update => (
            "update",
            image_expr(table, "OLD"),
            image_expr(table, "NEW"),
            "NEW",
        ),
        DmlAction::Delete => ("delete", image_expr(table, "OLD"), "NULL".to_string(), "OLD"),
    };

    format!(
        "CREATE TRIGGER IF NOT EXISTS {name}
AFTER {action} ON {table}
FOR EACH ROW
BEGIN
  INSERT INTO audit_dml (ts, logseq, action, table_name, rowid, old_values, new_values)
  VALUES (
    strftime('%Y-%m-%d %H:%M:%S', 'now'),
    {logseq},
    '{action}',
    {table_literal},
    {row_id},
    {old_values},
    {new_values}
  );
END;",
        name = quote_ident(&trigger_name(&table.name, op)),
        action = action.as_str(),
        table = quote_ident(&table.name),
        logseq = LOGSEQ_SQL,
        table_literal = quote_literal(&table.name),
        row_id = table.identity.sql_ref(id_row),
    )
}

fn identity_guard(table: &TrackedTable) -> String {
    let message = format!("row identity of tracked table {} cannot change", table.name);
    format!(
        "CREATE TRIGGER IF NOT EXISTS {name}
BEFORE UPDATE ON {table}
FOR EACH ROW
WHEN {old} IS NOT {new}
BEGIN
  SELECT RAISE(ABORT, {message});
END;",
        name = quote_ident(&trigger_name(&table.name, "identity")),
        table = quote_ident(&table.name),
        old = table.identity.sql_ref("OLD"),
        new = table.identity.sql_ref("NEW"),
        message = quote_literal(&message),
    )
}

/// Render the trigger SQL for a table. Validates the descriptor first.
pub fn render(table: &TrackedTable) -> Result<TriggerSet, AuditError> {
    table.validate()?;
    Ok(TriggerSet {
        insert: capture_trigger(table, DmlAction::Insert),
        update: capture_trigger(table, DmlAction::Update),
        delete: capture_trigger(table, DmlAction::Delete),
        identity_guard: identity_guard(table),
    })
}

/// Table that owns the trigger called `name`, if one exists.
fn owner(conn: &Connection, name: &str) -> Result<Option<String>, AuditError> {
    let owner = conn
        .query_row(
            "SELECT tbl_name FROM sqlite_master
             WHERE type = 'trigger' AND name = ?1 COLLATE NOCASE",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(owner)
}

/// Install the triggers for `table`. Existing triggers with the same names
/// on the same table are left alone; use [`reinstall`] to replace them.
///
/// Fails without installing anything if one of the names is already taken
/// by a trigger on a different table.
pub fn install(conn: &Connection, table: &TrackedTable) -> Result<(), AuditError> {
    let set = render(table)?;
    for name in trigger_names(&table.name) {
        if let Some(other) = owner(conn, &name)? {
            if !other.eq_ignore_ascii_case(&table.name) {
                return Err(AuditError::InvalidTable {
                    table: table.name.clone(),
                    reason: format!("trigger {name} already belongs to table {other}"),
                });
            }
        }
    }
    for statement in set.statements() {
        conn.execute_batch(statement)?;
    }
    info!(table = %table.name, columns = table.columns.len(), "audit triggers installed");
    Ok(())
}

/// Drop every audit trigger belonging to `table_name`.
///
/// A trigger with a matching name on some other table is not touched.
pub fn drop_triggers(conn: &Connection, table_name: &str) -> Result<(), AuditError> {
    for name in trigger_names(table_name) {
        match owner(conn, &name)? {
            Some(other) if other.eq_ignore_ascii_case(table_name) => {
                conn.execute_batch(&format!("DROP TRIGGER {}", quote_ident(&name)))?;
            }
            Some(other) => {
                debug!(trigger = %name, owner = %other, "trigger belongs to another table, kept");
            }
            None => {}
        }
    }
    info!(table = %table_name, "audit triggers dropped");
    Ok(())
}

/// Replace the triggers for `table` with freshly rendered ones.
///
/// Run this inside a transaction so the table is never left untracked.
pub fn reinstall(conn: &Connection, table: &TrackedTable) -> Result<(), AuditError> {
    render(table)?;
    drop_triggers(conn, &table.name)?;
    install(conn, table)
}

/// Which of the table's audit triggers exist in the database.
pub fn installed(conn: &Connection, table_name: &str) -> Result<Vec<String>, AuditError> {
    let mut found = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'trigger' AND name = ?1 COLLATE NOCASE AND tbl_name = ?2 COLLATE NOCASE",
    )?;
    for name in trigger_names(table_name) {
        let mut rows = stmt.query(params![name, table_name])?;
        if rows.next()?.is_some() {
            found.push(name);
        }
    }
    debug!(table = %table_name, found = found.len(), "audit triggers inspected");
    Ok(found)
}
