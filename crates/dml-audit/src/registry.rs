// registry.rs — Which tables are tracked, and with what descriptor.
//
// `audit_tracked` keeps the exact TrackedTable each table's triggers were
// rendered from, with identity and columns stored as JSON. Drift detection
// compares it against the live schema, and `retrack` starts from it.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AuditError;
use crate::record::format_ts;
use crate::table::{ColumnDescriptor, Identity, TrackedTable};

/// Insert or replace the registry row for `table`.
pub fn upsert(conn: &Connection, table: &TrackedTable) -> Result<(), AuditError> {
    let identity = serde_json::to_string(&table.identity)?;
    let columns = serde_json::to_string(&table.columns)?;
    conn.execute(
        "INSERT INTO audit_tracked (table_name, identity, columns, installed_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(table_name) DO UPDATE SET
           identity = excluded.identity,
           columns = excluded.columns,
           installed_at = excluded.installed_at",
        params![
            table.name,
            identity,
            columns,
            format_ts(Utc::now())
        ],
    )?;
    Ok(())
}

/// Remove the registry row. Returns false if the table wasn't registered.
pub fn remove(conn: &Connection, table_name: &str) -> Result<bool, AuditError> {
    let removed = conn.execute(
        "DELETE FROM audit_tracked WHERE table_name = ?1",
        params![table_name],
    )?;
    Ok(removed > 0)
}

/// Load one registered descriptor.
pub fn load(conn: &Connection, table_name: &str) -> Result<Option<TrackedTable>, AuditError> {
    let raw = conn
        .query_row(
            "SELECT table_name, identity, columns FROM audit_tracked WHERE table_name = ?1",
            params![table_name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;
    raw.map(decode).transpose()
}

/// All registered descriptors, by table name.
pub fn list(conn: &Connection) -> Result<Vec<TrackedTable>, AuditError> {
    let mut stmt =
        conn.prepare("SELECT table_name, identity, columns FROM audit_tracked ORDER BY table_name")?;
    let raw = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<Result<Vec<(String, String, String)>, _>>()?;
    raw.into_iter().map(decode).collect()
}

fn decode((name, identity, columns): (String, String, String)) -> Result<TrackedTable, AuditError> {
    let identity: Identity = serde_json::from_str(&identity)?;
    let columns: Vec<ColumnDescriptor> = serde_json::from_str(&columns)?;
    Ok(TrackedTable {
        name,
        identity,
        columns,
    })
}
