// table.rs — Table subcommands: init, track, untrack, retrack, sql, sync, tables.

use anyhow::Context as _;
use dml_audit::{triggers, Identity, TrackedTable};
use rusqlite::{Connection, OpenFlags};

use super::Context;

pub fn init(ctx: &Context) -> anyhow::Result<()> {
    ctx.open_store()?;
    println!("Audit store ready at {}", ctx.db_path.display());
    Ok(())
}

pub fn track(ctx: &Context, table: &str, identity: Option<&str>) -> anyhow::Result<()> {
    let mut store = ctx.open_store()?;
    let tracked = store
        .track_discovered(table, identity)
        .with_context(|| format!("tracking {table}"))?;
    println!(
        "Tracking {} ({} column(s), identity {}).",
        tracked.name,
        tracked.columns.len(),
        tracked.identity
    );
    Ok(())
}

pub fn untrack(ctx: &Context, table: &str) -> anyhow::Result<()> {
    let mut store = ctx.open_store()?;
    store
        .untrack(table)
        .with_context(|| format!("untracking {table}"))?;
    println!("Stopped tracking {table}. Existing audit records are kept.");
    Ok(())
}

pub fn retrack(ctx: &Context, table: &str) -> anyhow::Result<()> {
    let mut store = ctx.open_store()?;
    let tracked = store
        .retrack(table)
        .with_context(|| format!("retracking {table}"))?;
    println!(
        "Regenerated triggers for {} ({} column(s)).",
        tracked.name,
        tracked.columns.len()
    );
    Ok(())
}

/// Print the trigger SQL. Opens the database read-only: nothing is created,
/// not even the audit tables.
pub fn sql(ctx: &Context, table: &str, identity: Option<&str>) -> anyhow::Result<()> {
    let conn = Connection::open_with_flags(&ctx.db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("opening {} read-only", ctx.db_path.display()))?;
    let mut tracked = TrackedTable::discover(&conn, table)?;
    if let Some(identity) = identity {
        tracked.identity = Identity::from(identity.to_string());
    }
    println!("{}", triggers::render(&tracked)?.to_sql());
    Ok(())
}

pub fn sync(ctx: &Context) -> anyhow::Result<()> {
    if ctx.config.tables.is_empty() {
        println!("No [[tables]] configured.");
        return Ok(());
    }
    let mut store = ctx.open_store()?;
    let tracked = store.sync(&ctx.config.tables)?;
    for table in &tracked {
        println!("Tracking {} ({} column(s)).", table.name, table.columns.len());
    }
    Ok(())
}

pub fn list(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let tables = store.tracked()?;
    if tables.is_empty() {
        println!("No tracked tables.");
        return Ok(());
    }

    println!("{:<24} {:<16} COLUMNS", "TABLE", "IDENTITY");
    println!("{}", "-".repeat(72));
    for table in &tables {
        println!(
            "{:<24} {:<16} {}",
            table.name,
            table.identity.to_string(),
            table.column_names().join(", ")
        );
    }
    Ok(())
}
