// audit.rs — Audit subcommands: tail, schema-log, drift.

use dml_audit::{DriftSeverity, RecordQuery};

use super::Context;

pub fn tail(ctx: &Context, n: usize, table: Option<&str>, json: bool) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let mut query = RecordQuery::new().limit(n);
    if let Some(table) = table {
        query = query.table(table);
    }
    let records = store.records(&query)?;

    if json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    if records.is_empty() {
        println!("No audit records.");
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:<20} {:<12} CHANGES",
        "TIMESTAMP", "ACTION", "TABLE", "ROWID"
    );
    println!("{}", "-".repeat(80));

    for record in &records {
        let changes = match (&record.before, &record.after) {
            (Some(_), Some(_)) => {
                let changed = record.changed_columns();
                if changed.is_empty() {
                    "(no change)".to_string()
                } else {
                    changed.join(", ")
                }
            }
            (None, Some(after)) => format!("{} column(s)", after.len()),
            (Some(before), None) => format!("{} column(s)", before.len()),
            (None, None) => "-".to_string(),
        };
        println!(
            "{:<20} {:<8} {:<20} {:<12} {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.action.as_str(),
            record.table_name,
            record.row_id.to_string(),
            changes,
        );
    }
    Ok(())
}

pub fn schema_log(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let entries = store.schema_log()?;
    if entries.is_empty() {
        println!("No schema changes recorded.");
        return Ok(());
    }

    println!("{:<20} {:<14} {:<24} DETAILS", "TIMESTAMP", "ACTION", "OBJECT");
    println!("{}", "-".repeat(80));
    for entry in &entries {
        println!(
            "{:<20} {:<14} {:<24} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            format!("{} {}", entry.object_type, entry.object_name),
            entry.details.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

pub fn drift(ctx: &Context) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let reports = store.drift()?;
    if reports.is_empty() {
        println!("No tracked tables.");
        return Ok(());
    }

    for report in &reports {
        println!("{:<24} {}", report.table, report.severity);
        if report.table_missing {
            println!("  table no longer exists");
        }
        if !report.added.is_empty() {
            println!("  not captured:     {}", report.added.join(", "));
        }
        if !report.removed.is_empty() {
            println!("  no longer exist:  {}", report.removed.join(", "));
        }
        if !report.missing_triggers.is_empty() {
            println!("  missing triggers: {}", report.missing_triggers.join(", "));
        }
    }

    let broken = reports
        .iter()
        .filter(|r| r.severity == DriftSeverity::Broken)
        .count();
    if broken > 0 {
        anyhow::bail!("{broken} tracked table(s) have broken audit triggers");
    }
    Ok(())
}
