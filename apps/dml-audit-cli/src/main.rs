//! # dml-audit
//!
//! Command-line interface for SQLite DML audit capture.
//!
//! - `dml-audit init` — create the audit tables
//! - `dml-audit track/untrack/retrack <table>` — manage capture triggers
//! - `dml-audit sync` — track every table listed in the config file
//! - `dml-audit sql <table>` — print the trigger SQL without touching the database
//! - `dml-audit tail/schema-log/drift` — inspect the audit trail

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::Context;

/// Row-level DML audit triggers for SQLite.
#[derive(Parser)]
#[command(name = "dml-audit", version, about)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, default_value = "dml-audit.toml")]
    config: PathBuf,

    /// Database path, overriding `[database] path` from the config.
    #[arg(long, env = "DML_AUDIT_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the audit tables in the database.
    Init,
    /// Install capture triggers on a table.
    Track {
        table: String,
        /// Identity column, or comma-separated key columns (defaults to the
        /// primary key, else rowid).
        #[arg(long)]
        identity: Option<String>,
    },
    /// Remove a table's capture triggers. Recorded history is kept.
    Untrack { table: String },
    /// Regenerate a table's triggers from its current columns.
    Retrack { table: String },
    /// Print the trigger SQL for a table without installing it.
    Sql {
        table: String,
        #[arg(long)]
        identity: Option<String>,
    },
    /// Track every table listed in the config file.
    Sync,
    /// List tracked tables.
    Tables,
    /// Compare tracked tables with their live schema.
    Drift,
    /// Show recent audit records.
    Tail {
        /// Number of records to show.
        #[arg(short, default_value = "10")]
        n: usize,
        /// Only records for this table.
        #[arg(long)]
        table: Option<String>,
        /// One JSON object per line instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show track/untrack/retrack history.
    SchemaLog,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't interfere with command output.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dml_audit=info".parse()?))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let ctx = Context::load(&cli.config, cli.db)?;

    match &cli.command {
        Commands::Init => commands::table::init(&ctx),
        Commands::Track { table, identity } => {
            commands::table::track(&ctx, table, identity.as_deref())
        }
        Commands::Untrack { table } => commands::table::untrack(&ctx, table),
        Commands::Retrack { table } => commands::table::retrack(&ctx, table),
        Commands::Sql { table, identity } => commands::table::sql(&ctx, table, identity.as_deref()),
        Commands::Sync => commands::table::sync(&ctx),
        Commands::Tables => commands::table::list(&ctx),
        Commands::Drift => commands::audit::drift(&ctx),
        Commands::Tail { n, table, json } => {
            commands::audit::tail(&ctx, *n, table.as_deref(), *json)
        }
        Commands::SchemaLog => commands::audit::schema_log(&ctx),
    }
}
