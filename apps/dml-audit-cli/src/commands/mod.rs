pub mod audit;
pub mod table;

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use dml_audit::{AuditConfig, AuditStore};

/// Settings shared by every subcommand.
pub struct Context {
    pub config: AuditConfig,
    pub db_path: PathBuf,
}

impl Context {
    /// Load the config file (defaults if absent) and apply the `--db` override.
    pub fn load(config_path: &Path, db_override: Option<PathBuf>) -> anyhow::Result<Self> {
        let config = AuditConfig::load_or_default(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        let db_path = db_override.unwrap_or_else(|| config.database.path.clone());
        tracing::info!(
            db = %db_path.display(),
            config = %config_path.display(),
            tables = config.tables.len(),
            "configuration loaded"
        );
        Ok(Self { config, db_path })
    }

    pub fn open_store(&self) -> anyhow::Result<AuditStore> {
        AuditStore::open(&self.db_path, &self.config.database)
            .with_context(|| format!("opening {}", self.db_path.display()))
    }
}

#[cfg(test)]
pub(crate) fn test_context(dir: &tempfile::TempDir) -> Context {
    Context {
        config: AuditConfig::default(),
        db_path: dir.path().join("audit.db"),
    }
}
