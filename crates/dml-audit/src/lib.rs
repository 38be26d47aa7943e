//! # dml-audit
//!
//! Row-level DML audit capture for SQLite, implemented in the trigger layer.
//!
//! Every INSERT, UPDATE, or DELETE on a tracked table appends exactly one
//! [`AuditRecord`] to the `audit_dml` table, inside the same transaction as
//! the mutation. Records carry a before- and/or after-image of the row as a
//! JSON object whose values keep their types, a second-resolution timestamp,
//! and a [`Logseq`] token that breaks ties between events in the same second.
//!
//! Tables are described as data ([`TrackedTable`]: name, identity, typed
//! columns); triggers are rendered from that description.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use dml_audit::{AuditStore, RecordQuery};
//!
//! let mut store = AuditStore::open_in_memory().unwrap();
//! store
//!     .connection()
//!     .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);")
//!     .unwrap();
//! store.track_discovered("t", None).unwrap();
//!
//! store
//!     .connection()
//!     .execute("INSERT INTO t (id, name) VALUES (1, 'A')", [])
//!     .unwrap();
//! let records = store.records(&RecordQuery::new().table("t")).unwrap();
//! assert_eq!(records.len(), 1);
//! ```

pub mod capture;
pub mod config;
pub mod drift;
pub mod error;
pub mod image;
pub mod logseq;
pub mod record;
pub mod registry;
pub mod schema;
pub mod schema_log;
pub mod sink;
pub mod store;
pub mod table;
pub mod triggers;

// Re-export the main types at the crate root.
pub use capture::ChangeCapture;
pub use config::{AuditConfig, DatabaseConfig, TableConfig};
pub use drift::{DriftReport, DriftSeverity};
pub use error::AuditError;
pub use image::{ColumnValue, Row, RowImage};
pub use logseq::Logseq;
pub use record::{AuditRecord, DmlAction};
pub use schema_log::SchemaChange;
pub use sink::{AuditSink, MemorySink, SqliteSink};
pub use store::{AuditStore, RecordQuery};
pub use table::{ColumnDescriptor, ColumnType, Identity, TrackedTable};
pub use triggers::TriggerSet;
