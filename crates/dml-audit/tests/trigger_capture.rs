//! End-to-end tests: real SQL statements against tracked tables in an
//! on-disk database, read back through the store.

use dml_audit::{
    AuditSink, AuditStore, ChangeCapture, ColumnType, ColumnValue, DatabaseConfig, DmlAction,
    DriftSeverity, RecordQuery, Row, SqliteSink, TrackedTable,
};
use serde_json::json;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> AuditStore {
    AuditStore::open(dir.path().join("audit.db"), &DatabaseConfig::default()).unwrap()
}

fn store_with_t(dir: &TempDir) -> AuditStore {
    let mut store = open_store(dir);
    store
        .connection()
        .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT);")
        .unwrap();
    store.track_discovered("t", None).unwrap();
    store
}

/// Records in append order. Same-millisecond events have no defined
/// `(ts, logseq)` order, so tests that care about sequence use the id.
fn in_append_order(store: &AuditStore, query: &RecordQuery) -> Vec<dml_audit::AuditRecord> {
    let mut records = store.records(query).unwrap();
    records.sort_by_key(|r| r.id);
    records
}

#[test]
fn insert_update_delete_produce_exact_images() {
    let dir = TempDir::new().unwrap();
    let store = store_with_t(&dir);
    let conn = store.connection();

    conn.execute("INSERT INTO t (id, name) VALUES (1, 'A')", [])
        .unwrap();
    conn.execute("UPDATE t SET name = 'B' WHERE id = 1", [])
        .unwrap();
    conn.execute("DELETE FROM t WHERE id = 1", []).unwrap();

    let records = in_append_order(&store, &RecordQuery::new().table("t"));
    assert_eq!(records.len(), 3);

    let insert = &records[0];
    assert_eq!(insert.action, DmlAction::Insert);
    assert_eq!(insert.table_name, "t");
    assert_eq!(insert.row_id, json!(1));
    assert!(insert.before.is_none());
    assert_eq!(
        serde_json::to_value(&insert.after).unwrap(),
        json!({"id": 1, "name": "A"})
    );

    let update = &records[1];
    assert_eq!(update.action, DmlAction::Update);
    assert_eq!(
        serde_json::to_value(&update.before).unwrap(),
        json!({"id": 1, "name": "A"})
    );
    assert_eq!(
        serde_json::to_value(&update.after).unwrap(),
        json!({"id": 1, "name": "B"})
    );
    assert_eq!(update.changed_columns(), vec!["name"]);

    let delete = &records[2];
    assert_eq!(delete.action, DmlAction::Delete);
    assert_eq!(
        serde_json::to_value(&delete.before).unwrap(),
        json!({"id": 1, "name": "B"})
    );
    assert!(delete.after.is_none());
}

#[test]
fn wire_columns_hold_json_text() {
    let dir = TempDir::new().unwrap();
    let store = store_with_t(&dir);
    store
        .connection()
        .execute("INSERT INTO t (id, name) VALUES (1, 'A')", [])
        .unwrap();

    let (action, table_name, rowid, old, new): (String, String, i64, Option<String>, String) =
        store
            .connection()
            .query_row(
                "SELECT action, table_name, rowid, old_values, new_values FROM audit_dml",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .unwrap();
    assert_eq!(action, "INSERT");
    assert_eq!(table_name, "t");
    assert_eq!(rowid, 1);
    assert!(old.is_none());
    assert_eq!(new, r#"{"id":1,"name":"A"}"#);
}

#[test]
fn no_op_update_is_recorded() {
    let dir = TempDir::new().unwrap();
    let store = store_with_t(&dir);
    let conn = store.connection();
    conn.execute("INSERT INTO t (id, name) VALUES (1, 'A')", [])
        .unwrap();
    conn.execute("UPDATE t SET name = 'A' WHERE id = 1", [])
        .unwrap();

    let updates = store
        .records(&RecordQuery::new().action(DmlAction::Update))
        .unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].before, updates[0].after);
    assert!(updates[0].changed_columns().is_empty());
}

#[test]
fn images_preserve_value_types() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    store
        .connection()
        .execute_batch(
            "CREATE TABLE v (
               id INTEGER PRIMARY KEY,
               qty INTEGER,
               price REAL,
               label TEXT,
               note TEXT,
               active BOOLEAN,
               meta JSON
             );",
        )
        .unwrap();
    store.track_discovered("v", None).unwrap();
    store
        .connection()
        .execute(
            "INSERT INTO v VALUES (1, 42, 2.5, '42', NULL, 1, '{\"tags\":[\"a\",\"b\"]}')",
            [],
        )
        .unwrap();

    let records = store.records(&RecordQuery::new().table("v")).unwrap();
    let after = records[0].after.as_ref().unwrap();
    assert_eq!(after.get("qty"), Some(ColumnValue::Integer(42)));
    assert_eq!(after.get("price"), Some(ColumnValue::Real(2.5)));
    // Text that looks like a number stays text.
    assert_eq!(after.get("label"), Some(ColumnValue::Text("42".into())));
    assert_eq!(after.get("note"), Some(ColumnValue::Null));
    assert_eq!(after.get("active"), Some(ColumnValue::Boolean(true)));
    assert_eq!(
        after.get("meta"),
        Some(ColumnValue::Json(json!({"tags": ["a", "b"]})))
    );
    assert_eq!(
        after.columns().collect::<Vec<_>>(),
        vec!["id", "qty", "price", "label", "note", "active", "meta"]
    );
}

#[test]
fn text_and_rowid_identities() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    store
        .connection()
        .execute_batch(
            "CREATE TABLE pages (slug TEXT PRIMARY KEY, body TEXT);
             CREATE TABLE notes (body TEXT);",
        )
        .unwrap();
    store.track_discovered("pages", None).unwrap();
    store.track_discovered("notes", None).unwrap();

    let conn = store.connection();
    conn.execute("INSERT INTO pages VALUES ('home', 'hi')", [])
        .unwrap();
    conn.execute("INSERT INTO notes (rowid, body) VALUES (7, 'x')", [])
        .unwrap();

    let pages = store.records(&RecordQuery::new().table("pages")).unwrap();
    assert_eq!(pages[0].row_id, json!("home"));
    let notes = store.records(&RecordQuery::new().table("notes")).unwrap();
    assert_eq!(notes[0].row_id, json!(7));

    let by_slug = store
        .records(&RecordQuery::new().row_id("home"))
        .unwrap();
    assert_eq!(by_slug.len(), 1);
}

#[test]
fn rollback_leaves_no_audit_record() {
    let dir = TempDir::new().unwrap();
    let mut store = store_with_t(&dir);
    {
        let tx = store.connection_mut().transaction().unwrap();
        tx.execute("INSERT INTO t (id, name) VALUES (1, 'A')", [])
            .unwrap();
        let inside: i64 = tx
            .query_row("SELECT COUNT(*) FROM audit_dml", [], |r| r.get(0))
            .unwrap();
        assert_eq!(inside, 1);
        tx.rollback().unwrap();
    }
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn unserializable_value_rejects_the_mutation() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    store
        .connection()
        .execute_batch("CREATE TABLE files (id INTEGER PRIMARY KEY, data BLOB, meta JSON);")
        .unwrap();
    store.track_discovered("files", None).unwrap();

    let conn = store.connection();
    assert!(conn
        .execute("INSERT INTO files (id, data) VALUES (1, X'00FF')", [])
        .is_err());
    assert!(conn
        .execute("INSERT INTO files (id, meta) VALUES (2, 'not json')", [])
        .is_err());

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn identity_change_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = store_with_t(&dir);
    let conn = store.connection();
    conn.execute("INSERT INTO t (id, name) VALUES (1, 'A')", [])
        .unwrap();

    let err = conn
        .execute("UPDATE t SET id = 2 WHERE id = 1", [])
        .unwrap_err();
    assert!(err.to_string().contains("cannot change"));

    let id: i64 = conn
        .query_row("SELECT id FROM t", [], |r| r.get(0))
        .unwrap();
    assert_eq!(id, 1);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn audit_log_is_append_only() {
    let dir = TempDir::new().unwrap();
    let store = store_with_t(&dir);
    let conn = store.connection();
    conn.execute("INSERT INTO t (id, name) VALUES (1, 'A')", [])
        .unwrap();

    assert!(conn
        .execute("UPDATE audit_dml SET action = 'DELETE'", [])
        .is_err());
    assert!(conn.execute("DELETE FROM audit_dml", []).is_err());
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn multi_row_statement_writes_one_record_per_row() {
    let dir = TempDir::new().unwrap();
    let store = store_with_t(&dir);
    let conn = store.connection();
    conn.execute_batch(
        "INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b'), (3, 'c');
         UPDATE t SET name = upper(name);",
    )
    .unwrap();

    let updates = in_append_order(&store, &RecordQuery::new().action(DmlAction::Update));
    assert_eq!(updates.len(), 3);
    let ids: Vec<_> = updates.iter().map(|r| r.row_id.clone()).collect();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn same_instant_events_get_distinct_logseq() {
    let dir = TempDir::new().unwrap();
    let store = store_with_t(&dir);
    let conn = store.connection();
    // One statement: every trigger firing sees the same 'now'.
    conn.execute_batch(
        "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 2000)
         INSERT INTO t (id, name) SELECT x, 'row' FROM n;",
    )
    .unwrap();

    let (total, distinct_ts, distinct_logseq): (i64, i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COUNT(DISTINCT ts), COUNT(DISTINCT logseq) FROM audit_dml",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(total, 2000);
    assert_eq!(distinct_ts, 1);
    assert_eq!(distinct_logseq, 2000);
}

#[test]
fn schema_drift_is_detected_and_fixed_by_retrack() {
    let dir = TempDir::new().unwrap();
    let mut store = store_with_t(&dir);
    store
        .connection()
        .execute_batch("ALTER TABLE t ADD COLUMN qty INTEGER;")
        .unwrap();

    let reports = store.drift().unwrap();
    assert_eq!(reports[0].severity, DriftSeverity::Stale);
    assert_eq!(reports[0].added, vec!["qty"]);

    // Stale triggers still fire but omit the new column.
    store
        .connection()
        .execute("INSERT INTO t (id, name, qty) VALUES (1, 'A', 3)", [])
        .unwrap();
    store.retrack("t").unwrap();
    store
        .connection()
        .execute("INSERT INTO t (id, name, qty) VALUES (2, 'B', 4)", [])
        .unwrap();

    let records = in_append_order(&store, &RecordQuery::new());
    assert_eq!(
        serde_json::to_value(&records[0].after).unwrap(),
        json!({"id": 1, "name": "A"})
    );
    assert_eq!(
        serde_json::to_value(&records[1].after).unwrap(),
        json!({"id": 2, "name": "B", "qty": 4})
    );
    assert!(store.drift().unwrap()[0].is_clean());
}

#[test]
fn sink_appends_join_the_callers_transaction() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    let table = TrackedTable::new("kv")
        .column("k", ColumnType::Text)
        .column("v", ColumnType::Integer)
        .with_identity("k");

    {
        let tx = store.connection_mut().transaction().unwrap();
        let mut sink = SqliteSink::new(&tx);
        let mut capture = ChangeCapture::new(&table, &mut sink).unwrap();
        capture
            .on_insert(&Row::new().with("k", "a").with("v", 1))
            .unwrap();
        tx.rollback().unwrap();
    }
    assert_eq!(store.count().unwrap(), 0);

    {
        let tx = store.connection_mut().transaction().unwrap();
        let mut sink = SqliteSink::new(&tx);
        let mut capture = ChangeCapture::new(&table, &mut sink).unwrap();
        capture
            .on_update(
                &Row::new().with("k", "a").with("v", 1),
                &Row::new().with("k", "a").with("v", 2),
            )
            .unwrap();
        tx.commit().unwrap();
    }

    let records = store.records(&RecordQuery::new().table("kv")).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].row_id, json!("a"));
    assert_eq!(records[0].changed_columns(), vec!["v"]);
}

#[test]
fn sink_rejects_records_the_store_would_reject() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let table = TrackedTable::new("kv").column("k", ColumnType::Text);
    let image = dml_audit::RowImage::capture(&table, &Row::new().with("k", "a")).unwrap();

    let mut record = dml_audit::AuditRecord::insert("kv", json!("a"), image);
    record.before = record.after.clone();
    assert!(store.sink().append(&mut record).is_err());
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn store_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = store_with_t(&dir);
        store
            .connection()
            .execute("INSERT INTO t (id, name) VALUES (1, 'A')", [])
            .unwrap();
    }

    let store = open_store(&dir);
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.tracked().unwrap()[0].name, "t");
    assert_eq!(store.schema_log().unwrap().len(), 1);

    // Triggers are part of the database file.
    store
        .connection()
        .execute("INSERT INTO t (id, name) VALUES (2, 'B')", [])
        .unwrap();
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn tracking_tables_named_like_the_log_tables_keeps_them_append_only() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    store
        .connection()
        .execute_batch(
            "CREATE TABLE dml_no (id INTEGER PRIMARY KEY, v TEXT);
             CREATE TABLE schema_no (id INTEGER PRIMARY KEY, v TEXT);
             CREATE TABLE dml_readonly (id INTEGER PRIMARY KEY, v TEXT);",
        )
        .unwrap();
    for table in ["dml_no", "schema_no", "dml_readonly"] {
        store.track_discovered(table, None).unwrap();
    }

    let conn = store.connection();
    conn.execute("INSERT INTO dml_no VALUES (1, 'a')", []).unwrap();
    conn.execute("UPDATE dml_no SET v = 'b'", []).unwrap();
    conn.execute("DELETE FROM dml_no", []).unwrap();
    assert_eq!(store.count().unwrap(), 3);
    assert!(store
        .drift()
        .unwrap()
        .iter()
        .all(|r| r.severity == DriftSeverity::Clean));

    for table in ["dml_no", "schema_no", "dml_readonly"] {
        store.untrack(table).unwrap();
    }

    let conn = store.connection();
    assert!(conn.execute("UPDATE audit_dml SET action = 'DELETE'", []).is_err());
    assert!(conn.execute("DELETE FROM audit_dml", []).is_err());
    assert!(conn.execute("UPDATE audit_schema SET action = 'x'", []).is_err());
    assert!(conn.execute("DELETE FROM audit_schema", []).is_err());
    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(store.schema_log().unwrap().len(), 6);
}

#[test]
fn composite_primary_key_rows_are_identified_by_every_key_column() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    store
        .connection()
        .execute_batch(
            "CREATE TABLE lines (order_id INTEGER, line INTEGER, qty INTEGER,
                                 PRIMARY KEY (order_id, line));",
        )
        .unwrap();
    let table = store.track_discovered("lines", None).unwrap();
    assert_eq!(table.identity.to_string(), "order_id,line");

    let conn = store.connection();
    conn.execute_batch(
        "INSERT INTO lines VALUES (7, 1, 2), (7, 2, 5);
         UPDATE lines SET qty = qty + 1 WHERE line = 2;",
    )
    .unwrap();
    assert!(conn
        .execute("UPDATE lines SET line = 3 WHERE line = 2", [])
        .is_err());

    let records = in_append_order(&store, &RecordQuery::new().table("lines"));
    let ids: Vec<_> = records.iter().map(|r| r.row_id.clone()).collect();
    assert_eq!(ids, vec![json!([7, 1]), json!([7, 2]), json!([7, 2])]);

    // Survives a reopen: the identity comes back from the registry.
    drop(store);
    let store = open_store(&dir);
    let history = store
        .records(&RecordQuery::new().row_id(json!([7, 2])))
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.row_id == json!([7, 2])));
}

#[test]
fn infinite_real_rejects_the_mutation() {
    let dir = TempDir::new().unwrap();
    let mut store = open_store(&dir);
    store
        .connection()
        .execute_batch("CREATE TABLE m (id INTEGER PRIMARY KEY, x REAL);")
        .unwrap();
    store.track_discovered("m", None).unwrap();

    let conn = store.connection();
    let err = conn
        .execute("INSERT INTO m (id, x) VALUES (1, 9e999)", [])
        .unwrap_err();
    assert!(err.to_string().contains("non-finite"));
    assert!(conn
        .execute("INSERT INTO m (id, x) VALUES (2, ?1)", [f64::NEG_INFINITY])
        .is_err());

    conn.execute("INSERT INTO m (id, x) VALUES (3, 1.5)", []).unwrap();
    assert!(conn.execute("UPDATE m SET x = 9e999", []).is_err());

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM m", [], |r| r.get(0))
        .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn insert_or_replace_records_the_replaced_row() {
    let dir = TempDir::new().unwrap();
    let store = store_with_t(&dir);
    let conn = store.connection();
    conn.execute("INSERT INTO t (id, name) VALUES (1, 'A')", [])
        .unwrap();
    conn.execute("REPLACE INTO t (id, name) VALUES (1, 'C')", [])
        .unwrap();

    let records = in_append_order(&store, &RecordQuery::new());
    let actions: Vec<_> = records.iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![DmlAction::Insert, DmlAction::Delete, DmlAction::Insert]
    );
    assert_eq!(
        serde_json::to_value(&records[2].after).unwrap(),
        json!({"id": 1, "name": "C"})
    );
}
