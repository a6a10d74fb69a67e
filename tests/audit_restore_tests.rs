//! Audit journal and restore tests against the embedded backend.
//!
//! Covers:
//! - update/delete journaling (previous, diff, transaction grouping)
//! - restore of updates and deletes, including the update-then-restore
//!   round trip and the most-recent-state tie-break
//! - restore filtered by audit content (transaction_id)
//! - restore journaling (restores are themselves reversible)
//! - mass-delete guard rails and batch insert atomicity
//! - create/read audit switches and audit-table immutability

use serde_json::{json, Value};
use tempfile::TempDir;
use uriql::{AuditEvent, Error, EventKind, SqliteProvider, Store, StoreConfig};

fn file_store(config: StoreConfig) -> (Store<SqliteProvider>, TempDir) {
    let dir = TempDir::new().expect("create temp dir");
    let provider =
        SqliteProvider::open(dir.path().join("store.db")).expect("open file-backed store");
    (Store::new(provider, config), dir)
}

fn test_store() -> (Store<SqliteProvider>, TempDir) {
    file_store(StoreConfig::new("", "tester"))
}

fn audit_rows(store: &Store<SqliteProvider>, table: &str) -> Vec<AuditEvent> {
    store
        .table_select(&format!("{table}_audit"), "")
        .expect("read audit table")
        .map(|row| serde_json::from_value(row).expect("decode audit row"))
        .collect()
}

fn single_value(store: &Store<SqliteProvider>, table: &str, query: &str) -> Value {
    let rows: Vec<Value> = store.table_select(table, query).unwrap().collect();
    assert_eq!(rows.len(), 1, "expected one row for '{query}', got {rows:?}");
    rows.into_iter().next().unwrap()
}

#[test]
fn test_update_writes_one_audit_row_per_document() {
    let (store, _dir) = test_store();
    store
        .table_insert(
            "things",
            &json!([
                {"id": 1, "flavour": "sweet"},
                {"id": 2, "flavour": "sweet"},
                {"id": 3, "flavour": "sour"},
            ]),
        )
        .unwrap();
    let affected = store
        .table_update(
            "things",
            "set=flavour&where=flavour=eq.sweet&message='normalising'",
            &json!({"flavour": "bitter"}),
        )
        .unwrap();
    assert_eq!(affected, 2);

    let rows = audit_rows(&store, "things");
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.event, EventKind::Update);
        assert_eq!(row.diff, Some(json!({"flavour": "bitter"})));
        assert_eq!(row.identity, "tester");
        assert_eq!(row.reason.as_deref(), Some("normalising"));
        assert_eq!(
            row.previous.as_ref().unwrap()["flavour"],
            json!("sweet")
        );
        assert!(row.query.contains("set=flavour"));
    }
    // One call, one transaction id; distinct event ids.
    assert_eq!(rows[0].transaction_id, rows[1].transaction_id);
    assert_ne!(rows[0].event_id, rows[1].event_id);
}

#[test]
fn test_update_then_restore_round_trip() {
    let (store, _dir) = test_store();
    store
        .table_insert("things", &json!({"saying": "good", "id": 1}))
        .unwrap();
    store
        .table_update(
            "things",
            "set=saying&where=id=eq.1&message='fix'",
            &json!({"saying": "excellent"}),
        )
        .unwrap();
    assert_eq!(
        single_value(&store, "things", "select=saying&where=id=eq.1"),
        json!(["excellent"])
    );

    let summary = store
        .table_restore("things", "restore&primary_key=id")
        .unwrap();
    assert_eq!(summary.updated, vec![json!(1)]);
    assert!(summary.restored.is_empty());

    assert_eq!(
        single_value(&store, "things", "select=saying&where=id=eq.1"),
        json!(["good"])
    );

    // Two journal rows: the original update and the restoring update.
    let rows = audit_rows(&store, "things");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.event == EventKind::Update));
    let original = rows
        .iter()
        .find(|r| r.diff == Some(json!({"saying": "excellent"})))
        .expect("original update row");
    assert_eq!(
        original.previous,
        Some(json!({"saying": "good", "id": 1}))
    );
    let reversal = rows
        .iter()
        .find(|r| r.diff == Some(json!({"saying": "good"})))
        .expect("restore update row");
    assert_eq!(
        reversal.previous,
        Some(json!({"saying": "excellent", "id": 1}))
    );
    assert_ne!(original.transaction_id, reversal.transaction_id);
}

#[test]
fn test_restore_reinserts_deleted_rows() {
    let (store, _dir) = test_store();
    store
        .table_insert(
            "things",
            &json!([{"id": 1, "v": "one"}, {"id": 2, "v": "two"}]),
        )
        .unwrap();
    let deleted = store.table_delete("things", "where=id=gt.0").unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(store.table_select("things", "").unwrap().count(), 0);

    let summary = store
        .table_restore("things", "restore&primary_key=id")
        .unwrap();
    assert_eq!(summary.restored.len(), 2);

    let mut rows: Vec<Value> = store.table_select("things", "").unwrap().collect();
    rows.sort_by_key(|d| d["id"].as_i64());
    assert_eq!(
        rows,
        vec![json!({"id": 1, "v": "one"}), json!({"id": 2, "v": "two"})]
    );

    // Two deletes plus two re-creating restore rows.
    let journal = audit_rows(&store, "things");
    assert_eq!(
        journal.iter().filter(|r| r.event == EventKind::Delete).count(),
        2
    );
    assert_eq!(
        journal.iter().filter(|r| r.event == EventKind::Create).count(),
        2
    );
}

#[test]
fn test_restore_picks_most_recent_state() {
    let (store, _dir) = test_store();
    store
        .table_insert("things", &json!({"id": 1, "v": "first"}))
        .unwrap();
    store
        .table_update("things", "set=v&where=id=eq.1", &json!({"v": "second"}))
        .unwrap();
    store
        .table_update("things", "set=v&where=id=eq.1", &json!({"v": "third"}))
        .unwrap();

    store
        .table_restore("things", "restore&primary_key=id")
        .unwrap();
    // The most recent pre-mutation state is "second", not "first".
    assert_eq!(
        single_value(&store, "things", "select=v&where=id=eq.1"),
        json!(["second"])
    );
}

#[test]
fn test_restore_filtered_by_transaction_id() {
    let (store, _dir) = test_store();
    store
        .table_insert("things", &json!({"id": 1, "v": "first"}))
        .unwrap();
    store
        .table_update("things", "set=v&where=id=eq.1", &json!({"v": "second"}))
        .unwrap();
    store
        .table_update("things", "set=v&where=id=eq.1", &json!({"v": "third"}))
        .unwrap();

    // Find the transaction that moved "first" -> "second".
    let first_tx = audit_rows(&store, "things")
        .into_iter()
        .find(|r| r.previous.as_ref().unwrap()["v"] == json!("first"))
        .unwrap()
        .transaction_id;

    store
        .table_restore(
            "things",
            &format!("restore&primary_key=id&where=transaction_id=eq.{first_tx}"),
        )
        .unwrap();
    assert_eq!(
        single_value(&store, "things", "select=v&where=id=eq.1"),
        json!(["first"])
    );
}

#[test]
fn test_restore_is_itself_reversible() {
    let (store, _dir) = test_store();
    store
        .table_insert("things", &json!({"id": 1, "v": "original"}))
        .unwrap();
    store
        .table_update("things", "set=v&where=id=eq.1", &json!({"v": "changed"}))
        .unwrap();
    store
        .table_restore("things", "restore&primary_key=id")
        .unwrap();
    assert_eq!(
        single_value(&store, "things", "select=v&where=id=eq.1"),
        json!(["original"])
    );
    // Restoring again reverses the restore.
    store
        .table_restore("things", "restore&primary_key=id")
        .unwrap();
    assert_eq!(
        single_value(&store, "things", "select=v&where=id=eq.1"),
        json!(["changed"])
    );
}

#[test]
fn test_restore_without_matching_rows_is_audit_missing() {
    let (store, _dir) = test_store();
    store.table_insert("things", &json!({"id": 1})).unwrap();
    let err = store
        .table_restore("things", "restore&primary_key=id")
        .unwrap_err();
    assert!(matches!(err, Error::AuditMissing { .. }), "got {err:?}");

    let err = store
        .table_restore("empty", "restore&primary_key=id")
        .unwrap_err();
    assert!(matches!(err, Error::AuditMissing { .. }), "got {err:?}");
}

#[test]
fn test_restore_requires_primary_key() {
    let (store, _dir) = test_store();
    let err = store.table_restore("things", "restore").unwrap_err();
    assert!(matches!(err, Error::Validation { .. }), "got {err:?}");
}

#[test]
fn test_restore_rejects_duplicate_primary_keys() {
    let (store, _dir) = test_store();
    store
        .table_insert("things", &json!([{"id": 1, "v": "a"}, {"id": 1, "v": "b"}]))
        .unwrap();
    store
        .table_update("things", "set=v&where=v=eq.a", &json!({"v": "c"}))
        .unwrap();
    let err = store
        .table_restore("things", "restore&primary_key=id")
        .unwrap_err();
    assert!(matches!(err, Error::Integrity { .. }), "got {err:?}");
    // The failed restore left nothing behind: still one update row only.
    let journal = audit_rows(&store, "things");
    assert_eq!(journal.len(), 1);
}

#[test]
fn test_delete_without_where_is_refused() {
    let (store, _dir) = test_store();
    store.table_insert("things", &json!({"id": 1})).unwrap();
    let err = store.table_delete("things", "").unwrap_err();
    assert!(matches!(err, Error::Validation { .. }), "got {err:?}");
    assert_eq!(store.table_select("things", "").unwrap().count(), 1);
}

#[test]
fn test_delete_all_journals_every_row() {
    let (store, _dir) = test_store();
    store
        .table_insert("things", &json!([{"id": 1}, {"id": 2}, {"id": 3}]))
        .unwrap();
    let deleted = store
        .table_delete_all("things", "message='spring cleaning'")
        .unwrap();
    assert_eq!(deleted, 3);
    let journal = audit_rows(&store, "things");
    assert_eq!(journal.len(), 3);
    assert!(journal.iter().all(|r| r.event == EventKind::Delete));
    assert!(journal.iter().all(|r| r.previous.is_some()));
}

#[test]
fn test_update_without_set_is_refused() {
    let (store, _dir) = test_store();
    store.table_insert("things", &json!({"id": 1})).unwrap();
    let err = store
        .table_update("things", "where=id=eq.1", &json!({"v": 2}))
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }), "got {err:?}");
}

#[test]
fn test_batch_insert_rolls_back_on_unique_violation() {
    let (store, _dir) = test_store();
    store.ensure_unique_index("things", "id").unwrap();
    store
        .table_insert("things", &json!([{"id": 1}, {"id": 2}]))
        .unwrap();
    let err = store
        .table_insert("things", &json!([{"id": 3}, {"id": 1}]))
        .unwrap_err();
    assert!(matches!(err, Error::Integrity { .. }), "got {err:?}");
    // The whole batch rolled back: id 3 is absent too.
    assert_eq!(store.table_select("things", "").unwrap().count(), 2);
}

#[test]
fn test_create_auditing_is_off_by_default() {
    let (store, _dir) = test_store();
    store.table_insert("things", &json!({"id": 1})).unwrap();
    assert!(store.table_select("things_audit", "").is_err());
}

#[test]
fn test_create_auditing_when_enabled() {
    let mut config = StoreConfig::new("", "tester");
    config.audit_create = true;
    let (store, _dir) = file_store(config);
    store
        .table_insert("things", &json!([{"id": 1}, {"id": 2}]))
        .unwrap();
    let journal = audit_rows(&store, "things");
    assert_eq!(journal.len(), 2);
    assert!(journal.iter().all(|r| r.event == EventKind::Create));
    assert!(journal.iter().all(|r| r.previous.is_none() && r.diff.is_none()));
}

#[test]
fn test_read_auditing_when_enabled() {
    let mut config = StoreConfig::new("", "tester");
    config.audit_read = true;
    let (store, _dir) = file_store(config);
    store.table_insert("things", &json!({"id": 1})).unwrap();
    store.table_select("things", "select=id").unwrap();
    let journal = audit_rows(&store, "things");
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].event, EventKind::Read);
    assert_eq!(journal[0].query, "select=id");
}

#[test]
fn test_audit_tables_reject_updates() {
    let (store, _dir) = test_store();
    store.table_insert("things", &json!({"id": 1})).unwrap();
    store
        .table_update("things", "set=id&where=id=eq.1", &json!({"id": 2}))
        .unwrap();
    let err = store
        .table_update("things_audit", "set=event&where=event=eq.update", &json!({"event": "x"}))
        .unwrap_err();
    assert!(matches!(err, Error::Validation { .. }), "got {err:?}");
}

#[test]
fn test_audit_queries_use_the_normal_machinery() {
    let (store, _dir) = test_store();
    store.table_insert("things", &json!({"id": 1, "v": "a"})).unwrap();
    store
        .table_update("things", "set=v&where=id=eq.1", &json!({"v": "b"}))
        .unwrap();
    // Project inside the journaled document.
    assert_eq!(
        single_value(
            &store,
            "things_audit",
            "select=event,previous.v&where=event=eq.update"
        ),
        json!(["update", "a"])
    );
}

#[test]
fn test_tables_list_excludes_audit_tables() {
    let (store, _dir) = test_store();
    store.table_insert("beta", &json!({"id": 1})).unwrap();
    store.table_insert("alpha", &json!({"id": 1})).unwrap();
    store
        .table_update("alpha", "set=id&where=id=eq.1", &json!({"id": 2}))
        .unwrap();
    assert_eq!(store.tables_list().unwrap(), vec!["alpha", "beta"]);
}

#[test]
fn test_schemas_isolate_tables() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    let p11 = Store::new(
        SqliteProvider::open(&path).unwrap(),
        StoreConfig::new("p11", "tester"),
    );
    let p12 = Store::new(
        SqliteProvider::open(&path).unwrap(),
        StoreConfig::new("p12", "tester"),
    );
    p11.table_insert("things", &json!({"id": 1})).unwrap();
    p12.table_insert("things", &json!({"id": 2})).unwrap();
    assert_eq!(
        single_value(&p11, "things", "select=id"),
        json!([1])
    );
    assert_eq!(p11.tables_list().unwrap(), vec!["things"]);
}
