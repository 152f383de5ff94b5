use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use threadline_db::clock::ManualClock;
use threadline_db::layout;
use threadline_db::{
    Database, Direction, Document, Query, Source, StoreError, StoreGateway, Transaction, WriteData,
    WriteOp,
};

type Seen = Arc<Mutex<Vec<Result<Vec<String>, String>>>>;

fn recorder() -> (Seen, threadline_db::QueryListener) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: threadline_db::QueryListener = Arc::new(move |result: Result<Vec<Document>, StoreError>| {
        let entry = result
            .map(|docs| docs.iter().map(|d| d.id().to_string()).collect())
            .map_err(|e| e.to_string());
        sink.lock().unwrap().push(entry);
    });
    (seen, listener)
}

fn thread_ops(thread_id: &str, owner: &str) -> Vec<WriteOp> {
    vec![
        WriteOp::set(
            layout::thread(thread_id).unwrap(),
            WriteData::new()
                .with("name", "Study Group")
                .with("createdBy", owner)
                .with_server_timestamp("createdAt")
                .with_server_timestamp("lastMessageAt"),
        ),
        WriteOp::set(
            layout::member(thread_id, owner).unwrap(),
            WriteData::new()
                .with("role", "owner")
                .with_server_timestamp("joinedAt"),
        ),
    ]
}

#[tokio::test]
async fn file_backed_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threadline.db");
    {
        let db = Arc::new(Database::open(&path).unwrap());
        db.admin().batch_write(thread_ops("t1", "alice")).await.unwrap();
    }
    let db = Arc::new(Database::open(&path).unwrap());
    let thread = db
        .admin()
        .get(&layout::thread("t1").unwrap(), Source::Server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(thread.get_str("name"), Some("Study Group"));
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = db.admin();
    let mut ops = thread_ops("t1", "alice");
    ops.push(WriteOp::update(
        layout::thread("missing").unwrap(),
        WriteData::new().with("name", "x"),
    ));

    let err = store.batch_write(ops).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    let thread = store.get(&layout::thread("t1").unwrap(), Source::Server).await.unwrap();
    assert!(thread.is_none());
}

#[tokio::test]
async fn server_timestamps_in_one_batch_agree() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = db.admin();
    store.batch_write(thread_ops("t1", "alice")).await.unwrap();

    let thread = store.get(&layout::thread("t1").unwrap(), Source::Server).await.unwrap().unwrap();
    let member = store
        .get(&layout::member("t1", "alice").unwrap(), Source::Server)
        .await
        .unwrap()
        .unwrap();
    assert!(thread.get_timestamp("createdAt").is_some());
    assert_eq!(thread.get("createdAt"), thread.get("lastMessageAt"));
    assert_eq!(thread.get("createdAt"), member.get("joinedAt"));
}

#[tokio::test]
async fn commit_times_never_go_backwards() {
    let start = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let db = Arc::new(Database::open_in_memory().unwrap().with_clock(clock.clone()));
    let store = db.admin();

    store.batch_write(thread_ops("t1", "alice")).await.unwrap();
    clock.set(start - chrono::Duration::hours(1));
    store.batch_write(thread_ops("t2", "alice")).await.unwrap();

    let t1 = store.get(&layout::thread("t1").unwrap(), Source::Server).await.unwrap().unwrap();
    let t2 = store.get(&layout::thread("t2").unwrap(), Source::Server).await.unwrap().unwrap();
    assert!(t2.get_timestamp("createdAt") >= t1.get_timestamp("createdAt"));
}

#[tokio::test]
async fn transaction_reads_then_writes_atomically() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = db.admin();
    store.batch_write(thread_ops("t1", "alice")).await.unwrap();

    let thread_path = layout::thread("t1").unwrap();
    let message_path = layout::message("t1", "m1").unwrap();
    let (tx_thread, tx_message) = (thread_path.clone(), message_path.clone());
    store.transaction(Box::new(move |tx: &mut Transaction<'_>| {
        let thread = tx.get(&tx_thread)?.ok_or_else(|| StoreError::NotFound("t1".into()))?;
        assert_eq!(thread.get_str("name"), Some("Study Group"));
        tx.set(
            tx_message.clone(),
            WriteData::new().with("text", "hello").with_server_timestamp("sentAt"),
        );
        tx.update(
            tx_thread.clone(),
            WriteData::new()
                .with("lastMessagePreview", "hello")
                .with_server_timestamp("lastMessageAt"),
        );
        Ok(())
    }))
    .await
    .unwrap();

    let message = store.get(&message_path, Source::Server).await.unwrap().unwrap();
    let thread = store.get(&thread_path, Source::Server).await.unwrap().unwrap();
    assert_eq!(thread.get_str("lastMessagePreview"), Some("hello"));
    assert_eq!(message.get("sentAt"), thread.get("lastMessageAt"));
}

#[tokio::test]
async fn failed_transaction_body_writes_nothing() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = db.admin();
    let path = layout::thread("t1").unwrap();
    let written = path.clone();
    let result = store
        .transaction(Box::new(move |tx: &mut Transaction<'_>| {
            tx.set(written.clone(), WriteData::new().with("name", "x"));
            Err(StoreError::NotFound("nope".into()))
        }))
        .await;
    assert!(result.is_err());
    assert!(store.get(&path, Source::Server).await.unwrap().is_none());
}

#[tokio::test]
async fn subscription_tracks_changes_until_cancelled() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = db.admin();
    store.batch_write(thread_ops("t1", "alice")).await.unwrap();

    let query = Query::collection(layout::messages("t1").unwrap()).order_by("sentAt", Direction::Ascending);
    let (seen, listener) = recorder();
    let registration = store.subscribe_query(query, listener).unwrap();
    assert_eq!(db.listener_count(), 1);

    for id in ["m1", "m2"] {
        store.batch_write(vec![WriteOp::set(
            layout::message("t1", id).unwrap(),
            WriteData::new().with("text", id).with_server_timestamp("sentAt"),
        )])
        .await
        .unwrap();
    }
    // Unrelated write: no delivery.
    store.batch_write(vec![WriteOp::update(
        layout::thread("t1").unwrap(),
        WriteData::new().with("name", "Renamed"),
    )])
    .await
    .unwrap();

    registration.cancel();
    assert_eq!(db.listener_count(), 0);
    store.batch_write(vec![WriteOp::set(
        layout::message("t1", "m3").unwrap(),
        WriteData::new().with("text", "late").with_server_timestamp("sentAt"),
    )])
    .await
    .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(
        *seen,
        vec![
            Ok(vec![]),
            Ok(vec!["m1".to_string()]),
            Ok(vec!["m1".to_string(), "m2".to_string()]),
        ]
    );
}

#[tokio::test]
async fn scoped_watch_ends_when_membership_is_lost() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.admin().batch_write(thread_ops("t1", "alice")).await.unwrap();

    let alice = db.scoped("alice");
    let (seen, listener) = recorder();
    let _registration = alice
        .subscribe_query(Query::collection(layout::messages("t1").unwrap()), listener)
        .unwrap();

    alice
        .batch_write(vec![WriteOp::delete(layout::member("t1", "alice").unwrap())])
        .await
        .unwrap();

    assert_eq!(db.listener_count(), 0);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].as_ref().unwrap_err().contains("permission denied"));
}

#[tokio::test]
async fn scoped_store_rejects_foreign_reads_and_writes() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.admin().batch_write(thread_ops("t1", "alice")).await.unwrap();
    let bob = db.scoped("bob");

    let err = bob
        .query(&Query::collection(layout::messages("t1").unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(_)));

    let err = bob
        .batch_write(vec![WriteOp::set(
            layout::member("t1", "alice").unwrap(),
            WriteData::new(),
        )])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PermissionDenied(_)));

    let (_, listener) = recorder();
    assert!(bob
        .subscribe_query(Query::collection(layout::mirror_rows("alice").unwrap()), listener)
        .is_err());

    // Thread metadata stays readable.
    assert!(bob.get(&layout::thread("t1").unwrap(), Source::Server).await.unwrap().is_some());
}

#[tokio::test]
async fn cache_reads_are_invalidated_by_writes() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = db.admin();
    let path = layout::thread("t1").unwrap();
    assert!(store.get(&path, Source::Cache).await.unwrap().is_none());

    store.batch_write(thread_ops("t1", "alice")).await.unwrap();
    assert!(store.get(&path, Source::Cache).await.unwrap().is_some());
}
