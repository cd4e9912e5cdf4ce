//! Behaviour shared by every `MessageStore` implementation.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::BTreeMap,
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::Utc;
use lure_common::message::{MessageId, ParsedMessage};
use lure_store::{FileMessageStore, MemoryMessageStore, MessageStore, ORPHAN_GRACE, StoreError};
use pretty_assertions::assert_eq;

fn parsed(subject: &str, to: &[&str]) -> ParsedMessage {
    ParsedMessage {
        from: "it@example.com".to_string(),
        to: to.iter().map(ToString::to_string).collect(),
        subject: subject.to_string(),
        text: Some(format!("{subject} body")),
        html: None,
        headers: BTreeMap::from([("subject".to_string(), subject.to_string())]),
        received_at: Utc::now(),
        size: 42,
    }
}

async fn stores() -> Vec<(Box<dyn MessageStore>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let file = FileMessageStore::new(dir.path().join("messages")).unwrap();
    file.ensure_schema().await.unwrap();

    vec![
        (Box::new(MemoryMessageStore::new()), None),
        (Box::new(file), Some(dir)),
    ]
}

#[tokio::test]
async fn insert_assigns_id_and_creation_time() {
    for (store, _dir) in stores().await {
        let before = Utc::now();
        let stored = store.insert(parsed("hello", &["a@example.com"])).await.unwrap();

        assert!(stored.created_at >= before);
        assert_eq!(stored.subject, "hello");
        assert_eq!(store.get(&stored.id).await.unwrap(), stored);
    }
}

#[tokio::test]
async fn list_is_newest_first_with_paging() {
    for (store, _dir) in stores().await {
        for n in 0..5 {
            store
                .insert(parsed(&format!("message {n}"), &["a@example.com"]))
                .await
                .unwrap();
        }

        let page = store.list(2, 0).await.unwrap();
        assert_eq!(page.total, 5);
        let subjects: Vec<_> = page.messages.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["message 4", "message 3"]);

        let tail = store.list(10, 4).await.unwrap();
        assert_eq!(tail.total, 5);
        assert_eq!(tail.messages.len(), 1);
        assert_eq!(tail.messages[0].subject, "message 0");

        assert!(store.list(10, 99).await.unwrap().messages.is_empty());
    }
}

#[tokio::test]
async fn get_unknown_is_not_found() {
    for (store, _dir) in stores().await {
        let id = MessageId::generate();
        assert!(matches!(store.get(&id).await, Err(StoreError::NotFound(missing)) if missing == id));
    }
}

#[tokio::test]
async fn delete_is_idempotent() {
    for (store, _dir) in stores().await {
        let stored = store.insert(parsed("gone", &["a@example.com"])).await.unwrap();

        assert!(store.delete(&stored.id).await.unwrap());
        assert!(!store.delete(&stored.id).await.unwrap());
        assert!(!store.delete(&MessageId::generate()).await.unwrap());
        assert!(store.get(&stored.id).await.unwrap_err().is_not_found());
    }
}

#[tokio::test]
async fn clear_removes_everything() {
    for (store, _dir) in stores().await {
        for n in 0..3 {
            store
                .insert(parsed(&n.to_string(), &["a@example.com"]))
                .await
                .unwrap();
        }

        assert_eq!(store.clear().await.unwrap(), 3);
        assert_eq!(store.list(10, 0).await.unwrap().total, 0);
        assert_eq!(store.clear().await.unwrap(), 0);
    }
}

#[tokio::test]
async fn search_by_recipient_is_case_insensitive() {
    for (store, _dir) in stores().await {
        store.insert(parsed("one", &["a@example.com"])).await.unwrap();
        store
            .insert(parsed("two", &["b@example.com", "A@Example.com"]))
            .await
            .unwrap();
        store.insert(parsed("three", &["c@example.com"])).await.unwrap();

        let page = store.find_by_recipient("a@EXAMPLE.com", 10, 0).await.unwrap();
        assert_eq!(page.total, 2);
        let subjects: Vec<_> = page.messages.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["two", "one"]);

        let page = store.find_by_recipient("a@example.com", 1, 1).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.messages[0].subject, "one");
    }
}

#[tokio::test]
async fn concurrent_inserts_are_all_kept() {
    for (store, _dir) in stores().await {
        let store: Arc<dyn MessageStore> = Arc::from(store);
        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .insert(parsed(&format!("{n}"), &["a@example.com"]))
                        .await
                        .unwrap()
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.list(100, 0).await.unwrap().total, 16);
    }
}

#[tokio::test]
async fn file_store_schema_creation_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileMessageStore::new(dir.path().join("nested/messages")).unwrap();

    store.ensure_schema().await.unwrap();
    let stored = store.insert(parsed("kept", &["a@example.com"])).await.unwrap();
    store.ensure_schema().await.unwrap();

    assert_eq!(store.get(&stored.id).await.unwrap().subject, "kept");
}

fn backdate(path: &Path, by: Duration) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - by)
        .unwrap();
}

#[tokio::test]
async fn file_store_sweeps_stale_orphans_and_ignores_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("messages");
    let store = FileMessageStore::new(&root).unwrap();
    store.ensure_schema().await.unwrap();

    let orphan = MessageId::generate();
    let leftovers = [
        root.join(format!(".tmp_{orphan}.bin")),
        root.join(format!("{orphan}.bin.deleted")),
        root.join(format!("{orphan}.rcpt")),
    ];
    for path in &leftovers {
        std::fs::write(path, b"stale").unwrap();
        backdate(path, ORPHAN_GRACE + Duration::from_secs(60));
    }
    std::fs::write(root.join("README"), b"not a message").unwrap();
    backdate(&root.join("README"), ORPHAN_GRACE * 2);

    store.ensure_schema().await.unwrap();

    for path in &leftovers {
        assert!(!path.exists(), "{} was not swept", path.display());
    }
    assert!(root.join("README").exists());
    assert_eq!(store.list(10, 0).await.unwrap().total, 0);
}

#[tokio::test]
async fn file_store_keeps_fresh_files_of_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("messages");
    let store = FileMessageStore::new(&root).unwrap();
    store.ensure_schema().await.unwrap();

    let in_flight = MessageId::generate();
    let fresh = [
        root.join(format!(".tmp_{in_flight}.bin")),
        root.join(format!("{in_flight}.bin.deleted")),
        root.join(format!("{in_flight}.rcpt")),
    ];
    for path in &fresh {
        std::fs::write(path, b"in progress").unwrap();
    }

    // Another process opening the same directory.
    let other = FileMessageStore::new(&root).unwrap();
    other.ensure_schema().await.unwrap();

    for path in &fresh {
        assert!(path.exists(), "{} was swept", path.display());
    }
}

#[tokio::test]
async fn file_store_delete_tolerates_missing_index() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("messages");
    let store = FileMessageStore::new(&root).unwrap();
    store.ensure_schema().await.unwrap();

    let stored = store.insert(parsed("gone", &["a@example.com"])).await.unwrap();
    std::fs::remove_file(root.join(format!("{}.rcpt", stored.id))).unwrap();

    assert!(store.delete(&stored.id).await.unwrap());
    assert!(!root.join(format!("{}.bin", stored.id)).exists());
    assert!(!root.join(format!("{}.bin.deleted", stored.id)).exists());
}

#[tokio::test]
async fn file_store_search_reads_the_recipient_index() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("messages");
    let store = FileMessageStore::new(&root).unwrap();
    store.ensure_schema().await.unwrap();

    let indexed = store
        .insert(parsed("indexed", &["A@Example.com", "b@example.com"]))
        .await
        .unwrap();
    let index = std::fs::read_to_string(root.join(format!("{}.rcpt", indexed.id))).unwrap();
    assert_eq!(index, "a@example.com\nb@example.com\n");

    // Messages written without an index are still found.
    let unindexed = store.insert(parsed("unindexed", &["a@example.com"])).await.unwrap();
    std::fs::remove_file(root.join(format!("{}.rcpt", unindexed.id))).unwrap();

    let page = store.find_by_recipient(" a@example.com ", 10, 0).await.unwrap();
    let subjects: Vec<_> = page.messages.iter().map(|m| m.subject.as_str()).collect();
    assert_eq!(subjects, vec!["unindexed", "indexed"]);

    assert!(store.delete(&indexed.id).await.unwrap());
    assert!(!root.join(format!("{}.rcpt", indexed.id)).exists());
    assert_eq!(store.find_by_recipient("b@example.com", 10, 0).await.unwrap().total, 0);
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("messages");

    let stored = {
        let store = FileMessageStore::new(&root).unwrap();
        store.ensure_schema().await.unwrap();
        store.insert(parsed("durable", &["a@example.com"])).await.unwrap()
    };

    let reopened = FileMessageStore::new(&root).unwrap();
    reopened.ensure_schema().await.unwrap();
    assert_eq!(reopened.get(&stored.id).await.unwrap(), stored);
}

#[test]
fn file_store_rejects_dangerous_paths() {
    assert!(matches!(
        FileMessageStore::new("/var/lib/../../etc/lure"),
        Err(StoreError::InvalidPath { .. })
    ));
    assert!(matches!(
        FileMessageStore::new("/etc/lure"),
        Err(StoreError::InvalidPath { .. })
    ));
}
