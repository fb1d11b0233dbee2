//! End-to-end store scenarios

use std::time::Duration;

use memstore::{MessageKind, OpenOptions, Store, StoreError};
use tempfile::tempdir;

#[tokio::test]
async fn fresh_store_has_identity_and_behavior() {
    let temp = tempdir().unwrap();
    let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();

    let identity = store.ltm().read("/identity").unwrap();
    assert!(!identity.body.is_empty());
    assert_eq!(identity.version, 1);

    let behavior = store.ltm().read("/behavior").unwrap();
    assert!(!behavior.body.is_empty());
}

#[tokio::test]
async fn create_update_cas_scenario() {
    let temp = tempdir().unwrap();
    let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
    let ltm = store.ltm();

    // create succeeds at version 1; a second identical create conflicts
    let entry = ltm.create("/k/a", "/", "T", "B", "main").unwrap();
    assert_eq!(entry.version, 1);
    assert!(matches!(
        ltm.create("/k/a", "/", "T", "B", "main"),
        Err(StoreError::Conflict(_))
    ));

    // CAS update: success bumps to 2; replay with the old version conflicts
    // and leaves the row untouched
    let updated = ltm.update("/k/a", "B2", 1, "main").unwrap();
    assert_eq!(updated.version, 2);
    assert!(matches!(ltm.update("/k/a", "B3", 1, "main"), Err(StoreError::Conflict(_))));

    let current = ltm.read("/k/a").unwrap();
    assert_eq!(current.body, "B2");
    assert_eq!(current.version, 2);
}

#[tokio::test]
async fn reopen_applies_no_new_migrations() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("agent.db");

    {
        let store = Store::open_default(&path).await.unwrap();
        store.temporal().append(MessageKind::User, "survives reopen").unwrap();
    }

    // Second and third opens must see identical state
    for _ in 0..2 {
        let store = Store::open_default(&path).await.unwrap();
        assert_eq!(store.temporal().count().unwrap(), 1);
        let hits = store.search_fts("survives", 5).unwrap();
        assert_eq!(hits.len(), 1);
        drop(store);
    }
}

#[tokio::test]
async fn writers_serialize_through_the_file_lock() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("agent.db");

    // N sequential open/write/close cycles all succeed; while one store is
    // open, a second writer cannot get in
    for i in 0..3 {
        let store = Store::open_default(&path).await.unwrap();
        store
            .temporal()
            .append(MessageKind::System, &format!("writer {i}"))
            .unwrap();

        let contender = Store::open(
            &path,
            OpenOptions {
                lock_timeout: Duration::from_millis(300),
                read_only: false,
            },
        )
        .await;
        assert!(matches!(contender, Err(StoreError::LockTimeout { .. })));
    }

    let store = Store::open_default(&path).await.unwrap();
    assert_eq!(store.temporal().count().unwrap(), 3);
}

#[tokio::test]
async fn distillation_prefix_bounds_the_tail() {
    let temp = tempdir().unwrap();
    let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
    let log = store.temporal();

    let ids: Vec<String> = (0..200)
        .map(|i| {
            log.append(
                MessageKind::User,
                &format!("message number {i} with some repeated filler words attached"),
            )
            .unwrap()
        })
        .collect();

    // Distill the oldest 160 in four batches of 40
    for batch in 0..4 {
        let start = &ids[batch * 40];
        let end = &ids[batch * 40 + 39];
        log.insert_distillation(1, start, end, &format!("batch {batch} summary")).unwrap();
    }

    let estimate = |text: &str| text.split_whitespace().count();
    let view = log.build_view(1000, estimate).unwrap();

    // 4 distillations + 40 raw tail messages, in temporal order
    assert_eq!(view.items.len(), 44);
    assert!(view.token_estimate <= 1000);
    assert!(!view.needs_escalation);
}
