//! Integration tests for HA sync records and master election
//!
//! Runs every scenario against both sync record persisters:
//! 1. Three standby nodes, then SET_MASTER(n2)
//! 2. SET_MASTER → CLEAR_MASTER → SET_MASTER
//! 3. Stop semantics (load fails, deltas ignored)
//! 4. Invalid master changes fail fast

use mnemos::codec::MementoCodec;
use mnemos::ha::detect_failed_nodes;
use mnemos::store::write_queue::WriteQueueConfig;
use mnemos::{
    HaDelta, InMemoryObjectStore, InMemorySyncRecordPersister, ManagementNodeSyncRecord,
    MasterChange, NodeStatus, ObjectStoreSyncRecordPersister, PersistError,
    SyncRecordPersister,
};
use slog::Drain;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn create_test_logger() -> slog::Logger {
    let decorator = slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

fn object_store_persister(store: Arc<InMemoryObjectStore>) -> Arc<dyn SyncRecordPersister> {
    Arc::new(ObjectStoreSyncRecordPersister::new(
        store,
        Arc::new(MementoCodec::new()),
        WriteQueueConfig::default(),
        Arc::default(),
        create_test_logger(),
    ))
}

fn both_persisters() -> Vec<(&'static str, Arc<dyn SyncRecordPersister>)> {
    let in_memory: Arc<dyn SyncRecordPersister> =
        Arc::new(InMemorySyncRecordPersister::new(create_test_logger()));
    let object_store = object_store_persister(Arc::new(InMemoryObjectStore::new()));
    vec![("in-memory", in_memory), ("object-store", object_store)]
}

fn heartbeat(node_id: &str, status: NodeStatus) -> ManagementNodeSyncRecord {
    ManagementNodeSyncRecord::new(node_id, status, mnemos::ha::current_timestamp())
}

async fn apply(persister: &Arc<dyn SyncRecordPersister>, delta: HaDelta) {
    persister.delta(delta).expect("delta rejected");
    persister
        .wait_for_writes_completed(WAIT)
        .await
        .expect("writes did not drain");
}

#[tokio::test]
async fn test_three_standby_nodes_then_set_master() {
    for (name, persister) in both_persisters() {
        for node in ["n1", "n2", "n3"] {
            apply(&persister, HaDelta::new().upsert_node(heartbeat(node, NodeStatus::Standby))).await;
        }
        apply(&persister, HaDelta::new().set_master("n2")).await;

        let record = persister.load_sync_record().unwrap();
        assert_eq!(record.master_node_id(), Some("n2"), "{}", name);
        assert_eq!(record.nodes().len(), 3, "{}", name);
        for node in ["n1", "n2", "n3"] {
            assert_eq!(record.node(node).unwrap().status, NodeStatus::Standby, "{}", name);
        }
    }
}

#[tokio::test]
async fn test_clear_master_then_set_new_master() {
    for (name, persister) in both_persisters() {
        apply(&persister, HaDelta::new().set_master("node2")).await;
        assert_eq!(
            persister.load_sync_record().unwrap().master_node_id(),
            Some("node2"),
            "{}",
            name
        );

        apply(&persister, HaDelta::new().clear_master()).await;
        assert_eq!(persister.load_sync_record().unwrap().master_node_id(), None, "{}", name);

        apply(&persister, HaDelta::new().set_master("node3")).await;
        assert_eq!(
            persister.load_sync_record().unwrap().master_node_id(),
            Some("node3"),
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_heartbeat_only_delta_keeps_master() {
    for (name, persister) in both_persisters() {
        apply(
            &persister,
            HaDelta::new()
                .upsert_node(heartbeat("n1", NodeStatus::Master))
                .set_master("n1"),
        )
        .await;
        apply(&persister, HaDelta::new().upsert_node(heartbeat("n2", NodeStatus::Standby))).await;

        let record = persister.load_sync_record().unwrap();
        assert_eq!(record.master_node_id(), Some("n1"), "{}", name);
        assert_eq!(record.master().unwrap().status, NodeStatus::Master, "{}", name);
    }
}

#[tokio::test]
async fn test_stop_semantics() {
    for (name, persister) in both_persisters() {
        apply(&persister, HaDelta::new().upsert_node(heartbeat("n1", NodeStatus::Standby))).await;

        persister.stop();
        persister.stop();

        persister
            .delta(HaDelta::new().remove_node("n1").set_master("n1"))
            .expect("delta after stop is ignored, not an error");
        persister.wait_for_writes_completed(WAIT).await.unwrap();

        match persister.load_sync_record() {
            Err(PersistError::NotRunning { .. }) => {}
            other => panic!("{}: expected NotRunning, got {:?}", name, other),
        }
    }
}

#[tokio::test]
async fn test_ignored_delta_leaves_store_untouched() {
    let store = Arc::new(InMemoryObjectStore::new());
    let writer = object_store_persister(store.clone());
    apply(&writer, HaDelta::new().upsert_node(heartbeat("n1", NodeStatus::Standby))).await;

    writer.stop();
    writer
        .delta(HaDelta::new().remove_node("n1").set_master("n1"))
        .unwrap();
    writer.wait_for_writes_completed(WAIT).await.unwrap();

    let reader = object_store_persister(store);
    let record = reader.load_sync_record().unwrap();
    assert!(record.node("n1").is_some());
    assert_eq!(record.master_node_id(), None);
}

#[tokio::test]
async fn test_invalid_master_change_is_fatal() {
    for (name, persister) in both_persisters() {
        apply(&persister, HaDelta::new().set_master("n1")).await;

        let err = persister
            .delta(HaDelta::new().upsert_node(heartbeat("n2", NodeStatus::Standby)).set_master(""))
            .unwrap_err();
        assert!(matches!(err, PersistError::InvalidMasterChange(_)), "{}", name);
        assert!(err.is_fatal());

        persister.wait_for_writes_completed(WAIT).await.unwrap();
        let record = persister.load_sync_record().unwrap();
        assert_eq!(record.master_node_id(), Some("n1"), "{}", name);
        assert!(record.node("n2").is_none(), "{}", name);
    }

    assert!(matches!(
        MasterChange::parse("HAND_OVER", Some("n2")),
        Err(PersistError::InvalidMasterChange(_))
    ));
}

#[tokio::test]
async fn test_failure_detection_clears_dead_master() {
    let persister = object_store_persister(Arc::new(InMemoryObjectStore::new()));
    let now = mnemos::ha::current_timestamp();

    apply(
        &persister,
        HaDelta::new()
            .upsert_node(ManagementNodeSyncRecord::new("old", NodeStatus::Master, now - 60_000))
            .upsert_node(ManagementNodeSyncRecord::new("fresh", NodeStatus::Standby, now))
            .set_master("old"),
    )
    .await;

    let view = persister.load_sync_record().unwrap();
    let delta = detect_failed_nodes(&view, now, Duration::from_secs(30), "fresh");
    apply(&persister, delta.set_master("fresh")).await;

    let record = persister.load_sync_record().unwrap();
    assert_eq!(record.node("old").unwrap().status, NodeStatus::Failed);
    assert_eq!(record.master_node_id(), Some("fresh"));
}
