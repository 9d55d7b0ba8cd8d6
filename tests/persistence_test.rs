//! Integration tests for memento persistence and rebind
//!
//! Covers:
//! 1. Checkpoint → load → rebind yields the same graph
//! 2. Deltas are idempotent and removal wins over upsert
//! 3. Forward references resolve regardless of delta order
//! 4. Stop semantics, the empty checkpoint and write timeouts
//! 5. RocksDB contents survive a reopen

use mnemos::codec::MementoCodec;
use mnemos::memento::{entity_ref, location_ref};
use mnemos::store::write_queue::WriteQueueConfig;
use mnemos::{
    EntityMemento, EventBus, InMemoryObjectStore, LocationMemento, MementoDelta, MementoGraph,
    MementoKind, MementoPersister, ObjectStore, ObjectStoreMementoPersister, PersistError,
    PersistenceEvent, PolicyMemento, RebindResolver, RocksDbObjectStore,
};
use serde_json::json;
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

fn create_persister(store: Arc<dyn ObjectStore>) -> ObjectStoreMementoPersister {
    ObjectStoreMementoPersister::new(
        store,
        Arc::new(MementoCodec::new()),
        WriteQueueConfig {
            retries: 1,
            backoff: Duration::from_millis(1),
        },
        Arc::default(),
        create_test_logger(),
    )
}

/// An application with a web tier and database, deployed to a zone inside a
/// region, with a policy and cross-entity references in config.
fn sample_graph() -> MementoGraph {
    MementoGraph::new()
        .with_location(
            LocationMemento::builder("us-east", "Region")
                .display_name("US East")
                .child("us-east-1a")
                .flag("provider", json!("aws"))
                .build(),
        )
        .with_location(
            LocationMemento::builder("us-east-1a", "AvailabilityZone")
                .parent("us-east")
                .build(),
        )
        .with_entity(
            EntityMemento::builder("app", "BasicApplication")
                .display_name("Shop")
                .child("web")
                .child("db")
                .location("us-east-1a")
                .config("owner", json!("ops@example.com"))
                .build(),
        )
        .with_entity(
            EntityMemento::builder("web", "WebAppCluster")
                .parent("app")
                .member("web-1")
                .policy("autoscaler")
                .config("database", entity_ref("db"))
                .config("cluster.size", json!(2))
                .attribute("service.isUp", json!(true))
                .attribute("placement", location_ref("us-east-1a"))
                .build(),
        )
        .with_entity(
            EntityMemento::builder("web-1", "JBoss7Server")
                .custom_field("jmx.port", json!(9990))
                .build(),
        )
        .with_entity(
            EntityMemento::builder("db", "PostgreSqlNode")
                .parent("app")
                .attribute("datastore.url", json!("postgresql://10.0.0.5:5432/"))
                .build(),
        )
        .with_policy(
            PolicyMemento::builder("autoscaler", "AutoScalerPolicy")
                .flag("minPoolSize", json!(1))
                .flag("maxPoolSize", json!(5))
                .build(),
        )
}

#[tokio::test]
async fn test_checkpoint_load_rebind_round_trip() {
    let persister = create_persister(Arc::new(InMemoryObjectStore::new()));
    let graph = sample_graph();

    persister.checkpoint_and_wait(&graph).await.expect("checkpoint failed");

    let loaded = persister.load_memento().expect("load failed");
    assert_eq!(loaded, graph);

    let rebound = RebindResolver::new(create_test_logger())
        .rebind(&loaded)
        .expect("rebind failed");
    assert_eq!(rebound.to_memento(), graph);

    let web = rebound.entity_by_id("web").unwrap();
    assert_eq!(rebound.entity(web.parent().unwrap()).id(), "app");
    assert_eq!(rebound.policy(web.policies()[0]).id(), "autoscaler");
}

#[tokio::test]
async fn test_empty_checkpoint_loads_empty() {
    let persister = create_persister(Arc::new(InMemoryObjectStore::new()));

    persister.checkpoint_and_wait(&MementoGraph::new()).await.unwrap();
    let loaded = persister.load_memento().unwrap();

    for kind in MementoKind::ALL {
        assert_eq!(loaded.count(kind), 0, "expected no {} mementos", kind.name());
    }
}

#[tokio::test]
async fn test_upsert_delta_is_idempotent() {
    let store = Arc::new(InMemoryObjectStore::new());
    let persister = create_persister(store.clone());
    persister.checkpoint_and_wait(&sample_graph()).await.unwrap();

    let delta = MementoDelta::new()
        .with_entity(
            EntityMemento::builder("db", "PostgreSqlNode")
                .parent("app")
                .attribute("datastore.url", json!("postgresql://10.0.0.6:5432/"))
                .build(),
        )
        .with_policy(PolicyMemento::builder("restarter", "ServiceRestarter").build());

    persister.delta(delta.clone()).unwrap();
    persister.wait_for_writes_completed(WAIT).await.unwrap();
    let once = persister.load_memento().unwrap();
    let blobs_once = store.len();

    persister.delta(delta).unwrap();
    persister.wait_for_writes_completed(WAIT).await.unwrap();
    let twice = persister.load_memento().unwrap();

    assert_eq!(once, twice);
    assert_eq!(blobs_once, store.len());
    assert_eq!(
        twice.entity("db").unwrap().attributes().get("datastore.url"),
        Some(&json!("postgresql://10.0.0.6:5432/"))
    );
}

#[tokio::test]
async fn test_delta_with_same_id_upserted_and_removed() {
    let persister = create_persister(Arc::new(InMemoryObjectStore::new()));

    let delta = MementoDelta::new()
        .with_entity(EntityMemento::builder("x", "Server").build())
        .with_location(LocationMemento::builder("l", "Ssh").build())
        .with_policy(PolicyMemento::builder("p", "Restarter").build())
        .remove_entity("x")
        .remove_location("l")
        .remove_policy("p");
    persister.delta(delta).unwrap();
    persister.wait_for_writes_completed(WAIT).await.unwrap();

    let loaded = persister.load_memento().unwrap();
    assert!(loaded.is_empty());
}

#[tokio::test]
async fn test_forward_reference_across_deltas() {
    let persister = create_persister(Arc::new(InMemoryObjectStore::new()));

    // Child arrives first, referencing a parent that does not exist yet
    persister
        .delta(
            MementoDelta::new()
                .with_entity(EntityMemento::builder("child", "Server").parent("parent").build()),
        )
        .unwrap();
    persister.wait_for_writes_completed(WAIT).await.unwrap();

    let partial = persister.load_memento().unwrap();
    let err = RebindResolver::new(create_test_logger())
        .rebind(&partial)
        .unwrap_err();
    assert!(matches!(err, PersistError::UnresolvedReference { .. }));

    persister
        .delta(
            MementoDelta::new()
                .with_entity(EntityMemento::builder("parent", "Application").child("child").build()),
        )
        .unwrap();
    persister.wait_for_writes_completed(WAIT).await.unwrap();

    let graph = RebindResolver::new(create_test_logger())
        .rebind(&persister.load_memento().unwrap())
        .expect("rebind after both deltas");
    let child = graph.entity_by_id("child").unwrap();
    assert_eq!(graph.entity(child.parent().unwrap()).id(), "parent");
    assert_eq!(graph.applications().len(), 1);
}

#[tokio::test]
async fn test_writes_after_stop_change_nothing() {
    let store = Arc::new(InMemoryObjectStore::new());
    let persister = create_persister(store.clone());
    persister.checkpoint_and_wait(&sample_graph()).await.unwrap();
    let before = persister.load_memento().unwrap();

    persister.stop();
    persister
        .delta(MementoDelta::new().remove_entity("app").remove_entity("web"))
        .expect("delta after stop should be a silent no-op");
    persister.wait_for_writes_completed(WAIT).await.unwrap();

    // A fresh persister on the same store sees the pre-stop state
    let reader = create_persister(store);
    assert_eq!(reader.load_memento().unwrap(), before);
}

#[tokio::test]
async fn test_failed_delta_reported_asynchronously() {
    let store = Arc::new(InMemoryObjectStore::new());
    let events: Arc<EventBus<PersistenceEvent>> = Arc::new(EventBus::new(8));
    let mut rx = events.subscribe();
    let persister = ObjectStoreMementoPersister::new(
        store.clone(),
        Arc::new(MementoCodec::new()),
        WriteQueueConfig {
            retries: 2,
            backoff: Duration::from_millis(1),
        },
        events,
        create_test_logger(),
    );

    store.set_read_only(true);
    persister
        .delta(MementoDelta::new().with_entity(EntityMemento::builder("e", "Server").build()))
        .expect("delta failures are not synchronous");
    persister.wait_for_writes_completed(WAIT).await.unwrap();

    match rx.recv().await.unwrap() {
        PersistenceEvent::WriteFailed { path, .. } => assert_eq!(path, "entities/e"),
        other => panic!("Unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_wait_for_writes_times_out_while_retrying() {
    let store = Arc::new(InMemoryObjectStore::new());
    let persister = ObjectStoreMementoPersister::new(
        store.clone(),
        Arc::new(MementoCodec::new()),
        WriteQueueConfig {
            retries: 3,
            backoff: Duration::from_millis(200),
        },
        Arc::default(),
        create_test_logger(),
    );

    store.set_read_only(true);
    persister
        .delta(MementoDelta::new().with_entity(EntityMemento::builder("e", "Server").build()))
        .unwrap();

    let err = persister
        .wait_for_writes_completed(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistError::WriteTimeout(_)), "got {:?}", err);
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn test_rocksdb_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let graph = sample_graph();

    {
        let store = Arc::new(RocksDbObjectStore::open(dir.path(), true).unwrap());
        let persister = create_persister(store);
        persister.checkpoint_and_wait(&graph).await.unwrap();
        persister
            .delta(MementoDelta::new().remove_policy("autoscaler"))
            .unwrap();
        persister.wait_for_writes_completed(WAIT).await.unwrap();
        persister.stop();
    }

    // Let the writer tasks drop their store handles so the DB lock is released
    tokio::time::sleep(Duration::from_millis(50)).await;

    let store = Arc::new(RocksDbObjectStore::open(dir.path(), true).unwrap());
    let loaded = create_persister(store).load_memento().unwrap();

    let mut expected = graph;
    expected.remove_policy("autoscaler");
    assert_eq!(loaded, expected);
}
