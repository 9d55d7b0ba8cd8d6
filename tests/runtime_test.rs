//! Integration tests for the composed persistence runtime
//!
//! Two nodes share one object store:
//! 1. The first node promotes itself, the second stays standby
//! 2. Entity changes flow through the change listener into the store
//! 3. Shutting down the master hands over cleanly

use mnemos::memento::MementoGraph;
use mnemos::{
    EntityChangeListener, EntityMemento, InMemoryObjectStore, LocationMemento, MementoSource,
    NodeStatus, PersistError, PersistenceConfig, PersistenceRuntime, PolicyMemento,
};
use serde_json::json;
use slog::Drain;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn create_test_logger() -> slog::Logger {
    let decorator = slog_term::PlainDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

/// Live state of a pretend entity model
#[derive(Default)]
struct TestModel {
    graph: Mutex<MementoGraph>,
}

fn not_found(kind: &'static str, id: &str) -> PersistError {
    PersistError::NotFound {
        kind,
        id: id.to_string(),
    }
}

impl MementoSource for TestModel {
    fn entity_memento(&self, id: &str) -> mnemos::Result<EntityMemento> {
        let graph = self.graph.lock().unwrap();
        graph.entity(id).cloned().ok_or_else(|| not_found("entity", id))
    }

    fn location_memento(&self, id: &str) -> mnemos::Result<LocationMemento> {
        let graph = self.graph.lock().unwrap();
        graph.location(id).cloned().ok_or_else(|| not_found("location", id))
    }

    fn policy_memento(&self, id: &str) -> mnemos::Result<PolicyMemento> {
        let graph = self.graph.lock().unwrap();
        graph.policy(id).cloned().ok_or_else(|| not_found("policy", id))
    }
}

fn node_config(node_id: &str) -> PersistenceConfig {
    PersistenceConfig::new(node_id)
        .with_remote_address(format!("{}.example.com:8081", node_id))
        .with_delta_period(Duration::from_millis(20))
        .with_heartbeat_interval(Duration::from_millis(20))
        .with_heartbeat_timeout(Duration::from_secs(30))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_nodes_elect_and_hand_over() {
    let store = Arc::new(InMemoryObjectStore::new());
    let model = Arc::new(TestModel::default());

    let node1 = PersistenceRuntime::start_with_store(
        node_config("node1"),
        store.clone(),
        model.clone(),
        create_test_logger(),
    )
    .await
    .unwrap();
    let node2 = PersistenceRuntime::start_with_store(
        node_config("node2"),
        store.clone(),
        model.clone(),
        create_test_logger(),
    )
    .await
    .unwrap();

    assert!(node1.promote_if_no_master().await.unwrap());
    assert!(!node2.promote_if_no_master().await.unwrap());
    assert!(node1.is_master().unwrap());

    // Let both heartbeats land
    tokio::time::sleep(Duration::from_millis(100)).await;
    let view = node2.sync_record().unwrap();
    assert_eq!(view.master_node_id(), Some("node1"));
    assert_eq!(view.node("node1").unwrap().status, NodeStatus::Master);
    assert_eq!(view.node("node2").unwrap().status, NodeStatus::Standby);
    assert_eq!(
        view.node("node2").unwrap().remote_address.as_deref(),
        Some("node2.example.com:8081")
    );

    node1.shutdown().await.unwrap();

    let view = node2.sync_record().unwrap();
    assert_eq!(view.master_node_id(), None);
    assert_eq!(view.node("node1").unwrap().status, NodeStatus::Terminated);

    assert!(node2.promote_if_no_master().await.unwrap());
    assert_eq!(node2.sync_record().unwrap().master_node_id(), Some("node2"));

    node2.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_promoted_node_never_heartbeats_standby() {
    let store = Arc::new(InMemoryObjectStore::new());
    let config = node_config("fast").with_heartbeat_interval(Duration::from_millis(2));
    let runtime = PersistenceRuntime::start_with_store(
        config,
        store,
        Arc::new(TestModel::default()),
        create_test_logger(),
    )
    .await
    .unwrap();
    assert_eq!(runtime.heartbeat_status(), Some(NodeStatus::Standby));

    assert!(runtime.promote_if_no_master().await.unwrap());
    assert_eq!(runtime.heartbeat_status(), Some(NodeStatus::Master));

    for _ in 0..50 {
        let view = runtime.sync_record().unwrap();
        assert_eq!(view.master_node_id(), Some("fast"));
        assert_eq!(view.node("fast").unwrap().status, NodeStatus::Master);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_entity_changes_are_persisted_and_rebound() {
    let store = Arc::new(InMemoryObjectStore::new());
    let model = Arc::new(TestModel::default());

    let runtime = PersistenceRuntime::start_with_store(
        node_config("solo"),
        store.clone(),
        model.clone(),
        create_test_logger(),
    )
    .await
    .unwrap();
    assert!(runtime.rebind().unwrap().is_empty());

    {
        let mut graph = model.graph.lock().unwrap();
        graph.add_location(LocationMemento::builder("localhost", "LocalhostMachine").build());
        graph.add_entity(
            EntityMemento::builder("app", "BasicApplication")
                .child("server")
                .location("localhost")
                .build(),
        );
        graph.add_entity(
            EntityMemento::builder("server", "SoftwareProcess")
                .parent("app")
                .attribute("service.isUp", json!(false))
                .build(),
        );
    }

    let app = runtime.entity_listener("app");
    let server = runtime.entity_listener("server");
    app.on_children_changed();
    server.on_attribute_changed("service.isUp");

    runtime
        .change_listener()
        .flush(Duration::from_secs(5))
        .await
        .unwrap();

    let rebound = runtime.rebind().unwrap();
    assert_eq!(rebound.applications().len(), 1);
    assert!(rebound.location_by_id("localhost").is_some());
    assert_eq!(
        rebound
            .entity_by_id("server")
            .unwrap()
            .attributes()
            .get("service.isUp"),
        Some(&json!(false))
    );

    runtime.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_sees_previous_checkpoint() {
    let store = Arc::new(InMemoryObjectStore::new());
    let model = Arc::new(TestModel::default());
    let graph = MementoGraph::new()
        .with_entity(EntityMemento::builder("app", "BasicApplication").policy("p").build())
        .with_policy(PolicyMemento::builder("p", "ServiceRestarter").build());

    let first = PersistenceRuntime::start_with_store(
        node_config("n1"),
        store.clone(),
        model.clone(),
        create_test_logger(),
    )
    .await
    .unwrap();
    first.checkpoint(&graph).await.unwrap();
    first.shutdown().await.unwrap();

    let second = PersistenceRuntime::start_with_store(
        node_config("n1"),
        store.clone(),
        model,
        create_test_logger(),
    )
    .await
    .unwrap();
    assert_eq!(second.rebind().unwrap().to_memento(), graph);
    second.shutdown().await.unwrap();
}
