//! Behaviour of the record handler: hot path, permissions, subscriptions,
//! remote invalidation, cluster relay and the record-stable barrier.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use syncwell_testkit::prelude::*;

fn hot_path_server() -> TestServer {
    TestServer::with_config(test_config().with_storage_hot_path_prefix("pos/"))
}

fn subscribe(server: &TestServer, name: &str) -> Arc<TestConnection> {
    let watcher = server.connect();
    server.send(&watcher, RecordMessage::new(Action::Subscribe, name));
    watcher
}

#[tokio::test(start_paused = true)]
async fn hot_path_writes_bypass_transitions() {
    let server = hot_path_server();
    let watcher = subscribe(&server, "pos/1");
    let client = server.connect();

    server.send(
        &client,
        RecordMessage::new(Action::CreateAndUpdate, "pos/1")
            .with_version(7)
            .with_data(json!({ "lat": 1 }))
            .with_write_ack("c1"),
    );

    let ack = client
        .wait_for_action(Action::WriteAcknowledgement)
        .await
        .unwrap();
    assert!(!ack.is_error);
    assert_eq!(ack.correlation_id.as_deref(), Some("c1"));

    let broadcast = watcher.wait_for_action(Action::Update).await.unwrap();
    assert_eq!(broadcast.version, 7);
    assert!(broadcast.correlation_id.is_none());

    assert_eq!(server.cache.snapshot("pos/1").unwrap().version, 7);
    assert_eq!(server.storage.snapshot("pos/1").unwrap().version, 7);
    let stats = server.handler.stats();
    assert_eq!(stats.transitions_started, 0);
    assert_eq!(stats.hot_path_writes, 1);
    assert_eq!(
        server.permissions.checks(),
        vec![
            (Action::Create, "pos/1".to_string()),
            (Action::Update, "pos/1".to_string())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn hot_path_without_version_writes_version_zero() {
    let server = hot_path_server();
    let client = server.connect();

    server.send(
        &client,
        RecordMessage::new(Action::CreateAndUpdate, "pos/2").with_data(json!({ "lat": 2 })),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(server.cache.snapshot("pos/2").unwrap().version, 0);
    assert_eq!(server.storage.snapshot("pos/2").unwrap().version, 0);
}

#[tokio::test(start_paused = true)]
async fn hot_path_rejects_patches() {
    let server = hot_path_server();
    let client = server.connect();

    server.send(
        &client,
        RecordMessage::new(Action::CreateAndPatch, "pos/1")
            .with_path("lat")
            .with_data(json!(3)),
    );

    let reply = client
        .wait_for_action(Action::InvalidPatchOnHotpath)
        .await
        .unwrap();
    assert_eq!(reply.original_action, Some(Action::CreateAndPatch));
    assert!(server.cache.is_empty());
    assert!(server.permissions.checks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn denied_create_is_answered_and_nothing_is_written() {
    let server = TestServer::new();
    server.permissions.deny(Action::Create, "car/1");
    let client = server.connect();

    server.send(
        &client,
        RecordMessage::new(Action::CreateAndUpdate, "car/1")
            .with_data(json!({ "a": 1 }))
            .with_write_ack("c1"),
    );

    let reply = client.wait_for_action(Action::MessageDenied).await.unwrap();
    assert!(reply.is_error);
    assert!(reply.is_write_ack);
    assert_eq!(reply.original_action, Some(Action::CreateAndUpdate));
    assert_eq!(reply.correlation_id.as_deref(), Some("c1"));
    assert!(server.settle().await);
    assert!(server.cache.is_empty());
    assert_eq!(server.handler.stats().transitions_started, 0);
}

#[tokio::test(start_paused = true)]
async fn failing_permission_check_is_reported() {
    let server = TestServer::new();
    server.permissions.fail(Action::Update);
    let client = server.connect();

    server.send(
        &client,
        RecordMessage::new(Action::CreateAndUpdate, "car/1").with_data(json!({ "a": 1 })),
    );

    let reply = client
        .wait_for_action(Action::MessagePermissionError)
        .await
        .unwrap();
    assert_eq!(reply.original_action, Some(Action::CreateAndUpdate));
    assert!(server.cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn create_and_update_on_open_transition_checks_the_write_only() {
    let server = TestServer::new();
    server.seed("car/1", 0, json!({}));
    server.cache.hang_next(StoreOp::Set);
    let client = server.connect();

    server.send(
        &client,
        RecordMessage::new(Action::Update, "car/1").with_data(json!({ "a": 1 })),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(server.handler.has_transition("car/1"));

    server.send(
        &client,
        RecordMessage::new(Action::CreateAndPatch, "car/1")
            .with_path("b")
            .with_data(json!(2)),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(
        server.permissions.checks(),
        vec![(Action::Patch, "car/1".to_string())]
    );
    server.handler.close();
}

#[tokio::test(start_paused = true)]
async fn subscriptions_control_who_receives_updates() {
    let server = TestServer::new();
    server.seed("car/1", 0, json!({}));
    let writer = server.connect();
    let watcher = server.connect();

    server.send(
        &watcher,
        RecordMessage::bulk(Action::Subscribe, ["car/1"]).with_correlation_id("s1"),
    );
    assert_eq!(watcher.acks().len(), 1);

    server.send(
        &writer,
        RecordMessage::new(Action::Update, "car/1").with_data(json!({ "a": 1 })),
    );
    assert!(server.settle().await);
    assert_eq!(watcher.count(Action::Update), 1);

    server.send(&watcher, RecordMessage::bulk(Action::Unsubscribe, ["car/1"]));
    assert_eq!(watcher.acks().len(), 2);

    server.send(
        &writer,
        RecordMessage::new(Action::Update, "car/1").with_data(json!({ "a": 2 })),
    );
    assert!(server.settle().await);
    assert_eq!(watcher.count(Action::Update), 1);
}

#[tokio::test(start_paused = true)]
async fn notify_refreshes_subscribed_records_from_storage() {
    let server = TestServer::new();
    server.cache.insert("car/1", 1, json!({ "stale": true }));
    server.storage.insert("car/1", 2, json!({ "fresh": true }));
    server.cache.insert("car/3", 5, json!({}));
    let watcher = subscribe(&server, "car/1");
    watcher.clear();
    server.send(&watcher, RecordMessage::new(Action::Subscribe, "car/3"));
    let client = server.connect();

    server.send(
        &client,
        RecordMessage::bulk(Action::Notify, ["car/1", "car/2", "car/3"]).with_correlation_id("n1"),
    );

    let ack = client
        .wait_for_ack(|message| message.action == Action::Notify)
        .await
        .unwrap();
    assert_eq!(ack.correlation_id.as_deref(), Some("n1"));

    let updates = watcher.received(Action::Update);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].name, "car/1");
    assert_eq!(updates[0].version, 2);
    assert_eq!(updates[0].parse_data().unwrap(), json!({ "fresh": true }));

    let deleted = watcher.received(Action::Deleted);
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].name, "car/3");

    assert_eq!(server.cluster.count(Action::Notify), 1);
    assert_eq!(server.storage.call_count(StoreOp::Get), 2);
}

#[tokio::test(start_paused = true)]
async fn notify_reports_bulk_delete_failure() {
    let server = TestServer::new();
    server.cache.fail_next(StoreOp::DeleteBulk, "cache down");
    let client = server.connect();

    server.send(&client, RecordMessage::bulk(Action::Notify, ["car/1"]));

    let reply = client
        .wait_for_action(Action::RecordNotifyError)
        .await
        .unwrap();
    assert!(reply.is_error);
    assert!(client.acks().is_empty());
    assert!(server.cluster.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn notify_from_cluster_skips_invalidation_and_relay() {
    let server = TestServer::new();
    server.cache.insert("car/1", 4, json!({ "a": 4 }));
    let watcher = subscribe(&server, "car/1");

    server.receive_from_cluster(RecordMessage::bulk(Action::Notify, ["car/1"]));

    let update = watcher.wait_for_action(Action::Update).await.unwrap();
    assert_eq!(update.version, 4);
    assert_eq!(server.cache.call_count(StoreOp::DeleteBulk), 0);
    assert!(server.cluster.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cluster_updates_are_broadcast_without_persisting() {
    let server = TestServer::new();
    let watcher = subscribe(&server, "car/1");

    server.receive_from_cluster(
        RecordMessage::new(Action::Update, "car/1")
            .with_version(3)
            .with_data(json!({ "a": 3 })),
    );

    let update = watcher.received(Action::Update);
    assert_eq!(update.len(), 1);
    assert_eq!(update[0].version, 3);
    assert!(server.cluster.sent().is_empty());
    assert_eq!(server.cache.call_count(StoreOp::Set), 0);
    assert_eq!(server.storage.call_count(StoreOp::Set), 0);
}

#[tokio::test(start_paused = true)]
async fn cluster_update_supersedes_local_transition() {
    let server = TestServer::new();
    server.seed("car/1", 0, json!({}));
    server.cache.hang_next(StoreOp::Set);
    let writer = server.connect();

    server.send(
        &writer,
        RecordMessage::new(Action::Update, "car/1")
            .with_data(json!({ "a": 1 }))
            .with_write_ack("c1"),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;

    server.receive_from_cluster(
        RecordMessage::new(Action::Update, "car/1")
            .with_version(1)
            .with_data(json!({ "a": "remote" })),
    );

    let ack = writer
        .wait_for_action(Action::WriteAcknowledgement)
        .await
        .unwrap();
    assert!(ack.is_error);
    assert!(ack.reason.unwrap().contains("remote"));
    assert!(!server.handler.has_transition("car/1"));
}

#[tokio::test(start_paused = true)]
async fn unknown_actions_are_ignored() {
    let server = TestServer::new();
    let client = server.connect();

    server.send(&client, RecordMessage::new(Action::ReadResponse, "car/1"));
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(client.messages().is_empty());
    assert!(client.acks().is_empty());
}

#[test]
fn stable_barrier_defers_until_request_removed() {
    let server = TestServer::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second"] {
        let log = log.clone();
        server
            .handler
            .run_when_record_stable("car/1", move |name: &str| log.lock().push(format!("{tag}:{name}")));
    }
    assert_eq!(*log.lock(), vec!["first:car/1".to_string()]);

    server.handler.remove_record_request("car/1");
    assert_eq!(
        *log.lock(),
        vec!["first:car/1".to_string(), "second:car/1".to_string()]
    );
    server.handler.remove_record_request("car/1");
}
