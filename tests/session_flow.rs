mod common;

use common::{FakeCluster, WAIT, assert_quiet, fast_config, next_event, next_message};
use futures::{SinkExt, StreamExt};
use kubewire::cache::event::{DiagnosticLevel, Outbound};
use kubewire::cache::key::ResourceKey;
use kubewire::cache::registry::WatcherRegistry;
use kubewire::k8s::kinds::ResourceKind;
use kubewire::session::{Session, run_session};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_util::sync::CancellationToken;

fn setup() -> (Arc<FakeCluster>, Arc<WatcherRegistry>) {
    let cluster = FakeCluster::new(&["ctx-a", "ctx-b"]);
    let registry = Arc::new(WatcherRegistry::new(cluster.clone(), fast_config()));
    (cluster, registry)
}

fn add(kind: &str, context: &str, namespace: &str) -> String {
    json!({
        "command": "AddSource",
        "objectType": kind,
        "contextName": context,
        "namespaceName": namespace,
    })
    .to_string()
}

fn remove(kind: &str, context: &str, namespace: &str) -> String {
    json!({
        "command": "RemoveSource",
        "objectType": kind,
        "contextName": context,
        "namespaceName": namespace,
    })
    .to_string()
}

#[tokio::test]
async fn test_add_and_remove_sources() {
    let (_cluster, registry) = setup();
    let mut session = Session::new(registry.clone(), 16);
    let pods = ResourceKey::new("ctx-a", ResourceKind::Pod, Some("default"));
    let deployments = ResourceKey::new("ctx-b", ResourceKind::Deployment, Some("prod"));

    session.handle_command(&add("Pod", "ctx-a", "default")).await;
    session.handle_command(&add("Deployment", "ctx-b", "prod")).await;
    assert_eq!(session.subscriptions().len(), 2);
    assert!(registry.get(&pods).unwrap().has_subscriber(session.id()));

    session.handle_command(&remove("Pod", "ctx-a", "default")).await;
    assert!(!session.is_subscribed(&pods));
    assert!(!registry.contains(&pods));

    // unknown keys are ignored
    session.handle_command(&remove("Pod", "ctx-a", "default")).await;
    assert_eq!(session.subscriptions().len(), 1);

    session.handle_command(r#"{"command":"RemoveAllSources"}"#).await;
    assert!(session.subscriptions().is_empty());
    assert!(!registry.contains(&deployments));
    assert_quiet(session.outbox()).await;
}

#[tokio::test]
async fn test_duplicate_add_is_honored_once() {
    let (_cluster, registry) = setup();
    let mut session = Session::new(registry.clone(), 16);
    let key = ResourceKey::new("ctx-a", ResourceKind::Pod, Some("default"));

    session.handle_command(&add("Pod", "ctx-a", "default")).await;
    session.handle_command(&add("Pod", "ctx-a", "default")).await;

    assert_eq!(session.subscriptions().len(), 1);
    assert_eq!(registry.get(&key).unwrap().subscriber_count(), 1);
}

#[tokio::test]
async fn test_unknown_context_reports_diagnostic() {
    let (_cluster, registry) = setup();
    let mut session = Session::new(registry.clone(), 16);

    session.handle_command(&add("Pod", "ctx-missing", "default")).await;

    assert!(session.subscriptions().is_empty());
    assert!(registry.is_empty());
    match next_message(session.outbox()).await {
        Outbound::Diagnostic(diagnostic) => {
            assert_eq!(diagnostic.level, DiagnosticLevel::Error);
            assert!(diagnostic.message.contains("ctx-missing"));
            assert_eq!(diagnostic.source.as_deref(), Some("ctx-missing:Pod:default"));
        }
        Outbound::Event(event) => panic!("unexpected event {event:?}"),
    }
}

#[tokio::test]
async fn test_malformed_command_keeps_session() {
    let (_cluster, registry) = setup();
    let mut session = Session::new(registry.clone(), 16);

    session.handle_command("{not json").await;
    session.handle_command(&add("Widget", "ctx-a", "default")).await;
    for _ in 0..2 {
        match next_message(session.outbox()).await {
            Outbound::Diagnostic(d) => assert_eq!(d.level, DiagnosticLevel::Warning),
            Outbound::Event(event) => panic!("unexpected event {event:?}"),
        }
    }

    session.handle_command(&add("Pod", "ctx-a", "default")).await;
    assert_eq!(session.subscriptions().len(), 1);
}

#[tokio::test]
async fn test_dropping_session_releases_everything() {
    let (_cluster, registry) = setup();
    let mut session = Session::new(registry.clone(), 16);
    session.handle_command(&add("Pod", "ctx-a", "default")).await;
    session.handle_command(&add("Node", "ctx-b", "")).await;
    assert_eq!(registry.len(), 2);

    drop(session);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_events_reach_only_subscribed_sessions() {
    let (cluster, registry) = setup();
    let key = ResourceKey::new("ctx-b", ResourceKind::Deployment, Some("prod"));
    let mut first = Session::new(registry.clone(), 16);
    let mut second = Session::new(registry.clone(), 16);
    let mut bystander = Session::new(registry.clone(), 16);

    first.handle_command(&add("Deployment", "ctx-b", "prod")).await;
    second.handle_command(&add("Deployment", "ctx-b", "prod")).await;
    bystander.handle_command(&add("Deployment", "ctx-b", "dev")).await;
    registry.get(&key).unwrap().ready().await;
    cluster.wait_for_watch(&key).await;

    cluster.create(&key, "api");
    assert_eq!(next_event(first.outbox()).await.1, "api");
    assert_eq!(next_event(second.outbox()).await.1, "api");

    cluster.modify(&key, "api");
    assert_eq!(next_event(first.outbox()).await.0, "Updated");
    assert_eq!(next_event(second.outbox()).await.0, "Updated");
    assert_quiet(first.outbox()).await;

    first.handle_command(&remove("Deployment", "ctx-b", "prod")).await;
    let watcher = registry.get(&key).unwrap();
    assert_eq!(watcher.state(), kubewire::cache::watcher::WatcherState::Live);
    cluster.modify(&key, "api");
    assert_eq!(next_event(second.outbox()).await.0, "Updated");
    assert_quiet(first.outbox()).await;
    assert_quiet(bystander.outbox()).await;

    second.handle_command(&remove("Deployment", "ctx-b", "prod")).await;
    tokio::time::timeout(WAIT, watcher.stopped()).await.unwrap();
    assert!(!registry.contains(&key));
}

async fn connect(
    registry: Arc<WatcherRegistry>,
    shutdown: CancellationToken,
) -> (
    WebSocketStream<DuplexStream>,
    tokio::task::JoinHandle<kubewire::Result<()>>,
) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    let handle = tokio::spawn(run_session(server, registry, 64, shutdown));
    (client, handle)
}

async fn next_json(client: &mut WebSocketStream<DuplexStream>) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("transport error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_websocket_session_end_to_end() {
    let (cluster, registry) = setup();
    let key = ResourceKey::new("ctx-a", ResourceKind::Pod, Some("default"));
    let (mut client, handle) = connect(registry.clone(), CancellationToken::new()).await;

    client.send(Message::text("garbage")).await.unwrap();
    client.send(Message::text(add("Pod", "ctx-a", "default"))).await.unwrap();

    let diagnostic = next_json(&mut client).await;
    assert_eq!(diagnostic["diagnostic"], "warning");

    cluster.wait_for_watch(&key).await;
    cluster.create(&key, "web-1");

    let created = next_json(&mut client).await;
    assert_eq!(created["eventType"], "Created");
    assert_eq!(created["objectType"], "Pod");
    assert_eq!(created["contextName"], "ctx-a");
    assert_eq!(created["namespaceName"], "default");
    assert_eq!(created["object"]["metadata"]["name"], "web-1");

    cluster.delete(&key, "web-1");
    assert_eq!(next_json(&mut client).await["eventType"], "Deleted");

    client.close(None).await.unwrap();
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
    assert!(registry.is_empty());
    cluster.wait_for_no_watch(&key).await;
}

#[tokio::test]
async fn test_cluster_scoped_event_omits_namespace() {
    let (cluster, registry) = setup();
    let key = ResourceKey::new("ctx-b", ResourceKind::Node, None);
    let (mut client, _handle) = connect(registry.clone(), CancellationToken::new()).await;

    client.send(Message::text(add("Node", "ctx-b", ""))).await.unwrap();
    cluster.wait_for_watch(&key).await;
    cluster.create(&key, "node-1");

    let created = next_json(&mut client).await;
    assert_eq!(created["objectType"], "Node");
    assert!(created.get("namespaceName").is_none());
}

#[tokio::test]
async fn test_abrupt_disconnect_releases_subscriptions() {
    let (cluster, registry) = setup();
    let key = ResourceKey::new("ctx-a", ResourceKind::Pod, Some("default"));
    let (mut client, handle) = connect(registry.clone(), CancellationToken::new()).await;

    client.send(Message::text(add("Pod", "ctx-a", "default"))).await.unwrap();
    cluster.wait_for_watch(&key).await;
    drop(client);

    let _ = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert!(registry.is_empty());
    cluster.wait_for_no_watch(&key).await;
}

#[tokio::test]
async fn test_shutdown_ends_session() {
    let (cluster, registry) = setup();
    let key = ResourceKey::new("ctx-a", ResourceKind::Pod, Some("default"));
    let shutdown = CancellationToken::new();
    let (mut client, handle) = connect(registry.clone(), shutdown.clone()).await;

    client.send(Message::text(add("Pod", "ctx-a", "default"))).await.unwrap();
    cluster.wait_for_watch(&key).await;
    shutdown.cancel();

    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
    assert!(registry.is_empty());
}
