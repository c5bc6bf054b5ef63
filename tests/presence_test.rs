use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use chinwag::client::Client;
use chinwag::test_utils::{
    MockHttpClient, MockTransportFactory, create_test_client, recv_event, stub_login,
};

/// A signed-in, connected client. Tests register their own `/join` stub so
/// each can shape the history that seeds the presence references.
async fn connected_client() -> (Arc<Client>, Arc<MockTransportFactory>, Arc<MockHttpClient>) {
    let (client, transport, http) = create_test_client();
    stub_login(&http, "U1", "alice", "tok-1");
    http.on(
        "GET",
        "/rooms",
        200,
        json!([{"ID": "R1", "name": "general", "author_id": "U2"}]).to_string(),
    );
    http.on(
        "GET",
        "/user/U2",
        200,
        json!({"ID": "U2", "username": "bob"}).to_string(),
    );
    http.on(
        "GET",
        "/user/U3",
        200,
        json!({"ID": "U3", "username": "carol"}).to_string(),
    );
    http.on("POST", "/room/R1/leave", 200, r#"{"message":"Left room"}"#);

    let mut connected_rx = client.event_bus.connected.subscribe();
    let run_client = client.clone();
    tokio::spawn(async move { run_client.run().await });
    client.login("alice", "hunter2").await.unwrap();
    recv_event(&mut connected_rx).await;
    (client, transport, http)
}

fn message(id: &str, uid: &str, content: &str) -> serde_json::Value {
    json!({
        "ID": id, "content": content, "uid": uid, "timestamp": 1700000000000i64,
        "has_attachment": false, "attachment_pending": false,
    })
}

fn stub_join(http: &MockHttpClient, messages: Vec<serde_json::Value>) {
    http.on(
        "POST",
        "/room/R1/join",
        200,
        json!({"ID": "R1", "name": "general", "author_id": "U2", "messages": messages}).to_string(),
    );
}

#[tokio::test]
async fn joining_fetches_each_distinct_author_once() {
    let (client, _transport, http) = connected_client().await;
    stub_join(
        &http,
        vec![
            message("M1", "U2", "hello"),
            message("M2", "U3", "hey"),
            message("M3", "U2", "anyone?"),
            message("M4", "U1", "me too"),
        ],
    );

    let mut user_updated_rx = client.event_bus.user_updated.subscribe();
    client.join_room("R1").await.unwrap();

    let mut fetched = HashSet::new();
    fetched.insert(recv_event(&mut user_updated_rx).await.username.clone());
    fetched.insert(recv_event(&mut user_updated_rx).await.username.clone());
    assert_eq!(fetched, HashSet::from(["bob".to_string(), "carol".to_string()]));

    assert_eq!(http.request_count("GET", "/user/U2"), 1);
    assert_eq!(http.request_count("GET", "/user/U3"), 1);
    // The signed-in user's profile comes from the session, never the wire.
    assert_eq!(http.request_count("GET", "/user/U1"), 0);

    client.disconnect().await;
}

#[tokio::test]
async fn coming_straight_back_cancels_eviction_without_a_refetch() {
    let (client, _transport, http) = connected_client().await;
    stub_join(&http, vec![message("M1", "U2", "hello")]);

    let mut user_updated_rx = client.event_bus.user_updated.subscribe();
    client.join_room("R1").await.unwrap();
    recv_event(&mut user_updated_rx).await;

    client.leave_room().await.unwrap();
    client.join_room("R1").await.unwrap();

    // Well past the grace period; the re-entered reference holds the profile.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(client.user("U2").await.is_some());
    assert_eq!(http.request_count("GET", "/user/U2"), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn idle_profiles_evict_after_the_grace_period() {
    let (client, _transport, http) = connected_client().await;
    stub_join(&http, vec![message("M1", "U2", "hello")]);

    let mut user_updated_rx = client.event_bus.user_updated.subscribe();
    client.join_room("R1").await.unwrap();
    recv_event(&mut user_updated_rx).await;
    assert!(client.user("U2").await.is_some());

    client.leave_room().await.unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(client.user("U2").await.is_none());
    assert_eq!(http.request_count("GET", "/user/U2"), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn every_visible_message_keeps_its_own_reference() {
    let (client, transport, http) = connected_client().await;
    stub_join(
        &http,
        vec![message("M1", "U2", "first"), message("M2", "U2", "second")],
    );

    let mut user_updated_rx = client.event_bus.user_updated.subscribe();
    let mut message_removed_rx = client.event_bus.message_removed.subscribe();
    client.join_room("R1").await.unwrap();
    recv_event(&mut user_updated_rx).await;

    transport
        .inject_frame(r#"{"event_type":"message_delete","ID":"M1"}"#)
        .await;
    recv_event(&mut message_removed_rx).await;

    // One message from bob is still on screen, so he survives the sweep.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(client.user("U2").await.is_some());

    transport
        .inject_frame(r#"{"event_type":"message_delete","ID":"M2"}"#)
        .await;
    recv_event(&mut message_removed_rx).await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(client.user("U2").await.is_none());

    client.disconnect().await;
}

#[tokio::test]
async fn a_fetch_nothing_references_is_discarded() {
    let (client, _transport, http) = connected_client().await;
    http.on(
        "GET",
        "/user/UX",
        200,
        json!({"ID": "UX", "username": "ghost"}).to_string(),
    );

    client.ensure_cached("UX", false).await.unwrap();

    assert_eq!(http.request_count("GET", "/user/UX"), 1);
    assert!(client.user("UX").await.is_none());

    client.disconnect().await;
}
