use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use chinwag::client::Client;
use chinwag::test_utils::{
    MockHttpClient, MockTransportFactory, create_test_client, recv_event, stub_login, wait_until,
};

async fn logged_in_client() -> (
    Arc<Client>,
    Arc<MockTransportFactory>,
    Arc<MockHttpClient>,
    JoinHandle<()>,
) {
    let (client, transport, http) = create_test_client();
    stub_login(&http, "U1", "alice", "tok-1");
    http.on(
        "GET",
        "/rooms",
        200,
        json!([{"ID": "R1", "name": "general", "author_id": "U2"}]).to_string(),
    );

    let mut connected_rx = client.event_bus.connected.subscribe();
    let run_client = client.clone();
    let run_handle = tokio::spawn(async move { run_client.run().await });
    client.login("alice", "hunter2").await.unwrap();
    recv_event(&mut connected_rx).await;
    (client, transport, http, run_handle)
}

#[tokio::test]
async fn an_unexpected_drop_reconnects_when_opted_in() {
    let (client, transport, http, _run_handle) = logged_in_client().await;
    client.set_auto_reconnect(true);

    let mut disconnected_rx = client.event_bus.disconnected.subscribe();
    let mut connected_rx = client.event_bus.connected.subscribe();
    transport.drop_connection().await;

    recv_event(&mut disconnected_rx).await;
    recv_event(&mut connected_rx).await;

    assert!(client.is_connected());
    assert_eq!(transport.connection_count(), 2);
    // Events missed while offline are gone; the room list is refetched.
    wait_until(|| http.request_count("GET", "/rooms") == 2).await;

    client.disconnect().await;
}

#[tokio::test]
async fn an_unexpected_drop_stops_the_client_by_default() {
    let (client, transport, _http, run_handle) = logged_in_client().await;

    let mut disconnected_rx = client.event_bus.disconnected.subscribe();
    transport.drop_connection().await;
    recv_event(&mut disconnected_rx).await;

    tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .unwrap()
        .unwrap();
    assert!(!client.is_connected());
    assert_eq!(transport.connection_count(), 1);
    // The session itself is untouched; only the socket is gone.
    assert!(client.is_logged_in());
}

#[tokio::test]
async fn a_refused_reconnect_attempt_backs_off_and_retries() {
    let (client, transport, _http, _run_handle) = logged_in_client().await;
    client.set_auto_reconnect(true);
    transport.fail_next_connects(1);

    let mut connected_rx = client.event_bus.connected.subscribe();
    transport.drop_connection().await;

    // First attempt is refused; the retry lands after the backoff.
    recv_event(&mut connected_rx).await;
    assert_eq!(transport.connection_count(), 2);
    assert_eq!(transport.presented_tokens(), ["tok-1", "tok-1"]);

    client.disconnect().await;
}

#[tokio::test]
async fn a_deliberate_disconnect_never_reconnects() {
    let (client, transport, _http, run_handle) = logged_in_client().await;
    client.set_auto_reconnect(true);

    client.disconnect().await;
    tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .unwrap()
        .unwrap();

    assert!(!client.is_connected());
    assert_eq!(transport.connection_count(), 1);
}
