use std::time::Duration;

use chinwag::config::ClientConfig;
use chinwag::test_utils::{
    create_test_client, create_test_client_with_config, recv_event, stub_login, wait_until,
};

#[tokio::test]
async fn login_opens_the_connection_with_the_session_cookie() {
    let (client, transport, http) = create_test_client();
    stub_login(&http, "U1", "alice", "tok-1");
    http.on("GET", "/rooms", 200, "[]");

    let mut connected_rx = client.event_bus.connected.subscribe();
    let run_client = client.clone();
    tokio::spawn(async move { run_client.run().await });

    assert_eq!(transport.connection_count(), 0);

    let profile = client.login("alice", "hunter2").await.unwrap();
    assert_eq!(profile.username, "alice");

    recv_event(&mut connected_rx).await;
    assert!(client.is_connected());
    assert_eq!(transport.connection_count(), 1);
    assert_eq!(transport.presented_tokens(), ["tok-1"]);

    client.disconnect().await;
}

#[tokio::test]
async fn logout_tears_the_connection_down_and_relogin_reopens_it() {
    let (client, transport, http) = create_test_client();
    stub_login(&http, "U1", "alice", "tok-1");
    http.on("GET", "/rooms", 200, "[]");
    http.on("POST", "/user/logout", 200, r#"{"message":"Logged out"}"#);

    let mut connected_rx = client.event_bus.connected.subscribe();
    let mut logged_out_rx = client.event_bus.logged_out.subscribe();
    let run_client = client.clone();
    tokio::spawn(async move { run_client.run().await });

    client.login("alice", "hunter2").await.unwrap();
    recv_event(&mut connected_rx).await;

    client.logout().await.unwrap();
    recv_event(&mut logged_out_rx).await;
    wait_until(|| !client.is_connected()).await;
    assert_eq!(transport.connection_count(), 1);

    // A fresh login brings the connection right back.
    client.login("alice", "hunter2").await.unwrap();
    recv_event(&mut connected_rx).await;
    assert!(client.is_connected());
    assert_eq!(transport.connection_count(), 2);

    client.disconnect().await;
}

#[tokio::test]
async fn failed_refresh_clears_the_session_and_closes_the_connection() {
    let mut config = ClientConfig::new("http://chat.test");
    config.session_refresh_interval = Duration::from_millis(50);
    let (client, _transport, http) = create_test_client_with_config(config);
    stub_login(&http, "U1", "alice", "tok-1");
    http.on("GET", "/rooms", 200, "[]");
    http.on(
        "POST",
        "/user/refresh",
        401,
        r#"{"message":"Error: Unauthorized"}"#,
    );

    let mut connected_rx = client.event_bus.connected.subscribe();
    let mut logged_out_rx = client.event_bus.logged_out.subscribe();
    let run_client = client.clone();
    tokio::spawn(async move { run_client.run().await });

    client.login("alice", "hunter2").await.unwrap();
    recv_event(&mut connected_rx).await;

    // The next scheduled refresh is rejected; the session must fail closed.
    recv_event(&mut logged_out_rx).await;
    wait_until(|| !client.is_connected()).await;
    assert!(!client.is_logged_in());

    client.disconnect().await;
}

#[tokio::test]
async fn successful_refresh_restores_a_session_at_startup() {
    let (client, transport, http) = create_test_client();
    http.on_with_headers(
        "POST",
        "/user/refresh",
        200,
        r#"{"ID":"U1","username":"alice"}"#,
        &[("Set-Cookie", "session_token=tok-fresh; Path=/; HttpOnly")],
    );
    http.on("GET", "/rooms", 200, "[]");

    // Simulate a cookie left over from a previous process.
    client.api.cookies.set("tok-stale");

    let mut connected_rx = client.event_bus.connected.subscribe();
    let run_client = client.clone();
    tokio::spawn(async move { run_client.run().await });

    recv_event(&mut connected_rx).await;
    assert_eq!(client.current_user().unwrap().username, "alice");
    // The connection was opened with the rotated cookie, not the stale one.
    assert_eq!(transport.presented_tokens(), ["tok-fresh"]);

    client.disconnect().await;
}

#[tokio::test]
async fn disconnect_stops_the_run_loop() {
    let (client, _transport, http) = create_test_client();
    stub_login(&http, "U1", "alice", "tok-1");
    http.on("GET", "/rooms", 200, "[]");

    let mut connected_rx = client.event_bus.connected.subscribe();
    let run_client = client.clone();
    let run_handle = tokio::spawn(async move { run_client.run().await });

    client.login("alice", "hunter2").await.unwrap();
    recv_event(&mut connected_rx).await;

    client.disconnect().await;
    tokio::time::timeout(Duration::from_secs(5), run_handle)
        .await
        .expect("run loop should stop after disconnect")
        .unwrap();
    assert!(!client.is_connected());
}
