use std::sync::Arc;

use serde_json::json;

use chinwag::client::Client;
use chinwag::test_utils::{
    MockHttpClient, MockTransportFactory, create_test_client, recv_event, stub_login, wait_until,
};
use chinwag::types::events::RoomClosedReason;

/// A signed-in, connected client with a populated room directory. Room `R1`
/// belongs to `U2` ("bob"), room `R2` to the signed-in `U1` ("alice"), and
/// `R1`'s history holds one message from each.
async fn ready_client() -> (Arc<Client>, Arc<MockTransportFactory>, Arc<MockHttpClient>) {
    let (client, transport, http) = create_test_client();
    stub_login(&http, "U1", "alice", "tok-1");
    http.on(
        "GET",
        "/rooms",
        200,
        json!([
            {"ID": "R1", "name": "general", "author_id": "U2"},
            {"ID": "R2", "name": "mine", "author_id": "U1"},
        ])
        .to_string(),
    );
    http.on(
        "GET",
        "/user/U2",
        200,
        json!({"ID": "U2", "username": "bob"}).to_string(),
    );
    http.on(
        "POST",
        "/room/R1/join",
        200,
        json!({
            "ID": "R1",
            "name": "general",
            "author_id": "U2",
            "messages": [
                {"ID": "M1", "content": "hello", "uid": "U2", "timestamp": 1700000000000i64,
                 "has_attachment": false, "attachment_pending": false},
                {"ID": "M2", "content": "hi bob", "uid": "U1", "timestamp": 1700000001000i64,
                 "has_attachment": false, "attachment_pending": false},
            ],
        })
        .to_string(),
    );
    http.on("POST", "/room/R1/leave", 200, r#"{"message":"Left room"}"#);

    let mut connected_rx = client.event_bus.connected.subscribe();
    let run_client = client.clone();
    tokio::spawn(async move { run_client.run().await });
    client.login("alice", "hunter2").await.unwrap();
    recv_event(&mut connected_rx).await;
    (client, transport, http)
}

#[tokio::test]
async fn chat_frames_append_to_the_active_room_and_fetch_the_author() {
    let (client, transport, http) = ready_client().await;
    http.on(
        "GET",
        "/user/U3",
        200,
        json!({"ID": "U3", "username": "carol"}).to_string(),
    );
    let mut user_updated_rx = client.event_bus.user_updated.subscribe();
    client.join_room("R1").await.unwrap();

    let mut message_rx = client.event_bus.message.subscribe();
    transport
        .inject_frame(r#"{"ID":"M3","content":"anyone here?","uid":"U3","has_attachment":false,"attachment_pending":false}"#)
        .await;

    let message = recv_event(&mut message_rx).await;
    assert_eq!(message.content, "anyone here?");
    assert_eq!(message.uid, "U3");
    assert_eq!(client.messages().await.len(), 3);

    // The unseen author gets fetched and lands in the directory. The join
    // fetch for bob races this one, so skip past it if it comes first.
    loop {
        let fetched = recv_event(&mut user_updated_rx).await;
        if fetched.username == "carol" {
            break;
        }
    }
    assert_eq!(http.request_count("GET", "/user/U3"), 1);
    assert!(client.user("U3").await.is_some());

    client.disconnect().await;
}

#[tokio::test]
async fn chat_frames_without_an_active_room_are_dropped() {
    let (client, transport, http) = ready_client().await;

    let mut transient_rx = client.event_bus.transient_error.subscribe();
    transport
        .inject_frame(r#"{"content":"lost","uid":"U3"}"#)
        .await;
    // A sentinel frame proves the dispatcher got past the dropped one.
    transport
        .inject_frame(r#"{"event_type":"chatroom_err","content":"sentinel"}"#)
        .await;
    recv_event(&mut transient_rx).await;

    assert!(client.messages().await.is_empty());
    assert_eq!(http.request_count("GET", "/user/U3"), 0);

    client.disconnect().await;
}

#[tokio::test]
async fn room_updates_merge_partially_and_append_unknown_rooms() {
    let (client, transport, _http) = ready_client().await;

    let mut updated_rx = client.event_bus.room_updated.subscribe();
    transport
        .inject_frame(r#"{"event_type":"chatroom_update","ID":"R1","name":"general-two"}"#)
        .await;
    let updated = recv_event(&mut updated_rx).await;
    assert_eq!(updated.name, "general-two");
    assert_eq!(updated.author_id, "U2");

    transport
        .inject_frame(
            r#"{"event_type":"chatroom_update","ID":"R9","name":"fresh","author_id":"U3"}"#,
        )
        .await;
    let appended = recv_event(&mut updated_rx).await;
    assert_eq!(appended.id, "R9");

    let ids: Vec<String> = client.rooms().await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, ["R1", "R2", "R9"]);

    client.disconnect().await;
}

#[tokio::test]
async fn own_rooms_mode_drops_updates_for_other_peoples_rooms() {
    let (client, transport, http) = create_test_client();
    stub_login(&http, "U1", "alice", "tok-1");
    http.on(
        "GET",
        "/rooms?own=true",
        200,
        json!([{"ID": "R2", "name": "mine", "author_id": "U1"}]).to_string(),
    );
    client.set_own_rooms_only(true);

    let mut connected_rx = client.event_bus.connected.subscribe();
    let run_client = client.clone();
    tokio::spawn(async move { run_client.run().await });
    client.login("alice", "hunter2").await.unwrap();
    recv_event(&mut connected_rx).await;
    wait_until(|| http.request_count("GET", "/rooms?own=true") == 1).await;

    let mut updated_rx = client.event_bus.room_updated.subscribe();
    transport
        .inject_frame(
            r#"{"event_type":"chatroom_update","ID":"R7","name":"not mine","author_id":"U2"}"#,
        )
        .await;
    transport
        .inject_frame(
            r#"{"event_type":"chatroom_update","ID":"R8","name":"also mine","author_id":"U1"}"#,
        )
        .await;

    // Only the own-room update comes through.
    let update = recv_event(&mut updated_rx).await;
    assert_eq!(update.id, "R8");
    let ids: Vec<String> = client.rooms().await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, ["R2", "R8"]);

    client.disconnect().await;
}

#[tokio::test]
async fn room_delete_prunes_the_directory_and_navigates_away() {
    let (client, transport, _http) = ready_client().await;
    client.join_room("R1").await.unwrap();

    let mut removed_rx = client.event_bus.room_removed.subscribe();
    let mut closed_rx = client.event_bus.room_closed.subscribe();
    transport
        .inject_frame(r#"{"event_type":"chatroom_delete","ID":"R1"}"#)
        .await;

    assert_eq!(recv_event(&mut removed_rx).await.id, "R1");
    let closed = recv_event(&mut closed_rx).await;
    assert_eq!(closed.room_id, "R1");
    assert!(matches!(closed.reason, RoomClosedReason::Deleted));

    assert!(client.active_room_id().await.is_none());
    assert!(client.messages().await.is_empty());
    assert!(client.room("R1").await.is_none());

    client.disconnect().await;
}

#[tokio::test]
async fn user_delete_cascades_across_every_collection() {
    let (client, transport, _http) = ready_client().await;
    let mut user_updated_rx = client.event_bus.user_updated.subscribe();
    client.join_room("R1").await.unwrap();
    // The join fetch caches bob before we delete him.
    recv_event(&mut user_updated_rx).await;

    let mut user_removed_rx = client.event_bus.user_removed.subscribe();
    let mut room_removed_rx = client.event_bus.room_removed.subscribe();
    let mut message_removed_rx = client.event_bus.message_removed.subscribe();
    let mut closed_rx = client.event_bus.room_closed.subscribe();

    transport
        .inject_frame(r#"{"event_type":"user_delete","ID":"U2"}"#)
        .await;

    assert_eq!(recv_event(&mut user_removed_rx).await.id, "U2");
    assert_eq!(recv_event(&mut room_removed_rx).await.id, "R1");
    assert_eq!(recv_event(&mut message_removed_rx).await.id, "M1");
    let closed = recv_event(&mut closed_rx).await;
    assert!(matches!(closed.reason, RoomClosedReason::AuthorDeleted));

    assert!(client.user("U2").await.is_none());
    assert!(client.room("R1").await.is_none());
    assert!(client.room("R2").await.is_some());
    assert!(client.active_room_id().await.is_none());

    client.disconnect().await;
}

#[tokio::test]
async fn user_delete_for_self_ends_the_session() {
    let (client, transport, _http) = ready_client().await;

    let mut logged_out_rx = client.event_bus.logged_out.subscribe();
    transport
        .inject_frame(r#"{"event_type":"user_delete","ID":"U1"}"#)
        .await;

    recv_event(&mut logged_out_rx).await;
    wait_until(|| !client.is_connected()).await;
    assert!(!client.is_logged_in());

    client.disconnect().await;
}

#[tokio::test]
async fn pfp_updates_patch_only_cached_profiles() {
    let (client, transport, http) = ready_client().await;
    let mut user_updated_rx = client.event_bus.user_updated.subscribe();
    client.join_room("R1").await.unwrap();
    // The join fetch caches bob.
    recv_event(&mut user_updated_rx).await;

    transport
        .inject_frame(
            r#"{"event_type":"pfp_update","ID":"U2","base64pfp":"data:image/png;base64,abcd"}"#,
        )
        .await;
    let updated = recv_event(&mut user_updated_rx).await;
    assert_eq!(updated.id, "U2");
    assert_eq!(updated.base64pfp.as_deref(), Some("data:image/png;base64,abcd"));

    // An avatar push never creates a profile out of thin air.
    let mut transient_rx = client.event_bus.transient_error.subscribe();
    transport
        .inject_frame(
            r#"{"event_type":"pfp_update","ID":"U5","base64pfp":"data:image/png;base64,ffff"}"#,
        )
        .await;
    transport
        .inject_frame(r#"{"event_type":"chatroom_err","content":"sentinel"}"#)
        .await;
    recv_event(&mut transient_rx).await;
    assert!(client.user("U5").await.is_none());
    assert_eq!(http.request_count("GET", "/user/U5"), 0);

    client.disconnect().await;
}

#[tokio::test]
async fn chatroom_err_surfaces_without_touching_state() {
    let (client, transport, _http) = ready_client().await;
    client.join_room("R1").await.unwrap();

    let mut transient_rx = client.event_bus.transient_error.subscribe();
    transport
        .inject_frame(
            r#"{"event_type":"chatroom_err","content":"You cannot submit an empty message"}"#,
        )
        .await;

    let err = recv_event(&mut transient_rx).await;
    assert_eq!(err.message, "You cannot submit an empty message");
    assert_eq!(client.messages().await.len(), 2);

    client.disconnect().await;
}

#[tokio::test]
async fn message_delete_removes_the_row() {
    let (client, transport, _http) = ready_client().await;
    client.join_room("R1").await.unwrap();

    let mut removed_rx = client.event_bus.message_removed.subscribe();
    transport
        .inject_frame(r#"{"event_type":"message_delete","ID":"M1"}"#)
        .await;

    assert_eq!(recv_event(&mut removed_rx).await.id, "M1");
    let remaining: Vec<Option<String>> =
        client.messages().await.into_iter().map(|m| m.id).collect();
    assert_eq!(remaining, [Some("M2".to_string())]);

    client.disconnect().await;
}

#[tokio::test]
async fn unknown_events_and_garbage_frames_do_not_stall_the_loop() {
    let (client, transport, _http) = ready_client().await;
    client.join_room("R1").await.unwrap();

    transport
        .inject_frame(r#"{"event_type":"presence_blip","ID":"x"}"#)
        .await;
    transport.inject_frame("not even json {{").await;

    let mut message_rx = client.event_bus.message.subscribe();
    transport
        .inject_frame(r#"{"content":"still alive","uid":"U2"}"#)
        .await;
    assert_eq!(recv_event(&mut message_rx).await.content, "still alive");

    client.disconnect().await;
}
