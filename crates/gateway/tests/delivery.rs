#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end delivery tests: a real gateway on a loopback listener with
//! in-memory bus backends and socket clients on both ends.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    tokio::net::TcpListener,
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async,
        tungstenite::{self, client::IntoClientRequest, protocol::frame::coding::CloseCode},
    },
};

use {
    parley_bus::{MemoryDurableBus, MemoryEphemeralBus, MemoryKv},
    parley_chats::{ChatService, CreateGroupRequest, LocalChatService, SqliteChatStore},
    parley_config::ParleyConfig,
    parley_gateway::{GatewayServices, GatewayState, fanout},
    parley_messages::{LocalMessageService, MessageService, SqliteMessageStore},
    parley_protocol::Envelope,
};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    chats: Arc<dyn ChatService>,
}

async fn start_server() -> TestServer {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    SqliteChatStore::init(&pool).await.unwrap();
    SqliteMessageStore::init(&pool).await.unwrap();

    let durable = Arc::new(MemoryDurableBus::new());
    let chats: Arc<dyn ChatService> = Arc::new(LocalChatService::new(
        Arc::new(SqliteChatStore::new(pool.clone())),
        durable.clone(),
    ));
    let messages: Arc<dyn MessageService> = Arc::new(LocalMessageService::new(
        Arc::new(SqliteMessageStore::new(pool)),
        chats.clone(),
        durable.clone(),
    ));

    let mut config = ParleyConfig::default();
    config.auth.trust_gateway_headers = true;
    config.presence.ttl_secs = 2;

    let state = GatewayState::new(
        &config,
        GatewayServices {
            messages,
            chats: chats.clone(),
        },
        durable,
        Arc::new(MemoryEphemeralBus::new()),
        Arc::new(MemoryKv::new()),
        None,
    );
    fanout::start(Arc::clone(&state)).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        parley_gateway::run(server_state, listener).await.unwrap();
    });

    TestServer { addr, state, chats }
}


/// Let durable fan-out from fixture setup (e.g. `chat.created`) drain
/// before clients connect, so tests only observe the events they drive.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(75)).await;
}

async fn connect(server: &TestServer, user_id: &str) -> WsClient {
    let mut request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("x-user-id", user_id.parse().unwrap());
    let (ws, _) = connect_async(request).await.unwrap();
    ws
}

async fn send_event(ws: &mut WsClient, event: &str, data: serde_json::Value) {
    let frame = serde_json::json!({ "event": event, "data": data }).to_string();
    ws.send(tungstenite::Message::Text(frame.into()))
        .await
        .unwrap();
}

/// Next `{event, data}` envelope, skipping control frames.
async fn recv_envelope(ws: &mut WsClient) -> Envelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("socket closed")
            .unwrap();
        if let tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_no_envelope(ws: &mut WsClient, wait: Duration) {
    let frame = tokio::time::timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(frame.is_err(), "unexpected envelope: {frame:?}");
}

#[tokio::test]
async fn duplicate_send_acks_same_message_id() {
    let server = start_server().await;
    let chat = server.chats.create_direct("alice", "bob").await.unwrap();
    settle().await;
    let mut alice = connect(&server, "alice").await;

    let data = serde_json::json!({
        "chat_id": chat.id,
        "type": "text",
        "payload": { "body": "hi" },
        "client_msg_id": "k1",
    });
    send_event(&mut alice, "message.send", data.clone()).await;
    let first = recv_envelope(&mut alice).await;
    assert_eq!(first.event, "message.sent");
    assert_eq!(first.data["client_msg_id"], "k1");
    let message_id = first.data["message_id"].as_str().unwrap().to_string();

    send_event(&mut alice, "message.send", data).await;
    let second = recv_envelope(&mut alice).await;
    assert_eq!(second.event, "message.sent");
    assert_eq!(second.data["message_id"], message_id.as_str());
}

#[tokio::test]
async fn message_fans_out_to_other_participant_only() {
    let server = start_server().await;
    let chat = server.chats.create_direct("alice", "bob").await.unwrap();
    settle().await;

    let mut bob = connect(&server, "bob").await;
    let mut alice = connect(&server, "alice").await;
    // Give bob's user-channel subscription a beat to establish.
    tokio::time::sleep(Duration::from_millis(50)).await;

    send_event(&mut alice, "message.send", serde_json::json!({
        "chat_id": chat.id,
        "type": "text",
        "payload": { "body": "hello bob" },
        "client_msg_id": "k1",
    }))
    .await;

    let ack = recv_envelope(&mut alice).await;
    assert_eq!(ack.event, "message.sent");
    let message_id = ack.data["message_id"].as_str().unwrap().to_string();

    let delivered = recv_envelope(&mut bob).await;
    assert_eq!(delivered.event, "message.new");
    assert_eq!(delivered.data["message_id"], message_id.as_str());
    assert_eq!(delivered.data["payload"]["body"], "hello bob");

    // The author gets the ack and nothing else for their own message.
    assert_no_envelope(&mut alice, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn status_updates_reach_author_monotonically() {
    let server = start_server().await;
    let chat = server.chats.create_direct("alice", "bob").await.unwrap();
    settle().await;

    let mut alice = connect(&server, "alice").await;
    let mut bob = connect(&server, "bob").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    send_event(&mut alice, "message.send", serde_json::json!({
        "chat_id": chat.id,
        "type": "text",
        "payload": { "body": "hi" },
        "client_msg_id": "k1",
    }))
    .await;
    let ack = recv_envelope(&mut alice).await;
    let message_id = ack.data["message_id"].as_str().unwrap().to_string();
    let _new = recv_envelope(&mut bob).await;

    // No chat_id hint: the fast path is skipped, deliveries come from the
    // durable status events alone.
    send_event(&mut bob, "message.delivered", serde_json::json!({ "message_id": message_id }))
        .await;
    let delivered = recv_envelope(&mut alice).await;
    assert_eq!(delivered.event, "message.status");
    assert_eq!(delivered.data["status"], "delivered");
    assert_eq!(delivered.data["user_id"], "bob");

    send_event(&mut bob, "message.read", serde_json::json!({ "message_id": message_id })).await;
    let read = recv_envelope(&mut alice).await;
    assert_eq!(read.event, "message.status");
    assert_eq!(read.data["status"], "read");

    // Regression to delivered is a no-op: nothing more is published.
    send_event(&mut bob, "message.delivered", serde_json::json!({ "message_id": message_id }))
        .await;
    assert_no_envelope(&mut alice, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn presence_subscription_tracks_connect_and_disconnect() {
    let server = start_server().await;
    let mut alice = connect(&server, "alice").await;

    send_event(&mut alice, "presence.subscribe", serde_json::json!({ "user_ids": ["bob"] }))
        .await;
    let echo = recv_envelope(&mut alice).await;
    assert_eq!(echo.event, "presence");
    assert_eq!(echo.data["user_id"], "bob");
    assert_eq!(echo.data["online"], false);

    let bob = connect(&server, "bob").await;
    let online = recv_envelope(&mut alice).await;
    assert_eq!(online.event, "presence");
    assert_eq!(online.data["online"], true);

    drop(bob);
    let offline = recv_envelope(&mut alice).await;
    assert_eq!(offline.event, "presence");
    assert_eq!(offline.data["online"], false);
}

#[tokio::test]
async fn admin_only_group_send_returns_error_envelope() {
    let server = start_server().await;
    let (chat, _) = server
        .chats
        .create_group("alice", CreateGroupRequest {
            name: "announcements".into(),
            description: String::new(),
            member_ids: vec!["bob".into()],
            is_admin_only: true,
        })
        .await
        .unwrap();
    settle().await;

    let mut bob = connect(&server, "bob").await;
    send_event(&mut bob, "message.send", serde_json::json!({
        "chat_id": chat.id,
        "type": "text",
        "payload": { "body": "hi" },
        "client_msg_id": "k1",
    }))
    .await;

    let err = recv_envelope(&mut bob).await;
    assert_eq!(err.event, "error");
    assert_eq!(err.data["code"], "FORBIDDEN");

    // The connection stays open after the error.
    send_event(&mut bob, "ping", serde_json::json!({})).await;
    let pong = recv_envelope(&mut bob).await;
    assert_eq!(pong.event, "pong");
}

#[tokio::test]
async fn typing_reaches_other_participants() {
    let server = start_server().await;
    let chat = server.chats.create_direct("alice", "bob").await.unwrap();
    settle().await;

    let mut bob = connect(&server, "bob").await;
    let mut alice = connect(&server, "alice").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    send_event(&mut alice, "typing.start", serde_json::json!({ "chat_id": chat.id })).await;
    let typing = recv_envelope(&mut bob).await;
    assert_eq!(typing.event, "typing");
    assert_eq!(typing.data["user_id"], "alice");
    assert_eq!(typing.data["typing"], true);
}

#[tokio::test]
async fn call_signalling_relays_opaque_payload() {
    let server = start_server().await;
    let mut bob = connect(&server, "bob").await;
    let mut alice = connect(&server, "alice").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    send_event(&mut alice, "call.offer", serde_json::json!({
        "call_id": "call-1",
        "target_user_id": "bob",
        "payload": { "sdp": "v=0 opaque blob" },
    }))
    .await;

    let offer = recv_envelope(&mut bob).await;
    assert_eq!(offer.event, "call.offer");
    assert_eq!(offer.data["caller_id"], "alice");
    assert_eq!(offer.data["payload"]["sdp"], "v=0 opaque blob");
}

#[tokio::test]
async fn unknown_event_keeps_connection_open() {
    let server = start_server().await;
    let mut alice = connect(&server, "alice").await;

    send_event(&mut alice, "nonsense.event", serde_json::json!({})).await;
    let err = recv_envelope(&mut alice).await;
    assert_eq!(err.event, "error");

    send_event(&mut alice, "ping", serde_json::json!({})).await;
    assert_eq!(recv_envelope(&mut alice).await.event, "pong");
}

#[tokio::test]
async fn unauthenticated_upgrade_is_refused() {
    let server = start_server().await;
    let request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    let err = connect_async(request).await.unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
}

#[tokio::test]
async fn disallowed_origin_is_refused() {
    let server = start_server().await;
    let mut request = format!("ws://{}/ws", server.addr)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("x-user-id", "alice".parse().unwrap());
    request
        .headers_mut()
        .insert("origin", "https://evil.example".parse().unwrap());
    let err = connect_async(request).await.unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 403),
        other => panic!("expected HTTP 403, got {other:?}"),
    }
}

#[tokio::test]
async fn graceful_shutdown_sends_going_away() {
    let server = start_server().await;
    let mut alice = connect(&server, "alice").await;
    send_event(&mut alice, "ping", serde_json::json!({})).await;
    assert_eq!(recv_envelope(&mut alice).await.event, "pong");

    server.state.shutdown.cancel();

    let close = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match alice.next().await {
                Some(Ok(tungstenite::Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    })
    .await
    .expect("no close frame before timeout");

    let frame = close.expect("close frame carried no payload");
    assert_eq!(frame.code, CloseCode::Away);
    assert_eq!(frame.reason.as_str(), "going away");
}
