use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    axum::{
        extract::{
            Query, State, WebSocketUpgrade,
            ws::{CloseFrame, Message, WebSocket, close_code},
        },
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
    },
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use parley_protocol::Envelope;

use crate::{
    auth::{self, Identity},
    registry::{ClientHandle, OutboundFrame},
    router, subscriber,
    state::GatewayState,
};

/// WebSocket upgrade endpoint.
///
/// Identity comes from trusted upstream headers or a bearer/query token;
/// failure refuses with 401 before upgrading. The Origin header is checked
/// against the configured allow-list.
pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !auth::origin_allowed(&state, &headers) {
        warn!("ws: origin refused");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let identity = match auth::authenticate(&state, &headers, params.get("token").map(String::as_str)).await
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "ws: upgrade auth failed");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        },
    };

    ws.max_message_size(state.socket.max_frame_bytes)
        .on_upgrade(move |socket| handle_connection(socket, state, identity))
}

/// Drive one connection through its full lifecycle: register, start the
/// write pump and the user-channel subscriber, run the read loop, clean up.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, identity: Identity) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, user_id = %identity.user_id, "ws: client connected");

    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel::<OutboundFrame>(state.socket.send_queue_len);

    let client = Arc::new(ClientHandle::new(
        conn_id.clone(),
        identity.user_id.clone(),
        identity.phone,
        tx,
    ));

    state.registry.register(Arc::clone(&client));
    if let Err(e) = state.presence.mark_online(&client.user_id).await {
        warn!(user_id = %client.user_id, error = %e, "presence write failed on connect");
    }
    router::notify_presence_change(&state, &client.user_id, true);

    let subscriber_task = subscriber::start(&state, &client).await;

    let write_task = tokio::spawn(write_pump(
        ws_tx,
        rx,
        Duration::from_secs(state.socket.ping_interval_secs),
        Duration::from_secs(state.socket.write_timeout_secs),
        conn_id.clone(),
    ));

    // ── Read pump ────────────────────────────────────────────────────────
    // One inbound event at a time; any received frame (pong included)
    // resets the read deadline.

    let pong_timeout = Duration::from_secs(state.socket.pong_timeout_secs);
    loop {
        let next = tokio::select! {
            next = tokio::time::timeout(pong_timeout, ws_rx.next()) => next,
            _ = state.shutdown.cancelled() => {
                // The write pump emits the "going away" close; stop reading
                // so drain does not depend on the client responding.
                client.send_close("going away");
                break;
            },
        };
        let msg = match next {
            Err(_) => {
                info!(conn_id = %conn_id, "ws: read deadline exceeded");
                break;
            },
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(conn_id = %conn_id, error = %e, "ws: read error");
                break;
            },
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                if text.len() > state.socket.max_frame_bytes {
                    warn!(conn_id = %conn_id, size = text.len(), "ws: frame too large");
                    client.send_envelope(&Envelope::error("BAD_REQUEST", "frame too large"));
                    continue;
                }
                let envelope: Envelope = match serde_json::from_str(text.as_str()) {
                    Ok(env) => env,
                    Err(e) => {
                        debug!(conn_id = %conn_id, error = %e, "ws: invalid envelope");
                        client.send_envelope(&Envelope::error("BAD_REQUEST", "invalid event format"));
                        continue;
                    },
                };
                // Every inbound event is a liveness signal.
                if let Err(e) = state.presence.mark_online(&client.user_id).await {
                    warn!(user_id = %client.user_id, error = %e, "presence refresh failed");
                }
                router::dispatch(&state, &client, envelope).await;
            },
            Message::Pong(_) => {
                if let Err(e) = state.presence.mark_online(&client.user_id).await {
                    warn!(user_id = %client.user_id, error = %e, "presence refresh failed");
                }
            },
            Message::Binary(_) => {
                client.send_envelope(&Envelope::error("BAD_REQUEST", "binary frames are not supported"));
            },
            Message::Ping(_) => {
                // The socket layer answers pings itself.
            },
            Message::Close(_) => break,
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    if let Some(task) = subscriber_task {
        task.abort();
    }
    state.registry.unregister(&client.user_id, &conn_id);

    if !state.registry.is_connected(&client.user_id) {
        // Last local connection: clear the online key and record last_seen.
        // Another instance may still hold a socket, in which case its TTL
        // refresh keeps the user online fleet-wide.
        if let Err(e) = state.presence.mark_offline(&client.user_id).await {
            warn!(user_id = %client.user_id, error = %e, "presence clear failed on disconnect");
        }
        router::notify_presence_change(&state, &client.user_id, false);
        state.tracker.remove_subscriber(&client.user_id);
    }

    let user_id = client.user_id.clone();
    let duration = client.joined_at.elapsed();
    // Release the last sender so the write pump can flush queued frames
    // (including a shutdown close) and exit on the closed channel; no send
    // may be left half-written.
    drop(client);
    let mut write_task = write_task;
    if tokio::time::timeout(Duration::from_secs(5), &mut write_task)
        .await
        .is_err()
    {
        write_task.abort();
    }

    info!(
        conn_id = %conn_id,
        user_id = %user_id,
        duration_secs = duration.as_secs(),
        "ws: client disconnected"
    );
}

/// Sole writer for the socket: drains the send queue, pings on an interval,
/// closes on any write failure.
async fn write_pump(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundFrame>,
    ping_interval: Duration,
    write_timeout: Duration,
    conn_id: String,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(OutboundFrame::Envelope(json)) => {
                    let write = ws_tx.send(Message::Text(json.into()));
                    match tokio::time::timeout(write_timeout, write).await {
                        Ok(Ok(())) => {},
                        Ok(Err(e)) => {
                            debug!(conn_id = %conn_id, error = %e, "ws: write failed");
                            return;
                        },
                        Err(_) => {
                            warn!(conn_id = %conn_id, "ws: write deadline exceeded");
                            return;
                        },
                    }
                },
                Some(OutboundFrame::Close { reason }) => {
                    let frame = Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: reason.into(),
                    }));
                    let _ = tokio::time::timeout(write_timeout, ws_tx.send(frame)).await;
                    return;
                },
                None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                },
            },
            _ = ticker.tick() => {
                let write = ws_tx.send(Message::Ping(Vec::new().into()));
                match tokio::time::timeout(write_timeout, write).await {
                    Ok(Ok(())) => {},
                    _ => {
                        debug!(conn_id = %conn_id, "ws: ping write failed");
                        return;
                    },
                }
            },
        }
    }
}
