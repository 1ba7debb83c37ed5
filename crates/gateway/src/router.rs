use std::{sync::Arc, time::Duration};

use {
    bytes::Bytes,
    chrono::Utc,
    serde::de::DeserializeOwned,
    tracing::{debug, error, warn},
};

use {
    parley_bus::subjects::key,
    parley_common::AppError,
    parley_protocol::{
        CallSignalIn, CallSignalOut, DeleteIn, DeliveryState, Envelope, MessageSentAck,
        MessageStatusOut, PongOut, PresenceOut, PresenceSubscribeIn, SendMessageIn, StatusIn,
        TypingIn, TypingOut,
        events::{inbound, outbound},
    },
};

use parley_messages::SendMessageRequest;

use crate::{participants, registry::ClientHandle, state::GatewayState};

/// How long a detached slow-path task may run after the triggering
/// connection has moved on.
const SLOW_PATH_TIMEOUT: Duration = Duration::from_secs(5);

/// Route one inbound envelope. Handler errors become `error` envelopes on
/// the calling connection; the connection always stays open.
pub async fn dispatch(state: &Arc<GatewayState>, client: &Arc<ClientHandle>, envelope: Envelope) {
    let result = match envelope.event.as_str() {
        inbound::MESSAGE_SEND => handle_message_send(state, client, envelope.data).await,
        inbound::MESSAGE_DELIVERED => {
            handle_message_status(state, client, envelope.data, DeliveryState::Delivered).await
        },
        inbound::MESSAGE_READ => {
            handle_message_status(state, client, envelope.data, DeliveryState::Read).await
        },
        inbound::MESSAGE_DELETE => handle_message_delete(state, client, envelope.data).await,
        inbound::TYPING_START => handle_typing(state, client, envelope.data, true).await,
        inbound::TYPING_STOP => handle_typing(state, client, envelope.data, false).await,
        inbound::PRESENCE_SUBSCRIBE => handle_presence_subscribe(state, client, envelope.data).await,
        inbound::CALL_OFFER | inbound::CALL_ANSWER | inbound::CALL_ICE_CANDIDATE
        | inbound::CALL_END => handle_call_signal(state, client, &envelope.event, envelope.data).await,
        inbound::PING => handle_ping(state, client).await,
        other => {
            debug!(event = other, conn_id = %client.conn_id, "unknown event");
            client.send_envelope(&Envelope::error("BAD_REQUEST", format!("unknown event: {other}")));
            Ok(())
        },
    };

    if let Err(err) = result {
        warn!(
            event = %envelope.event,
            conn_id = %client.conn_id,
            user_id = %client.user_id,
            error = %err,
            "event handling failed"
        );
        client.send_envelope(&Envelope::error(err.code.as_str(), err.message));
    }
}

fn decode<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, AppError> {
    serde_json::from_value(data).map_err(|e| AppError::bad_request(format!("invalid payload: {e}")))
}

/// Publish an outbound envelope on a user's ephemeral channel. Best-effort:
/// failures are logged and do not fail the triggering event.
pub async fn publish_to_user(state: &GatewayState, user_id: &str, envelope: &Envelope) {
    let payload = Bytes::from(envelope.to_json());
    if let Err(e) = state
        .ephemeral
        .publish(&key::user_channel(user_id), payload)
        .await
    {
        warn!(user_id, event = %envelope.event, error = %e, "ephemeral publish failed");
    }
}

async fn handle_message_send(
    state: &Arc<GatewayState>,
    client: &Arc<ClientHandle>,
    data: serde_json::Value,
) -> Result<(), AppError> {
    let p: SendMessageIn = decode(data)?;
    let client_msg_id = p.client_msg_id.clone();

    let msg = state
        .services
        .messages
        .send_message(&client.user_id, SendMessageRequest {
            chat_id: p.chat_id,
            kind: p.kind,
            payload: p.payload,
            client_msg_id: Some(p.client_msg_id),
            reply_to_message_id: p.reply_to_message_id,
            forwarded_from: None,
        })
        .await?;

    // Ack goes to the sending connection only; other devices learn from
    // the durable fan-out.
    client.send_envelope(&Envelope::from_payload(outbound::MESSAGE_SENT, &MessageSentAck {
        client_msg_id,
        message_id: msg.message_id,
        created_at: msg.created_at.to_rfc3339(),
    }));
    Ok(())
}

async fn handle_message_status(
    state: &Arc<GatewayState>,
    client: &Arc<ClientHandle>,
    data: serde_json::Value,
    status: DeliveryState,
) -> Result<(), AppError> {
    let p: StatusIn = decode(data)?;

    // Fast path: push the tick straight to the author (or the whole chat
    // when no routing hint is given) before persistence, so the sender sees
    // it without waiting on the store round-trip.
    if let Some(ref chat_id) = p.chat_id {
        let envelope = Envelope::from_payload(outbound::MESSAGE_STATUS, &MessageStatusOut {
            message_id: p.message_id.clone(),
            chat_id: chat_id.clone(),
            user_id: client.user_id.clone(),
            status: status.as_str().to_string(),
        });
        match p.sender_id {
            Some(ref author) if author != &client.user_id => {
                publish_to_user(state, author, &envelope).await;
            },
            Some(_) => {},
            None => {
                for uid in participants::chat_participants(state, chat_id).await {
                    if uid != client.user_id {
                        publish_to_user(state, &uid, &envelope).await;
                    }
                }
            },
        }
    }

    // Slow path: persist in the background on a detached, bounded task.
    // The store enforces monotonicity and only real transitions publish.
    let services = state.services.clone();
    let message_id = p.message_id;
    let user_id = client.user_id.clone();
    tokio::spawn(async move {
        let persist = services.messages.update_status(&message_id, &user_id, status);
        match tokio::time::timeout(SLOW_PATH_TIMEOUT, persist).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => {
                error!(message_id = %message_id, status = status.as_str(), error = %e, "async status persist failed");
            },
            Err(_) => {
                error!(message_id = %message_id, status = status.as_str(), "async status persist timed out");
            },
        }
    });

    Ok(())
}

async fn handle_message_delete(
    state: &Arc<GatewayState>,
    client: &Arc<ClientHandle>,
    data: serde_json::Value,
) -> Result<(), AppError> {
    let p: DeleteIn = decode(data)?;
    // Deletion authority lives in the message service: it rejects
    // delete-for-everyone by anyone but the sender, then publishes
    // `msg.deleted` on the durable bus for fan-out.
    state
        .services
        .messages
        .delete_message(&p.message_id, &client.user_id, p.for_everyone)
        .await
}

async fn handle_typing(
    state: &Arc<GatewayState>,
    client: &Arc<ClientHandle>,
    data: serde_json::Value,
    typing: bool,
) -> Result<(), AppError> {
    let p: TypingIn = decode(data)?;

    let marker = if typing {
        state.presence.typing_started(&p.chat_id, &client.user_id).await
    } else {
        state.presence.typing_stopped(&p.chat_id, &client.user_id).await
    };
    if let Err(e) = marker {
        warn!(chat_id = %p.chat_id, error = %e, "typing marker update failed");
    }

    let envelope = Envelope::from_payload(outbound::TYPING, &TypingOut {
        chat_id: p.chat_id.clone(),
        user_id: client.user_id.clone(),
        typing,
    });
    for uid in participants::chat_participants(state, &p.chat_id).await {
        if uid != client.user_id {
            publish_to_user(state, &uid, &envelope).await;
        }
    }
    Ok(())
}

async fn handle_presence_subscribe(
    state: &Arc<GatewayState>,
    client: &Arc<ClientHandle>,
    data: serde_json::Value,
) -> Result<(), AppError> {
    let p: PresenceSubscribeIn = decode(data)?;
    state.tracker.subscribe(&client.user_id, &p.user_ids);

    // Answer immediately with best-effort current state: the local registry
    // plus the fleet-wide presence key.
    for uid in &p.user_ids {
        let online = state.registry.is_connected(uid)
            || state.presence.is_online(uid).await.unwrap_or(false);
        let last_seen = if online {
            None
        } else {
            state.presence.last_seen(uid).await.unwrap_or(None)
        };
        client.send_envelope(&Envelope::from_payload(outbound::PRESENCE, &PresenceOut {
            user_id: uid.clone(),
            online,
            last_seen,
        }));
    }
    Ok(())
}

async fn handle_call_signal(
    state: &Arc<GatewayState>,
    client: &Arc<ClientHandle>,
    event: &str,
    data: serde_json::Value,
) -> Result<(), AppError> {
    let p: CallSignalIn = decode(data)?;
    // Pure signalling relay: SDP and ICE are opaque to the server.
    let envelope = Envelope::from_payload(event, &CallSignalOut {
        call_id: p.call_id,
        caller_id: client.user_id.clone(),
        payload: p.payload,
    });
    publish_to_user(state, &p.target_user_id, &envelope).await;
    Ok(())
}

async fn handle_ping(
    state: &Arc<GatewayState>,
    client: &Arc<ClientHandle>,
) -> Result<(), AppError> {
    if let Err(e) = state.presence.mark_online(&client.user_id).await {
        warn!(user_id = %client.user_id, error = %e, "presence refresh failed");
    }
    client.send_envelope(&Envelope::from_payload(outbound::PONG, &PongOut {
        timestamp: Utc::now().timestamp_millis(),
    }));
    Ok(())
}

/// Push a presence change to local subscribers of the user.
pub fn notify_presence_change(state: &GatewayState, user_id: &str, online: bool) {
    let subscribers = state.tracker.subscribers_of(user_id);
    if subscribers.is_empty() {
        return;
    }
    let envelope = Envelope::from_payload(outbound::PRESENCE, &PresenceOut {
        user_id: user_id.to_string(),
        online,
        last_seen: None,
    });
    for subscriber in subscribers {
        state.registry.send_to_user(&subscriber, &envelope);
    }
}
