use std::sync::Arc;

use {
    serde::Deserialize,
    tracing::{error, info, warn},
};

use {
    parley_bus::subjects::subject,
    parley_protocol::{
        Envelope, MessageContent, MessageDeletedOut, MessageKind, MessageNewOut,
        MessageReactionOut, MessageStatusOut,
        events::outbound,
    },
};

use crate::{participants, router::publish_to_user, state::GatewayState};

/// Durable subjects the gateway consumes.
const SUBJECTS: &[&str] = &[
    subject::MSG_NEW,
    subject::MSG_STATUS_UPDATED,
    subject::MSG_DELETED,
    subject::MSG_REACTION,
    subject::CHAT_CREATED,
    subject::CHAT_UPDATED,
    subject::GROUP_MEMBER_ADDED,
    subject::GROUP_MEMBER_REMOVED,
];

/// Start one durable consumer task per subject. Each delivery is handled
/// to completion and acked, or nacked for redelivery on failure; handlers
/// are idempotent because redelivery can occur.
pub async fn start(state: Arc<GatewayState>) -> anyhow::Result<()> {
    for subject in SUBJECTS {
        let durable_name = format!("ws-{}-consumer", subject.replace('.', "-"));
        let mut subscription = state.durable.subscribe(subject, &durable_name).await?;
        info!(subject = %subject, durable = %durable_name, "durable consumer started");

        let state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = state.shutdown.cancelled() => {
                        info!(subject = %subject, "durable consumer stopped");
                        return;
                    },
                    delivery = subscription.next() => {
                        let Some(delivery) = delivery else {
                            warn!(subject = %subject, "durable subscription ended");
                            return;
                        };
                        match handle(&state, &delivery.subject, &delivery.payload).await {
                            Ok(()) => {
                                if let Err(e) = delivery.ack().await {
                                    warn!(subject = %subject, error = %e, "ack failed");
                                }
                            },
                            Err(e) => {
                                error!(subject = %subject, error = %e, "handler failed, nacking for redelivery");
                                if let Err(e) = delivery.nack().await {
                                    warn!(subject = %subject, error = %e, "nack failed");
                                }
                            },
                        }
                    },
                }
            }
        });
    }
    Ok(())
}

async fn handle(state: &Arc<GatewayState>, subject: &str, payload: &[u8]) -> anyhow::Result<()> {
    match subject {
        subject::MSG_NEW => handle_msg_new(state, payload).await,
        subject::MSG_STATUS_UPDATED => handle_status_updated(state, payload).await,
        subject::MSG_DELETED => handle_msg_deleted(state, payload).await,
        subject::MSG_REACTION => handle_msg_reaction(state, payload).await,
        subject::CHAT_CREATED | subject::CHAT_UPDATED | subject::GROUP_MEMBER_ADDED
        | subject::GROUP_MEMBER_REMOVED => handle_chat_event(state, subject, payload).await,
        other => {
            warn!(subject = other, "delivery on unexpected subject");
            Ok(())
        },
    }
}

#[derive(Deserialize)]
struct MsgNewEvent {
    message_id: String,
    chat_id: String,
    sender_id: String,
    #[serde(rename = "type")]
    kind: MessageKind,
    payload: MessageContent,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn handle_msg_new(state: &Arc<GatewayState>, payload: &[u8]) -> anyhow::Result<()> {
    let event: MsgNewEvent = match serde_json::from_slice(payload) {
        Ok(e) => e,
        Err(e) => {
            // Poison event: never parseable, redelivery cannot help.
            error!(error = %e, "unparseable msg.new event, dropping");
            return Ok(());
        },
    };

    let envelope = Envelope::from_payload(outbound::MESSAGE_NEW, &MessageNewOut {
        message_id: event.message_id,
        chat_id: event.chat_id.clone(),
        sender_id: event.sender_id.clone(),
        kind: event.kind,
        payload: event.payload,
        created_at: event.created_at.to_rfc3339(),
    });

    // The author already holds the `message.sent` ack; everyone else gets
    // the push.
    for uid in participants::chat_participants(state, &event.chat_id).await {
        if uid != event.sender_id {
            publish_to_user(state, &uid, &envelope).await;
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct StatusEvent {
    message_id: String,
    chat_id: String,
    user_id: String,
    sender_id: String,
    status: String,
}

async fn handle_status_updated(state: &Arc<GatewayState>, payload: &[u8]) -> anyhow::Result<()> {
    let event: StatusEvent = match serde_json::from_slice(payload) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "unparseable msg.status.updated event, dropping");
            return Ok(());
        },
    };

    let envelope = Envelope::from_payload(outbound::MESSAGE_STATUS, &MessageStatusOut {
        message_id: event.message_id,
        chat_id: event.chat_id,
        user_id: event.user_id,
        status: event.status,
    });
    // Only the author cares about tick updates.
    publish_to_user(state, &event.sender_id, &envelope).await;
    Ok(())
}

#[derive(Deserialize)]
struct DeletedEvent {
    message_id: String,
    chat_id: String,
    user_id: String,
    #[serde(default)]
    for_everyone: bool,
}

async fn handle_msg_deleted(state: &Arc<GatewayState>, payload: &[u8]) -> anyhow::Result<()> {
    let event: DeletedEvent = match serde_json::from_slice(payload) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "unparseable msg.deleted event, dropping");
            return Ok(());
        },
    };

    let envelope = Envelope::from_payload(outbound::MESSAGE_DELETED, &MessageDeletedOut {
        message_id: event.message_id,
        chat_id: event.chat_id.clone(),
        user_id: event.user_id.clone(),
    });

    if event.for_everyone {
        for uid in participants::chat_participants(state, &event.chat_id).await {
            publish_to_user(state, &uid, &envelope).await;
        }
    } else {
        // delete-for-me only concerns the requesting user's devices.
        publish_to_user(state, &event.user_id, &envelope).await;
    }
    Ok(())
}

#[derive(Deserialize)]
struct ReactionEvent {
    message_id: String,
    chat_id: String,
    user_id: String,
    #[serde(default)]
    emoji: String,
    #[serde(default)]
    removed: bool,
}

async fn handle_msg_reaction(state: &Arc<GatewayState>, payload: &[u8]) -> anyhow::Result<()> {
    let event: ReactionEvent = match serde_json::from_slice(payload) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "unparseable msg.reaction event, dropping");
            return Ok(());
        },
    };

    let envelope = Envelope::from_payload(outbound::MESSAGE_REACTION, &MessageReactionOut {
        message_id: event.message_id,
        chat_id: event.chat_id.clone(),
        user_id: event.user_id,
        emoji: event.emoji,
        removed: event.removed,
    });
    for uid in participants::chat_participants(state, &event.chat_id).await {
        publish_to_user(state, &uid, &envelope).await;
    }
    Ok(())
}

async fn handle_chat_event(
    state: &Arc<GatewayState>,
    subject: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    let event: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(e) => e,
        Err(e) => {
            error!(subject, error = %e, "unparseable chat event, dropping");
            return Ok(());
        },
    };

    // Membership mutations must drop the participant cache before any
    // further fan-out resolves it, or a just-removed member keeps
    // receiving events for up to one TTL.
    if subject == subject::GROUP_MEMBER_ADDED || subject == subject::GROUP_MEMBER_REMOVED {
        if let Some(chat_id) = event.get("chat_id").and_then(|v| v.as_str()) {
            participants::invalidate(state, chat_id).await;
        }
    }

    let envelope = Envelope::new(subject, event.clone());

    let mut targets: Vec<String> = event
        .get("participants")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    // A removed member is no longer in the participant list but still needs
    // to learn about the removal.
    if subject == subject::GROUP_MEMBER_REMOVED
        && let Some(user_id) = event.get("user_id").and_then(|v| v.as_str())
        && !targets.iter().any(|t| t == user_id)
    {
        targets.push(user_id.to_string());
    }

    for uid in targets {
        publish_to_user(state, &uid, &envelope).await;
    }
    Ok(())
}
