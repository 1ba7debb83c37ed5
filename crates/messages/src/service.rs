use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    chrono::Utc,
    tracing::{info, warn},
};

use parley_bus::DurableBus;
use parley_chats::ChatService;
use parley_common::{AppError, ErrorCode, Result};
use parley_protocol::{DeliveryState, MessageContent, MessageKind};

use crate::{
    model::{
        DEFAULT_PAGE_SIZE, ListMessagesQuery, MAX_EMOJI_BYTES, MAX_PAGE_SIZE, Message, Receipt,
        REPLY_PREVIEW_CHARS, ReplyPreview, SendMessageRequest,
    },
    publisher::EventPublisher,
    store::{MessageStore, StatusUpdate},
};

/// The message service contract consumed by the gateway.
#[async_trait]
pub trait MessageService: Send + Sync {
    /// Validate, persist (idempotent on `client_msg_id`), publish `msg.new`.
    /// A dedupe hit returns the pre-existing message.
    async fn send_message(&self, sender_id: &str, req: SendMessageRequest) -> Result<Message>;

    /// Monotonic per-recipient status update. Same-or-lower transitions are
    /// accepted as no-ops; only real transitions publish an event.
    async fn update_status(
        &self,
        message_id: &str,
        user_id: &str,
        status: DeliveryState,
    ) -> Result<()>;

    async fn delete_message(&self, message_id: &str, caller: &str, for_everyone: bool)
    -> Result<()>;
    async fn forward_message(
        &self,
        sender_id: &str,
        target_chat_id: &str,
        source_message_id: &str,
    ) -> Result<Message>;

    async fn set_starred(&self, message_id: &str, user_id: &str, starred: bool) -> Result<()>;
    async fn react(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<()>;
    async fn unreact(&self, message_id: &str, user_id: &str) -> Result<()>;

    async fn get_message(&self, message_id: &str) -> Result<Message>;
    /// Returns the page plus the `(cursor, cursor_id)` pair for the next one.
    async fn list_messages(
        &self,
        viewer: &str,
        query: ListMessagesQuery,
    ) -> Result<(Vec<Message>, Option<(String, String)>)>;
    async fn search(&self, chat_ids: &[String], query: &str, limit: i64) -> Result<Vec<Message>>;
    async fn last_per_chat(&self, chat_ids: &[String]) -> Result<HashMap<String, Message>>;
    async fn count_unread(
        &self,
        user_id: &str,
        chat_ids: &[String],
    ) -> Result<HashMap<String, i64>>;
    /// Per-recipient receipts; only the author may read them.
    async fn receipts(&self, message_id: &str, caller: &str) -> Result<Vec<Receipt>>;
}

pub struct LocalMessageService {
    store: Arc<dyn MessageStore>,
    chats: Arc<dyn ChatService>,
    events: EventPublisher,
}

impl LocalMessageService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        chats: Arc<dyn ChatService>,
        bus: Arc<dyn DurableBus>,
    ) -> Self {
        Self {
            store,
            chats,
            events: EventPublisher::new(bus),
        }
    }

    async fn require_message(&self, message_id: &str) -> Result<Message> {
        self.store
            .get(message_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| AppError::not_found("message not found"))
    }

    async fn attach_reply_previews(&self, messages: &mut [Message]) -> Result<()> {
        for msg in messages.iter_mut() {
            let Some(ref reply_id) = msg.reply_to_message_id else {
                continue;
            };
            let Some(original) = self.store.get(reply_id).await.map_err(storage)? else {
                continue;
            };
            let mut body = original.payload.body.clone().unwrap_or_default();
            if body.chars().count() > REPLY_PREVIEW_CHARS {
                body = body.chars().take(REPLY_PREVIEW_CHARS - 3).collect::<String>() + "...";
            }
            msg.reply_to_preview = Some(ReplyPreview {
                message_id: original.message_id,
                sender_id: original.sender_id,
                kind: original.kind,
                body,
            });
        }
        Ok(())
    }
}

fn storage(e: anyhow::Error) -> AppError {
    AppError {
        code: ErrorCode::Internal,
        message: "message store failure".into(),
        source: Some(e.into()),
    }
}

fn validate_payload(kind: MessageKind, payload: &MessageContent) -> Result<()> {
    match kind {
        MessageKind::Text => {
            if payload.body.as_deref().is_none_or(str::is_empty) {
                return Err(AppError::bad_request("text message requires a non-empty body"));
            }
        },
        MessageKind::Image | MessageKind::Video | MessageKind::Audio | MessageKind::Document => {
            if payload.media_id.as_deref().is_none_or(str::is_empty) {
                return Err(AppError::bad_request(format!(
                    "{} message requires media_id",
                    kind.as_str()
                )));
            }
        },
        MessageKind::Location => {
            if payload.body.as_deref().is_none_or(str::is_empty) {
                return Err(AppError::bad_request(
                    "location message requires body with coordinates",
                ));
            }
        },
    }
    Ok(())
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(l) if l > 0 && l <= MAX_PAGE_SIZE => l,
        Some(l) if l > MAX_PAGE_SIZE => MAX_PAGE_SIZE,
        _ => DEFAULT_PAGE_SIZE,
    }
}

#[async_trait]
impl MessageService for LocalMessageService {
    async fn send_message(&self, sender_id: &str, req: SendMessageRequest) -> Result<Message> {
        // Membership/admin-only enforcement. A failing permission backend
        // allows the send: availability wins over strictness here.
        match self.chats.check_permission(&req.chat_id, sender_id).await {
            Ok(perm) => {
                if !perm.is_member {
                    return Err(AppError::new(
                        ErrorCode::NotChatMember,
                        "not a member of this chat",
                    ));
                }
                if perm.is_admin_only && !perm.is_admin {
                    return Err(AppError::new(
                        ErrorCode::Forbidden,
                        "only admins can send messages in this chat",
                    ));
                }
            },
            Err(e) => {
                warn!(chat_id = %req.chat_id, error = %e, "permission check failed, allowing message");
            },
        }

        validate_payload(req.kind, &req.payload)?;

        let now = Utc::now();
        let msg = Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            chat_id: req.chat_id,
            sender_id: sender_id.to_string(),
            client_msg_id: req.client_msg_id,
            kind: req.kind,
            payload: req.payload,
            reply_to_message_id: req.reply_to_message_id,
            reply_to_preview: None,
            forwarded_from: req.forwarded_from,
            status: HashMap::new(),
            reactions: Vec::new(),
            is_deleted: false,
            is_starred_by: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let (persisted, inserted) = self.store.insert(&msg).await.map_err(storage)?;
        if inserted {
            info!(message_id = %persisted.message_id, chat_id = %persisted.chat_id, "message persisted");
            self.events.new_message(&persisted).await;
        }
        Ok(persisted)
    }

    async fn update_status(
        &self,
        message_id: &str,
        user_id: &str,
        status: DeliveryState,
    ) -> Result<()> {
        if status == DeliveryState::Sent {
            return Err(AppError::bad_request(
                "status must be 'delivered' or 'read'",
            ));
        }

        match self
            .store
            .update_status(message_id, user_id, status)
            .await
            .map_err(storage)?
        {
            StatusUpdate::NotFound => Err(AppError::not_found("message not found")),
            StatusUpdate::NoOp => Ok(()),
            StatusUpdate::Transitioned => {
                let msg = self.require_message(message_id).await?;
                self.events
                    .status_updated(
                        message_id,
                        &msg.chat_id,
                        user_id,
                        &msg.sender_id,
                        status.as_str(),
                    )
                    .await;
                Ok(())
            },
        }
    }

    async fn delete_message(
        &self,
        message_id: &str,
        caller: &str,
        for_everyone: bool,
    ) -> Result<()> {
        let msg = self.require_message(message_id).await?;

        if for_everyone {
            if msg.sender_id != caller {
                return Err(AppError::forbidden(
                    "only the sender can delete a message for everyone",
                ));
            }
            if !self
                .store
                .soft_delete(message_id, caller)
                .await
                .map_err(storage)?
            {
                return Err(AppError::not_found("message not found"));
            }
        } else {
            self.store
                .hide_for_user(message_id, caller)
                .await
                .map_err(storage)?;
        }

        self.events
            .deleted(message_id, &msg.chat_id, caller, for_everyone)
            .await;
        Ok(())
    }

    async fn forward_message(
        &self,
        sender_id: &str,
        target_chat_id: &str,
        source_message_id: &str,
    ) -> Result<Message> {
        let original = self.require_message(source_message_id).await?;
        if original.is_deleted {
            return Err(AppError::not_found("source message was deleted"));
        }

        self.send_message(sender_id, SendMessageRequest {
            chat_id: target_chat_id.to_string(),
            kind: original.kind,
            payload: original.payload.clone(),
            // Server-generated key: every forward is a distinct message.
            client_msg_id: Some(uuid::Uuid::new_v4().to_string()),
            reply_to_message_id: None,
            forwarded_from: Some(crate::model::ForwardedFrom {
                chat_id: original.chat_id,
                message_id: original.message_id,
            }),
        })
        .await
    }

    async fn set_starred(&self, message_id: &str, user_id: &str, starred: bool) -> Result<()> {
        self.require_message(message_id).await?;
        self.store
            .set_starred(message_id, user_id, starred)
            .await
            .map_err(storage)
    }

    async fn react(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<()> {
        if emoji.is_empty() {
            return Err(AppError::bad_request("emoji is required"));
        }
        if emoji.len() > MAX_EMOJI_BYTES {
            return Err(AppError::bad_request("invalid emoji: too long"));
        }
        let msg = self.require_message(message_id).await?;
        self.store
            .upsert_reaction(message_id, user_id, emoji)
            .await
            .map_err(storage)?;
        self.events
            .reaction(message_id, &msg.chat_id, user_id, emoji, false)
            .await;
        Ok(())
    }

    async fn unreact(&self, message_id: &str, user_id: &str) -> Result<()> {
        let msg = self.require_message(message_id).await?;
        self.store
            .remove_reaction(message_id, user_id)
            .await
            .map_err(storage)?;
        self.events
            .reaction(message_id, &msg.chat_id, user_id, "", true)
            .await;
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Message> {
        self.require_message(message_id).await
    }

    async fn list_messages(
        &self,
        viewer: &str,
        query: ListMessagesQuery,
    ) -> Result<(Vec<Message>, Option<(String, String)>)> {
        let limit = clamp_limit(query.limit);

        // Validate the cursor is a real RFC 3339 timestamp before it hits
        // the store as an opaque string.
        if let Some(ref cursor) = query.cursor
            && chrono::DateTime::parse_from_rfc3339(cursor).is_err()
        {
            return Err(AppError::bad_request("invalid cursor format, expected RFC3339"));
        }
        let cursor = match (&query.cursor, &query.cursor_id) {
            (Some(ts), Some(id)) => Some((ts.as_str(), id.as_str())),
            (Some(ts), None) => Some((ts.as_str(), "")),
            _ => None,
        };

        let mut messages = self
            .store
            .list_by_chat(&query.chat_id, viewer, cursor, limit, query.starred)
            .await
            .map_err(storage)?;
        self.attach_reply_previews(&mut messages).await?;

        let next = (messages.len() as i64 == limit)
            .then(|| messages.last())
            .flatten()
            .map(|last| {
                (
                    last.created_at
                        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
                    last.message_id.clone(),
                )
            });
        Ok((messages, next))
    }

    async fn search(&self, chat_ids: &[String], query: &str, limit: i64) -> Result<Vec<Message>> {
        if query.trim().is_empty() {
            return Err(AppError::bad_request("search query is required"));
        }
        self.store
            .search(chat_ids, query, clamp_limit(Some(limit)))
            .await
            .map_err(storage)
    }

    async fn last_per_chat(&self, chat_ids: &[String]) -> Result<HashMap<String, Message>> {
        self.store.last_per_chat(chat_ids).await.map_err(storage)
    }

    async fn count_unread(
        &self,
        user_id: &str,
        chat_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        self.store
            .count_unread(user_id, chat_ids)
            .await
            .map_err(storage)
    }

    async fn receipts(&self, message_id: &str, caller: &str) -> Result<Vec<Receipt>> {
        let msg = self.require_message(message_id).await?;
        if msg.sender_id != caller {
            return Err(AppError::forbidden("only the sender can read receipts"));
        }
        self.store.receipts(message_id).await.map_err(storage)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::SqliteMessageStore;
    use parley_bus::{DurableBus, MemoryDurableBus, subjects::subject};
    use parley_chats::{CreateGroupRequest, LocalChatService, SqliteChatStore};

    struct Harness {
        svc: LocalMessageService,
        chats: Arc<dyn ChatService>,
        bus: Arc<MemoryDurableBus>,
    }

    async fn harness() -> Harness {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteChatStore::init(&pool).await.unwrap();
        SqliteMessageStore::init(&pool).await.unwrap();

        let bus = Arc::new(MemoryDurableBus::new());
        let chats: Arc<dyn ChatService> = Arc::new(LocalChatService::new(
            Arc::new(SqliteChatStore::new(pool.clone())),
            bus.clone() as Arc<dyn DurableBus>,
        ));
        let svc = LocalMessageService::new(
            Arc::new(SqliteMessageStore::new(pool)),
            chats.clone(),
            bus.clone() as Arc<dyn DurableBus>,
        );
        Harness { svc, chats, bus }
    }

    fn text_req(chat_id: &str, body: &str, client_msg_id: &str) -> SendMessageRequest {
        SendMessageRequest {
            chat_id: chat_id.into(),
            kind: MessageKind::Text,
            payload: MessageContent::text(body),
            client_msg_id: Some(client_msg_id.into()),
            reply_to_message_id: None,
            forwarded_from: None,
        }
    }

    #[tokio::test]
    async fn duplicate_send_returns_same_message_id() {
        let h = harness().await;
        let chat = h.chats.create_direct("alice", "bob").await.unwrap();

        let first = h
            .svc
            .send_message("alice", text_req(&chat.id, "hi", "k1"))
            .await
            .unwrap();
        let second = h
            .svc
            .send_message("alice", text_req(&chat.id, "hi", "k1"))
            .await
            .unwrap();
        assert_eq!(first.message_id, second.message_id);

        let (listed, _) = h
            .svc
            .list_messages("bob", ListMessagesQuery {
                chat_id: chat.id.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_send_publishes_one_event() {
        let h = harness().await;
        let chat = h.chats.create_direct("alice", "bob").await.unwrap();
        let mut sub = h.bus.subscribe(subject::MSG_NEW, "t-dedupe").await.unwrap();

        h.svc
            .send_message("alice", text_req(&chat.id, "hi", "k1"))
            .await
            .unwrap();
        h.svc
            .send_message("alice", text_req(&chat.id, "hi", "k1"))
            .await
            .unwrap();
        h.svc
            .send_message("alice", text_req(&chat.id, "next", "k2"))
            .await
            .unwrap();

        let first: serde_json::Value =
            serde_json::from_slice(&sub.next().await.unwrap().payload).unwrap();
        let second: serde_json::Value =
            serde_json::from_slice(&sub.next().await.unwrap().payload).unwrap();
        // Exactly two events: one per unique dedupe key.
        assert_eq!(first["payload"]["body"], "hi");
        assert_eq!(second["payload"]["body"], "next");
    }

    #[tokio::test]
    async fn non_member_send_is_rejected() {
        let h = harness().await;
        let chat = h.chats.create_direct("alice", "bob").await.unwrap();
        let err = h
            .svc
            .send_message("eve", text_req(&chat.id, "hi", "k1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotChatMember);
    }

    #[tokio::test]
    async fn admin_only_group_rejects_member_send() {
        let h = harness().await;
        let (chat, _) = h
            .chats
            .create_group("alice", CreateGroupRequest {
                name: "announcements".into(),
                description: String::new(),
                member_ids: vec!["bob".into()],
                is_admin_only: true,
            })
            .await
            .unwrap();

        let err = h
            .svc
            .send_message("bob", text_req(&chat.id, "hi", "k1"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);

        // The admin can post.
        assert!(h.svc.send_message("alice", text_req(&chat.id, "hi", "k2")).await.is_ok());
    }

    #[tokio::test]
    async fn status_noop_publishes_nothing() {
        let h = harness().await;
        let chat = h.chats.create_direct("alice", "bob").await.unwrap();
        let msg = h
            .svc
            .send_message("alice", text_req(&chat.id, "hi", "k1"))
            .await
            .unwrap();

        let mut sub = h
            .bus
            .subscribe(subject::MSG_STATUS_UPDATED, "t-status")
            .await
            .unwrap();

        h.svc
            .update_status(&msg.message_id, "bob", DeliveryState::Delivered)
            .await
            .unwrap();
        h.svc
            .update_status(&msg.message_id, "bob", DeliveryState::Read)
            .await
            .unwrap();
        // Repeat: monotonic no-op, no third event.
        h.svc
            .update_status(&msg.message_id, "bob", DeliveryState::Delivered)
            .await
            .unwrap();

        let first: serde_json::Value =
            serde_json::from_slice(&sub.next().await.unwrap().payload).unwrap();
        assert_eq!(first["status"], "delivered");
        assert_eq!(first["sender_id"], "alice");
        let second: serde_json::Value =
            serde_json::from_slice(&sub.next().await.unwrap().payload).unwrap();
        assert_eq!(second["status"], "read");

        let timeout =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub.next()).await;
        assert!(timeout.is_err(), "no event for the no-op transition");
    }

    #[tokio::test]
    async fn delete_for_everyone_is_sender_only() {
        let h = harness().await;
        let chat = h.chats.create_direct("alice", "bob").await.unwrap();
        let msg = h
            .svc
            .send_message("alice", text_req(&chat.id, "hi", "k1"))
            .await
            .unwrap();

        let err = h
            .svc
            .delete_message(&msg.message_id, "bob", true)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);

        h.svc
            .delete_message(&msg.message_id, "alice", true)
            .await
            .unwrap();
        let deleted = h.svc.get_message(&msg.message_id).await.unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.payload.is_empty());
    }

    #[tokio::test]
    async fn forward_keeps_provenance() {
        let h = harness().await;
        let chat_a = h.chats.create_direct("alice", "bob").await.unwrap();
        let chat_b = h.chats.create_direct("alice", "carol").await.unwrap();
        let msg = h
            .svc
            .send_message("alice", text_req(&chat_a.id, "original", "k1"))
            .await
            .unwrap();

        let forwarded = h
            .svc
            .forward_message("alice", &chat_b.id, &msg.message_id)
            .await
            .unwrap();
        assert_ne!(forwarded.message_id, msg.message_id);
        let from = forwarded.forwarded_from.unwrap();
        assert_eq!(from.message_id, msg.message_id);
        assert_eq!(from.chat_id, chat_a.id);
        assert_eq!(forwarded.payload.body.as_deref(), Some("original"));
    }

    #[tokio::test]
    async fn receipts_are_sender_only() {
        let h = harness().await;
        let chat = h.chats.create_direct("alice", "bob").await.unwrap();
        let msg = h
            .svc
            .send_message("alice", text_req(&chat.id, "hi", "k1"))
            .await
            .unwrap();
        h.svc
            .update_status(&msg.message_id, "bob", DeliveryState::Read)
            .await
            .unwrap();

        let err = h.svc.receipts(&msg.message_id, "bob").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);

        let receipts = h.svc.receipts(&msg.message_id, "alice").await.unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].status, DeliveryState::Read);
    }

    #[tokio::test]
    async fn media_payload_validation() {
        let h = harness().await;
        let chat = h.chats.create_direct("alice", "bob").await.unwrap();
        let err = h
            .svc
            .send_message("alice", SendMessageRequest {
                chat_id: chat.id.clone(),
                kind: MessageKind::Image,
                payload: MessageContent::default(),
                client_msg_id: Some("k1".into()),
                reply_to_message_id: None,
                forwarded_from: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }
}
