use std::{collections::HashSet, sync::Arc};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    tracing::info,
};

use parley_bus::DurableBus;
use parley_common::{AppError, ErrorCode, Result};

use crate::{
    events::ChatEventPublisher,
    model::{
        AUTO_DELETE_TIMERS, Chat, ChatListItem, ChatPermission, ChatType, CreateGroupRequest,
        GroupInfo, Participant, Role, UpdateGroupRequest,
    },
    store::ChatStore,
};

/// Chat domain operations consumed by the gateway and the message service.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Membership/role summary for the message send path.
    async fn check_permission(&self, chat_id: &str, user_id: &str) -> Result<ChatPermission>;
    async fn participant_user_ids(&self, chat_id: &str) -> Result<Vec<String>>;
    async fn user_chat_ids(&self, user_id: &str) -> Result<Vec<String>>;

    async fn create_direct(&self, caller: &str, peer: &str) -> Result<Chat>;
    async fn create_group(&self, caller: &str, req: CreateGroupRequest)
    -> Result<(Chat, GroupInfo)>;
    async fn list_chats(&self, user_id: &str) -> Result<Vec<ChatListItem>>;
    async fn get_chat(&self, caller: &str, chat_id: &str) -> Result<ChatListItem>;

    async fn add_member(&self, caller: &str, chat_id: &str, target: &str) -> Result<()>;
    async fn remove_member(&self, caller: &str, chat_id: &str, target: &str) -> Result<()>;
    async fn promote_member(&self, caller: &str, chat_id: &str, target: &str) -> Result<()>;
    async fn demote_member(&self, caller: &str, chat_id: &str, target: &str) -> Result<()>;
    async fn update_group(&self, caller: &str, chat_id: &str, req: UpdateGroupRequest)
    -> Result<()>;

    async fn set_mute(
        &self,
        user_id: &str,
        chat_id: &str,
        mute: bool,
        mute_until: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn set_pin(&self, user_id: &str, chat_id: &str, pin: bool) -> Result<()>;
    async fn set_disappearing(
        &self,
        user_id: &str,
        chat_id: &str,
        timer_secs: Option<i64>,
    ) -> Result<()>;
}

pub struct LocalChatService {
    store: Arc<dyn ChatStore>,
    events: ChatEventPublisher,
}

impl LocalChatService {
    pub fn new(store: Arc<dyn ChatStore>, bus: Arc<dyn DurableBus>) -> Self {
        Self {
            store,
            events: ChatEventPublisher::new(bus),
        }
    }

    async fn require_member(&self, chat_id: &str, user_id: &str) -> Result<Participant> {
        self.store
            .participant(chat_id, user_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| AppError::new(ErrorCode::NotChatMember, "not a member of this chat"))
    }

    async fn require_admin(&self, chat_id: &str, user_id: &str) -> Result<Participant> {
        let p = self.require_member(chat_id, user_id).await?;
        if p.role != Role::Admin {
            return Err(AppError::new(
                ErrorCode::NotAdmin,
                "only admins can perform this action",
            ));
        }
        Ok(p)
    }

    async fn require_group(&self, chat_id: &str) -> Result<Chat> {
        let chat = self
            .store
            .get(chat_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| AppError::new(ErrorCode::ChatNotFound, "chat not found"))?;
        if chat.chat_type != ChatType::Group {
            return Err(AppError::bad_request("not a group chat"));
        }
        Ok(chat)
    }

    async fn list_item(&self, chat: Chat, participant: Participant) -> Result<ChatListItem> {
        let group = match chat.chat_type {
            ChatType::Group => self.store.get_group(&chat.id).await.map_err(storage)?,
            ChatType::Direct => None,
        };
        let peer_ids = self
            .store
            .participant_user_ids(&chat.id)
            .await
            .map_err(storage)?
            .into_iter()
            .filter(|id| *id != participant.user_id)
            .collect();
        Ok(ChatListItem {
            chat,
            participant,
            group,
            peer_ids,
        })
    }
}

fn storage(e: anyhow::Error) -> AppError {
    AppError {
        code: ErrorCode::Internal,
        message: "chat store failure".into(),
        source: Some(e.into()),
    }
}

fn new_participant(chat_id: &str, user_id: &str, role: Role, joined_at: DateTime<Utc>) -> Participant {
    Participant {
        chat_id: chat_id.to_string(),
        user_id: user_id.to_string(),
        role,
        is_muted: false,
        mute_until: None,
        is_pinned: false,
        auto_delete_secs: None,
        joined_at,
    }
}

#[async_trait]
impl ChatService for LocalChatService {
    async fn check_permission(&self, chat_id: &str, user_id: &str) -> Result<ChatPermission> {
        let Some(participant) = self
            .store
            .participant(chat_id, user_id)
            .await
            .map_err(storage)?
        else {
            return Ok(ChatPermission {
                is_member: false,
                chat_type: None,
                is_admin_only: false,
                is_admin: false,
            });
        };

        let chat = self.store.get(chat_id).await.map_err(storage)?;
        let chat_type = chat.map(|c| c.chat_type);
        let is_admin_only = match chat_type {
            Some(ChatType::Group) => self
                .store
                .get_group(chat_id)
                .await
                .map_err(storage)?
                .is_some_and(|g| g.is_admin_only),
            _ => false,
        };

        Ok(ChatPermission {
            is_member: true,
            chat_type,
            is_admin_only,
            is_admin: participant.role == Role::Admin,
        })
    }

    async fn participant_user_ids(&self, chat_id: &str) -> Result<Vec<String>> {
        self.store
            .participant_user_ids(chat_id)
            .await
            .map_err(storage)
    }

    async fn user_chat_ids(&self, user_id: &str) -> Result<Vec<String>> {
        self.store.user_chat_ids(user_id).await.map_err(storage)
    }

    async fn create_direct(&self, caller: &str, peer: &str) -> Result<Chat> {
        if caller == peer {
            return Err(AppError::bad_request("cannot open a direct chat with yourself"));
        }
        // Idempotent: an existing direct chat between the pair is returned.
        if let Some(existing) = self.store.find_direct(caller, peer).await.map_err(storage)? {
            return Ok(existing);
        }

        let now = Utc::now();
        let chat = Chat {
            id: uuid::Uuid::new_v4().to_string(),
            chat_type: ChatType::Direct,
            created_at: now,
            updated_at: now,
        };
        self.store
            .create_direct(&chat, [
                &new_participant(&chat.id, caller, Role::Member, now),
                &new_participant(&chat.id, peer, Role::Member, now),
            ])
            .await
            .map_err(storage)?;

        info!(chat_id = %chat.id, "direct chat created");
        self.events
            .chat_created(&chat.id, chat.chat_type.as_str(), &[
                caller.to_string(),
                peer.to_string(),
            ])
            .await;
        Ok(chat)
    }

    async fn create_group(
        &self,
        caller: &str,
        req: CreateGroupRequest,
    ) -> Result<(Chat, GroupInfo)> {
        if req.name.trim().is_empty() {
            return Err(AppError::bad_request("group name is required"));
        }

        let now = Utc::now();
        let chat = Chat {
            id: uuid::Uuid::new_v4().to_string(),
            chat_type: ChatType::Group,
            created_at: now,
            updated_at: now,
        };
        let group = GroupInfo {
            chat_id: chat.id.clone(),
            name: req.name,
            description: req.description,
            avatar_url: None,
            created_by: caller.to_string(),
            is_admin_only: req.is_admin_only,
        };

        let mut member_ids: Vec<String> = vec![caller.to_string()];
        let mut seen: HashSet<&str> = HashSet::from([caller]);
        for id in &req.member_ids {
            if seen.insert(id.as_str()) {
                member_ids.push(id.clone());
            }
        }
        let participants: Vec<Participant> = member_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let role = if id == caller { Role::Admin } else { Role::Member };
                // Stagger joins so "oldest member" is well defined.
                new_participant(&chat.id, id, role, now + chrono::Duration::microseconds(i as i64))
            })
            .collect();

        self.store
            .create_group(&chat, &group, &participants)
            .await
            .map_err(storage)?;

        info!(chat_id = %chat.id, members = member_ids.len(), "group created");
        self.events
            .chat_created(&chat.id, chat.chat_type.as_str(), &member_ids)
            .await;
        Ok((chat, group))
    }

    async fn list_chats(&self, user_id: &str) -> Result<Vec<ChatListItem>> {
        let rows = self.store.chats_for_user(user_id).await.map_err(storage)?;
        let mut items = Vec::with_capacity(rows.len());
        for (chat, participant) in rows {
            items.push(self.list_item(chat, participant).await?);
        }
        Ok(items)
    }

    async fn get_chat(&self, caller: &str, chat_id: &str) -> Result<ChatListItem> {
        let participant = self.require_member(chat_id, caller).await?;
        let chat = self
            .store
            .get(chat_id)
            .await
            .map_err(storage)?
            .ok_or_else(|| AppError::new(ErrorCode::ChatNotFound, "chat not found"))?;
        self.list_item(chat, participant).await
    }

    async fn add_member(&self, caller: &str, chat_id: &str, target: &str) -> Result<()> {
        self.require_group(chat_id).await?;
        self.require_admin(chat_id, caller).await?;

        if self
            .store
            .participant(chat_id, target)
            .await
            .map_err(storage)?
            .is_some()
        {
            return Err(AppError::new(ErrorCode::AlreadyMember, "already a member"));
        }

        self.store
            .add_participant(&new_participant(chat_id, target, Role::Member, Utc::now()))
            .await
            .map_err(storage)?;

        let participants = self.participant_user_ids(chat_id).await?;
        self.events
            .member_added(chat_id, target, caller, &participants)
            .await;
        Ok(())
    }

    async fn remove_member(&self, caller: &str, chat_id: &str, target: &str) -> Result<()> {
        self.require_group(chat_id).await?;
        if caller != target {
            self.require_admin(chat_id, caller).await?;
        }
        self.require_member(chat_id, target).await?;

        let promoted = self
            .store
            .remove_participant_promoting(chat_id, target)
            .await
            .map_err(storage)?;

        let participants = self.participant_user_ids(chat_id).await?;
        self.events
            .member_removed(chat_id, target, caller, &participants)
            .await;
        if let Some(promoted) = promoted {
            info!(chat_id, user_id = %promoted, "promoted oldest member to admin");
            self.events.chat_updated(chat_id, &participants).await;
        }
        Ok(())
    }

    async fn promote_member(&self, caller: &str, chat_id: &str, target: &str) -> Result<()> {
        self.require_group(chat_id).await?;
        self.require_admin(chat_id, caller).await?;
        self.require_member(chat_id, target).await?;
        self.store
            .update_role(chat_id, target, Role::Admin)
            .await
            .map_err(storage)?;
        let participants = self.participant_user_ids(chat_id).await?;
        self.events.chat_updated(chat_id, &participants).await;
        Ok(())
    }

    async fn demote_member(&self, caller: &str, chat_id: &str, target: &str) -> Result<()> {
        self.require_group(chat_id).await?;
        self.require_admin(chat_id, caller).await?;
        self.require_member(chat_id, target).await?;
        self.store
            .update_role(chat_id, target, Role::Member)
            .await
            .map_err(storage)?;
        let participants = self.participant_user_ids(chat_id).await?;
        self.events.chat_updated(chat_id, &participants).await;
        Ok(())
    }

    async fn update_group(
        &self,
        caller: &str,
        chat_id: &str,
        req: UpdateGroupRequest,
    ) -> Result<()> {
        self.require_group(chat_id).await?;
        self.require_admin(chat_id, caller).await?;
        self.store.update_group(chat_id, &req).await.map_err(storage)?;
        let participants = self.participant_user_ids(chat_id).await?;
        self.events.chat_updated(chat_id, &participants).await;
        Ok(())
    }

    async fn set_mute(
        &self,
        user_id: &str,
        chat_id: &str,
        mute: bool,
        mute_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.require_member(chat_id, user_id).await?;
        self.store
            .set_mute(chat_id, user_id, mute, mute_until)
            .await
            .map_err(storage)
    }

    async fn set_pin(&self, user_id: &str, chat_id: &str, pin: bool) -> Result<()> {
        self.require_member(chat_id, user_id).await?;
        self.store.set_pin(chat_id, user_id, pin).await.map_err(storage)
    }

    async fn set_disappearing(
        &self,
        user_id: &str,
        chat_id: &str,
        timer_secs: Option<i64>,
    ) -> Result<()> {
        if let Some(secs) = timer_secs
            && !AUTO_DELETE_TIMERS.contains(&secs)
        {
            return Err(AppError::bad_request(
                "timer must be one of 86400, 604800, 7776000 seconds",
            ));
        }
        self.require_member(chat_id, user_id).await?;
        self.store
            .set_auto_delete(chat_id, user_id, timer_secs)
            .await
            .map_err(storage)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::SqliteChatStore;
    use parley_bus::MemoryDurableBus;

    async fn service() -> LocalChatService {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteChatStore::init(&pool).await.unwrap();
        LocalChatService::new(
            Arc::new(SqliteChatStore::new(pool)),
            Arc::new(MemoryDurableBus::new()),
        )
    }

    #[tokio::test]
    async fn direct_chat_is_idempotent() {
        let svc = service().await;
        let first = svc.create_direct("alice", "bob").await.unwrap();
        let second = svc.create_direct("alice", "bob").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn direct_chat_with_self_is_rejected() {
        let svc = service().await;
        let err = svc.create_direct("alice", "alice").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn admin_only_permission_shape() {
        let svc = service().await;
        let (chat, _) = svc
            .create_group("alice", CreateGroupRequest {
                name: "team".into(),
                description: String::new(),
                member_ids: vec!["bob".into()],
                is_admin_only: true,
            })
            .await
            .unwrap();

        let alice = svc.check_permission(&chat.id, "alice").await.unwrap();
        assert!(alice.is_member && alice.is_admin && alice.is_admin_only);

        let bob = svc.check_permission(&chat.id, "bob").await.unwrap();
        assert!(bob.is_member && !bob.is_admin && bob.is_admin_only);

        let eve = svc.check_permission(&chat.id, "eve").await.unwrap();
        assert!(!eve.is_member);
    }

    #[tokio::test]
    async fn duplicate_member_conflicts() {
        let svc = service().await;
        let (chat, _) = svc
            .create_group("alice", CreateGroupRequest {
                name: "team".into(),
                description: String::new(),
                member_ids: vec!["bob".into()],
                is_admin_only: false,
            })
            .await
            .unwrap();

        let err = svc.add_member("alice", &chat.id, "bob").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyMember);
    }

    #[tokio::test]
    async fn non_admin_cannot_add_members() {
        let svc = service().await;
        let (chat, _) = svc
            .create_group("alice", CreateGroupRequest {
                name: "team".into(),
                description: String::new(),
                member_ids: vec!["bob".into()],
                is_admin_only: false,
            })
            .await
            .unwrap();

        let err = svc.add_member("bob", &chat.id, "carol").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAdmin);
    }

    #[tokio::test]
    async fn self_leave_promotes_oldest() {
        let svc = service().await;
        let (chat, _) = svc
            .create_group("alice", CreateGroupRequest {
                name: "team".into(),
                description: String::new(),
                member_ids: vec!["bob".into(), "carol".into()],
                is_admin_only: false,
            })
            .await
            .unwrap();

        // Self-removal by the only admin.
        svc.remove_member("alice", &chat.id, "alice").await.unwrap();

        let bob = svc.check_permission(&chat.id, "bob").await.unwrap();
        assert!(bob.is_admin, "oldest remaining member becomes admin");
    }

    #[tokio::test]
    async fn disappearing_timer_is_validated() {
        let svc = service().await;
        let chat = svc.create_direct("alice", "bob").await.unwrap();
        assert!(svc.set_disappearing("alice", &chat.id, Some(86_400)).await.is_ok());
        let err = svc
            .set_disappearing("alice", &chat.id, Some(1234))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
    }
}
