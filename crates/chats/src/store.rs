use {
    anyhow::Result,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::SqlitePool,
};

use crate::model::{Chat, ChatType, GroupInfo, Participant, Role, UpdateGroupRequest};

/// Persistence seam for chats, participants, and group metadata.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_direct(&self, chat: &Chat, participants: [&Participant; 2]) -> Result<()>;
    async fn find_direct(&self, user_a: &str, user_b: &str) -> Result<Option<Chat>>;
    async fn create_group(
        &self,
        chat: &Chat,
        group: &GroupInfo,
        participants: &[Participant],
    ) -> Result<()>;

    async fn get(&self, chat_id: &str) -> Result<Option<Chat>>;
    async fn get_group(&self, chat_id: &str) -> Result<Option<GroupInfo>>;
    async fn update_group(&self, chat_id: &str, req: &UpdateGroupRequest) -> Result<()>;

    async fn participants(&self, chat_id: &str) -> Result<Vec<Participant>>;
    async fn participant(&self, chat_id: &str, user_id: &str) -> Result<Option<Participant>>;
    async fn participant_user_ids(&self, chat_id: &str) -> Result<Vec<String>>;
    async fn user_chat_ids(&self, user_id: &str) -> Result<Vec<String>>;
    async fn chats_for_user(&self, user_id: &str) -> Result<Vec<(Chat, Participant)>>;

    async fn add_participant(&self, participant: &Participant) -> Result<()>;
    async fn remove_participant(&self, chat_id: &str, user_id: &str) -> Result<()>;
    /// Remove a participant and, when they are the last admin of a group
    /// with remaining members, promote the oldest remaining member, both
    /// inside one transaction. Returns the promoted user id, if any.
    async fn remove_participant_promoting(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<Option<String>>;
    async fn update_role(&self, chat_id: &str, user_id: &str, role: Role) -> Result<()>;

    async fn set_mute(
        &self,
        chat_id: &str,
        user_id: &str,
        muted: bool,
        mute_until: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn set_pin(&self, chat_id: &str, user_id: &str, pinned: bool) -> Result<()>;
    async fn set_auto_delete(
        &self,
        chat_id: &str,
        user_id: &str,
        timer_secs: Option<i64>,
    ) -> Result<()>;
}

// ── SQLite implementation ────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: String,
    chat_type: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ChatRow> for Chat {
    type Error = anyhow::Error;

    fn try_from(r: ChatRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            chat_type: ChatType::parse(&r.chat_type)
                .ok_or_else(|| anyhow::anyhow!("unknown chat type {}", r.chat_type))?,
            created_at: parse_ts(&r.created_at)?,
            updated_at: parse_ts(&r.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    chat_id: String,
    user_id: String,
    role: String,
    is_muted: bool,
    mute_until: Option<String>,
    is_pinned: bool,
    auto_delete_secs: Option<i64>,
    joined_at: String,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = anyhow::Error;

    fn try_from(r: ParticipantRow) -> Result<Self> {
        Ok(Self {
            chat_id: r.chat_id,
            user_id: r.user_id,
            role: if r.role == "admin" {
                Role::Admin
            } else {
                Role::Member
            },
            is_muted: r.is_muted,
            mute_until: r.mute_until.as_deref().map(parse_ts).transpose()?,
            is_pinned: r.is_pinned,
            auto_delete_secs: r.auto_delete_secs,
            joined_at: parse_ts(&r.joined_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    chat_id: String,
    name: String,
    description: String,
    avatar_url: Option<String>,
    created_by: String,
    is_admin_only: bool,
}

impl From<GroupRow> for GroupInfo {
    fn from(r: GroupRow) -> Self {
        Self {
            chat_id: r.chat_id,
            name: r.name,
            description: r.description,
            avatar_url: r.avatar_url,
            created_by: r.created_by,
            is_admin_only: r.is_admin_only,
        }
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn fmt_ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// SQLite-backed chat store.
pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the chat tables when missing. Idempotent.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chats (
                id         TEXT PRIMARY KEY,
                chat_type  TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_participants (
                chat_id          TEXT    NOT NULL,
                user_id          TEXT    NOT NULL,
                role             TEXT    NOT NULL DEFAULT 'member',
                is_muted         INTEGER NOT NULL DEFAULT 0,
                mute_until       TEXT,
                is_pinned        INTEGER NOT NULL DEFAULT 0,
                auto_delete_secs INTEGER,
                joined_at        TEXT    NOT NULL,
                PRIMARY KEY (chat_id, user_id)
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_participants_user
               ON chat_participants (user_id)"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_groups (
                chat_id       TEXT    PRIMARY KEY,
                name          TEXT    NOT NULL,
                description   TEXT    NOT NULL DEFAULT '',
                avatar_url    TEXT,
                created_by    TEXT    NOT NULL,
                is_admin_only INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

async fn insert_participant<'e, E>(executor: E, p: &Participant) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"INSERT INTO chat_participants
           (chat_id, user_id, role, is_muted, mute_until, is_pinned, auto_delete_secs, joined_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&p.chat_id)
    .bind(&p.user_id)
    .bind(p.role.as_str())
    .bind(p.is_muted)
    .bind(p.mute_until.as_ref().map(fmt_ts))
    .bind(p.is_pinned)
    .bind(p.auto_delete_secs)
    .bind(fmt_ts(&p.joined_at))
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn create_direct(&self, chat: &Chat, participants: [&Participant; 2]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO chats (id, chat_type, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&chat.id)
            .bind(chat.chat_type.as_str())
            .bind(fmt_ts(&chat.created_at))
            .bind(fmt_ts(&chat.updated_at))
            .execute(&mut *tx)
            .await?;
        for p in participants {
            insert_participant(&mut *tx, p).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_direct(&self, user_a: &str, user_b: &str) -> Result<Option<Chat>> {
        let row = sqlx::query_as::<_, ChatRow>(
            r#"SELECT c.id, c.chat_type, c.created_at, c.updated_at
               FROM chats c
               JOIN chat_participants pa ON c.id = pa.chat_id AND pa.user_id = ?
               JOIN chat_participants pb ON c.id = pb.chat_id AND pb.user_id = ?
               WHERE c.chat_type = 'direct'
               LIMIT 1"#,
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn create_group(
        &self,
        chat: &Chat,
        group: &GroupInfo,
        participants: &[Participant],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO chats (id, chat_type, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(&chat.id)
            .bind(chat.chat_type.as_str())
            .bind(fmt_ts(&chat.created_at))
            .bind(fmt_ts(&chat.updated_at))
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"INSERT INTO chat_groups
               (chat_id, name, description, avatar_url, created_by, is_admin_only)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&group.chat_id)
        .bind(&group.name)
        .bind(&group.description)
        .bind(&group.avatar_url)
        .bind(&group.created_by)
        .bind(group.is_admin_only)
        .execute(&mut *tx)
        .await?;
        for p in participants {
            insert_participant(&mut *tx, p).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, chat_id: &str) -> Result<Option<Chat>> {
        let row = sqlx::query_as::<_, ChatRow>(
            "SELECT id, chat_type, created_at, updated_at FROM chats WHERE id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_group(&self, chat_id: &str) -> Result<Option<GroupInfo>> {
        let row = sqlx::query_as::<_, GroupRow>(
            r#"SELECT chat_id, name, description, avatar_url, created_by, is_admin_only
               FROM chat_groups WHERE chat_id = ?"#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn update_group(&self, chat_id: &str, req: &UpdateGroupRequest) -> Result<()> {
        if req.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"UPDATE chat_groups SET
                 name          = COALESCE(?, name),
                 description   = COALESCE(?, description),
                 avatar_url    = COALESCE(?, avatar_url),
                 is_admin_only = COALESCE(?, is_admin_only)
               WHERE chat_id = ?"#,
        )
        .bind(&req.name)
        .bind(&req.description)
        .bind(&req.avatar_url)
        .bind(req.is_admin_only)
        .bind(chat_id)
        .execute(&self.pool)
        .await?;
        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(fmt_ts(&Utc::now()))
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn participants(&self, chat_id: &str) -> Result<Vec<Participant>> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            "SELECT * FROM chat_participants WHERE chat_id = ? ORDER BY joined_at",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn participant(&self, chat_id: &str, user_id: &str) -> Result<Option<Participant>> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            "SELECT * FROM chat_participants WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn participant_user_ids(&self, chat_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM chat_participants WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn user_chat_ids(&self, user_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT chat_id FROM chat_participants WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn chats_for_user(&self, user_id: &str) -> Result<Vec<(Chat, Participant)>> {
        let chat_ids = self.user_chat_ids(user_id).await?;
        let mut out = Vec::with_capacity(chat_ids.len());
        for chat_id in chat_ids {
            let (Some(chat), Some(p)) = (
                self.get(&chat_id).await?,
                self.participant(&chat_id, user_id).await?,
            ) else {
                continue;
            };
            out.push((chat, p));
        }
        Ok(out)
    }

    async fn add_participant(&self, participant: &Participant) -> Result<()> {
        insert_participant(&self.pool, participant).await
    }

    async fn remove_participant(&self, chat_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chat_participants WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_participant_promoting(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> Result<Option<String>> {
        let mut tx = self.pool.begin().await?;

        let admin_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chat_participants WHERE chat_id = ? AND role = 'admin'",
        )
        .bind(chat_id)
        .fetch_one(&mut *tx)
        .await?;
        let leaving_is_admin: bool = sqlx::query_scalar(
            "SELECT role = 'admin' FROM chat_participants WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(false);

        let mut promoted = None;
        if leaving_is_admin && admin_count == 1 {
            // Promote the oldest remaining member, if anyone stays behind.
            let oldest: Option<String> = sqlx::query_scalar(
                r#"SELECT user_id FROM chat_participants
                   WHERE chat_id = ? AND user_id != ?
                   ORDER BY joined_at LIMIT 1"#,
            )
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(ref next_admin) = oldest {
                sqlx::query(
                    "UPDATE chat_participants SET role = 'admin' WHERE chat_id = ? AND user_id = ?",
                )
                .bind(chat_id)
                .bind(next_admin)
                .execute(&mut *tx)
                .await?;
                promoted = oldest;
            }
        }

        sqlx::query("DELETE FROM chat_participants WHERE chat_id = ? AND user_id = ?")
            .bind(chat_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(promoted)
    }

    async fn update_role(&self, chat_id: &str, user_id: &str, role: Role) -> Result<()> {
        sqlx::query("UPDATE chat_participants SET role = ? WHERE chat_id = ? AND user_id = ?")
            .bind(role.as_str())
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_mute(
        &self,
        chat_id: &str,
        user_id: &str,
        muted: bool,
        mute_until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE chat_participants SET is_muted = ?, mute_until = ? WHERE chat_id = ? AND user_id = ?",
        )
        .bind(muted)
        .bind(mute_until.as_ref().map(fmt_ts))
        .bind(chat_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_pin(&self, chat_id: &str, user_id: &str, pinned: bool) -> Result<()> {
        sqlx::query("UPDATE chat_participants SET is_pinned = ? WHERE chat_id = ? AND user_id = ?")
            .bind(pinned)
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_auto_delete(
        &self,
        chat_id: &str,
        user_id: &str,
        timer_secs: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE chat_participants SET auto_delete_secs = ? WHERE chat_id = ? AND user_id = ?",
        )
        .bind(timer_secs)
        .bind(chat_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteChatStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteChatStore::init(&pool).await.unwrap();
        SqliteChatStore::new(pool)
    }

    fn chat(id: &str, chat_type: ChatType) -> Chat {
        let now = Utc::now();
        Chat {
            id: id.into(),
            chat_type,
            created_at: now,
            updated_at: now,
        }
    }

    fn member(chat_id: &str, user_id: &str, role: Role, joined_at: DateTime<Utc>) -> Participant {
        Participant {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            role,
            is_muted: false,
            mute_until: None,
            is_pinned: false,
            auto_delete_secs: None,
            joined_at,
        }
    }

    #[tokio::test]
    async fn direct_chat_round_trip() {
        let store = test_store().await;
        let c = chat("c1", ChatType::Direct);
        let now = Utc::now();
        store
            .create_direct(&c, [
                &member("c1", "alice", Role::Member, now),
                &member("c1", "bob", Role::Member, now),
            ])
            .await
            .unwrap();

        let found = store.find_direct("alice", "bob").await.unwrap().unwrap();
        assert_eq!(found.id, "c1");
        // Symmetric lookup.
        assert!(store.find_direct("bob", "alice").await.unwrap().is_some());

        let ids = store.participant_user_ids("c1").await.unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn last_admin_removal_promotes_oldest_member() {
        let store = test_store().await;
        let c = chat("g1", ChatType::Group);
        let base = Utc::now();
        let group = GroupInfo {
            chat_id: "g1".into(),
            name: "g".into(),
            description: String::new(),
            avatar_url: None,
            created_by: "alice".into(),
            is_admin_only: false,
        };
        store
            .create_group(&c, &group, &[
                member("g1", "alice", Role::Admin, base),
                member("g1", "bob", Role::Member, base + chrono::Duration::seconds(1)),
                member("g1", "carol", Role::Member, base + chrono::Duration::seconds(2)),
            ])
            .await
            .unwrap();

        let promoted = store
            .remove_participant_promoting("g1", "alice")
            .await
            .unwrap();
        assert_eq!(promoted.as_deref(), Some("bob"));

        let bob = store.participant("g1", "bob").await.unwrap().unwrap();
        assert_eq!(bob.role, Role::Admin);
        assert!(store.participant("g1", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_last_admin_removal_does_not_promote() {
        let store = test_store().await;
        let c = chat("g2", ChatType::Group);
        let base = Utc::now();
        let group = GroupInfo {
            chat_id: "g2".into(),
            name: "g".into(),
            description: String::new(),
            avatar_url: None,
            created_by: "alice".into(),
            is_admin_only: false,
        };
        store
            .create_group(&c, &group, &[
                member("g2", "alice", Role::Admin, base),
                member("g2", "bob", Role::Admin, base + chrono::Duration::seconds(1)),
                member("g2", "carol", Role::Member, base + chrono::Duration::seconds(2)),
            ])
            .await
            .unwrap();

        let promoted = store
            .remove_participant_promoting("g2", "alice")
            .await
            .unwrap();
        assert!(promoted.is_none());
        let carol = store.participant("g2", "carol").await.unwrap().unwrap();
        assert_eq!(carol.role, Role::Member);
    }

    #[tokio::test]
    async fn group_update_patches_only_given_fields() {
        let store = test_store().await;
        let c = chat("g3", ChatType::Group);
        let group = GroupInfo {
            chat_id: "g3".into(),
            name: "old".into(),
            description: "desc".into(),
            avatar_url: None,
            created_by: "alice".into(),
            is_admin_only: false,
        };
        store
            .create_group(&c, &group, &[member("g3", "alice", Role::Admin, Utc::now())])
            .await
            .unwrap();

        store
            .update_group("g3", &UpdateGroupRequest {
                name: Some("new".into()),
                is_admin_only: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let g = store.get_group("g3").await.unwrap().unwrap();
        assert_eq!(g.name, "new");
        assert_eq!(g.description, "desc");
        assert!(g.is_admin_only);
    }
}
