use std::collections::HashMap;

use {
    anyhow::Result,
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    sqlx::SqlitePool,
};

use parley_protocol::{DeliveryState, MessageContent, MessageKind};

use crate::model::{ForwardedFrom, Message, Reaction, Receipt, RecipientStatus};

/// Outcome of a status upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    /// The recipient's state advanced; an event should be published.
    Transitioned,
    /// Same or lower state: accepted silently, nothing published.
    NoOp,
    /// No such message.
    NotFound,
}

/// Persistence seam for messages and their per-recipient state.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert with `client_msg_id` idempotency. Returns the row and whether
    /// it was newly inserted; a dedupe hit returns the pre-existing row.
    async fn insert(&self, msg: &Message) -> Result<(Message, bool)>;

    async fn get(&self, message_id: &str) -> Result<Option<Message>>;

    /// Cursor pagination over `(created_at, message_id)` descending.
    /// Deleted messages and rows hidden for `viewer` are excluded.
    async fn list_by_chat(
        &self,
        chat_id: &str,
        viewer: &str,
        cursor: Option<(&str, &str)>,
        limit: i64,
        starred_only: bool,
    ) -> Result<Vec<Message>>;

    /// Monotonic per-recipient status upsert: only rank-increasing
    /// transitions take effect, enforced in a single guarded statement.
    async fn update_status(
        &self,
        message_id: &str,
        user_id: &str,
        status: DeliveryState,
    ) -> Result<StatusUpdate>;

    /// Mark deleted and clear the payload. Only matches the sender's row.
    async fn soft_delete(&self, message_id: &str, sender_id: &str) -> Result<bool>;
    /// Hide a message for one user only.
    async fn hide_for_user(&self, message_id: &str, user_id: &str) -> Result<()>;

    async fn set_starred(&self, message_id: &str, user_id: &str, starred: bool) -> Result<()>;

    /// Replace-or-insert the user's single reaction slot.
    async fn upsert_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<()>;
    async fn remove_reaction(&self, message_id: &str, user_id: &str) -> Result<()>;

    async fn search(&self, chat_ids: &[String], query: &str, limit: i64) -> Result<Vec<Message>>;
    async fn last_per_chat(&self, chat_ids: &[String]) -> Result<HashMap<String, Message>>;
    async fn count_unread(
        &self,
        user_id: &str,
        chat_ids: &[String],
    ) -> Result<HashMap<String, i64>>;
    async fn receipts(&self, message_id: &str) -> Result<Vec<Receipt>>;

    /// Soft-delete messages older than their chat's disappearing timer.
    /// Returns the number of rows swept.
    async fn sweep_expired(&self, timer_secs: i64, cutoff: DateTime<Utc>) -> Result<u64>;
}

// ── SQLite implementation ────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct MessageRow {
    message_id: String,
    chat_id: String,
    sender_id: String,
    client_msg_id: Option<String>,
    kind: String,
    content: String,
    reply_to_message_id: Option<String>,
    forwarded_from_chat_id: Option<String>,
    forwarded_from_message_id: Option<String>,
    is_deleted: bool,
    created_at: String,
    updated_at: String,
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn fmt_ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_kind(s: &str) -> Result<MessageKind> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| anyhow::anyhow!("unknown message kind {s}"))
}

impl MessageRow {
    fn into_message(self) -> Result<Message> {
        let forwarded_from = match (self.forwarded_from_chat_id, self.forwarded_from_message_id) {
            (Some(chat_id), Some(message_id)) => Some(ForwardedFrom {
                chat_id,
                message_id,
            }),
            _ => None,
        };
        Ok(Message {
            kind: parse_kind(&self.kind)?,
            payload: serde_json::from_str::<MessageContent>(&self.content)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            message_id: self.message_id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            client_msg_id: self.client_msg_id,
            reply_to_message_id: self.reply_to_message_id,
            reply_to_preview: None,
            forwarded_from,
            status: HashMap::new(),
            reactions: Vec::new(),
            is_deleted: self.is_deleted,
            is_starred_by: Vec::new(),
        })
    }
}

/// SQLite-backed message store.
///
/// Per-recipient status, reactions, stars, and per-user hides live in side
/// tables keyed `(message_id, user_id)` so the single-slot invariants are
/// enforced by primary keys rather than read-modify-write.
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the message tables when missing. Idempotent.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                message_id                TEXT    PRIMARY KEY,
                chat_id                   TEXT    NOT NULL,
                sender_id                 TEXT    NOT NULL,
                client_msg_id             TEXT,
                kind                      TEXT    NOT NULL,
                content                   TEXT    NOT NULL,
                reply_to_message_id       TEXT,
                forwarded_from_chat_id    TEXT,
                forwarded_from_message_id TEXT,
                is_deleted                INTEGER NOT NULL DEFAULT 0,
                created_at                TEXT    NOT NULL,
                updated_at                TEXT    NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_client_msg
               ON messages (client_msg_id) WHERE client_msg_id IS NOT NULL"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_messages_chat_created
               ON messages (chat_id, created_at DESC, message_id DESC)"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS message_status (
                message_id TEXT NOT NULL,
                user_id    TEXT NOT NULL,
                status     TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS message_reactions (
                message_id TEXT NOT NULL,
                user_id    TEXT NOT NULL,
                emoji      TEXT NOT NULL,
                reacted_at TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS message_stars (
                message_id TEXT NOT NULL,
                user_id    TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            )"#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS message_hidden (
                message_id TEXT NOT NULL,
                user_id    TEXT NOT NULL,
                PRIMARY KEY (message_id, user_id)
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn hydrate(&self, mut msg: Message) -> Result<Message> {
        #[derive(sqlx::FromRow)]
        struct StatusRow {
            user_id: String,
            status: String,
            updated_at: String,
        }
        let statuses = sqlx::query_as::<_, StatusRow>(
            "SELECT user_id, status, updated_at FROM message_status WHERE message_id = ?",
        )
        .bind(&msg.message_id)
        .fetch_all(&self.pool)
        .await?;
        for row in statuses {
            let Some(status) = DeliveryState::parse(&row.status) else {
                continue;
            };
            msg.status.insert(row.user_id, RecipientStatus {
                status,
                updated_at: parse_ts(&row.updated_at)?,
            });
        }

        #[derive(sqlx::FromRow)]
        struct ReactionRow {
            user_id: String,
            emoji: String,
            reacted_at: String,
        }
        let reactions = sqlx::query_as::<_, ReactionRow>(
            "SELECT user_id, emoji, reacted_at FROM message_reactions WHERE message_id = ? ORDER BY reacted_at",
        )
        .bind(&msg.message_id)
        .fetch_all(&self.pool)
        .await?;
        msg.reactions = reactions
            .into_iter()
            .map(|r| {
                Ok(Reaction {
                    user_id: r.user_id,
                    emoji: r.emoji,
                    reacted_at: parse_ts(&r.reacted_at)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        msg.is_starred_by =
            sqlx::query_scalar("SELECT user_id FROM message_stars WHERE message_id = ?")
                .bind(&msg.message_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(msg)
    }

    async fn hydrate_all(&self, rows: Vec<MessageRow>) -> Result<Vec<Message>> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.hydrate(row.into_message()?).await?);
        }
        Ok(out)
    }

    async fn get_by_client_msg_id(&self, client_msg_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE client_msg_id = ?",
        )
        .bind(client_msg_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(Some(self.hydrate(r.into_message()?).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, msg: &Message) -> Result<(Message, bool)> {
        let result = sqlx::query(
            r#"INSERT INTO messages
               (message_id, chat_id, sender_id, client_msg_id, kind, content,
                reply_to_message_id, forwarded_from_chat_id, forwarded_from_message_id,
                is_deleted, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
               ON CONFLICT(client_msg_id) WHERE client_msg_id IS NOT NULL DO NOTHING"#,
        )
        .bind(&msg.message_id)
        .bind(&msg.chat_id)
        .bind(&msg.sender_id)
        .bind(&msg.client_msg_id)
        .bind(msg.kind.as_str())
        .bind(serde_json::to_string(&msg.payload)?)
        .bind(&msg.reply_to_message_id)
        .bind(msg.forwarded_from.as_ref().map(|f| f.chat_id.clone()))
        .bind(msg.forwarded_from.as_ref().map(|f| f.message_id.clone()))
        .bind(fmt_ts(&msg.created_at))
        .bind(fmt_ts(&msg.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let client_msg_id = msg
                .client_msg_id
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("insert conflict without client_msg_id"))?;
            let existing = self
                .get_by_client_msg_id(client_msg_id)
                .await?
                .ok_or_else(|| {
                    anyhow::anyhow!("duplicate client_msg_id but existing row not found")
                })?;
            return Ok((existing, false));
        }
        Ok((msg.clone(), true))
    }

    async fn get(&self, message_id: &str) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE message_id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(self.hydrate(r.into_message()?).await?)),
            None => Ok(None),
        }
    }

    async fn list_by_chat(
        &self,
        chat_id: &str,
        viewer: &str,
        cursor: Option<(&str, &str)>,
        limit: i64,
        starred_only: bool,
    ) -> Result<Vec<Message>> {
        let mut sql = String::from(
            r#"SELECT m.* FROM messages m
               WHERE m.chat_id = ? AND m.is_deleted = 0
                 AND NOT EXISTS (SELECT 1 FROM message_hidden h
                                 WHERE h.message_id = m.message_id AND h.user_id = ?)"#,
        );
        if starred_only {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM message_stars s \
                 WHERE s.message_id = m.message_id AND s.user_id = ?)",
            );
        }
        if cursor.is_some() {
            sql.push_str(
                " AND (m.created_at < ? OR (m.created_at = ? AND m.message_id < ?))",
            );
        }
        sql.push_str(" ORDER BY m.created_at DESC, m.message_id DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, MessageRow>(&sql).bind(chat_id).bind(viewer);
        if starred_only {
            query = query.bind(viewer);
        }
        if let Some((cursor_ts, cursor_id)) = cursor {
            query = query.bind(cursor_ts).bind(cursor_ts).bind(cursor_id);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;
        self.hydrate_all(rows).await
    }

    async fn update_status(
        &self,
        message_id: &str,
        user_id: &str,
        status: DeliveryState,
    ) -> Result<StatusUpdate> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM messages WHERE message_id = ?)")
                .bind(message_id)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Ok(StatusUpdate::NotFound);
        }

        let sql = format!(
            r#"INSERT INTO message_status (message_id, user_id, status, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(message_id, user_id) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at
               WHERE ({rank_old}) < ({rank_new})"#,
            rank_old = "CASE message_status.status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 ELSE 2 END",
            rank_new = "CASE excluded.status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 ELSE 2 END",
        );
        let result = sqlx::query(&sql)
            .bind(message_id)
            .bind(user_id)
            .bind(status.as_str())
            .bind(fmt_ts(&Utc::now()))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            Ok(StatusUpdate::NoOp)
        } else {
            Ok(StatusUpdate::Transitioned)
        }
    }

    async fn soft_delete(&self, message_id: &str, sender_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE messages SET is_deleted = 1, content = '{}', updated_at = ?
               WHERE message_id = ? AND sender_id = ?"#,
        )
        .bind(fmt_ts(&Utc::now()))
        .bind(message_id)
        .bind(sender_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn hide_for_user(&self, message_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO message_hidden (message_id, user_id) VALUES (?, ?)")
            .bind(message_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_starred(&self, message_id: &str, user_id: &str, starred: bool) -> Result<()> {
        if starred {
            sqlx::query("INSERT OR IGNORE INTO message_stars (message_id, user_id) VALUES (?, ?)")
                .bind(message_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("DELETE FROM message_stars WHERE message_id = ? AND user_id = ?")
                .bind(message_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn upsert_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<()> {
        // The (message_id, user_id) primary key makes "remove any previous
        // reaction by this user, then add" a single atomic statement.
        sqlx::query(
            r#"INSERT INTO message_reactions (message_id, user_id, emoji, reacted_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(message_id, user_id) DO UPDATE SET
                 emoji = excluded.emoji,
                 reacted_at = excluded.reacted_at"#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .bind(fmt_ts(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_reaction(&self, message_id: &str, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM message_reactions WHERE message_id = ? AND user_id = ?")
            .bind(message_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search(&self, chat_ids: &[String], query: &str, limit: i64) -> Result<Vec<Message>> {
        if chat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; chat_ids.len()].join(", ");
        let sql = format!(
            r#"SELECT * FROM messages
               WHERE chat_id IN ({placeholders}) AND is_deleted = 0
                 AND json_extract(content, '$.body') LIKE ? ESCAPE '\'
               ORDER BY created_at DESC LIMIT ?"#,
        );
        let mut q = sqlx::query_as::<_, MessageRow>(&sql);
        for id in chat_ids {
            q = q.bind(id);
        }
        let rows = q
            .bind(format!(
                "%{}%",
                query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
            ))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate_all(rows).await
    }

    async fn last_per_chat(&self, chat_ids: &[String]) -> Result<HashMap<String, Message>> {
        let mut out = HashMap::new();
        for chat_id in chat_ids {
            let row = sqlx::query_as::<_, MessageRow>(
                r#"SELECT * FROM messages WHERE chat_id = ? AND is_deleted = 0
                   ORDER BY created_at DESC, message_id DESC LIMIT 1"#,
            )
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(r) = row {
                out.insert(chat_id.clone(), self.hydrate(r.into_message()?).await?);
            }
        }
        Ok(out)
    }

    async fn count_unread(
        &self,
        user_id: &str,
        chat_ids: &[String],
    ) -> Result<HashMap<String, i64>> {
        let mut out = HashMap::new();
        for chat_id in chat_ids {
            let count: i64 = sqlx::query_scalar(
                r#"SELECT COUNT(*) FROM messages m
                   WHERE m.chat_id = ? AND m.sender_id != ? AND m.is_deleted = 0
                     AND NOT EXISTS (SELECT 1 FROM message_status s
                                     WHERE s.message_id = m.message_id
                                       AND s.user_id = ? AND s.status = 'read')
                     AND NOT EXISTS (SELECT 1 FROM message_hidden h
                                     WHERE h.message_id = m.message_id AND h.user_id = ?)"#,
            )
            .bind(chat_id)
            .bind(user_id)
            .bind(user_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
            out.insert(chat_id.clone(), count);
        }
        Ok(out)
    }

    async fn receipts(&self, message_id: &str) -> Result<Vec<Receipt>> {
        #[derive(sqlx::FromRow)]
        struct ReceiptRow {
            user_id: String,
            status: String,
            updated_at: String,
        }
        let rows = sqlx::query_as::<_, ReceiptRow>(
            "SELECT user_id, status, updated_at FROM message_status WHERE message_id = ? ORDER BY updated_at",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .filter_map(|r| DeliveryState::parse(&r.status).map(|s| (r, s)))
            .map(|(r, status)| {
                Ok(Receipt {
                    user_id: r.user_id,
                    status,
                    updated_at: parse_ts(&r.updated_at)?,
                })
            })
            .collect()
    }

    async fn sweep_expired(&self, timer_secs: i64, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"UPDATE messages SET is_deleted = 1, content = '{}', updated_at = ?
               WHERE is_deleted = 0 AND created_at < ?
                 AND chat_id IN (SELECT DISTINCT chat_id FROM chat_participants
                                 WHERE auto_delete_secs = ?)"#,
        )
        .bind(fmt_ts(&Utc::now()))
        .bind(fmt_ts(&cutoff))
        .bind(timer_secs)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteMessageStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteMessageStore::init(&pool).await.unwrap();
        // The sweeper joins against chat participants.
        parley_chats::SqliteChatStore::init(&pool).await.unwrap();
        SqliteMessageStore::new(pool)
    }

    fn text_message(id: &str, chat_id: &str, sender: &str, client_msg_id: Option<&str>) -> Message {
        let now = Utc::now();
        Message {
            message_id: id.into(),
            chat_id: chat_id.into(),
            sender_id: sender.into(),
            client_msg_id: client_msg_id.map(Into::into),
            kind: MessageKind::Text,
            payload: MessageContent::text("hi"),
            reply_to_message_id: None,
            reply_to_preview: None,
            forwarded_from: None,
            status: HashMap::new(),
            reactions: Vec::new(),
            is_deleted: false,
            is_starred_by: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_client_msg_id_returns_existing_row() {
        let store = test_store().await;
        let first = text_message("m1", "c1", "alice", Some("k1"));
        let (_, inserted) = store.insert(&first).await.unwrap();
        assert!(inserted);

        let retry = text_message("m2", "c1", "alice", Some("k1"));
        let (existing, inserted) = store.insert(&retry).await.unwrap();
        assert!(!inserted);
        assert_eq!(existing.message_id, "m1");

        // Exactly one row persisted.
        let listed = store.list_by_chat("c1", "bob", None, 50, false).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn status_transitions_are_monotonic() {
        let store = test_store().await;
        store
            .insert(&text_message("m1", "c1", "alice", None))
            .await
            .unwrap();

        assert_eq!(
            store.update_status("m1", "bob", DeliveryState::Delivered).await.unwrap(),
            StatusUpdate::Transitioned
        );
        assert_eq!(
            store.update_status("m1", "bob", DeliveryState::Read).await.unwrap(),
            StatusUpdate::Transitioned
        );
        // Backwards and repeated transitions are no-ops, not errors.
        assert_eq!(
            store.update_status("m1", "bob", DeliveryState::Delivered).await.unwrap(),
            StatusUpdate::NoOp
        );
        assert_eq!(
            store.update_status("m1", "bob", DeliveryState::Read).await.unwrap(),
            StatusUpdate::NoOp
        );

        let msg = store.get("m1").await.unwrap().unwrap();
        assert_eq!(msg.status["bob"].status, DeliveryState::Read);
    }

    #[tokio::test]
    async fn unknown_message_status_is_not_found() {
        let store = test_store().await;
        assert_eq!(
            store.update_status("nope", "bob", DeliveryState::Read).await.unwrap(),
            StatusUpdate::NotFound
        );
    }

    #[tokio::test]
    async fn reaction_slot_is_replaced_not_appended() {
        let store = test_store().await;
        store
            .insert(&text_message("m1", "c1", "alice", None))
            .await
            .unwrap();

        store.upsert_reaction("m1", "bob", "👍").await.unwrap();
        store.upsert_reaction("m1", "bob", "❤️").await.unwrap();
        store.upsert_reaction("m1", "carol", "😂").await.unwrap();

        let msg = store.get("m1").await.unwrap().unwrap();
        assert_eq!(msg.reactions.len(), 2);
        let bob = msg.reactions.iter().find(|r| r.user_id == "bob").unwrap();
        assert_eq!(bob.emoji, "❤️");
    }

    #[tokio::test]
    async fn soft_delete_clears_payload_and_checks_sender() {
        let store = test_store().await;
        store
            .insert(&text_message("m1", "c1", "alice", None))
            .await
            .unwrap();

        assert!(!store.soft_delete("m1", "bob").await.unwrap());
        assert!(store.soft_delete("m1", "alice").await.unwrap());

        let msg = store.get("m1").await.unwrap().unwrap();
        assert!(msg.is_deleted);
        assert!(msg.payload.is_empty());
    }

    #[tokio::test]
    async fn hidden_rows_are_filtered_per_user() {
        let store = test_store().await;
        store
            .insert(&text_message("m1", "c1", "alice", None))
            .await
            .unwrap();
        store.hide_for_user("m1", "bob").await.unwrap();

        assert!(store.list_by_chat("c1", "bob", None, 50, false).await.unwrap().is_empty());
        assert_eq!(store.list_by_chat("c1", "alice", None, 50, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cursor_pagination_walks_backwards() {
        let store = test_store().await;
        let base = Utc::now();
        for i in 0..5 {
            let mut m = text_message(&format!("m{i}"), "c1", "alice", None);
            m.created_at = base + chrono::Duration::seconds(i);
            m.updated_at = m.created_at;
            store.insert(&m).await.unwrap();
        }

        let first = store.list_by_chat("c1", "bob", None, 2, false).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message_id, "m4");

        let last = first.last().unwrap();
        let cursor_ts = fmt_ts(&last.created_at);
        let second = store
            .list_by_chat("c1", "bob", Some((&cursor_ts, &last.message_id)), 2, false)
            .await
            .unwrap();
        assert_eq!(second[0].message_id, "m2");
    }

    #[tokio::test]
    async fn unread_counts_ignore_own_and_read_messages() {
        let store = test_store().await;
        store.insert(&text_message("m1", "c1", "alice", None)).await.unwrap();
        store.insert(&text_message("m2", "c1", "alice", None)).await.unwrap();
        store.insert(&text_message("m3", "c1", "bob", None)).await.unwrap();
        store.update_status("m1", "bob", DeliveryState::Read).await.unwrap();

        let counts = store
            .count_unread("bob", &["c1".to_string()])
            .await
            .unwrap();
        // m2 is unread; m1 is read; m3 is bob's own.
        assert_eq!(counts["c1"], 1);
    }

    #[tokio::test]
    async fn sweep_respects_participant_timer() {
        let store = test_store().await;
        let pool = &store.pool;

        sqlx::query(
            "INSERT INTO chat_participants (chat_id, user_id, role, joined_at) VALUES ('c1', 'alice', 'member', ?)",
        )
        .bind(fmt_ts(&Utc::now()))
        .execute(pool)
        .await
        .unwrap();
        sqlx::query("UPDATE chat_participants SET auto_delete_secs = 86400 WHERE chat_id = 'c1'")
            .execute(pool)
            .await
            .unwrap();

        let mut old = text_message("m-old", "c1", "alice", None);
        old.created_at = Utc::now() - chrono::Duration::days(2);
        old.updated_at = old.created_at;
        store.insert(&old).await.unwrap();
        store.insert(&text_message("m-new", "c1", "alice", None)).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::seconds(86_400);
        let swept = store.sweep_expired(86_400, cutoff).await.unwrap();
        assert_eq!(swept, 1);

        assert!(store.get("m-old").await.unwrap().unwrap().is_deleted);
        assert!(!store.get("m-new").await.unwrap().unwrap().is_deleted);
    }
}
