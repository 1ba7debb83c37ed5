use std::{sync::Arc, time::Duration};

use {
    chrono::Utc,
    tokio_util::sync::CancellationToken,
    tracing::{error, info},
};

use crate::store::MessageStore;

/// Disappearing-message thresholds: 24h, 7d, 90d.
const THRESHOLDS_SECS: &[i64] = &[86_400, 604_800, 7_776_000];

/// Periodic background task that soft-deletes messages older than the
/// per-participant disappearing timer.
pub struct DisappearingSweeper {
    store: Arc<dyn MessageStore>,
    interval: Duration,
}

impl DisappearingSweeper {
    pub fn new(store: Arc<dyn MessageStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "disappearing-messages sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep_once().await,
                _ = shutdown.cancelled() => {
                    info!("disappearing-messages sweeper stopped");
                    return;
                },
            }
        }
    }

    pub async fn sweep_once(&self) {
        let mut total = 0u64;
        for &threshold in THRESHOLDS_SECS {
            let cutoff = Utc::now() - chrono::Duration::seconds(threshold);
            match self.store.sweep_expired(threshold, cutoff).await {
                Ok(count) => total += count,
                Err(e) => {
                    error!(threshold_secs = threshold, error = %e, "sweep failed");
                },
            }
        }
        if total > 0 {
            info!(swept = total, "cleaned up disappearing messages");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{model::Message, store::SqliteMessageStore};
    use parley_protocol::{MessageContent, MessageKind};
    use std::collections::HashMap;

    #[tokio::test]
    async fn sweep_once_soft_deletes_expired_rows() {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteMessageStore::init(&pool).await.unwrap();
        parley_chats::SqliteChatStore::init(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO chat_participants (chat_id, user_id, role, auto_delete_secs, joined_at)
             VALUES ('c1', 'alice', 'member', 86400, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await
        .unwrap();

        let store = Arc::new(SqliteMessageStore::new(pool));
        let old = Utc::now() - chrono::Duration::days(3);
        let msg = Message {
            message_id: "m-old".into(),
            chat_id: "c1".into(),
            sender_id: "alice".into(),
            client_msg_id: None,
            kind: MessageKind::Text,
            payload: MessageContent::text("fading"),
            reply_to_message_id: None,
            reply_to_preview: None,
            forwarded_from: None,
            status: HashMap::new(),
            reactions: Vec::new(),
            is_deleted: false,
            is_starred_by: Vec::new(),
            created_at: old,
            updated_at: old,
        };
        use crate::store::MessageStore as _;
        store.insert(&msg).await.unwrap();

        let sweeper =
            DisappearingSweeper::new(store.clone(), Duration::from_secs(300));
        sweeper.sweep_once().await;

        let swept = store.get("m-old").await.unwrap().unwrap();
        assert!(swept.is_deleted);
        assert!(swept.payload.is_empty());
    }
}
