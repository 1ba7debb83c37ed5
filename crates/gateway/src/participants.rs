use tracing::{debug, warn};

use parley_bus::subjects::key;

use crate::state::GatewayState;

/// Resolve a chat's participant ids, cached in the ephemeral store with a
/// short TTL. Membership events invalidate the key (see `fanout`).
pub async fn chat_participants(state: &GatewayState, chat_id: &str) -> Vec<String> {
    let cache_key = key::participants(chat_id);

    match state.kv.get(&cache_key).await {
        Ok(Some(cached)) => {
            if let Ok(ids) = serde_json::from_str::<Vec<String>>(&cached)
                && !ids.is_empty()
            {
                return ids;
            }
        },
        Ok(None) => {},
        Err(e) => warn!(chat_id, error = %e, "participant cache read failed"),
    }

    let ids = match state.services.chats.participant_user_ids(chat_id).await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(chat_id, error = %e, "failed to resolve chat participants");
            return Vec::new();
        },
    };

    if !ids.is_empty()
        && let Ok(json) = serde_json::to_string(&ids)
        && let Err(e) = state
            .kv
            .set_ex(&cache_key, &json, state.participants_ttl)
            .await
    {
        warn!(chat_id, error = %e, "participant cache write failed");
    }

    ids
}

/// Drop the cached participant list; called on membership mutations so a
/// just-removed member cannot keep receiving fan-out for up to one TTL.
pub async fn invalidate(state: &GatewayState, chat_id: &str) {
    if let Err(e) = state.kv.del(&key::participants(chat_id)).await {
        warn!(chat_id, error = %e, "participant cache invalidation failed");
    } else {
        debug!(chat_id, "participant cache invalidated");
    }
}
