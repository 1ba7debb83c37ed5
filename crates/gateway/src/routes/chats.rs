use std::sync::Arc;

use {
    axum::{
        Extension, Json, Router,
        extract::{Path, State},
        routing::{delete, get, patch, post},
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use {
    parley_chats::{Chat, ChatListItem, CreateGroupRequest, GroupInfo, UpdateGroupRequest},
    parley_messages::Message,
};

use crate::{
    auth::Identity,
    error::{ApiResult, ok},
    state::GatewayState,
};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", get(list))
        .route("/direct", post(create_direct))
        .route("/group", post(create_group))
        .route("/{id}", get(get_one).patch(update_group))
        .route("/{id}/members", post(add_member))
        .route("/{id}/members/{user_id}", delete(remove_member))
        .route("/{id}/members/{user_id}/promote", post(promote))
        .route("/{id}/members/{user_id}/demote", post(demote))
        .route("/{id}/mute", post(mute))
        .route("/{id}/pin", post(pin))
        .route("/{id}/disappearing", patch(disappearing))
}

/// Chat-list row enriched for the list screen.
#[derive(Serialize)]
struct ChatOverview {
    #[serde(flatten)]
    item: ChatListItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_message: Option<Message>,
    unread_count: i64,
}

async fn list(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Vec<ChatOverview>> {
    let items = state.services.chats.list_chats(&identity.user_id).await?;
    let chat_ids: Vec<String> = items.iter().map(|i| i.chat.id.clone()).collect();

    let mut previews = state.services.messages.last_per_chat(&chat_ids).await?;
    let mut unread = state
        .services
        .messages
        .count_unread(&identity.user_id, &chat_ids)
        .await?;

    let overviews = items
        .into_iter()
        .map(|item| {
            let last_message = previews.remove(&item.chat.id);
            let unread_count = unread.remove(&item.chat.id).unwrap_or(0);
            ChatOverview {
                item,
                last_message,
                unread_count,
            }
        })
        .collect();
    ok(overviews)
}

#[derive(Deserialize)]
struct CreateDirectRequest {
    user_id: String,
}

async fn create_direct(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateDirectRequest>,
) -> ApiResult<Chat> {
    let chat = state
        .services
        .chats
        .create_direct(&identity.user_id, &req.user_id)
        .await?;
    ok(chat)
}

#[derive(Serialize)]
struct CreatedGroup {
    chat: Chat,
    group: GroupInfo,
}

async fn create_group(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<CreatedGroup> {
    let (chat, group) = state
        .services
        .chats
        .create_group(&identity.user_id, req)
        .await?;
    ok(CreatedGroup { chat, group })
}

async fn get_one(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<ChatListItem> {
    let item = state.services.chats.get_chat(&identity.user_id, &id).await?;
    ok(item)
}

async fn update_group(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(req): Json<UpdateGroupRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .chats
        .update_group(&identity.user_id, &id, req)
        .await?;
    ok(serde_json::json!({ "chat_id": id }))
}

#[derive(Deserialize)]
struct AddMemberRequest {
    user_id: String,
}

async fn add_member(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .chats
        .add_member(&identity.user_id, &id, &req.user_id)
        .await?;
    ok(serde_json::json!({ "chat_id": id, "user_id": req.user_id }))
}

async fn remove_member(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .chats
        .remove_member(&identity.user_id, &id, &user_id)
        .await?;
    ok(serde_json::json!({ "chat_id": id, "user_id": user_id }))
}

async fn promote(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .chats
        .promote_member(&identity.user_id, &id, &user_id)
        .await?;
    ok(serde_json::json!({ "chat_id": id, "user_id": user_id }))
}

async fn demote(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path((id, user_id)): Path<(String, String)>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .chats
        .demote_member(&identity.user_id, &id, &user_id)
        .await?;
    ok(serde_json::json!({ "chat_id": id, "user_id": user_id }))
}

#[derive(Deserialize)]
struct MuteRequest {
    muted: bool,
    #[serde(default)]
    mute_until: Option<DateTime<Utc>>,
}

async fn mute(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(req): Json<MuteRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .chats
        .set_mute(&identity.user_id, &id, req.muted, req.mute_until)
        .await?;
    ok(serde_json::json!({ "chat_id": id, "muted": req.muted }))
}

#[derive(Deserialize)]
struct PinRequest {
    pinned: bool,
}

async fn pin(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(req): Json<PinRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .chats
        .set_pin(&identity.user_id, &id, req.pinned)
        .await?;
    ok(serde_json::json!({ "chat_id": id, "pinned": req.pinned }))
}

#[derive(Deserialize)]
struct DisappearingRequest {
    #[serde(default)]
    timer_secs: Option<i64>,
}

async fn disappearing(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(req): Json<DisappearingRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .chats
        .set_disappearing(&identity.user_id, &id, req.timer_secs)
        .await?;
    ok(serde_json::json!({ "chat_id": id, "timer_secs": req.timer_secs }))
}
