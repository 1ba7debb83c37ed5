use std::sync::Arc;

use {
    axum::{
        Extension, Json, Router,
        extract::{Path, Query, State},
        routing::{delete, get, post},
    },
    serde::Deserialize,
};

use {
    parley_common::{AppError, Page},
    parley_messages::{ListMessagesQuery, Message, Receipt, SendMessageRequest},
    parley_protocol::DeliveryState,
};

use crate::{
    auth::Identity,
    error::{ApiResult, ok, ok_with_meta},
    state::GatewayState,
};

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/", post(send).get(list))
        .route("/read", post(mark_read))
        .route("/search", get(search))
        .route("/search-global", get(search_global))
        .route("/{id}", delete(remove))
        .route("/{id}/forward", post(forward))
        .route("/{id}/star", post(star).delete(unstar))
        .route("/{id}/react", post(react).delete(unreact))
        .route("/{id}/receipts", get(receipts))
}

async fn send(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Message> {
    let msg = state
        .services
        .messages
        .send_message(&identity.user_id, req)
        .await?;
    ok(msg)
}

async fn list(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Page<Message>> {
    require_membership(&state, &query.chat_id, &identity.user_id).await?;
    let (items, next) = state
        .services
        .messages
        .list_messages(&identity.user_id, query)
        .await?;

    match next {
        Some((cursor, cursor_id)) => ok_with_meta(
            Page::new(items, Some(cursor)),
            serde_json::json!({ "nextCursorId": cursor_id }),
        ),
        None => ok(Page::new(items, None)),
    }
}

#[derive(Deserialize)]
struct MarkReadRequest {
    message_id: String,
}

async fn mark_read(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .messages
        .update_status(&req.message_id, &identity.user_id, DeliveryState::Read)
        .await?;
    ok(serde_json::json!({ "message_id": req.message_id }))
}

#[derive(Deserialize)]
struct DeleteQuery {
    /// `me` (default) or `everyone`.
    #[serde(rename = "for", default)]
    scope: Option<String>,
}

async fn remove(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<serde_json::Value> {
    let for_everyone = match query.scope.as_deref() {
        None | Some("me") => false,
        Some("everyone") => true,
        Some(other) => {
            return Err(AppError::bad_request(format!("invalid scope: {other}")).into());
        },
    };
    state
        .services
        .messages
        .delete_message(&id, &identity.user_id, for_everyone)
        .await?;
    ok(serde_json::json!({ "message_id": id }))
}

#[derive(Deserialize)]
struct ForwardRequest {
    target_chat_id: String,
}

async fn forward(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(req): Json<ForwardRequest>,
) -> ApiResult<Message> {
    let msg = state
        .services
        .messages
        .forward_message(&identity.user_id, &req.target_chat_id, &id)
        .await?;
    ok(msg)
}

async fn star(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .messages
        .set_starred(&id, &identity.user_id, true)
        .await?;
    ok(serde_json::json!({ "message_id": id }))
}

async fn unstar(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .messages
        .set_starred(&id, &identity.user_id, false)
        .await?;
    ok(serde_json::json!({ "message_id": id }))
}

#[derive(Deserialize)]
struct ReactRequest {
    emoji: String,
}

async fn react(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(req): Json<ReactRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .messages
        .react(&id, &identity.user_id, &req.emoji)
        .await?;
    ok(serde_json::json!({ "message_id": id }))
}

async fn unreact(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state
        .services
        .messages
        .unreact(&id, &identity.user_id)
        .await?;
    ok(serde_json::json!({ "message_id": id }))
}

async fn receipts(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Receipt>> {
    let receipts = state
        .services
        .messages
        .receipts(&id, &identity.user_id)
        .await?;
    ok(receipts)
}

#[derive(Deserialize)]
struct SearchQuery {
    chat_id: String,
    q: String,
    #[serde(default)]
    limit: Option<i64>,
}

async fn search(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Vec<Message>> {
    require_membership(&state, &query.chat_id, &identity.user_id).await?;
    let results = state
        .services
        .messages
        .search(&[query.chat_id], &query.q, query.limit.unwrap_or(20))
        .await?;
    ok(results)
}

#[derive(Deserialize)]
struct GlobalSearchQuery {
    q: String,
    #[serde(default)]
    limit: Option<i64>,
}

async fn search_global(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<GlobalSearchQuery>,
) -> ApiResult<Vec<Message>> {
    let chat_ids = state.services.chats.user_chat_ids(&identity.user_id).await?;
    let results = state
        .services
        .messages
        .search(&chat_ids, &query.q, query.limit.unwrap_or(20))
        .await?;
    ok(results)
}

async fn require_membership(
    state: &GatewayState,
    chat_id: &str,
    user_id: &str,
) -> Result<(), AppError> {
    let perm = state.services.chats.check_permission(chat_id, user_id).await?;
    if !perm.is_member {
        return Err(AppError::new(
            parley_common::ErrorCode::NotChatMember,
            "not a member of this chat",
        ));
    }
    Ok(())
}
